// Bybit V5 REST gateway
pub mod bybit;

// Shared HTTP plumbing
pub mod core;

// WebSocket announcement feed source
pub mod feed;

// Mock collaborators for dry runs and tests
pub mod mock;

// Push-based metrics
pub mod observability;

// Telegram polling source and notifier
pub mod telegram;
