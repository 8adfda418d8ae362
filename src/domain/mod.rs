// Core event and trade types
pub mod events;

// Domain-specific error types
pub mod errors;

// Port interfaces
pub mod ports;

// Lot-size quantization
pub mod sizing;
