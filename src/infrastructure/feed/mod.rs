pub mod ws_source;

pub use ws_source::WsFeedSource;
