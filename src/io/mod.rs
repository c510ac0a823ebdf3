//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `store` - Reading source, position store and session store (JSONL)
//! - `directory` - Gateway / area directory HTTP client
//! - `feed` - Positions feed HTTP client (session sink)
//! - `http` - Trigger HTTP server

pub mod directory;
pub mod feed;
pub mod http;
pub mod store;

// Re-export commonly used types
pub use directory::{AreaDirectory, GatewayDirectory, HttpDirectory};
pub use feed::PositionsFeed;
pub use http::{start_trigger_server, ServerState};
pub use store::{
    JsonlPositionStore, JsonlReadingSource, PositionStore, ReadingSource, SessionSink, SessionStore,
};
