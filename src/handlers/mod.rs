//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check and status endpoints
//! - `relay` - Audio relay WebSocket

pub mod api;
pub mod relay;

// Re-export commonly used handlers for convenient access
pub use relay::relay_handler;
