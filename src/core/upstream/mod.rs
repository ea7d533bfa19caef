//! Deepgram streaming connection management.

pub mod config;
pub mod connection;
pub mod state;

pub use config::{
    DEFAULT_DEEPGRAM_MODEL, DEFAULT_DEEPGRAM_URL, SessionConfigMessage, UpstreamSettings,
};
pub use connection::{
    ConnectTarget, UPSTREAM_CHANNEL_SIZE, UpstreamCommand, UpstreamConnection, UpstreamConnector,
    UpstreamEvent,
};
pub use state::{InvalidTransition, UpstreamInput, UpstreamState, UpstreamStateMachine};
