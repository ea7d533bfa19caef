//! Relay error taxonomy
//!
//! Every failure a session can observe maps to one of these variants. None of
//! them terminate the process: the session that hit the error logs it and either
//! reconnects upstream or tears itself down.

use thiserror::Error;

/// Errors produced by the relay core
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// The admission controller is at capacity; no session was created
    #[error("Server at capacity ({capacity} active sessions)")]
    AdmissionRejected { capacity: usize },

    /// Opening the upstream connection failed or timed out
    #[error("Failed to connect to upstream: {0}")]
    UpstreamConnect(String),

    /// The upstream connection ended without a normal close
    #[error("Upstream closed abnormally (code {code:?}): {reason}")]
    UpstreamAbnormalClose { code: Option<u16>, reason: String },

    /// Writing to the upstream socket failed
    #[error("Failed to send to upstream: {0}")]
    UpstreamSend(String),

    /// Writing to the client socket failed
    #[error("Failed to send to client: {0}")]
    ClientSend(String),

    /// A text frame looked like configuration but was not a valid control frame
    #[error("Invalid configuration frame: {0}")]
    ConfigParse(String),

    /// No frame was forwarded for longer than the idle threshold
    #[error("Session idle for {idle_secs}s")]
    InactivityTimeout { idle_secs: u64 },

    /// The session reached its maximum lifetime
    #[error("Session exceeded maximum lifetime of {limit_secs}s")]
    SafetyTimeout { limit_secs: u64 },

    /// Upstream reconnection gave up
    #[error("Upstream unavailable after {attempts} reconnection attempts")]
    ReconnectExhausted { attempts: u32 },

    /// Invalid relay or provider configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RelayError {
    /// Whether the Reconnection Manager should handle this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayError::UpstreamConnect(_) | RelayError::UpstreamAbnormalClose { .. }
        )
    }
}

/// Result type alias for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
