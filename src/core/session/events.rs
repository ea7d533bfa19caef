use std::fmt;
use std::time::Duration;

use crate::core::protocol::{ErrorNotice, Frame, close_code};
use crate::core::upstream::UpstreamEvent;
use crate::errors::RelayError;

/// Messages delivered to a session task by its helpers
#[derive(Debug)]
pub enum SessionSignal {
    /// Event from the upstream connection with the given generation
    Upstream {
        generation: u64,
        event: UpstreamEvent,
    },
    IdleTimeout {
        idle: Duration,
    },
    SafetyTimeout {
        limit: Duration,
    },
    /// The client writer could not deliver a frame
    ClientSendFailed(String),
}

/// Inbound traffic from the client socket, already stripped of ping/pong
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Frame(Frame),
    Closed,
    Failed(String),
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownReason {
    ClientClosed,
    ClientError(String),
    /// Upstream closed with a normal status; never retried
    UpstreamClosed { code: Option<u16>, reason: String },
    /// Non-retryable upstream failure
    UpstreamFailed(RelayError),
    ReconnectExhausted { attempts: u32 },
    IdleTimeout { idle: Duration },
    SafetyTimeout { limit: Duration },
    Shutdown,
}

impl TeardownReason {
    /// Whether the client side is already gone
    pub fn client_gone(&self) -> bool {
        matches!(
            self,
            TeardownReason::ClientClosed | TeardownReason::ClientError(_)
        )
    }

    pub fn close_code(&self) -> u16 {
        match self {
            TeardownReason::ClientClosed | TeardownReason::ClientError(_) => close_code::NORMAL,
            TeardownReason::UpstreamClosed { .. }
            | TeardownReason::UpstreamFailed(_)
            | TeardownReason::ReconnectExhausted { .. } => close_code::UPSTREAM_UNAVAILABLE,
            TeardownReason::IdleTimeout { .. } => close_code::IDLE_TIMEOUT,
            TeardownReason::SafetyTimeout { .. } => close_code::SAFETY_TIMEOUT,
            TeardownReason::Shutdown => close_code::GOING_AWAY,
        }
    }

    /// Error sent to a still-writable client before the close frame
    pub fn notice(&self) -> Option<ErrorNotice> {
        if self.client_gone() {
            return None;
        }
        Some(ErrorNotice::new(self.to_string(), self.close_code()))
    }

    /// Equivalent error for reasons that count as failures
    pub fn as_error(&self) -> Option<RelayError> {
        match self {
            TeardownReason::ClientError(e) => Some(RelayError::ClientSend(e.clone())),
            TeardownReason::UpstreamFailed(e) => Some(e.clone()),
            TeardownReason::ReconnectExhausted { attempts } => {
                Some(RelayError::ReconnectExhausted {
                    attempts: *attempts,
                })
            }
            TeardownReason::IdleTimeout { idle } => Some(RelayError::InactivityTimeout {
                idle_secs: idle.as_secs(),
            }),
            TeardownReason::SafetyTimeout { limit } => Some(RelayError::SafetyTimeout {
                limit_secs: limit.as_secs(),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeardownReason::ClientClosed => f.write_str("Client closed the connection"),
            TeardownReason::ClientError(e) => write!(f, "Client connection failed: {e}"),
            TeardownReason::UpstreamClosed { code, reason } => match code {
                Some(code) => write!(f, "Speech service closed the stream ({code}): {reason}"),
                None => write!(f, "Speech service closed the stream: {reason}"),
            },
            TeardownReason::UpstreamFailed(e) => write!(f, "{e}"),
            TeardownReason::ReconnectExhausted { attempts } => write!(
                f,
                "Speech service unavailable after {attempts} reconnection attempts"
            ),
            TeardownReason::IdleTimeout { idle } => {
                write!(f, "Session closed after {}s without activity", idle.as_secs())
            }
            TeardownReason::SafetyTimeout { limit } => write!(
                f,
                "Session reached its maximum duration of {}s",
                limit.as_secs()
            ),
            TeardownReason::Shutdown => f.write_str("Server is shutting down"),
        }
    }
}
