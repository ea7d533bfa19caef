//! Upstream connection state machine.
//!
//! The current state lives in a `watch` channel so timers (the keepalive in
//! particular) can check it without going through the session task.

use std::fmt;

use tokio::sync::watch;
use tracing::{debug, warn};

/// Lifecycle of a session's upstream link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamState {
    Connecting,
    Open,
    Reconnecting,
    Closing,
    Closed,
}

impl fmt::Display for UpstreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpstreamState::Connecting => "connecting",
            UpstreamState::Open => "open",
            UpstreamState::Reconnecting => "reconnecting",
            UpstreamState::Closing => "closing",
            UpstreamState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Inputs driving [`UpstreamState`] transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamInput {
    /// A new connection attempt starts
    Connect,
    /// Handshake finished and the session config was sent
    Opened,
    /// Connect error, timeout or abnormal close
    Failed,
    /// The relay asked the link to close
    Close,
    /// The link is gone for good
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid upstream transition from {from} on {input:?}")]
pub struct InvalidTransition {
    pub from: UpstreamState,
    pub input: UpstreamInput,
}

/// Transition table; `None` means the input is not valid in that state
pub fn next_state(from: UpstreamState, input: UpstreamInput) -> Option<UpstreamState> {
    use UpstreamInput as I;
    use UpstreamState as S;

    match (from, input) {
        (S::Closed | S::Reconnecting, I::Connect) => Some(S::Connecting),
        (S::Connecting, I::Opened) => Some(S::Open),
        (S::Connecting | S::Open, I::Failed) => Some(S::Reconnecting),
        (S::Connecting | S::Open | S::Reconnecting, I::Close) => Some(S::Closing),
        (S::Closed, I::Close) => Some(S::Closed),
        (S::Connecting | S::Open | S::Closing | S::Closed, I::Finished) => Some(S::Closed),
        _ => None,
    }
}

/// Observable upstream state owned by one session
#[derive(Debug)]
pub struct UpstreamStateMachine {
    tx: watch::Sender<UpstreamState>,
}

impl UpstreamStateMachine {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(UpstreamState::Closed);
        Self { tx }
    }

    pub fn current(&self) -> UpstreamState {
        *self.tx.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.current() == UpstreamState::Open
    }

    pub fn subscribe(&self) -> watch::Receiver<UpstreamState> {
        self.tx.subscribe()
    }

    /// Apply an input, leaving the state untouched when the transition is invalid
    pub fn apply(&self, input: UpstreamInput) -> Result<UpstreamState, InvalidTransition> {
        let from = self.current();
        match next_state(from, input) {
            Some(to) => {
                if to != from {
                    debug!(%from, %to, "Upstream state transition");
                }
                self.tx.send_replace(to);
                Ok(to)
            }
            None => {
                warn!(%from, ?input, "Ignoring invalid upstream transition");
                Err(InvalidTransition { from, input })
            }
        }
    }

    /// Drive the machine to `Closed` from wherever it is
    pub fn force_closed(&self) {
        self.tx.send_replace(UpstreamState::Closed);
    }
}

impl Default for UpstreamStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use UpstreamInput as I;
    use UpstreamState as S;

    #[test]
    fn test_happy_path() {
        let fsm = UpstreamStateMachine::new();
        assert_eq!(fsm.current(), S::Closed);
        assert_eq!(fsm.apply(I::Connect), Ok(S::Connecting));
        assert_eq!(fsm.apply(I::Opened), Ok(S::Open));
        assert!(fsm.is_open());
        assert_eq!(fsm.apply(I::Close), Ok(S::Closing));
        assert_eq!(fsm.apply(I::Finished), Ok(S::Closed));
    }

    #[test]
    fn test_failure_then_retry() {
        let fsm = UpstreamStateMachine::new();
        fsm.apply(I::Connect).unwrap();
        assert_eq!(fsm.apply(I::Failed), Ok(S::Reconnecting));
        assert_eq!(fsm.apply(I::Connect), Ok(S::Connecting));
        fsm.apply(I::Opened).unwrap();
        assert_eq!(fsm.apply(I::Failed), Ok(S::Reconnecting));
    }

    #[test]
    fn test_invalid_transitions_keep_state() {
        let fsm = UpstreamStateMachine::new();
        let err = fsm.apply(I::Opened).unwrap_err();
        assert_eq!(err.from, S::Closed);
        assert_eq!(fsm.current(), S::Closed);

        fsm.apply(I::Connect).unwrap();
        fsm.apply(I::Opened).unwrap();
        assert!(fsm.apply(I::Connect).is_err());
        assert_eq!(fsm.current(), S::Open);
    }

    #[test]
    fn test_close_is_idempotent_once_closed() {
        let fsm = UpstreamStateMachine::new();
        assert_eq!(fsm.apply(I::Close), Ok(S::Closed));
        assert_eq!(fsm.apply(I::Finished), Ok(S::Closed));
    }

    #[test]
    fn test_subscribers_observe_changes() {
        let fsm = UpstreamStateMachine::new();
        let rx = fsm.subscribe();
        fsm.apply(I::Connect).unwrap();
        fsm.apply(I::Opened).unwrap();
        assert_eq!(*rx.borrow(), S::Open);

        fsm.apply(I::Failed).unwrap();
        assert_eq!(*rx.borrow(), S::Reconnecting);
    }
}
