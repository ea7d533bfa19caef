//! Upstream reconnection with capped exponential backoff.

use std::time::Duration;

/// Backoff parameters shared by all sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (zero-based): `min(base * 2^attempt, cap)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |delay| delay.min(self.cap))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPhase {
    Connected,
    Disconnected,
    Reconnecting,
    Exhausted,
}

/// What the session should do after losing its upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Try again after `delay`; `attempt` counts from 1
    Retry { attempt: u32, delay: Duration },
    /// Stop retrying and close the session
    Exhausted { attempts: u32 },
}

/// Per-session reconnection bookkeeping
#[derive(Debug, Clone)]
pub struct Reconnector {
    policy: BackoffPolicy,
    attempts: u32,
    phase: ReconnectPhase,
}

impl Reconnector {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            phase: ReconnectPhase::Disconnected,
        }
    }

    pub fn phase(&self) -> ReconnectPhase {
        self.phase
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// A connection reached Open; the attempt counter starts over
    pub fn on_connected(&mut self) {
        self.attempts = 0;
        self.phase = ReconnectPhase::Connected;
    }

    /// A connection failed or closed abnormally
    pub fn on_disconnected(&mut self) -> ReconnectDecision {
        if self.phase == ReconnectPhase::Exhausted || self.attempts >= self.policy.max_attempts {
            self.phase = ReconnectPhase::Exhausted;
            return ReconnectDecision::Exhausted {
                attempts: self.attempts,
            };
        }

        let delay = self.policy.delay_for(self.attempts);
        self.attempts += 1;
        self.phase = ReconnectPhase::Reconnecting;
        ReconnectDecision::Retry {
            attempt: self.attempts,
            delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(1000),
            cap: Duration::from_millis(10_000),
            max_attempts: 5,
        }
    }

    #[test]
    fn test_delays_double_until_cap() {
        let policy = policy();
        let delays: Vec<u64> = (0..6)
            .map(|attempt| policy.delay_for(attempt).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10_000, 10_000]);
    }

    #[test]
    fn test_delay_never_overflows() {
        assert_eq!(policy().delay_for(64), Duration::from_millis(10_000));
        assert_eq!(policy().delay_for(u32::MAX), Duration::from_millis(10_000));
    }

    #[test]
    fn test_exhausts_after_max_attempts() {
        let mut reconnector = Reconnector::new(policy());
        for expected in 1..=5 {
            match reconnector.on_disconnected() {
                ReconnectDecision::Retry { attempt, .. } => assert_eq!(attempt, expected),
                other => panic!("expected retry, got {other:?}"),
            }
            assert_eq!(reconnector.phase(), ReconnectPhase::Reconnecting);
        }

        assert_eq!(
            reconnector.on_disconnected(),
            ReconnectDecision::Exhausted { attempts: 5 }
        );
        assert_eq!(reconnector.phase(), ReconnectPhase::Exhausted);
        assert!(matches!(
            reconnector.on_disconnected(),
            ReconnectDecision::Exhausted { .. }
        ));
    }

    #[test]
    fn test_success_resets_attempts() {
        let mut reconnector = Reconnector::new(policy());
        reconnector.on_disconnected();
        reconnector.on_disconnected();
        assert_eq!(reconnector.attempts(), 2);

        reconnector.on_connected();
        assert_eq!(reconnector.attempts(), 0);
        assert_eq!(reconnector.phase(), ReconnectPhase::Connected);
        assert_eq!(
            reconnector.on_disconnected(),
            ReconnectDecision::Retry {
                attempt: 1,
                delay: Duration::from_millis(1000),
            }
        );
    }

    #[test]
    fn test_zero_attempts_exhausts_immediately() {
        let mut reconnector = Reconnector::new(BackoffPolicy {
            max_attempts: 0,
            ..policy()
        });
        assert_eq!(
            reconnector.on_disconnected(),
            ReconnectDecision::Exhausted { attempts: 0 }
        );
    }
}
