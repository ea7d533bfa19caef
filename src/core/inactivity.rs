//! Inactivity monitor and maximum session lifetime.
//!
//! Both timers report through the session's signal channel and never touch
//! session state directly.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tracing::{info, warn};

use super::session::SessionSignal;
use super::timer::{ActivityClock, TimerHandle};

/// Periodically compare the activity clock against the idle threshold
pub fn spawn_idle_monitor(
    session_id: u64,
    clock: ActivityClock,
    check_interval: Duration,
    idle_threshold: Duration,
    signals: mpsc::Sender<SessionSignal>,
) -> TimerHandle {
    TimerHandle::spawn("inactivity", move |token| async move {
        let mut ticker = interval_at(Instant::now() + check_interval, check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let idle = clock.idle_for();
            if idle > idle_threshold {
                info!(
                    session_id,
                    idle_secs = idle.as_secs(),
                    "Session idle beyond threshold"
                );
                let _ = signals.send(SessionSignal::IdleTimeout { idle }).await;
                return;
            }
        }
    })
}

/// Fire once when the session reaches its maximum lifetime
pub fn spawn_safety_timeout(
    session_id: u64,
    limit: Duration,
    signals: mpsc::Sender<SessionSignal>,
) -> TimerHandle {
    TimerHandle::spawn("safety", move |token| async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = sleep(limit) => {
                warn!(session_id, limit_secs = limit.as_secs(), "Session reached maximum lifetime");
                let _ = signals.send(SessionSignal::SafetyTimeout { limit }).await;
            }
        }
    })
}
