//! Periodic `KeepAlive` messages for an open upstream connection.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::protocol::UpstreamControl;
use super::timer::TimerHandle;
use super::upstream::{UpstreamCommand, UpstreamState};

/// Owns at most one keepalive timer for a session
#[derive(Debug)]
pub struct KeepaliveScheduler {
    interval: Duration,
    timer: Option<TimerHandle>,
}

impl KeepaliveScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            timer: None,
        }
    }

    /// Start sending keepalives on `upstream`, replacing any running timer
    pub fn start(
        &mut self,
        session_id: u64,
        state: watch::Receiver<UpstreamState>,
        upstream: mpsc::Sender<UpstreamCommand>,
    ) {
        self.stop();
        let period = self.interval;
        self.timer = Some(TimerHandle::spawn("keepalive", move |token| {
            run_keepalive(session_id, period, state, upstream, token)
        }));
    }

    /// Cancel the running timer; returns whether one was running
    pub fn stop(&mut self) -> bool {
        match self.timer.take() {
            Some(timer) => {
                timer.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer.as_ref().is_some_and(|timer| !timer.is_finished())
    }
}

async fn run_keepalive(
    session_id: u64,
    period: Duration,
    state: watch::Receiver<UpstreamState>,
    upstream: mpsc::Sender<UpstreamCommand>,
    token: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let current = *state.borrow();
        if current != UpstreamState::Open {
            debug!(session_id, state = %current, "Upstream not open, stopping keepalive");
            return;
        }

        match upstream.try_send(UpstreamCommand::Control(UpstreamControl::KeepAlive)) {
            Ok(()) => trace!(session_id, "KeepAlive queued"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(session_id, "Upstream queue full, skipping KeepAlive");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: Duration = Duration::from_secs(3);

    #[tokio::test(start_paused = true)]
    async fn test_sends_keepalive_each_interval_while_open() {
        let (_state_tx, state_rx) = watch::channel(UpstreamState::Open);
        let (tx, mut rx) = mpsc::channel(16);
        let mut scheduler = KeepaliveScheduler::new(PERIOD);
        scheduler.start(1, state_rx, tx);

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(7)).await;
        let mut sent = 0;
        while let Ok(command) = rx.try_recv() {
            assert_eq!(command, UpstreamCommand::Control(UpstreamControl::KeepAlive));
            sent += 1;
        }
        assert_eq!(sent, 3);
        assert!(scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_upstream_leaves_open() {
        let (state_tx, state_rx) = watch::channel(UpstreamState::Open);
        let (tx, mut rx) = mpsc::channel(16);
        let mut scheduler = KeepaliveScheduler::new(PERIOD);
        scheduler.start(1, state_rx, tx);

        state_tx.send_replace(UpstreamState::Reconnecting);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_previous_timer() {
        let (_state_tx, state_rx) = watch::channel(UpstreamState::Open);
        let (tx, mut rx) = mpsc::channel(16);
        let mut scheduler = KeepaliveScheduler::new(PERIOD);
        scheduler.start(1, state_rx.clone(), tx.clone());
        tokio::time::sleep(Duration::from_secs(2)).await;
        scheduler.start(1, state_rx, tx);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let mut sent = 0;
        while rx.try_recv().is_ok() {
            sent += 1;
        }
        assert_eq!(sent, 1);

        assert!(scheduler.stop());
        assert!(!scheduler.stop());
    }
}
