//! Session timer primitives.
//!
//! Each session timer runs as a child task that can be cancelled exactly once
//! through its [`TimerHandle`]. The [`ActivityClock`] is the shared
//! last-activity timestamp consulted by the inactivity monitor.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Last time a frame was successfully forwarded in either direction
#[derive(Debug, Clone)]
pub struct ActivityClock {
    last: Arc<Mutex<Instant>>,
}

impl ActivityClock {
    pub fn new() -> Self {
        Self {
            last: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Record a successful forward
    pub fn touch(&self) {
        *self.last.lock() = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        *self.last.lock()
    }

    /// Time elapsed since the last recorded forward
    pub fn idle_for(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_activity())
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Owner of a running timer task
///
/// Dropping the handle cancels the timer, so a session that loses its handle
/// can never leave a timer firing behind it.
#[derive(Debug)]
pub struct TimerHandle {
    name: &'static str,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Spawn a timer body that observes the given cancellation token
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let task = tokio::spawn(body(token.clone()));
        Self { name, token, task }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the timer body has returned (fired or observed cancellation)
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the timer; consuming `self` makes a second cancel impossible
    pub fn cancel(self) {
        trace!(timer = self.name, "Timer cancelled");
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.token.cancel();
        self.task.abort();
    }
}
