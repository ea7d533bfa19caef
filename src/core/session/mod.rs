//! One relay session: a client socket paired with an upstream connection.
//!
//! A [`Session`] is driven by a single task. Everything that happens
//! asynchronously (upstream socket events, timers, client write failures)
//! comes back to that task as a [`SessionSignal`], so session state is only
//! ever mutated from one place.

mod events;
mod lifecycle;
mod relay;
mod settings;


use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use events::{ClientEvent, SessionSignal, TeardownReason};
pub use settings::{RelayContext, SessionSettings};

use super::admission::SessionPermit;
use super::inactivity::{spawn_idle_monitor, spawn_safety_timeout};
use super::keepalive::KeepaliveScheduler;
use super::language::DEFAULT_LANGUAGE;
use super::protocol::ClientRoute;
use super::reconnect::Reconnector;
use super::timer::{ActivityClock, TimerHandle};
use super::upstream::{UpstreamConnection, UpstreamState, UpstreamStateMachine};

/// Buffered signals per session
const SIGNAL_CHANNEL_SIZE: usize = 1024;

/// Frame counters reported when the session closes
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_up: u64,
    pub frames_down: u64,
    pub frames_dropped: u64,
    pub control_frames: u64,
}

pub struct Session {
    id: u64,
    language: &'static str,
    context: Arc<RelayContext>,
    permit: Option<SessionPermit>,

    client: mpsc::Sender<ClientRoute>,
    client_open: bool,

    upstream: Option<UpstreamConnection>,
    upstream_state: UpstreamStateMachine,
    next_generation: u64,
    reconnector: Reconnector,
    reconnect_at: Option<Pin<Box<Sleep>>>,

    activity: ActivityClock,
    keepalive: KeepaliveScheduler,
    inactivity: Option<TimerHandle>,
    safety: Option<TimerHandle>,

    signals_tx: mpsc::Sender<SessionSignal>,
    signals_rx: mpsc::Receiver<SessionSignal>,
    shutdown: CancellationToken,

    closed: Option<TeardownReason>,
    started_at: Instant,
    stats: SessionStats,
}

impl Session {
    /// Create a session for an admitted client
    ///
    /// `client` feeds the task that writes to the client socket; `shutdown`
    /// ends the session when the process is draining.
    pub fn new(
        id: u64,
        permit: SessionPermit,
        context: Arc<RelayContext>,
        client: mpsc::Sender<ClientRoute>,
        shutdown: CancellationToken,
    ) -> Self {
        let (signals_tx, signals_rx) = mpsc::channel(SIGNAL_CHANNEL_SIZE);
        let settings = &context.settings;

        Self {
            id,
            language: DEFAULT_LANGUAGE,
            permit: Some(permit),
            client,
            client_open: true,
            upstream: None,
            upstream_state: UpstreamStateMachine::new(),
            next_generation: 0,
            reconnector: Reconnector::new(settings.backoff),
            reconnect_at: None,
            activity: ActivityClock::new(),
            keepalive: KeepaliveScheduler::new(settings.keepalive_interval),
            inactivity: None,
            safety: None,
            signals_tx,
            signals_rx,
            shutdown,
            closed: None,
            started_at: Instant::now(),
            stats: SessionStats::default(),
            context,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current provider locale tag
    pub fn language(&self) -> &'static str {
        self.language
    }

    pub fn upstream_state(&self) -> UpstreamState {
        self.upstream_state.current()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Sender used by the client writer to report failures
    pub fn signal_sender(&self) -> mpsc::Sender<SessionSignal> {
        self.signals_tx.clone()
    }

    /// Clock the client writer touches after each relayed frame
    pub fn activity(&self) -> ActivityClock {
        self.activity.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    /// Drive the session until it ends, then tear it down
    pub async fn run<S>(mut self, mut inbound: S) -> TeardownReason
    where
        S: Stream<Item = ClientEvent> + Unpin,
    {
        self.start();

        let reason = loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break TeardownReason::Shutdown,

                Some(signal) = self.signals_rx.recv() => {
                    if let Some(reason) = self.handle_signal(signal).await {
                        break reason;
                    }
                }

                _ = reconnect_due(&mut self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.reconnect();
                }

                event = inbound.next() => match event {
                    Some(ClientEvent::Frame(frame)) => {
                        if let Some(reason) = self.handle_client_frame(frame).await {
                            break reason;
                        }
                    }
                    Some(ClientEvent::Closed) | None => break TeardownReason::ClientClosed,
                    Some(ClientEvent::Failed(e)) => break TeardownReason::ClientError(e),
                }
            }
        };

        self.teardown(reason.clone()).await;
        reason
    }

    fn start(&mut self) {
        let settings = &self.context.settings;
        info!(
            session_id = self.id,
            language = self.language,
            "Session started"
        );

        self.inactivity = Some(spawn_idle_monitor(
            self.id,
            self.activity.clone(),
            settings.inactivity_check_interval,
            settings.idle_timeout,
            self.signals_tx.clone(),
        ));
        self.safety = Some(spawn_safety_timeout(
            self.id,
            settings.safety_timeout,
            self.signals_tx.clone(),
        ));

        self.open_upstream();
    }
}

/// Resolves when the pending reconnect delay elapses; never without one
fn reconnect_due(timer: &mut Option<Pin<Box<Sleep>>>) -> impl Future<Output = ()> + '_ {
    async move {
        match timer {
            Some(sleep) => sleep.as_mut().await,
            None => std::future::pending().await,
        }
    }
}
