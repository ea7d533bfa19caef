use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::core::admission::AdmissionController;
use crate::core::session::RelayContext;
use crate::errors::RelayResult;

/// Application state that can be shared across handlers
pub struct AppState {
    pub config: ServerConfig,
    /// Process-wide session count and capacity
    pub admission: Arc<AdmissionController>,
    /// Connector and timer settings handed to every session
    pub relay: Arc<RelayContext>,
    /// Cancelled once when the process starts draining
    pub shutdown: CancellationToken,
    started_at: Instant,
    session_seq: AtomicU64,
}

impl AppState {
    /// Build the shared state; fails when the Deepgram credentials are missing
    pub fn new(config: ServerConfig) -> RelayResult<Arc<Self>> {
        let relay = Arc::new(config.relay_context()?);
        let admission = AdmissionController::new(config.relay.max_sessions);

        Ok(Arc::new(Self {
            config,
            admission,
            relay,
            shutdown: CancellationToken::new(),
            started_at: Instant::now(),
            session_seq: AtomicU64::new(0),
        }))
    }

    /// Allocate an identifier for a new session
    pub fn next_session_id(&self) -> u64 {
        self.session_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_draining(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
