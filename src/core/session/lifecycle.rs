use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{Session, SessionSignal, TeardownReason};
use crate::core::protocol::{ClientRoute, close_code, close_reason};
use crate::core::reconnect::ReconnectDecision;
use crate::core::upstream::{ConnectTarget, UpstreamEvent, UpstreamInput, UpstreamState};
use crate::errors::RelayError;

impl Session {
    pub(super) async fn handle_signal(&mut self, signal: SessionSignal) -> Option<TeardownReason> {
        match signal {
            SessionSignal::Upstream { generation, event } => {
                let current = self.upstream.as_ref().map(|u| u.generation());
                if current != Some(generation) {
                    debug!(
                        session_id = self.id,
                        generation,
                        ?current,
                        "Ignoring event from replaced upstream connection"
                    );
                    return None;
                }
                self.handle_upstream_event(event).await
            }
            SessionSignal::IdleTimeout { idle } => Some(TeardownReason::IdleTimeout { idle }),
            SessionSignal::SafetyTimeout { limit } => Some(TeardownReason::SafetyTimeout { limit }),
            SessionSignal::ClientSendFailed(e) => {
                self.client_open = false;
                Some(TeardownReason::ClientError(e))
            }
        }
    }

    async fn handle_upstream_event(&mut self, event: UpstreamEvent) -> Option<TeardownReason> {
        match event {
            UpstreamEvent::Open => {
                let _ = self.upstream_state.apply(UpstreamInput::Opened);
                self.reconnector.on_connected();
                if let Some(upstream) = &self.upstream {
                    self.keepalive.start(
                        self.id,
                        self.upstream_state.subscribe(),
                        upstream.sender(),
                    );
                }
                None
            }
            UpstreamEvent::Message(frame) => self.forward_to_client(frame),
            UpstreamEvent::Closed { code, reason } if code == Some(close_code::NORMAL) => {
                info!(session_id = self.id, "Upstream closed normally, ending session");
                Some(TeardownReason::UpstreamClosed { code, reason })
            }
            UpstreamEvent::Closed { code, reason } => {
                self.on_upstream_failure(RelayError::UpstreamAbnormalClose { code, reason })
                    .await
            }
            UpstreamEvent::Failed(e) if e.is_retryable() => self.on_upstream_failure(e).await,
            UpstreamEvent::Failed(e) => Some(TeardownReason::UpstreamFailed(e)),
        }
    }

    /// Drop the broken link and schedule the next attempt, if any remain
    async fn on_upstream_failure(&mut self, error: RelayError) -> Option<TeardownReason> {
        warn!(session_id = self.id, "Upstream lost: {}", error);

        self.keepalive.stop();
        let _ = self.upstream_state.apply(UpstreamInput::Failed);
        if let Some(upstream) = self.upstream.take() {
            upstream.close(false).await;
        }

        match self.reconnector.on_disconnected() {
            ReconnectDecision::Retry { attempt, delay } => {
                info!(
                    session_id = self.id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling upstream reconnect"
                );
                self.reconnect_at = Some(Box::pin(sleep(delay)));
                None
            }
            ReconnectDecision::Exhausted { attempts } => {
                Some(TeardownReason::ReconnectExhausted { attempts })
            }
        }
    }

    /// Start a new upstream connection for the current language
    pub(super) fn open_upstream(&mut self) {
        if self.closed.is_some() {
            return;
        }
        let _ = self.upstream_state.apply(UpstreamInput::Connect);

        self.next_generation += 1;
        let target = ConnectTarget {
            session_id: self.id,
            language: self.language,
            generation: self.next_generation,
        };
        debug!(
            session_id = self.id,
            generation = target.generation,
            language = target.language,
            "Connecting upstream"
        );
        self.upstream = Some(self.context.connector.connect(
            target,
            self.activity.clone(),
            self.signals_tx.clone(),
        ));
    }

    pub(super) fn reconnect(&mut self) {
        if self.upstream_state.current() != UpstreamState::Reconnecting {
            return;
        }
        info!(
            session_id = self.id,
            attempt = self.reconnector.attempts(),
            "Reconnecting upstream"
        );
        self.open_upstream();
    }

    /// Replace the upstream connection after a language change
    ///
    /// The previous connection is fully closed before the new one is opened
    /// and any pending reconnect is superseded.
    pub(super) async fn replace_upstream(&mut self) {
        self.reconnect_at = None;
        self.keepalive.stop();

        if let Some(previous) = self.upstream.take() {
            let _ = self.upstream_state.apply(UpstreamInput::Close);
            previous.close(true).await;
            let _ = self.upstream_state.apply(UpstreamInput::Finished);
        }

        self.open_upstream();
    }

    /// Release everything the session holds; later calls do nothing
    pub async fn teardown(&mut self, reason: TeardownReason) {
        if self.closed.is_some() {
            debug!(session_id = self.id, "Session already torn down");
            return;
        }
        self.closed = Some(reason.clone());

        self.keepalive.stop();
        if let Some(timer) = self.inactivity.take() {
            timer.cancel();
        }
        if let Some(timer) = self.safety.take() {
            timer.cancel();
        }
        self.reconnect_at = None;

        if let Some(upstream) = self.upstream.take() {
            let _ = self.upstream_state.apply(UpstreamInput::Close);
            upstream.close(true).await;
        }
        self.upstream_state.force_closed();

        if reason.client_gone() {
            self.client_open = false;
        }
        if self.client_open {
            if let Some(notice) = reason.notice()
                && let Some(route) = ClientRoute::json(&notice)
                && let Err(e) = self.client.try_send(route)
            {
                debug!(session_id = self.id, "Error notice not queued: {}", e);
            }
            let close = ClientRoute::Close {
                code: reason.close_code(),
                reason: close_reason(&reason.to_string()),
            };
            if let Err(e) = self.client.try_send(close) {
                debug!(session_id = self.id, "Close frame not queued: {}", e);
            }
            self.client_open = false;
        }

        if let Some(permit) = self.permit.take() {
            permit.release();
        }

        let stats = self.stats;
        match reason.as_error() {
            Some(error) => warn!(
                session_id = self.id,
                duration_secs = self.started_at.elapsed().as_secs(),
                frames_up = stats.frames_up,
                frames_down = stats.frames_down,
                frames_dropped = stats.frames_dropped,
                "Session closed: {}",
                error
            ),
            None => info!(
                session_id = self.id,
                duration_secs = self.started_at.elapsed().as_secs(),
                frames_up = stats.frames_up,
                frames_down = stats.frames_down,
                frames_dropped = stats.frames_dropped,
                "Session closed: {}",
                reason
            ),
        }
    }
}
