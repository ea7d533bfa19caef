use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use super::{Session, TeardownReason};
use crate::core::interceptor::{Classified, ControlFrame, classify};
use crate::core::protocol::{ClientRoute, ConfigAck, Frame};

impl Session {
    /// Route one inbound client frame
    pub(super) async fn handle_client_frame(&mut self, frame: Frame) -> Option<TeardownReason> {
        match classify(frame) {
            Classified::Control(control) => self.apply_control(control).await,
            Classified::Data(frame) => {
                self.forward_to_upstream(frame);
                None
            }
        }
    }

    /// Switch language, acknowledge, and reconnect upstream when the tag changed
    async fn apply_control(&mut self, control: ControlFrame) -> Option<TeardownReason> {
        self.stats.control_frames += 1;
        let previous = self.language;
        self.language = control.language;
        info!(
            session_id = self.id,
            code = %control.code,
            language = control.language,
            "Language configuration received"
        );

        if let Some(route) = ClientRoute::json(&ConfigAck::new(control.language))
            && let Some(reason) = self.send_to_client(route)
        {
            return Some(reason);
        }

        if previous != control.language {
            info!(
                session_id = self.id,
                from = previous,
                to = control.language,
                "Reconnecting upstream for new language"
            );
            self.replace_upstream().await;
        }
        None
    }

    /// Forward a data frame upstream only while the connection is open
    fn forward_to_upstream(&mut self, frame: Frame) {
        let len = frame.len();
        let upstream = match &self.upstream {
            Some(upstream) if self.upstream_state.is_open() => upstream,
            _ => {
                self.stats.frames_dropped += 1;
                debug!(
                    session_id = self.id,
                    state = %self.upstream_state.current(),
                    "Upstream not open, dropping {} byte frame",
                    len
                );
                return;
            }
        };

        match upstream.try_forward(frame) {
            Ok(()) => self.stats.frames_up += 1,
            Err(TrySendError::Full(_)) => {
                self.stats.frames_dropped += 1;
                warn!(
                    session_id = self.id,
                    "Upstream queue full, dropping {} byte frame", len
                );
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.frames_dropped += 1;
                debug!(session_id = self.id, "Upstream task gone, dropping frame");
            }
        }
    }

    /// Relay an upstream frame to the client unchanged
    pub(super) fn forward_to_client(&mut self, frame: Frame) -> Option<TeardownReason> {
        if !self.client_open {
            self.stats.frames_dropped += 1;
            return None;
        }
        let reason = self.send_to_client(ClientRoute::Frame(frame));
        if reason.is_none() {
            self.stats.frames_down += 1;
        }
        reason
    }

    /// Queue a route for the client writer without waiting
    ///
    /// A full queue means the client stopped reading; the session ends rather
    /// than stalling its select loop.
    pub(super) fn send_to_client(&mut self, route: ClientRoute) -> Option<TeardownReason> {
        let error = match self.client.try_send(route) {
            Ok(()) => return None,
            Err(TrySendError::Full(_)) => {
                warn!(session_id = self.id, "Client route queue full, closing session");
                "client not reading, route queue full"
            }
            Err(TrySendError::Closed(_)) => "client writer stopped",
        };
        self.client_open = false;
        Some(TeardownReason::ClientError(error.to_string()))
    }
}
