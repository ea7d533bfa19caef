//! Upstream connector and the per-connection socket task.
//!
//! Each call to [`UpstreamConnector::connect`] spawns one task that owns the
//! Deepgram socket. The session talks to it through a bounded command channel
//! and hears back through its signal channel; every event is stamped with the
//! connection's generation so the session can drop events from links it has
//! already replaced.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::UpstreamSettings;
use crate::core::protocol::{Frame, UpstreamControl};
use crate::core::session::SessionSignal;
use crate::core::timer::ActivityClock;
use crate::errors::RelayError;

/// Pending writes per upstream connection before frames are dropped
pub const UPSTREAM_CHANNEL_SIZE: usize = 256;

/// How long a closing connection may take to flush and exit
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Writes queued for the socket task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamCommand {
    /// Client frame to relay unchanged; counts as activity once written
    Data(Frame),
    /// Provider control message; never counts as activity
    Control(UpstreamControl),
}

/// What the socket task reports back to its session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// Handshake done and session config sent
    Open,
    /// Frame received from the provider
    Message(Frame),
    /// The provider closed the socket
    Closed { code: Option<u16>, reason: String },
    /// Connect error, timeout, transport error or failed write
    Failed(RelayError),
}

impl UpstreamEvent {
    /// Whether the event ends the connection it came from
    pub fn is_terminal(&self) -> bool {
        matches!(self, UpstreamEvent::Closed { .. } | UpstreamEvent::Failed(_))
    }
}

/// Identifies one connection attempt
#[derive(Debug, Clone, Copy)]
pub struct ConnectTarget {
    pub session_id: u64,
    pub language: &'static str,
    pub generation: u64,
}

/// Opens upstream connections with the process-wide provider settings
#[derive(Debug, Clone)]
pub struct UpstreamConnector {
    settings: Arc<UpstreamSettings>,
}

impl UpstreamConnector {
    pub fn new(settings: UpstreamSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &UpstreamSettings {
        &self.settings
    }

    /// Start a connection attempt in the background
    ///
    /// Returns immediately; the outcome arrives on `events` as
    /// [`UpstreamEvent::Open`] or a terminal event.
    pub fn connect(
        &self,
        target: ConnectTarget,
        activity: ActivityClock,
        events: mpsc::Sender<SessionSignal>,
    ) -> UpstreamConnection {
        let (commands_tx, commands_rx) = mpsc::channel(UPSTREAM_CHANNEL_SIZE);
        let shutdown = CancellationToken::new();

        let link = LinkTask {
            settings: self.settings.clone(),
            target,
            activity,
            events,
            shutdown: shutdown.clone(),
        };
        let task = tokio::spawn(link.run(commands_rx));

        UpstreamConnection {
            generation: target.generation,
            language: target.language,
            commands: commands_tx,
            shutdown,
            task: Some(task),
        }
    }
}

/// Session-side handle of one upstream connection
#[derive(Debug)]
pub struct UpstreamConnection {
    generation: u64,
    language: &'static str,
    commands: mpsc::Sender<UpstreamCommand>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl UpstreamConnection {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn language(&self) -> &'static str {
        self.language
    }

    /// Command sender for timers that write to this connection
    pub fn sender(&self) -> mpsc::Sender<UpstreamCommand> {
        self.commands.clone()
    }

    /// Queue a client frame without waiting; a full queue drops the frame
    pub fn try_forward(&self, frame: Frame) -> Result<(), TrySendError<UpstreamCommand>> {
        self.commands.try_send(UpstreamCommand::Data(frame))
    }

    /// Close the connection and wait until its task has exited
    ///
    /// With `send_close_stream` the provider is asked to flush first. Frames
    /// already queued are written before the close.
    pub async fn close(mut self, send_close_stream: bool) {
        if send_close_stream {
            let _ = self
                .commands
                .try_send(UpstreamCommand::Control(UpstreamControl::CloseStream));
        }
        self.shutdown.cancel();

        if let Some(mut task) = self.task.take()
            && timeout(CLOSE_TIMEOUT, &mut task).await.is_err()
        {
            warn!(
                generation = self.generation,
                "Upstream connection did not close in time, aborting"
            );
            task.abort();
        }
    }
}

impl Drop for UpstreamConnection {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct LinkTask {
    settings: Arc<UpstreamSettings>,
    target: ConnectTarget,
    activity: ActivityClock,
    events: mpsc::Sender<SessionSignal>,
    shutdown: CancellationToken,
}

impl LinkTask {
    async fn run(self, mut commands: mpsc::Receiver<UpstreamCommand>) {
        let session_id = self.target.session_id;
        let generation = self.target.generation;

        let socket = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                debug!(session_id, generation, "Upstream connect abandoned");
                return;
            }
            result = self.open() => match result {
                Ok(socket) => socket,
                Err(e) => {
                    warn!(session_id, generation, "Upstream connect failed: {}", e);
                    self.emit(UpstreamEvent::Failed(e)).await;
                    return;
                }
            }
        };

        let (mut sink, mut stream) = socket.split();

        let config = self.settings.session_config(self.target.language);
        let config_json = match serde_json::to_string(&config) {
            Ok(json) => json,
            Err(e) => {
                self.emit(UpstreamEvent::Failed(RelayError::UpstreamConnect(format!(
                    "Failed to serialize session config: {e}"
                ))))
                .await;
                return;
            }
        };
        if let Err(e) = sink.send(Message::Text(config_json.into())).await {
            self.emit(UpstreamEvent::Failed(RelayError::UpstreamConnect(format!(
                "Failed to send session config: {e}"
            ))))
            .await;
            return;
        }

        info!(
            session_id,
            generation,
            language = self.target.language,
            "Upstream connection open"
        );
        if !self.emit(UpstreamEvent::Open).await {
            let _ = sink.send(Message::Close(None)).await;
            return;
        }

        loop {
            tokio::select! {
                biased;

                Some(command) = commands.recv() => {
                    let (message, is_data) = match command {
                        UpstreamCommand::Data(Frame::Binary(data)) => (Message::Binary(data), true),
                        UpstreamCommand::Data(Frame::Text(text)) => (Message::Text(text.into()), true),
                        UpstreamCommand::Control(control) => {
                            (Message::Text(control.to_json().into()), false)
                        }
                    };
                    if let Err(e) = sink.send(message).await {
                        warn!(session_id, generation, "Upstream write failed: {}", e);
                        self.emit(UpstreamEvent::Failed(RelayError::UpstreamSend(e.to_string())))
                            .await;
                        return;
                    }
                    if is_data {
                        self.activity.touch();
                    }
                }

                _ = self.shutdown.cancelled() => {
                    debug!(session_id, generation, "Closing upstream connection");
                    break;
                }

                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        if !self.emit(UpstreamEvent::Message(Frame::Text(text.to_string()))).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        if !self.emit(UpstreamEvent::Message(Frame::Binary(data))).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(frame) => (Some(u16::from(frame.code)), frame.reason.to_string()),
                            None => (None, String::new()),
                        };
                        info!(session_id, generation, ?code, "Upstream closed: {}", reason);
                        self.emit(UpstreamEvent::Closed { code, reason }).await;
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(session_id, generation, "Upstream transport error: {}", e);
                        self.emit(UpstreamEvent::Failed(RelayError::UpstreamAbnormalClose {
                            code: None,
                            reason: e.to_string(),
                        }))
                        .await;
                        return;
                    }
                    None => {
                        self.emit(UpstreamEvent::Closed {
                            code: None,
                            reason: "stream ended".to_string(),
                        })
                        .await;
                        return;
                    }
                }
            }
        }

        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
    }

    async fn open(&self) -> Result<UpstreamSocket, RelayError> {
        let url = self.settings.listen_url(self.target.language)?;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| RelayError::UpstreamConnect(format!("Invalid upgrade request: {e}")))?;
        let mut authorization = HeaderValue::from_str(&self.settings.authorization())
            .map_err(|e| RelayError::Configuration(format!("Invalid API key: {e}")))?;
        authorization.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, authorization);

        let connect_timeout = self.settings.connect_timeout;
        match timeout(connect_timeout, connect_async(request)).await {
            Ok(Ok((socket, _response))) => Ok(socket),
            Ok(Err(e)) => Err(RelayError::UpstreamConnect(e.to_string())),
            Err(_) => Err(RelayError::UpstreamConnect(format!(
                "timed out after {}ms",
                connect_timeout.as_millis()
            ))),
        }
    }

    /// Deliver an event unless the connection is being closed
    async fn emit(&self, event: UpstreamEvent) -> bool {
        let signal = SessionSignal::Upstream {
            generation: self.target.generation,
            event,
        };
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            sent = self.events.send(signal) => sent.is_ok(),
        }
    }
}
