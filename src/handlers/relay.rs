//! Relay WebSocket handler
//!
//! Upgrades an admitted request and runs one relay session over the socket.
//! The socket is split: a writer task owns the sink and drains
//! [`ClientRoute`]s, while the session task consumes the inbound half.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Extension,
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{Sink, SinkExt, StreamExt, future};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::admission::SessionPermit;
use crate::core::protocol::{ClientRoute, Frame};
use crate::core::session::{ClientEvent, Session, SessionSignal};
use crate::core::timer::ActivityClock;
use crate::middleware::AdmissionSlot;
use crate::state::AppState;

/// Optimized channel buffer size for audio workloads
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// How long the writer may take to flush after the session ends
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Relay WebSocket handler
///
/// Expects the admission middleware to have reserved a slot for this request.
pub async fn relay_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    slot: Option<Extension<AdmissionSlot>>,
) -> Response {
    let Some(permit) = slot.and_then(|Extension(slot)| slot.take()) else {
        error!("Relay upgrade reached the handler without an admission permit");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "Server at capacity. Please try again later.",
        )
            .into_response();
    };

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_relay_socket(socket, state, permit))
}

async fn handle_relay_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    permit: SessionPermit,
) {
    let session_id = state.next_session_id();
    info!(session_id, "Relay WebSocket connection established");

    let (sink, stream) = socket.split();
    let (client_tx, client_rx) = mpsc::channel::<ClientRoute>(CHANNEL_BUFFER_SIZE);

    let session = Session::new(
        session_id,
        permit,
        state.relay.clone(),
        client_tx,
        state.shutdown.child_token(),
    );

    let mut writer = tokio::spawn(run_client_writer(
        sink,
        client_rx,
        session.signal_sender(),
        session.activity(),
    ));

    let inbound = stream.filter_map(|message| future::ready(client_event(message)));
    let reason = session.run(Box::pin(inbound)).await;

    // The route sender went away with the session; the writer ends after
    // flushing what teardown queued
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        warn!(session_id, "Client writer did not finish in time, aborting");
        writer.abort();
    }

    info!(session_id, reason = %reason, "Relay WebSocket connection closed");
}

/// Map an inbound socket message to a session event; ping/pong are dropped
pub fn client_event(message: Result<Message, axum::Error>) -> Option<ClientEvent> {
    match message {
        Ok(Message::Text(text)) => Some(ClientEvent::Frame(Frame::Text(text.to_string()))),
        Ok(Message::Binary(data)) => Some(ClientEvent::Frame(Frame::Binary(data))),
        Ok(Message::Close(_)) => Some(ClientEvent::Closed),
        Ok(Message::Ping(_) | Message::Pong(_)) => None,
        Err(e) => Some(ClientEvent::Failed(e.to_string())),
    }
}

/// Drain routed messages into the client socket until a close is sent
///
/// Relayed frames touch the activity clock once written; relay-generated JSON
/// and the close frame do not. A failed write is reported to the session.
pub async fn run_client_writer<S>(
    mut sink: S,
    mut routes: mpsc::Receiver<ClientRoute>,
    signals: mpsc::Sender<SessionSignal>,
    activity: ActivityClock,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(route) = routes.recv().await {
        let (message, relayed, closing) = match route {
            ClientRoute::Frame(Frame::Text(text)) => (Message::Text(text.into()), true, false),
            ClientRoute::Frame(Frame::Binary(data)) => (Message::Binary(data), true, false),
            ClientRoute::Json(json) => (Message::Text(json.into()), false, false),
            ClientRoute::Close { code, reason } => (
                Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })),
                false,
                true,
            ),
        };

        match sink.send(message).await {
            Ok(()) if relayed => activity.touch(),
            Ok(()) => {}
            Err(e) => {
                debug!("Failed to send to client: {}", e);
                if !closing {
                    let _ = signals.try_send(SessionSignal::ClientSendFailed(e.to_string()));
                }
                break;
            }
        }

        if closing {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::channel::mpsc as fmpsc;

    struct Writer {
        routes: mpsc::Sender<ClientRoute>,
        signals: mpsc::Receiver<SessionSignal>,
        activity: ActivityClock,
        task: tokio::task::JoinHandle<()>,
    }

    fn spawn_writer<S>(sink: S) -> Writer
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: Display,
    {
        let (routes, routes_rx) = mpsc::channel(16);
        let (signals_tx, signals) = mpsc::channel(16);
        let activity = ActivityClock::new();
        let task = tokio::spawn(run_client_writer(
            sink,
            routes_rx,
            signals_tx,
            activity.clone(),
        ));
        Writer {
            routes,
            signals,
            activity,
            task,
        }
    }

    #[test]
    fn test_client_event_mapping() {
        assert_eq!(
            client_event(Ok(Message::Text("hi".to_string().into()))),
            Some(ClientEvent::Frame(Frame::Text("hi".to_string())))
        );
        assert_eq!(
            client_event(Ok(Message::Binary(Bytes::from_static(&[1, 2])))),
            Some(ClientEvent::Frame(Frame::Binary(Bytes::from_static(&[1, 2]))))
        );
        assert_eq!(client_event(Ok(Message::Close(None))), Some(ClientEvent::Closed));
        assert_eq!(client_event(Ok(Message::Ping(Bytes::new()))), None);
        assert_eq!(client_event(Ok(Message::Pong(Bytes::new()))), None);
        assert!(matches!(
            client_event(Err(axum::Error::new("boom"))),
            Some(ClientEvent::Failed(_))
        ));
    }

    #[tokio::test]
    async fn test_writer_relays_in_order_and_stops_after_close() {
        let (sink, mut sent) = fmpsc::channel::<Message>(16);
        let writer = spawn_writer(sink);

        writer
            .routes
            .send(ClientRoute::Json("{\"type\":\"ack\"}".to_string()))
            .await
            .unwrap();
        writer
            .routes
            .send(ClientRoute::Frame(Frame::Binary(Bytes::from_static(b"pcm"))))
            .await
            .unwrap();
        writer
            .routes
            .send(ClientRoute::Close {
                code: 1011,
                reason: "upstream closed".to_string(),
            })
            .await
            .unwrap();
        // Ignored: the writer stops at the close frame
        let _ = writer
            .routes
            .send(ClientRoute::Json("{\"late\":true}".to_string()))
            .await;

        writer.task.await.unwrap();

        assert_eq!(
            sent.next().await,
            Some(Message::Text("{\"type\":\"ack\"}".to_string().into()))
        );
        assert_eq!(
            sent.next().await,
            Some(Message::Binary(Bytes::from_static(b"pcm")))
        );
        match sent.next().await {
            Some(Message::Close(Some(frame))) => {
                assert_eq!(frame.code, 1011);
                assert_eq!(frame.reason.as_str(), "upstream closed");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
        // Writer stopped after the close frame and dropped the sink
        assert_eq!(sent.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relayed_frames_touch_activity() {
        let (sink, _sent) = fmpsc::channel::<Message>(16);
        let writer = spawn_writer(sink);
        let before = writer.activity.last_activity();

        tokio::time::advance(Duration::from_secs(5)).await;
        writer
            .routes
            .send(ClientRoute::Json("{}".to_string()))
            .await
            .unwrap();
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(writer.activity.last_activity(), before);

        writer
            .routes
            .send(ClientRoute::Frame(Frame::Text("transcript".to_string())))
            .await
            .unwrap();
        drop(writer.routes);
        writer.task.await.unwrap();

        assert!(writer.activity.last_activity() > before);
    }

    #[tokio::test]
    async fn test_failed_write_is_reported() {
        let (sink, sent) = fmpsc::channel::<Message>(16);
        drop(sent);
        let mut writer = spawn_writer(sink);

        writer
            .routes
            .send(ClientRoute::Frame(Frame::Text("lost".to_string())))
            .await
            .unwrap();
        writer.task.await.unwrap();

        assert!(matches!(
            writer.signals.recv().await,
            Some(SessionSignal::ClientSendFailed(_))
        ));
    }
}
