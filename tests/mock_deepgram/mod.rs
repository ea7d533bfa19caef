//! WebSocket mock of the Deepgram listen endpoint
//!
//! Every accepted connection waits for the session config, announces itself
//! with a `Metadata` message and answers each audio frame with a `Results`
//! transcript. Everything the relay sends is reported to the test.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

const WAIT: Duration = Duration::from_secs(5);

/// Something the mock observed, tagged with the connection number (from 1)
#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    Connected {
        connection: usize,
        query: String,
        authorization: Option<String>,
    },
    Text {
        connection: usize,
        text: String,
    },
    Binary {
        connection: usize,
        data: Vec<u8>,
    },
    Closed {
        connection: usize,
    },
}

pub struct MockDeepgram {
    pub addr: SocketAddr,
    observed: mpsc::UnboundedReceiver<Observed>,
}

impl MockDeepgram {
    pub async fn start() -> Self {
        Self::spawn(None).await
    }

    /// Mock that closes every connection with 1000 and `reason` once configured
    pub async fn start_closing(reason: &str) -> Self {
        Self::spawn(Some(reason.to_string())).await
    }

    async fn spawn(close_reason: Option<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock Deepgram");
        let addr = listener.local_addr().unwrap();
        let (tx, observed) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut connection = 0usize;
            while let Ok((stream, _)) = listener.accept().await {
                connection += 1;
                tokio::spawn(handle_connection(
                    stream,
                    connection,
                    tx.clone(),
                    close_reason.clone(),
                ));
            }
        });

        Self { addr, observed }
    }

    /// Listen URL to configure the relay with
    pub fn url(&self) -> String {
        format!("ws://{}/v1/listen", self.addr)
    }

    pub async fn next(&mut self) -> Observed {
        timeout(WAIT, self.observed.recv())
            .await
            .expect("timed out waiting for upstream traffic")
            .expect("mock Deepgram stopped")
    }

    /// Skip ahead to the first observation matching `predicate`
    pub async fn next_matching(&mut self, predicate: impl Fn(&Observed) -> bool) -> Observed {
        loop {
            let observed = self.next().await;
            if predicate(&observed) {
                return observed;
            }
        }
    }

    /// Wait for the session config of `connection` and parse it
    pub async fn session_config(&mut self, connection: usize) -> Value {
        let observed = self
            .next_matching(|o| {
                matches!(o, Observed::Text { connection: c, text }
                    if *c == connection && text.contains("\"encoding\""))
            })
            .await;
        match observed {
            Observed::Text { text, .. } => serde_json::from_str(&text).unwrap(),
            _ => unreachable!(),
        }
    }
}

/// The transcript the mock sends for the `n`th audio frame of a connection
pub fn transcript_for(connection: usize, n: u32) -> String {
    json!({
        "type": "Results",
        "is_final": true,
        "channel": {"alternatives": [{"transcript": format!("connection {connection} chunk {n}")}]},
    })
    .to_string()
}

async fn handle_connection(
    stream: TcpStream,
    connection: usize,
    observed: mpsc::UnboundedSender<Observed>,
    close_reason: Option<String>,
) {
    let handshake_tx = observed.clone();
    let callback = move |request: &Request, response: Response| {
        let query = request.uri().query().unwrap_or_default().to_string();
        let authorization = request
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let _ = handshake_tx.send(Observed::Connected {
            connection,
            query,
            authorization,
        });
        Ok::<_, ErrorResponse>(response)
    };

    let Ok(ws) = accept_hdr_async(stream, callback).await else {
        return;
    };
    let (mut write, mut read) = ws.split();
    let mut chunks = 0u32;

    while let Some(Ok(message)) = read.next().await {
        match message {
            Message::Text(text) => {
                let text = text.to_string();
                let is_config = text.contains("\"encoding\"");
                let _ = observed.send(Observed::Text {
                    connection,
                    text: text.clone(),
                });
                if is_config && let Some(reason) = &close_reason {
                    let _ = write
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: reason.clone().into(),
                        })))
                        .await;
                    break;
                }
                if is_config {
                    let config: Value = serde_json::from_str(&text).unwrap_or_default();
                    let metadata = json!({
                        "type": "Metadata",
                        "request_id": format!("req-{connection}"),
                        "connection": connection,
                        "language": config["language"],
                    });
                    let _ = write.send(Message::Text(metadata.to_string().into())).await;
                }
            }
            Message::Binary(data) => {
                chunks += 1;
                let _ = observed.send(Observed::Binary {
                    connection,
                    data: data.to_vec(),
                });
                let result = transcript_for(connection, chunks);
                let _ = write.send(Message::Text(result.into())).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    let _ = observed.send(Observed::Closed { connection });
}
