//! WebSocket data source adapter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, warn};

use crate::source::{DataSource, RawNotification};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A source streaming pending-transaction notifications over WebSocket.
///
/// The adapter does not reconnect on its own; when the socket drops, the
/// notification channel closes and the ingestion service schedules the
/// retry.
pub struct WebSocketSource {
    name: String,
    url: String,
    topic: String,
    stream: Mutex<Option<WsStream>>,
    active: Arc<AtomicBool>,
}

impl WebSocketSource {
    pub fn new(name: String, url: String, topic: String) -> Self {
        Self {
            name,
            url,
            topic,
            stream: Mutex::new(None),
            active: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl DataSource for WebSocketSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        if !self.url.starts_with("ws://") && !self.url.starts_with("wss://") {
            bail!("source url must start with ws:// or wss://, got: {}", self.url);
        }
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .with_context(|| format!("failed to connect to {}", self.url))?;
        *self.stream.lock().await = Some(stream);
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<RawNotification>> {
        let mut guard = self.stream.lock().await;
        let mut stream = match guard.take() {
            Some(stream) => stream,
            None => {
                let (stream, _) = connect_async(self.url.as_str())
                    .await
                    .with_context(|| format!("failed to connect to {}", self.url))?;
                stream
            }
        };
        drop(guard);

        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "subscribe",
            "params": { "topic": self.topic },
        });
        stream
            .send(Message::Text(request.to_string()))
            .await
            .context("subscription request failed")?;

        let (tx, rx) = mpsc::unbounded_channel();
        let active = self.active.clone();
        active.store(true, Ordering::Relaxed);
        let source_name = self.name.clone();

        tokio::spawn(async move {
            let (mut sink, mut messages) = stream.split();
            while active.load(Ordering::Relaxed) {
                match messages.next().await {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str(&text) {
                        Ok(value) => {
                            if tx.send(value).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            debug!(source = %source_name, error = %e, "ignoring non-JSON message");
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sink.send(Message::Pong(data)).await {
                            error!(source = %source_name, error = %e, "failed to send pong");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        warn!(source = %source_name, "websocket connection closed");
                        break;
                    }
                    Some(Err(e)) => {
                        error!(source = %source_name, error = %e, "websocket error");
                        break;
                    }
                    _ => {}
                }
            }
            // Dropping the sender ends the notification stream; the
            // ingestion service treats that as a disconnect.
        });

        Ok(rx)
    }

    async fn unsubscribe(&self) -> Result<()> {
        self.active.store(false, Ordering::Relaxed);
        *self.stream.lock().await = None;
        Ok(())
    }
}
