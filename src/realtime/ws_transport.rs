//! WebSocket push transport
//!
//! Connects to the notification backend over WebSocket and yields parsed
//! reward events. Text frames that fail schema validation are logged and
//! skipped rather than trusted; ping frames are answered inline. A close
//! frame or stream error surfaces as a lost connection so the notifier's
//! reconnect policy takes over.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use ethers::types::Address;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::realtime::PushTransport;
use crate::types::RealtimeEvent;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Push transport over a WebSocket connection
pub struct WsPushTransport {
    /// Backend endpoint
    url: String,

    /// Active connection, if any
    stream: Mutex<Option<WsStream>>,
}

impl WsPushTransport {
    /// Create a transport for the given endpoint
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            stream: Mutex::new(None),
        }
    }
}

#[async_trait]
impl PushTransport for WsPushTransport {
    async fn connect(&self, address: Address) -> Result<()> {
        let url = format!("{}?address={:?}", self.url, address);
        let (stream, _) = connect_async(url.as_str())
            .await
            .with_context(|| format!("Failed to open websocket to {}", self.url))?;

        info!("Websocket connected to {}", self.url);
        *self.stream.lock().await = Some(stream);
        Ok(())
    }

    async fn next_event(&self) -> Result<RealtimeEvent> {
        let mut guard = self.stream.lock().await;

        enum Outcome {
            Event(RealtimeEvent),
            Closed(String),
        }

        let outcome = {
            let stream = guard
                .as_mut()
                .ok_or_else(|| anyhow!("push channel is not connected"))?;

            loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<RealtimeEvent>(&text) {
                            Ok(event) => break Outcome::Event(event),
                            Err(e) => {
                                warn!("Dropping malformed push event: {}", e);
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = stream.send(Message::Pong(payload)).await {
                            break Outcome::Closed(format!("pong failed: {}", e));
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break Outcome::Closed(format!("server closed the channel: {:?}", frame));
                    }
                    Some(Ok(other)) => {
                        debug!("Ignoring non-text websocket frame: {:?}", other);
                    }
                    Some(Err(e)) => break Outcome::Closed(e.to_string()),
                    None => break Outcome::Closed("websocket stream ended".to_string()),
                }
            }
        };

        match outcome {
            Outcome::Event(event) => Ok(event),
            Outcome::Closed(reason) => {
                *guard = None;
                bail!("push channel lost: {}", reason)
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        let mut guard = self.stream.lock().await;
        if let Some(mut stream) = guard.take() {
            if let Err(e) = stream.close(None).await {
                debug!("Websocket close handshake failed: {}", e);
            }
        }
        Ok(())
    }
}
