//! WebSocket Transport
//!
//! Connects to the bridge runtime's WebSocket endpoint once the emulator
//! orchestrator reports an instance running. The runtime may still be
//! opening its listener when we get here, so connection attempts are
//! retried briefly before failing.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::{Transport, TransportError};

/// Connection attempts before giving up.
const CONNECT_ATTEMPTS: u32 = 10;
/// Pause between attempts.
const CONNECT_BACKOFF: Duration = Duration::from_millis(200);

/// A device channel over a WebSocket.
#[derive(Debug)]
pub struct WebsocketTransport {
    url: String,
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WebsocketTransport {
    /// Connect to a bridge runtime on the local host.
    pub async fn connect_local(port: u16) -> Result<Self, TransportError> {
        Self::connect(&format!("ws://127.0.0.1:{}/", port)).await
    }

    /// Connect to a WebSocket endpoint, retrying with a short backoff.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let mut last_err = None;
        for attempt in 1..=CONNECT_ATTEMPTS {
            match connect_async(url).await {
                Ok((ws, _response)) => {
                    debug!("Connected to {} (attempt {})", url, attempt);
                    return Ok(Self {
                        url: url.to_string(),
                        ws,
                    });
                }
                Err(err) => {
                    debug!("Connect to {} failed (attempt {}): {}", url, attempt, err);
                    last_err = Some(err);
                    tokio::time::sleep(CONNECT_BACKOFF).await;
                }
            }
        }

        Err(TransportError::ConnectFailed {
            url: url.to_string(),
            attempts: CONNECT_ATTEMPTS,
            source: last_err.expect("at least one attempt was made"),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transport for WebsocketTransport {
    async fn send_message(&mut self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.ws.send(Message::Binary(payload.into())).await?;
        Ok(())
    }

    async fn receive_message(&mut self) -> Result<Vec<u8>, TransportError> {
        loop {
            match self.ws.next().await {
                None => return Err(TransportError::Closed),
                Some(Err(err)) => return Err(err.into()),
                Some(Ok(Message::Binary(data))) => return Ok(data.to_vec()),
                Some(Ok(Message::Close(_))) => return Err(TransportError::Closed),
                Some(Ok(other)) => {
                    // Pings are answered by the library; anything else on
                    // this channel is unexpected but harmless.
                    warn!("Ignoring non-binary message from {}: {:?}", self.url, other);
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.ws.close(None).await?;
        Ok(())
    }
}
