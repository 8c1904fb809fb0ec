//! Wristkit Transports
//!
//! A transport is a logical bidirectional message channel to a device.
//! Callers cannot tell an emulator-backed channel apart from any other:
//! every transport carries the same framed binary messages. The protocol
//! spoken over those messages is owned by a separate layer.

pub mod websocket;

pub use websocket::WebsocketTransport;

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Could not connect to {url} after {attempts} attempts: {source}")]
    ConnectFailed {
        url: String,
        attempts: u32,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("Connection closed")]
    Closed,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// A connected bidirectional message channel to a device.
pub trait Transport {
    /// Send one binary message.
    fn send_message(
        &mut self,
        payload: Vec<u8>,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Receive the next binary message.
    fn receive_message(
        &mut self,
    ) -> impl std::future::Future<Output = Result<Vec<u8>, TransportError>> + Send;

    /// Close the channel.
    fn close(&mut self) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;
}
