//! WebSocket transport for the exchange connection
//!
//! Owns exactly one raw connection: a single connect attempt, a single
//! logical duplex stream. No retry logic lives here; reconnection policy
//! is layered on top (see `reconnect`). The trait seam exists so tests
//! can drive the session against an in-process mock exchange.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{
    connect_async_tls_with_config,
    tungstenite::protocol::Message,
    Connector as TlsConnector, MaybeTlsStream, WebSocketStream,
};

use super::errors::{SessionError, SessionResult};

/// Type alias for the WebSocket stream
type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Opens connections. One call to `open` performs one connect attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Stream: TransportStream + 'static;

    async fn open(&self) -> SessionResult<Self::Stream>;
}

/// One established duplex connection carrying text frames.
#[async_trait]
pub trait TransportStream: Send {
    /// Write one frame. Fails with `SessionError::Send` if the connection
    /// is no longer writable.
    async fn send_frame(&mut self, text: String) -> SessionResult<()>;

    /// Next inbound text frame. `None` is the terminal closure signal,
    /// not a frame.
    async fn next_frame(&mut self) -> Option<SessionResult<String>>;

    /// Release the connection unconditionally.
    async fn close(&mut self);
}

/// Production connector for the exchange WebSocket endpoint
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Stream = WsTransport;

    async fn open(&self) -> SessionResult<WsTransport> {
        // Build TLS connector with a TLS 1.2 floor
        let tls = native_tls::TlsConnector::builder()
            .min_protocol_version(Some(native_tls::Protocol::Tlsv12))
            .build()
            .map_err(|e| SessionError::Connect(format!("TLS error: {}", e)))?;

        let (ws_stream, _response) = connect_async_tls_with_config(
            &self.url,
            None,
            false,
            Some(TlsConnector::NativeTls(tls)),
        )
        .await
        .map_err(|e| SessionError::Connect(format!("{}: {}", self.url, e)))?;

        tracing::debug!(url = %self.url, "WebSocket connected");
        Ok(WsTransport { stream: ws_stream })
    }
}

/// Production transport over tokio-tungstenite
pub struct WsTransport {
    stream: WsStream,
}

#[async_trait]
impl TransportStream for WsTransport {
    async fn send_frame(&mut self, text: String) -> SessionResult<()> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| SessionError::Send(e.to_string()))
    }

    async fn next_frame(&mut self) -> Option<SessionResult<String>> {
        while let Some(msg_result) = self.stream.next().await {
            match msg_result {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) => {
                    tracing::info!("WebSocket closed by server");
                    return None;
                }
                Ok(Message::Ping(data)) => {
                    // PONG replies are queued by tungstenite automatically
                    tracing::trace!("Ping received: {:?}", data);
                }
                Ok(_) => {
                    // Binary/pong frames - the exchange protocol is text-only
                }
                Err(e) => return Some(Err(SessionError::WebSocket(Box::new(e)))),
            }
        }
        None
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
