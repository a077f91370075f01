//! Session-layer error types using thiserror
//!
//! Every caller-visible error carries enough context (request id, method)
//! to correlate it back to the call that produced it.

use std::time::Duration;

use thiserror::Error;

use super::types::ConnectionState;

#[derive(Error, Debug)]
pub enum SessionError {
    /// A single connect attempt failed. Handled by the reconnect policy,
    /// only surfaced to callers once attempts are exhausted.
    #[error("Connect failed: {0}")]
    Connect(String),

    /// A frame could not be written to the transport.
    #[error("Send failed: {0}")]
    Send(String),

    /// No response arrived for a call within its deadline. Local only:
    /// the request may still execute on the exchange side.
    #[error("Request {id} ({method}) timed out after {timeout:?}")]
    Timeout {
        id: u64,
        method: String,
        timeout: Duration,
    },

    /// The connection dropped while the call was in flight. The request
    /// may or may not have reached the exchange; it is never resent.
    #[error("Connection lost while request {id} ({method}) was pending")]
    ConnectionLost { id: u64, method: String },

    /// All reconnect attempts failed. The session is permanently down.
    #[error("Reconnect attempts exhausted after {attempts} tries")]
    ReconnectExhausted { attempts: u32 },

    /// `call` was issued while the session was not Ready. Requests are
    /// never queued across reconnects.
    #[error("Session not ready (state: {0:?})")]
    NotReady(ConnectionState),

    /// Exchange-reported rejection inside a response. Application-level,
    /// handed back verbatim and never retried.
    #[error("Exchange error {code} for request {id}: {message}")]
    Exchange { id: u64, code: i64, message: String },

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("Invalid frame: {0}")]
    InvalidFrame(#[from] serde_json::Error),
}

/// Result type alias for session operations
pub type SessionResult<T> = std::result::Result<T, SessionError>;
