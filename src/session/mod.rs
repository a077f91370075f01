//! Exchange session layer: transport, correlation, reconnection
//!
//! This module owns everything between raw WebSocket frames and the
//! `call(method, params) -> result` contract the command layer consumes.

pub mod client;
pub mod correlator;
pub mod errors;
pub mod reconnect;
pub mod transport;
pub mod types;

// Re-export commonly used types for convenience
pub use client::{Credentials, Session};
pub use correlator::Correlator;
pub use errors::{SessionError, SessionResult};
pub use reconnect::{BackoffState, ReconnectPolicy};
pub use transport::{Connector, TransportStream, WsConnector, WsTransport};
pub use types::{
    book_channel, ConnectionState, JsonRpcRequest, JsonRpcResponse, RpcError, SubscriptionEvent,
};
