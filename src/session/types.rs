//! Wire types for the Deribit JSON-RPC 2.0 WebSocket protocol
//!
//! One JSON object per text frame, in either direction. Requests carry a
//! correlation id; subscription pushes carry no id and are identified by
//! their `subscription` method and channel/data params shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound JSON-RPC request frame
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// Exchange-reported error inside a response
#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// Inbound JSON-RPC response frame, matched to its request by `id`
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

/// Params of a subscription push: `{channel, data}`
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionParams {
    pub channel: String,
    pub data: Value,
}

/// Inbound notification frame: `{method: "subscription", params: {...}}`
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    pub method: String,
    pub params: SubscriptionParams,
}

/// Unsolicited market-data event delivered outside the request/response cycle
#[derive(Debug, Clone)]
pub struct SubscriptionEvent {
    /// Channel the event belongs to (e.g., "book.ETH-PERPETUAL.100ms")
    pub channel: String,
    /// Raw payload as sent by the exchange
    pub payload: Value,
}

/// Generic inbound frame that could be a response or a subscription push
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum InboundFrame {
    /// Correlated response (has an `id` field)
    Response(JsonRpcResponse),
    /// Push notification (no `id`, has `method` + `params`)
    Notification(Notification),
}

/// Connection lifecycle, owned exclusively by the Session.
/// All other components observe it through snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
    Closing,
}

/// Build an order-book channel name: `book.<instrument>.<interval>`
pub fn book_channel(instrument: &str, interval: &str) -> String {
    format!("book.{}.{}", instrument, interval)
}
