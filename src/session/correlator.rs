//! Request/response correlation over one WebSocket connection
//!
//! The correlator is the single inbound-frame consumer. It routes every
//! frame to exactly one destination: the pending slot whose id matches
//! (responses) or the subscription broadcast (pushes). Blind
//! send-then-recv pairing is exactly what this module exists to prevent:
//! under concurrent calls or an active subscription the next frame on the
//! wire is unrelated to the request just sent, so ids are the only
//! correlation mechanism.
//!
//! One correlator lives for one connection. On connection loss every
//! pending slot resolves exactly once with `ConnectionLost`; the session
//! builds a fresh correlator after a successful reconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex, Notify};
use tracing::{debug, error, info, warn};

use super::errors::{SessionError, SessionResult};
use super::transport::TransportStream;
use super::types::{InboundFrame, JsonRpcRequest, JsonRpcResponse, SubscriptionEvent};

/// Outbound frame queue depth between callers and the pump task
const OUTBOUND_QUEUE_DEPTH: usize = 32;

/// Pending-call table: id -> single-resolution slot.
/// Ids are never reused while an entry exists (the counter only grows).
type PendingTable = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Cheaply cloneable handle to one connection's demultiplexer
#[derive(Clone)]
pub struct Correlator {
    /// Monotonically increasing correlation ids for this connection
    next_id: Arc<AtomicU64>,
    /// Outstanding requests awaiting their response
    pending: PendingTable,
    /// Frames queued for the pump task to write
    outbound_tx: mpsc::Sender<String>,
    /// Fan-out for unsolicited subscription events
    events_tx: broadcast::Sender<SubscriptionEvent>,
    /// Deliberate-shutdown signal for the pump task
    shutdown: Arc<Notify>,
    /// Flips to true when the pump task exits
    closed_rx: watch::Receiver<bool>,
}

impl Correlator {
    /// Take ownership of an established transport stream and spawn the
    /// pump task that owns it for the connection's lifetime.
    ///
    /// `events_tx` is supplied by the session so the event stream
    /// survives reconnects across correlator instances.
    pub fn spawn<S>(stream: S, events_tx: broadcast::Sender<SubscriptionEvent>) -> Self
    where
        S: TransportStream + 'static,
    {
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let (closed_tx, closed_rx) = watch::channel(false);
        let shutdown = Arc::new(Notify::new());

        tokio::spawn(pump_loop(
            stream,
            outbound_rx,
            Arc::clone(&pending),
            events_tx.clone(),
            Arc::clone(&shutdown),
            closed_tx,
        ));

        Self {
            next_id: Arc::new(AtomicU64::new(1)),
            pending,
            outbound_tx,
            events_tx,
            shutdown,
            closed_rx,
        }
    }

    /// Send a request and suspend until its correlated response arrives,
    /// the timeout elapses, or the connection is lost.
    ///
    /// Timeout only stops local waiting; a request already on the wire
    /// cannot be un-sent, and its late response is discarded by the pump.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> SessionResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);
        let frame = serde_json::to_string(&request)?;

        let (slot_tx, slot_rx) = oneshot::channel();
        self.pending.lock().await.insert(id, slot_tx);

        debug!(id, method, "sending request");
        if self.outbound_tx.send(frame).await.is_err() {
            // Pump already gone; the connection died before we could send
            self.pending.lock().await.remove(&id);
            return Err(SessionError::ConnectionLost {
                id,
                method: method.to_string(),
            });
        }

        match tokio::time::timeout(timeout, slot_rx).await {
            Ok(Ok(response)) => match response.error {
                Some(err) => Err(SessionError::Exchange {
                    id,
                    code: err.code,
                    message: err.message,
                }),
                None => Ok(response.result.unwrap_or(Value::Null)),
            },
            // Slot sender dropped: the pump failed all pending calls
            Ok(Err(_)) => Err(SessionError::ConnectionLost {
                id,
                method: method.to_string(),
            }),
            Err(_) => {
                // Remove the slot so a late response is discarded, not
                // delivered anywhere
                self.pending.lock().await.remove(&id);
                debug!(id, method, "call timed out, pending slot removed");
                Err(SessionError::Timeout {
                    id,
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Subscribe to the unsolicited event stream. Each receiver gets its
    /// own queue; a slow consumer lags independently and never delays
    /// response delivery.
    pub fn events(&self) -> broadcast::Receiver<SubscriptionEvent> {
        self.events_tx.subscribe()
    }

    /// Ask the pump to close the transport and exit
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// True once the pump task has exited (connection gone)
    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    /// Resolve when the pump task exits, however that happens
    pub async fn wait_closed(&self) {
        let mut rx = self.closed_rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

/// Single owner of the transport: selects between outbound frames and
/// inbound traffic until the connection ends, then fails all pending
/// calls exactly once.
async fn pump_loop<S>(
    mut stream: S,
    mut outbound_rx: mpsc::Receiver<String>,
    pending: PendingTable,
    events_tx: broadcast::Sender<SubscriptionEvent>,
    shutdown: Arc<Notify>,
    closed_tx: watch::Sender<bool>,
) where
    S: TransportStream,
{
    debug!("connection pump started");
    loop {
        tokio::select! {
            maybe_frame = outbound_rx.recv() => {
                match maybe_frame {
                    Some(frame) => {
                        if let Err(e) = stream.send_frame(frame).await {
                            error!(error = %e, "frame write failed, dropping connection");
                            break;
                        }
                    }
                    // Every correlator handle dropped
                    None => {
                        stream.close().await;
                        break;
                    }
                }
            }
            maybe_inbound = stream.next_frame() => {
                match maybe_inbound {
                    Some(Ok(text)) => route_frame(&pending, &events_tx, &text).await,
                    Some(Err(e)) => {
                        error!(error = %e, "transport read failed, dropping connection");
                        break;
                    }
                    None => {
                        info!("connection closed by peer");
                        break;
                    }
                }
            }
            _ = shutdown.notified() => {
                info!("closing connection on request");
                stream.close().await;
                break;
            }
        }
    }

    // Fail every still-pending call. Dropping the slot senders resolves
    // each waiting caller exactly once with ConnectionLost.
    let mut table = pending.lock().await;
    if !table.is_empty() {
        warn!(count = table.len(), "failing pending calls after connection loss");
    }
    table.clear();
    drop(table);

    let _ = closed_tx.send(true);
    debug!("connection pump ended");
}

/// Route one inbound frame to exactly one destination
async fn route_frame(
    pending: &PendingTable,
    events_tx: &broadcast::Sender<SubscriptionEvent>,
    text: &str,
) {
    tracing::trace!(frame = %text, "inbound frame");
    match serde_json::from_str::<InboundFrame>(text) {
        Ok(InboundFrame::Response(response)) => {
            let slot = pending.lock().await.remove(&response.id);
            match slot {
                Some(slot_tx) => {
                    // Receiver may have just timed out; nothing to do then
                    let _ = slot_tx.send(response);
                }
                None => {
                    warn!(id = response.id, "response with no pending call discarded");
                }
            }
        }
        Ok(InboundFrame::Notification(notification)) => {
            if notification.method == "subscription" {
                // No active receivers is fine; events are fire-and-forget
                let _ = events_tx.send(SubscriptionEvent {
                    channel: notification.params.channel,
                    payload: notification.params.data,
                });
            } else {
                warn!(method = %notification.method, "unhandled notification discarded");
            }
        }
        Err(e) => {
            warn!(error = %e, frame = %text, "frame parse failed, discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    /// In-process transport: frames injected through `inbound_tx` come out
    /// of `next_frame`; everything sent lands on `sent_rx`.
    struct MockStream {
        inbound_rx: mpsc::UnboundedReceiver<String>,
        sent_tx: mpsc::UnboundedSender<String>,
    }

    struct MockHandle {
        inbound_tx: mpsc::UnboundedSender<String>,
        sent_rx: mpsc::UnboundedReceiver<String>,
    }

    fn mock_pair() -> (MockStream, MockHandle) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        (
            MockStream { inbound_rx, sent_tx },
            MockHandle { inbound_tx, sent_rx },
        )
    }

    #[async_trait]
    impl TransportStream for MockStream {
        async fn send_frame(&mut self, text: String) -> SessionResult<()> {
            self.sent_tx
                .send(text)
                .map_err(|_| SessionError::Send("mock peer gone".into()))
        }

        async fn next_frame(&mut self) -> Option<SessionResult<String>> {
            self.inbound_rx.recv().await.map(Ok)
        }

        async fn close(&mut self) {
            self.inbound_rx.close();
        }
    }

    fn response_frame(id: u64, result: Value) -> String {
        json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string()
    }

    fn event_frame(channel: &str, data: Value) -> String {
        json!({
            "jsonrpc": "2.0",
            "method": "subscription",
            "params": {"channel": channel, "data": data}
        })
        .to_string()
    }

    #[tokio::test]
    async fn concurrent_calls_resolve_by_id_regardless_of_wire_order() {
        let (stream, mut handle) = mock_pair();
        let (events_tx, _) = broadcast::channel(16);
        let correlator = Correlator::spawn(stream, events_tx);

        let c1 = correlator.clone();
        let c2 = correlator.clone();
        let call_a = tokio::spawn(async move {
            c1.call("private/get_positions", json!({"currency": "ETH"}), Duration::from_secs(5))
                .await
        });
        let call_b = tokio::spawn(async move {
            c2.call("public/get_order_book", json!({"instrument_name": "BTC-PERPETUAL"}), Duration::from_secs(5))
                .await
        });

        // Wait for both requests to hit the wire, then answer in reverse
        // order, tagging each response with its request's method
        let first: Value =
            serde_json::from_str(&handle.sent_rx.recv().await.unwrap()).unwrap();
        let second: Value =
            serde_json::from_str(&handle.sent_rx.recv().await.unwrap()).unwrap();
        assert_ne!(first["id"], second["id"]);

        for request in [&second, &first] {
            handle
                .inbound_tx
                .send(response_frame(
                    request["id"].as_u64().unwrap(),
                    json!({"for_method": request["method"]}),
                ))
                .unwrap();
        }

        let result_a = call_a.await.unwrap().unwrap();
        let result_b = call_b.await.unwrap().unwrap();
        assert_eq!(result_a["for_method"], "private/get_positions");
        assert_eq!(result_b["for_method"], "public/get_order_book");
    }

    #[tokio::test]
    async fn interleaved_event_does_not_capture_response() {
        let (stream, mut handle) = mock_pair();
        let (events_tx, _) = broadcast::channel(16);
        let correlator = Correlator::spawn(stream, events_tx);
        let mut events = correlator.events();

        let c = correlator.clone();
        let call = tokio::spawn(async move {
            c.call(
                "public/get_instrument",
                json!({"instrument_name": "ETH-PERPETUAL"}),
                Duration::from_secs(5),
            )
            .await
        });

        let sent = handle.sent_rx.recv().await.unwrap();
        let id = serde_json::from_str::<Value>(&sent).unwrap()["id"]
            .as_u64()
            .unwrap();

        // Event arrives before the response; the call must still resolve
        // with the correlated result, and the event must only show up on
        // the event stream.
        handle
            .inbound_tx
            .send(event_frame("book.ETH-PERPETUAL.100ms", json!({"bids": [[2000.0, 10.0]]})))
            .unwrap();
        handle
            .inbound_tx
            .send(response_frame(id, json!({"contract_size": 1})))
            .unwrap();

        let result = call.await.unwrap().unwrap();
        assert_eq!(result["contract_size"], 1);

        let event = events.recv().await.unwrap();
        assert_eq!(event.channel, "book.ETH-PERPETUAL.100ms");
        assert_eq!(event.payload["bids"][0][0], 2000.0);
        // Exactly one event: the response never leaked into the stream
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn late_response_after_timeout_is_discarded() {
        let (stream, mut handle) = mock_pair();
        let (events_tx, _) = broadcast::channel(16);
        let correlator = Correlator::spawn(stream, events_tx);
        let mut events = correlator.events();

        let err = correlator
            .call("private/buy", json!({"instrument_name": "ETH-PERPETUAL"}), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Timeout { id: 1, .. }));

        // Late response for the timed-out id: logged and dropped, never
        // delivered as an event
        let _ = handle.sent_rx.recv().await.unwrap();
        handle
            .inbound_tx
            .send(response_frame(1, json!({"order": {"order_id": "X"}})))
            .unwrap();

        // A fresh call on the same connection still works
        let c = correlator.clone();
        let call = tokio::spawn(async move {
            c.call("public/get_time", json!({}), Duration::from_secs(5)).await
        });
        let sent = handle.sent_rx.recv().await.unwrap();
        let id = serde_json::from_str::<Value>(&sent).unwrap()["id"]
            .as_u64()
            .unwrap();
        assert_eq!(id, 2);
        handle
            .inbound_tx
            .send(response_frame(id, json!(1_700_000_000)))
            .unwrap();
        assert_eq!(call.await.unwrap().unwrap(), json!(1_700_000_000));

        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn connection_loss_fails_all_pending_calls_once() {
        let (stream, mut handle) = mock_pair();
        let (events_tx, _) = broadcast::channel(16);
        let correlator = Correlator::spawn(stream, events_tx);

        let mut calls = Vec::new();
        for i in 0..3 {
            let c = correlator.clone();
            calls.push(tokio::spawn(async move {
                c.call("private/get_positions", json!({"n": i}), Duration::from_secs(5))
                    .await
            }));
        }
        // All three on the wire before the connection drops
        for _ in 0..3 {
            let _ = handle.sent_rx.recv().await.unwrap();
        }

        // Peer disappears
        drop(handle.inbound_tx);

        for call in calls {
            let err = call.await.unwrap().unwrap_err();
            assert!(matches!(err, SessionError::ConnectionLost { .. }));
        }
        correlator.wait_closed().await;
        assert!(correlator.is_closed());
    }

    #[tokio::test]
    async fn exchange_error_is_handed_back_verbatim() {
        let (stream, mut handle) = mock_pair();
        let (events_tx, _) = broadcast::channel(16);
        let correlator = Correlator::spawn(stream, events_tx);

        let c = correlator.clone();
        let call = tokio::spawn(async move {
            c.call("private/buy", json!({"amount": 3}), Duration::from_secs(5)).await
        });
        let sent = handle.sent_rx.recv().await.unwrap();
        let id = serde_json::from_str::<Value>(&sent).unwrap()["id"]
            .as_u64()
            .unwrap();
        handle
            .inbound_tx
            .send(
                json!({"jsonrpc": "2.0", "id": id, "error": {"code": 10012, "message": "invalid amount"}})
                    .to_string(),
            )
            .unwrap();

        match call.await.unwrap().unwrap_err() {
            SessionError::Exchange { id: err_id, code, message } => {
                assert_eq!(err_id, id);
                assert_eq!(code, 10012);
                assert_eq!(message, "invalid amount");
            }
            other => panic!("expected exchange error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn shutdown_closes_the_pump() {
        let (stream, _handle) = mock_pair();
        let (events_tx, _) = broadcast::channel(16);
        let correlator = Correlator::spawn(stream, events_tx);

        correlator.shutdown();
        tokio::time::timeout(Duration::from_secs(1), correlator.wait_closed())
            .await
            .expect("pump should exit on shutdown");
    }
}
