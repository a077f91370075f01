//! Session orchestration: connect, authenticate, reconnect, delegate
//!
//! The session composes a `Connector` (transport), the per-connection
//! `Correlator`, and the reconnect policy. It is the sole owner of
//! `ConnectionState`; everything else observes snapshots through a watch
//! channel. While not Ready, `call` fails fast instead of queuing:
//! in-flight requests at the moment of disconnection are failed, never
//! resent, so a reconnect can never double-submit an order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tracing::{error, info, warn};

use super::correlator::Correlator;
use super::errors::{SessionError, SessionResult};
use super::reconnect::{BackoffState, ReconnectPolicy};
use super::transport::Connector;
use super::types::{ConnectionState, SubscriptionEvent};

/// Queue depth for the session-level subscription event fan-out
const EVENT_QUEUE_DEPTH: usize = 256;

/// Exchange API credential pair
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl Credentials {
    /// Read credentials from environment variables
    pub fn from_env() -> SessionResult<Self> {
        let client_id = std::env::var("DERIBIT_CLIENT_ID")
            .map_err(|_| SessionError::Connect("DERIBIT_CLIENT_ID not set".into()))?;
        let client_secret = std::env::var("DERIBIT_CLIENT_SECRET")
            .map_err(|_| SessionError::Connect("DERIBIT_CLIENT_SECRET not set".into()))?;
        Ok(Self {
            client_id,
            client_secret,
        })
    }
}

/// Client session over one logical exchange connection.
///
/// Cheap to clone; all clones share the same connection and state.
pub struct Session<C: Connector> {
    inner: Arc<SessionInner<C>>,
}

impl<C: Connector> Clone for Session<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct SessionInner<C: Connector> {
    connector: C,
    credentials: Credentials,
    policy: ReconnectPolicy,
    call_timeout: Duration,
    /// Single mutator: the session itself. Observers snapshot.
    state_tx: watch::Sender<ConnectionState>,
    /// Current connection's demultiplexer; swapped on reconnect
    correlator: RwLock<Option<Correlator>>,
    /// Survives reconnects; each correlator instance feeds it
    events_tx: broadcast::Sender<SubscriptionEvent>,
    /// Set during deliberate close so the supervisor stands down
    closing: AtomicBool,
    supervisor: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<C: Connector> SessionInner<C> {
    fn set_state(&self, state: ConnectionState) {
        // `send` is a no-op when no watch receivers exist; `send_replace`
        // stores the state unconditionally so snapshots stay accurate.
        let _ = self.state_tx.send_replace(state);
    }
}

impl<C: Connector> Session<C> {
    pub fn new(
        connector: C,
        credentials: Credentials,
        policy: ReconnectPolicy,
        call_timeout: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(EVENT_QUEUE_DEPTH);
        Self {
            inner: Arc::new(SessionInner {
                connector,
                credentials,
                policy,
                call_timeout,
                state_tx,
                correlator: RwLock::new(None),
                events_tx,
                closing: AtomicBool::new(false),
                supervisor: Mutex::new(None),
            }),
        }
    }

    /// Snapshot of the current connection state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Observe state transitions as they happen
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Establish the connection and authenticate.
    ///
    /// One transport attempt, then the `public/auth` handshake; the
    /// session only becomes Ready after the exchange accepts the
    /// credentials. An exchange-side auth rejection is returned to the
    /// caller and does not trigger a reconnect: retrying credentials is
    /// the caller's policy, not the session's.
    pub async fn connect(&self) -> SessionResult<()> {
        let inner = &self.inner;
        inner.closing.store(false, Ordering::SeqCst);
        inner.set_state(ConnectionState::Connecting);

        let stream = match inner.connector.open().await {
            Ok(stream) => stream,
            Err(e) => {
                inner.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };
        let correlator = Correlator::spawn(stream, inner.events_tx.clone());

        inner.set_state(ConnectionState::Authenticating);
        if let Err(e) = authenticate(&correlator, &inner.credentials, inner.call_timeout).await {
            correlator.shutdown();
            inner.set_state(ConnectionState::Disconnected);
            return Err(e);
        }

        *inner.correlator.write().await = Some(correlator.clone());
        inner.set_state(ConnectionState::Ready);
        info!("session ready");

        let mut supervisor_slot = inner.supervisor.lock().await;
        if let Some(old) = supervisor_slot.take() {
            old.abort();
        }
        *supervisor_slot = Some(tokio::spawn(supervise(Arc::clone(inner), correlator)));
        Ok(())
    }

    /// Send a correlated request. Fails fast with `NotReady` while the
    /// session is connecting, reconnecting, or down.
    pub async fn call(&self, method: &str, params: Value) -> SessionResult<Value> {
        self.call_with_timeout(method, params, self.inner.call_timeout)
            .await
    }

    /// `call` with an explicit per-request deadline
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> SessionResult<Value> {
        let state = self.state();
        if state != ConnectionState::Ready {
            return Err(SessionError::NotReady(state));
        }
        let correlator = {
            let guard = self.inner.correlator.read().await;
            match guard.as_ref() {
                Some(correlator) => correlator.clone(),
                None => return Err(SessionError::NotReady(state)),
            }
        };
        correlator.call(method, params, timeout).await
    }

    /// Subscription event stream. Survives reconnects; each receiver
    /// has its own queue and lags independently.
    pub fn events(&self) -> broadcast::Receiver<SubscriptionEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Subscribe to market-data channels via `public/subscribe`
    pub async fn subscribe(&self, channels: &[String]) -> SessionResult<Value> {
        self.call("public/subscribe", json!({ "channels": channels }))
            .await
    }

    /// Close the session deliberately. Pending calls fail with
    /// `ConnectionLost`; no reconnect is attempted.
    pub async fn close(&self) {
        let inner = &self.inner;
        inner.closing.store(true, Ordering::SeqCst);
        inner.set_state(ConnectionState::Closing);

        let correlator = inner.correlator.write().await.take();
        if let Some(correlator) = correlator {
            correlator.shutdown();
            correlator.wait_closed().await;
        }
        if let Some(handle) = inner.supervisor.lock().await.take() {
            // The supervisor may be mid-backoff; don't wait out its sleep
            handle.abort();
            let _ = handle.await;
        }
        inner.set_state(ConnectionState::Disconnected);
        info!("session closed");
    }
}

/// Perform the `public/auth` handshake on a fresh connection
async fn authenticate(
    correlator: &Correlator,
    credentials: &Credentials,
    timeout: Duration,
) -> SessionResult<()> {
    let params = json!({
        "grant_type": "client_credentials",
        "client_id": credentials.client_id,
        "client_secret": credentials.client_secret,
    });
    let result = correlator.call("public/auth", params, timeout).await?;
    let expires_in = result.get("expires_in").and_then(Value::as_i64);
    info!(?expires_in, "authenticated with exchange");
    Ok(())
}

/// Watches the live connection and drives recovery after loss.
///
/// State machine per outage: Disconnected -> Connecting -> (Ready |
/// Disconnected). First attempt is immediate; each failure waits the
/// current backoff delay, then doubles it. After `max_attempts` failures
/// the session is permanently down and no further attempts occur.
async fn supervise<C: Connector>(inner: Arc<SessionInner<C>>, mut correlator: Correlator) {
    loop {
        correlator.wait_closed().await;
        if inner.closing.load(Ordering::SeqCst) {
            return;
        }

        warn!("connection lost, starting recovery");
        inner.correlator.write().await.take();
        inner.set_state(ConnectionState::Disconnected);

        let mut backoff = BackoffState::new(&inner.policy);
        let reconnected = loop {
            inner.set_state(ConnectionState::Connecting);
            match inner.connector.open().await {
                Ok(stream) => {
                    backoff.reset(&inner.policy);
                    break Some(Correlator::spawn(stream, inner.events_tx.clone()));
                }
                Err(e) => {
                    let delay = backoff.on_failure();
                    warn!(
                        attempt = backoff.attempt,
                        error = %e,
                        "reconnect attempt failed"
                    );
                    if backoff.exhausted(&inner.policy) {
                        let fatal = SessionError::ReconnectExhausted {
                            attempts: inner.policy.max_attempts,
                        };
                        error!(error = %fatal, "session permanently down");
                        break None;
                    }
                    inner.set_state(ConnectionState::Disconnected);
                    tokio::time::sleep(delay).await;
                }
            }
        };

        let new_correlator = match reconnected {
            Some(correlator) => correlator,
            None => {
                inner.set_state(ConnectionState::Disconnected);
                return;
            }
        };

        inner.set_state(ConnectionState::Authenticating);
        match authenticate(&new_correlator, &inner.credentials, inner.call_timeout).await {
            Ok(()) => {
                *inner.correlator.write().await = Some(new_correlator.clone());
                inner.set_state(ConnectionState::Ready);
                info!("session ready after reconnect");
                correlator = new_correlator;
            }
            Err(e) => {
                // Exchange rejected the credentials on a healthy
                // connection. Automatic recovery stops here; retrying
                // auth is the caller's decision.
                error!(error = %e, "re-authentication rejected, stopping automatic recovery");
                new_correlator.shutdown();
                inner.set_state(ConnectionState::Disconnected);
                return;
            }
        }
    }
}
