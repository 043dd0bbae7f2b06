//! Session lifecycle: connect, retry, reconnect signaling and teardown.
//!
//! The [`SessionManager`] owns the active transport handle and is the only
//! component allowed to replace it. Feed hubs and the calibration controller
//! fetch the current handle on demand and register a [`Reconnect`]
//! capability so the manager can tell them to rebuild their streams after
//! the handle rotates.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::presence::DevicePresence;
use crate::retry::{retry_async, with_timeout, RetryPolicy};
use crate::transport::{Connector, Transport, TransportError};

/// Default per-attempt handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection state of the session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Errors surfaced by session accessors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No live session; connect first.
    #[error("not connected to the eye tracker")]
    NotConnected,
}

/// Capability invoked when the session establishes a fresh transport.
///
/// Implementors tear down any state tied to the previous handle and rebuild
/// against the new one.
pub trait Reconnect: Send + Sync {
    fn on_session_reconnected(&self);
}

/// Owner of the connection lifecycle and the swappable transport handle.
///
/// Cloning is cheap and shares the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    connector: Arc<dyn Connector>,
    shared: Mutex<Shared>,
    dependents: Mutex<Vec<Weak<dyn Reconnect>>>,
    lifetime: CancellationToken,
}

struct Shared {
    state: SessionState,
    transport: Option<Arc<dyn Transport>>,
    // Present while a connect attempt is in flight; concurrent connect
    // callers await this instead of starting a second attempt.
    in_flight: Option<watch::Receiver<Option<bool>>>,
}

impl SessionManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                connector,
                shared: Mutex::new(Shared {
                    state: SessionState::Disconnected,
                    transport: None,
                    in_flight: None,
                }),
                dependents: Mutex::new(Vec::new()),
                lifetime: CancellationToken::new(),
            }),
        }
    }

    /// Establishes a session, retrying with the handshake policy.
    ///
    /// Single-flight: when an attempt is already in progress, this awaits
    /// and returns that attempt's outcome instead of starting a second one.
    /// Transport failures never escape; the outcome is a plain boolean.
    pub async fn connect(&self, timeout: Duration) -> bool {
        if self.inner.lifetime.is_cancelled() {
            return false;
        }

        let mut outcome_rx = {
            let mut shared = self.inner.shared.lock().unwrap();
            match shared.in_flight.clone() {
                Some(existing) => existing,
                None => {
                    let (outcome_tx, outcome_rx) = watch::channel(None);
                    shared.in_flight = Some(outcome_rx.clone());
                    shared.state = SessionState::Connecting;
                    let manager = self.clone();
                    tokio::spawn(async move {
                        let transport = manager.handshake_with_retries(timeout).await;
                        let connected = manager.finish_connect(transport);
                        let _ = outcome_tx.send(Some(connected));
                    });
                    outcome_rx
                }
            }
        };

        loop {
            if let Some(outcome) = *outcome_rx.borrow_and_update() {
                return outcome;
            }
            if outcome_rx.changed().await.is_err() {
                return false;
            }
        }
    }

    /// Returns the active transport handle.
    ///
    /// The handle rotates on reconnect; fetch a fresh one per operation
    /// instead of caching it.
    pub fn current_transport(&self) -> Result<Arc<dyn Transport>, SessionError> {
        self.inner
            .shared
            .lock()
            .unwrap()
            .transport
            .clone()
            .ok_or(SessionError::NotConnected)
    }

    /// Current connection state.
    pub fn state(&self) -> SessionState {
        self.inner.shared.lock().unwrap().state
    }

    /// Whether the session has been disposed via [`disconnect`].
    ///
    /// [`disconnect`]: SessionManager::disconnect
    pub fn is_closed(&self) -> bool {
        self.inner.lifetime.is_cancelled()
    }

    /// Cancels pending connect/monitor activity and releases the transport.
    ///
    /// Idempotent; the session cannot be reused afterwards.
    pub fn disconnect(&self) {
        self.inner.lifetime.cancel();
        let mut shared = self.inner.shared.lock().unwrap();
        shared.state = SessionState::Disconnected;
        shared.transport = None;
        shared.in_flight = None;
        debug!("session disconnected");
    }

    /// Registers a dependent to be told about fresh transports.
    pub fn register_reconnect(&self, dependent: Weak<dyn Reconnect>) {
        self.inner.dependents.lock().unwrap().push(dependent);
    }

    /// Cancellation token parented to the session lifetime, so a disconnect
    /// cancels dependent loops transitively.
    pub(crate) fn child_token(&self) -> CancellationToken {
        self.inner.lifetime.child_token()
    }

    /// Starts watching a device-presence source.
    ///
    /// A transition to present while no connect is in flight triggers
    /// exactly one handshake attempt; on success the standard reconnect
    /// signal fires.
    pub fn attach_presence(&self, presence: Arc<dyn DevicePresence>) {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut changes = presence.subscribe();
            loop {
                tokio::select! {
                    _ = manager.inner.lifetime.cancelled() => return,
                    changed = changes.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        if *changes.borrow_and_update() {
                            manager.presence_handshake().await;
                        }
                    }
                }
            }
        });
    }

    async fn handshake_with_retries(&self, timeout: Duration) -> Option<Arc<dyn Transport>> {
        let policy = RetryPolicy::handshake();
        let result = tokio::select! {
            _ = self.inner.lifetime.cancelled() => return None,
            result = retry_async(
                &policy,
                |_| self.attempt_handshake(timeout),
                |err: &TransportError| err.kind().is_transient(),
            ) => result,
        };
        match result {
            Ok(transport) => Some(transport),
            Err(err) => {
                warn!(error = %err, "connection handshake failed");
                None
            }
        }
    }

    async fn attempt_handshake(
        &self,
        timeout: Duration,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        match with_timeout(timeout, self.inner.connector.connect(timeout)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::deadline("handshake timed out")),
        }
    }

    /// Single handshake attempt used after the device reappears; never
    /// escalates into the retry policy.
    async fn presence_handshake(&self) {
        let (outcome_tx, outcome_rx) = watch::channel(None);
        {
            let mut shared = self.inner.shared.lock().unwrap();
            if shared.in_flight.is_some() {
                debug!("connect already in flight, skipping presence handshake");
                return;
            }
            shared.in_flight = Some(outcome_rx);
            shared.state = SessionState::Connecting;
        }

        debug!("device became present, attempting handshake");
        let transport = match self.attempt_handshake(DEFAULT_CONNECT_TIMEOUT).await {
            Ok(transport) => Some(transport),
            Err(err) => {
                warn!(error = %err, "presence-triggered handshake failed");
                None
            }
        };
        let connected = self.finish_connect(transport);
        let _ = outcome_tx.send(Some(connected));
    }

    /// Commits the handshake outcome and dispatches the reconnect signal.
    fn finish_connect(&self, transport: Option<Arc<dyn Transport>>) -> bool {
        // A disconnect that raced the handshake wins.
        let transport = if self.inner.lifetime.is_cancelled() {
            None
        } else {
            transport
        };
        let connected = transport.is_some();
        {
            let mut shared = self.inner.shared.lock().unwrap();
            shared.in_flight = None;
            shared.transport = transport;
            shared.state = if connected {
                SessionState::Connected
            } else {
                SessionState::Disconnected
            };
        }
        if connected {
            info!("session established");
            self.notify_reconnected();
        }
        connected
    }

    fn notify_reconnected(&self) {
        let dependents: Vec<Arc<dyn Reconnect>> = {
            let mut list = self.inner.dependents.lock().unwrap();
            list.retain(|weak| weak.strong_count() > 0);
            list.iter().filter_map(Weak::upgrade).collect()
        };
        for dependent in dependents {
            dependent.on_session_reconnected();
        }
    }
}
