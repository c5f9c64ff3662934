//! Socket lifecycle state machine.
//!
//! [`ConnectionManager`] owns at most one socket and at most one pending
//! reconnect timer. Socket notifications and timer expiries are funneled
//! into a single pump task, which handles each one to completion,
//! listener dispatch included, before looking at the next. Listener
//! callbacks run with no internal lock held, so they may call back into
//! the manager.
//!
//! ```text
//!             connect()                 Open
//! Disconnected ─────────▶ Connecting ─────────▶ Connected
//!      ▲                      │                     │
//!      │        Closed        │       Closed        │
//!      └──────────────────────┴─────────────────────┘
//!                 then: reconnect in min(30, 2^n) s, n ≤ 5
//! ```
//!
//! Every socket and every timer carries a generation id. Signals from a
//! superseded socket or a cancelled timer are ignored, which is what makes
//! [`ConnectionManager::disconnect`] final.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::event_bus::EventBus;
use super::messages::{self, WireMessage};
use super::reconnect::ReconnectPolicy;
use super::transport::{Signal, SocketHandle, Transport, TransportEvent, TransportEvents};
use crate::config::ClientConfig;
use crate::crypto::{ImportedPrivateKey, decrypt_with, looks_encrypted};
use crate::error::ClientError;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No socket.
    Disconnected,
    /// A socket was requested and has not opened yet.
    Connecting,
    /// The socket is open.
    Connected,
}

struct ActiveSocket {
    id: u64,
    handle: Box<dyn SocketHandle>,
}

struct PendingTimer {
    id: u64,
    task: JoinHandle<()>,
}

struct Inner {
    state: ConnectionState,
    socket: Option<ActiveSocket>,
    next_socket_id: u64,
    attempts: u32,
    timer: Option<PendingTimer>,
    next_timer_id: u64,
    exhausted: bool,
    decryption_key: Option<ImportedPrivateKey>,
}

impl Inner {
    fn is_current(&self, socket_id: u64) -> bool {
        self.socket.as_ref().is_some_and(|s| s.id == socket_id)
    }
}

struct Shared {
    endpoint: String,
    policy: ReconnectPolicy,
    transport: Arc<dyn Transport>,
    bus: EventBus<Value>,
    signals: mpsc::UnboundedSender<Signal>,
    inner: Mutex<Inner>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(socket) = inner.socket.take() {
            socket.handle.close();
        }
        if let Some(timer) = inner.timer.take() {
            timer.task.abort();
        }
    }
}

/// Reconnecting socket client that routes inbound frames to an
/// [`EventBus`].
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

/// Non-owning handle to a [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct WeakConnectionManager {
    shared: Weak<Shared>,
}

impl WeakConnectionManager {
    /// Returns the manager if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<ConnectionManager> {
        self.shared.upgrade().map(|shared| ConnectionManager { shared })
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.shared.endpoint)
            .field("state", &inner.state)
            .field("attempts", &inner.attempts)
            .field("exhausted", &inner.exhausted)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Creates a disconnected manager for `endpoint` and starts its event
    /// pump on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(endpoint: impl Into<String>, transport: Arc<dyn Transport>, policy: ReconnectPolicy) -> Self {
        let (signals, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            endpoint: endpoint.into(),
            policy,
            transport,
            bus: EventBus::with_events(&messages::KNOWN_EVENTS),
            signals,
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                socket: None,
                next_socket_id: 0,
                attempts: 0,
                timer: None,
                next_timer_id: 0,
                exhausted: false,
                decryption_key: None,
            }),
        });
        tokio::spawn(pump(Arc::downgrade(&shared), rx));
        Self { shared }
    }

    /// Creates a manager from the endpoint and reconnect policy in `config`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn from_config(config: &ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self::new(config.ws_endpoint(), transport, config.reconnect)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a non-owning handle.
    #[must_use]
    pub fn downgrade(&self) -> WeakConnectionManager {
        WeakConnectionManager {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Opens a socket unless one already exists.
    pub fn connect(&self) {
        let mut inner = self.lock();
        if inner.socket.is_some() {
            return;
        }
        inner.next_socket_id += 1;
        let id = inner.next_socket_id;
        inner.state = ConnectionState::Connecting;

        let events = TransportEvents::new(id, self.shared.signals.clone());
        let handle = self.shared.transport.open(&self.shared.endpoint, events);
        inner.socket = Some(ActiveSocket { id, handle });
        tracing::info!(endpoint = %self.shared.endpoint, socket = id, "opening socket");
    }

    /// Closes the socket and cancels any pending reconnect. No automatic
    /// reconnect follows.
    pub fn disconnect(&self) {
        let mut inner = self.lock();
        if let Some(socket) = inner.socket.take() {
            socket.handle.close();
            tracing::info!(socket = socket.id, "socket closed by caller");
        }
        if let Some(timer) = inner.timer.take() {
            timer.task.abort();
        }
        inner.state = ConnectionState::Disconnected;
    }

    /// Sends a frame over the open socket.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] unless the state is
    /// [`ConnectionState::Connected`], or [`ClientError::Transport`] if
    /// the socket refuses the frame.
    pub fn send(&self, message: &WireMessage) -> Result<(), ClientError> {
        let json = message
            .to_json()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let inner = self.lock();
        match (&inner.socket, inner.state) {
            (Some(socket), ConnectionState::Connected) => socket.handle.send(json),
            _ => Err(ClientError::NotConnected),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Returns `true` if the socket is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        let inner = self.lock();
        inner.state == ConnectionState::Connected && inner.socket.is_some()
    }

    /// Returns `true` if a socket exists, open or still opening.
    #[must_use]
    pub fn has_socket(&self) -> bool {
        self.lock().socket.is_some()
    }

    /// Consecutive unplanned closes since the last successful open.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.lock().attempts
    }

    /// Returns `true` once the attempt ceiling was hit and no reconnect is
    /// scheduled. Cleared by the next successful open.
    #[must_use]
    pub fn reconnect_exhausted(&self) -> bool {
        self.lock().exhausted
    }

    /// The socket endpoint, e.g. `wss://mail.example.com/ws`.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }

    /// The listener registry fed by this connection.
    #[must_use]
    pub fn events(&self) -> &EventBus<Value> {
        &self.shared.bus
    }

    /// Installs (or clears) the key used to decrypt `new_email` bodies.
    pub fn set_decryption_key(&self, key: Option<ImportedPrivateKey>) {
        self.lock().decryption_key = key;
    }

    /// Returns `true` if a decryption key is installed.
    #[must_use]
    pub fn has_decryption_key(&self) -> bool {
        self.lock().decryption_key.is_some()
    }

    fn handle_signal(&self, signal: Signal) {
        match signal {
            Signal::Transport { socket_id, event } => self.handle_transport(socket_id, event),
            Signal::ReconnectDue { timer_id } => self.handle_reconnect_due(timer_id),
        }
    }

    fn handle_transport(&self, socket_id: u64, event: TransportEvent) {
        match event {
            TransportEvent::Open => {
                {
                    let mut inner = self.lock();
                    if !inner.is_current(socket_id) {
                        return;
                    }
                    inner.state = ConnectionState::Connected;
                    inner.attempts = 0;
                    inner.exhausted = false;
                }
                tracing::info!(endpoint = %self.shared.endpoint, socket = socket_id, "socket connected");
                self.shared.bus.dispatch(messages::CONNECT, &Value::Null);
            }
            TransportEvent::Frame(text) => self.route_frame(socket_id, &text),
            TransportEvent::Error(detail) => {
                if !self.lock().is_current(socket_id) {
                    return;
                }
                tracing::warn!(socket = socket_id, error = %detail, "socket error");
                self.shared.bus.dispatch(messages::ERROR, &Value::String(detail));
            }
            TransportEvent::Closed => {
                {
                    let mut inner = self.lock();
                    if !inner.is_current(socket_id) {
                        return;
                    }
                    inner.socket = None;
                    inner.state = ConnectionState::Disconnected;
                }
                tracing::info!(socket = socket_id, "socket disconnected");
                self.shared.bus.dispatch(messages::DISCONNECT, &Value::Null);
                self.schedule_reconnect();
            }
        }
    }

    /// Parses and dispatches each newline-separated message of a frame.
    fn route_frame(&self, socket_id: u64, text: &str) {
        for line in text.split('\n').map(str::trim).filter(|l| !l.is_empty()) {
            if !self.lock().is_current(socket_id) {
                return;
            }
            let message = match WireMessage::from_json(line) {
                Ok(message) => message,
                Err(e) => {
                    tracing::debug!(error = %e, "dropping malformed frame");
                    continue;
                }
            };
            if message.is_local_event() {
                tracing::debug!(msg_type = %message.msg_type, "dropping frame with reserved type");
                continue;
            }
            if !self.shared.bus.has_event(&message.msg_type) {
                continue;
            }
            let payload = if message.msg_type == messages::NEW_EMAIL {
                self.decrypt_payload(message.payload)
            } else {
                message.payload
            };
            self.shared.bus.dispatch(&message.msg_type, &payload);
        }
    }

    /// Replaces an encrypted `body` with its plaintext. On failure the
    /// payload is returned unchanged.
    fn decrypt_payload(&self, mut payload: Value) -> Value {
        let Some(key) = self.lock().decryption_key.clone() else {
            return payload;
        };
        let Some(body) = payload.get("body").and_then(Value::as_str).map(str::to_owned) else {
            return payload;
        };
        if !looks_encrypted(&body) {
            return payload;
        }
        match decrypt_with(&key, &body) {
            Ok(plaintext) => {
                if let Some(object) = payload.as_object_mut() {
                    object.insert("body".to_string(), Value::String(plaintext));
                    object.insert("decrypted".to_string(), Value::Bool(true));
                }
            }
            Err(e) => tracing::warn!(error = %e, "inbound message left encrypted"),
        }
        payload
    }

    fn schedule_reconnect(&self) {
        let mut inner = self.lock();
        let attempt = inner.attempts.saturating_add(1);
        let Some(delay) = self.shared.policy.delay_for(attempt) else {
            inner.exhausted = true;
            let attempts = inner.attempts;
            drop(inner);
            tracing::warn!(attempts, "max reconnect attempts reached");
            self.shared.bus.dispatch(messages::RECONNECT_EXHAUSTED, &Value::Null);
            return;
        };

        inner.attempts = attempt;
        if let Some(previous) = inner.timer.take() {
            previous.task.abort();
        }
        inner.next_timer_id += 1;
        let timer_id = inner.next_timer_id;
        let deadline = Instant::now() + delay;
        let signals = self.shared.signals.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = signals.send(Signal::ReconnectDue { timer_id });
        });
        inner.timer = Some(PendingTimer { id: timer_id, task });
        tracing::info!(attempt, delay_secs = delay.as_secs(), "reconnect scheduled");
    }

    fn handle_reconnect_due(&self, timer_id: u64) {
        {
            let mut inner = self.lock();
            if inner.timer.as_ref().is_none_or(|t| t.id != timer_id) {
                return;
            }
            inner.timer = None;
        }
        tracing::info!("attempting reconnect");
        self.connect();
    }
}

/// Drains signals until the manager is dropped.
async fn pump(shared: Weak<Shared>, mut signals: mpsc::UnboundedReceiver<Signal>) {
    while let Some(signal) = signals.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        ConnectionManager { shared }.handle_signal(signal);
    }
}
