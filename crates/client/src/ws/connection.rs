//! Realtime connection with state management and auto-reconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kinderlink_shared::{
    ack_error, decode_frame, encode_frame, EventName, Frame, FrameEnvelope, WsEnvelope,
    TOKEN_PARAM,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use url::Url;

use super::router::{EventRouter, Subscription};
use super::transport::{redact, Connector, Link, WsConnector};
use crate::config::ClientConfig;
use crate::credentials::CredentialStore;
use crate::error::{RealtimeError, Result};

/// Connection state for the realtime socket
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Last attempt failed; retries continue in the background.
    Error { message: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting)
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ConnectionState::Error { message } => Some(message),
            _ => None,
        }
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of reconnect attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 1.5,
        }
    }
}

impl ReconnectConfig {
    /// Calculate delay for a given attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(delay.min(self.max_delay_ms as f64) as u64)
    }
}

/// The most recent inbound event, for passive observers.
#[derive(Debug, Clone, PartialEq)]
pub struct LastMessage {
    pub event: EventName,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

enum PendingAck {
    Reply(oneshot::Sender<Value>),
    Callback(Box<dyn FnOnce(Value) + Send>),
}

/// State shared between handles and the supervisor task.
struct Shared {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialStore>,
    state: watch::Sender<ConnectionState>,
    last_message: watch::Sender<Option<LastMessage>>,
    attempts: AtomicU32,
    /// Bumped by every connect/disconnect; a supervisor only acts while its
    /// epoch is current.
    epoch: AtomicU64,
    router: EventRouter,
    pending: Mutex<HashMap<String, PendingAck>>,
    outbound: Mutex<Option<UnboundedSender<FrameEnvelope>>>,
}

/// Owns the supervisor task; dropping the last client handle stops it.
#[derive(Default)]
struct Session {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

/// A managed realtime connection.
///
/// Cloning yields another handle to the same connection. Independent
/// instances never share state.
#[derive(Clone)]
pub struct RealtimeClient {
    shared: Arc<Shared>,
    session: Arc<Session>,
}

impl RealtimeClient {
    /// A client dialling real WebSockets.
    pub fn new(config: ClientConfig, credentials: impl CredentialStore) -> Self {
        Self::with_connector(config, WsConnector, credentials)
    }

    pub fn with_connector(
        config: ClientConfig,
        connector: impl Connector,
        credentials: impl CredentialStore,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (last_message, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                config,
                connector: Arc::new(connector),
                credentials: Arc::new(credentials),
                state,
                last_message,
                attempts: AtomicU32::new(0),
                epoch: AtomicU64::new(0),
                router: EventRouter::new(),
                pending: Mutex::new(HashMap::new()),
                outbound: Mutex::new(None),
            }),
            session: Arc::new(Session::default()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Start connecting. No-op while a connection loop is already running
    /// (connecting, connected or waiting to retry).
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let mut task = self.session.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            tracing::debug!("connect: connection loop already running");
            return;
        }
        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        // A fresh loop gets the full retry budget
        self.shared.attempts.store(0, Ordering::SeqCst);
        *task = Some(tokio::spawn(supervise(self.shared.clone(), epoch)));
    }

    /// Close the connection and stop reconnecting. In-flight acknowledgment
    /// waits fail with [`RealtimeError::NotConnected`].
    pub fn disconnect(&self) {
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.session.task.lock().take() {
            task.abort();
        }
        self.shared.outbound.lock().take();
        self.shared.pending.lock().clear();
        self.shared.state.send_if_modified(|state| {
            let changed = *state != ConnectionState::Disconnected;
            *state = ConnectionState::Disconnected;
            changed
        });
        tracing::info!("realtime connection closed by client");
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.borrow().is_connected()
    }

    /// Reconnects scheduled since the last successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    pub fn last_message(&self) -> Option<LastMessage> {
        self.shared.last_message.borrow().clone()
    }

    pub fn watch_last_message(&self) -> watch::Receiver<Option<LastMessage>> {
        self.shared.last_message.subscribe()
    }

    pub fn router(&self) -> &EventRouter {
        &self.shared.router
    }

    /// Listen for inbound events named `name`.
    pub fn subscribe(
        &self,
        name: impl Into<EventName>,
        callback: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.router.subscribe(name, callback)
    }

    /// Send an event if connected. Returns whether the send was attempted;
    /// there is no delivery guarantee.
    pub fn emit(&self, name: impl Into<EventName>, payload: Value) -> bool {
        let name = name.into();
        self.shared
            .send(WsEnvelope::new(Frame::event(name.to_string(), payload)))
    }

    /// Like [`RealtimeClient::emit`], invoking `on_ack` with the
    /// acknowledgment payload if one ever arrives.
    pub fn emit_with_callback(
        &self,
        name: impl Into<EventName>,
        payload: Value,
        on_ack: impl FnOnce(Value) + Send + 'static,
    ) -> bool {
        let name = name.into();
        let envelope = WsEnvelope::new(Frame::request(name.to_string(), payload));
        self.shared.request(envelope, PendingAck::Callback(Box::new(on_ack)))
    }

    /// Request/response over the socket.
    ///
    /// Fails with `NotConnected` when offline or if the connection drops
    /// first, `AckTimeout` when nothing arrives within `timeout` (a later ack
    /// is discarded), and `Server` when the ack payload carries an `error`.
    pub async fn emit_with_ack(
        &self,
        name: impl Into<EventName>,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let event = name.into().to_string();
        let (tx, rx) = oneshot::channel();
        let envelope = WsEnvelope::new(Frame::request(event.clone(), payload));
        let id = envelope.id.clone();
        if !self.shared.request(envelope, PendingAck::Reply(tx)) {
            return Err(RealtimeError::NotConnected);
        }
        let _pending = PendingGuard {
            shared: &self.shared,
            id,
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(payload)) => match ack_error(&payload) {
                Some(message) => Err(RealtimeError::Server { event, message }),
                None => Ok(payload),
            },
            Ok(Err(_)) => Err(RealtimeError::NotConnected),
            Err(_) => {
                tracing::warn!(%event, ?timeout, "acknowledgment timed out");
                Err(RealtimeError::AckTimeout { event, timeout })
            }
        }
    }
}

/// Drops the pending entry of an `emit_with_ack` however its wait ends,
/// including when the caller's future is dropped.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.pending.lock().remove(&self.id);
    }
}

impl Shared {
    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Publish a state from the supervisor of `epoch`; stale supervisors are
    /// ignored.
    fn transition(&self, epoch: u64, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if !self.is_current(epoch) || *state == next {
                return false;
            }
            *state = next;
            true
        });
    }

    fn send(&self, envelope: FrameEnvelope) -> bool {
        if !self.state.borrow().is_connected() {
            return false;
        }
        match self.outbound.lock().as_ref() {
            Some(tx) => tx.send(envelope).is_ok(),
            None => false,
        }
    }

    fn request(&self, envelope: FrameEnvelope, pending: PendingAck) -> bool {
        let id = envelope.id.clone();
        self.pending.lock().insert(id.clone(), pending);
        let sent = self.send(envelope);
        if !sent {
            self.pending.lock().remove(&id);
        }
        sent
    }

    fn connection_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.config.ws_url)?;
        if let Some(token) = self.credentials.access_token()? {
            url.query_pairs_mut().append_pair(TOKEN_PARAM, &token);
        }
        Ok(url)
    }

    async fn open(&self) -> Result<(Url, Link)> {
        let url = self.connection_url()?;
        let link = self.connector.connect(&url).await?;
        Ok((url, link))
    }

    fn handle_text(&self, text: &str) {
        let envelope = match decode_frame(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable frame");
                return;
            }
        };

        match envelope.payload {
            Frame::Event { name, payload, .. } => {
                let event = EventName::parse(&name);
                self.last_message.send_replace(Some(LastMessage {
                    event: event.clone(),
                    payload: payload.clone(),
                    received_at: Utc::now(),
                }));
                let listeners = self.router.dispatch(&event, &payload);
                tracing::trace!(%event, listeners, "dispatched");
            }
            Frame::Ack { payload } => {
                let Some(id) = envelope.correlation_id else {
                    tracing::debug!("ack without correlation id");
                    return;
                };
                let pending = self.pending.lock().remove(&id);
                match pending {
                    Some(PendingAck::Reply(tx)) => {
                        let _ = tx.send(payload);
                    }
                    Some(PendingAck::Callback(callback)) => callback(payload),
                    None => tracing::debug!(%id, "late or unknown acknowledgment"),
                }
            }
        }
    }

    /// Pump one live link until it ends. Returns why it ended.
    async fn pump(&self, epoch: u64, mut link: Link) -> String {
        let (out_tx, mut out_rx) = unbounded_channel::<FrameEnvelope>();
        {
            let mut outbound = self.outbound.lock();
            if !self.is_current(epoch) {
                return "superseded".to_string();
            }
            *outbound = Some(out_tx);
        }
        self.attempts.store(0, Ordering::SeqCst);
        self.transition(epoch, ConnectionState::Connected);

        loop {
            tokio::select! {
                Some(envelope) = out_rx.recv() => {
                    let text = match encode_frame(&envelope) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!(error = %e, "failed to encode frame");
                            continue;
                        }
                    };
                    if link.outgoing.send(text).is_err() {
                        break "transport closed".to_string();
                    }
                }
                incoming = link.incoming.recv() => match incoming {
                    Some(Ok(text)) => self.handle_text(&text),
                    Some(Err(e)) => break e.to_string(),
                    None => break "transport closed".to_string(),
                },
            }
        }
    }

    /// Forget the dead link: no more sends, and waiters fail fast.
    fn release_link(&self, epoch: u64) {
        let mut outbound = self.outbound.lock();
        if self.is_current(epoch) {
            outbound.take();
            self.pending.lock().clear();
        }
    }
}

/// Connection loop: connect, pump, and on any failure wait out the backoff
/// delay and try again.
async fn supervise(shared: Arc<Shared>, epoch: u64) {
    let reconnect = shared.config.reconnect.clone();

    loop {
        shared.transition(epoch, ConnectionState::Connecting);

        match shared.open().await {
            Ok((url, link)) => {
                tracing::info!(url = %redact(&url), "realtime connection established");
                let reason = shared.pump(epoch, link).await;
                shared.release_link(epoch);
                shared.transition(epoch, ConnectionState::Disconnected);
                tracing::warn!(%reason, "realtime connection lost");
            }
            Err(e) => {
                tracing::warn!(error = %e, "realtime connection failed");
                shared.transition(
                    epoch,
                    ConnectionState::Error {
                        message: e.to_string(),
                    },
                );
            }
        }

        if !shared.is_current(epoch) {
            return;
        }

        let attempt = shared.attempts.fetch_add(1, Ordering::SeqCst);
        if reconnect.max_attempts > 0 && attempt >= reconnect.max_attempts {
            shared.transition(
                epoch,
                ConnectionState::Error {
                    message: format!(
                        "max reconnect attempts ({}) exceeded",
                        reconnect.max_attempts
                    ),
                },
            );
            return;
        }

        let delay = reconnect.delay_for_attempt(attempt);
        tracing::info!(
            delay_ms = delay.as_millis() as u64,
            attempt = attempt + 1,
            "scheduling reconnect"
        );
        tokio::time::sleep(delay).await;
    }
}
