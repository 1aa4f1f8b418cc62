//! Transports: a real WebSocket via tokio-tungstenite, and an in-process pair
//! used to script a server in tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use kinderlink_shared::{decode_frame, encode_frame, Frame, FrameEnvelope, WsEnvelope};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::error::{RealtimeError, Result};

/// An open connection: text frames out, text frames (or the reason it ended)
/// in. The inbound side ending means the peer went away.
pub struct Link {
    pub outgoing: UnboundedSender<String>,
    pub incoming: UnboundedReceiver<Result<String>>,
    reader: Option<AbortHandle>,
}

impl Link {
    pub fn new(outgoing: UnboundedSender<String>, incoming: UnboundedReceiver<Result<String>>) -> Self {
        Self {
            outgoing,
            incoming,
            reader: None,
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Opens links. `url` already carries the credential.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &Url) -> Result<Link>;
}

/// WebSocket connector (tokio-tungstenite).
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Link> {
        let (ws_stream, _response) =
            connect_async(url.as_str())
                .await
                .map_err(|e| RealtimeError::Connect {
                    url: redact(url),
                    reason: e.to_string(),
                })?;

        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = unbounded_channel::<String>();
        let (in_tx, in_rx) = unbounded_channel::<Result<String>>();

        // Read task
        let reader = tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(Ok(text.to_string())).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "closed by server".to_string());
                        let _ = in_tx.send(Err(RealtimeError::Transport(reason)));
                        return;
                    }
                    Ok(Message::Ping(_)) => {
                        // Pong is handled automatically by tungstenite
                    }
                    Ok(_) => {
                        // Ignore binary, pong, etc.
                    }
                    Err(e) => {
                        let _ = in_tx.send(Err(RealtimeError::Transport(e.to_string())));
                        return;
                    }
                }
            }
        });

        // Write task; ends (closing the socket) once the link is dropped
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = write.send(Message::text(text)).await {
                    tracing::debug!(error = %e, "websocket write failed");
                    return;
                }
            }
            let _ = write.close().await;
        });

        Ok(Link {
            outgoing: out_tx,
            incoming: in_rx,
            reader: Some(reader.abort_handle()),
        })
    }
}

/// Strip the query (which carries the token) for logs and errors.
pub(crate) fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

// =========================================
// In-process transport
// =========================================

#[derive(Default)]
struct MemoryState {
    refusals: VecDeque<String>,
    refuse_all: Option<String>,
    attempts: Vec<Instant>,
    accepted: Option<UnboundedSender<ServerEnd>>,
}

/// Connector whose "server" is test code holding [`ServerEnd`]s.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryConnector {
    /// The receiver yields one [`ServerEnd`] per accepted connection.
    pub fn new() -> (Self, UnboundedReceiver<ServerEnd>) {
        let (tx, rx) = unbounded_channel();
        let connector = Self::default();
        connector.state.lock().accepted = Some(tx);
        (connector, rx)
    }

    /// Fail the next connection attempt with `reason`.
    pub fn refuse_next(&self, reason: impl Into<String>) {
        self.state.lock().refusals.push_back(reason.into());
    }

    /// Fail every attempt until [`MemoryConnector::accept_all`].
    pub fn refuse_all(&self, reason: impl Into<String>) {
        self.state.lock().refuse_all = Some(reason.into());
    }

    pub fn accept_all(&self) {
        self.state.lock().refuse_all = None;
    }

    /// Number of connection attempts so far.
    pub fn attempts(&self) -> usize {
        self.state.lock().attempts.len()
    }

    /// When each attempt happened (tokio clock, so it honours paused time).
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.state.lock().attempts.clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &Url) -> Result<Link> {
        let mut state = self.state.lock();
        state.attempts.push(Instant::now());

        let refusal = match state.refusals.pop_front() {
            Some(reason) => Some(reason),
            None => state.refuse_all.clone(),
        };
        if let Some(reason) = refusal {
            return Err(RealtimeError::Connect {
                url: redact(url),
                reason,
            });
        }

        let (out_tx, out_rx) = unbounded_channel();
        let (in_tx, in_rx) = unbounded_channel();
        let server = ServerEnd {
            url: url.clone(),
            to_client: in_tx,
            from_client: out_rx,
        };
        let delivered = state
            .accepted
            .as_ref()
            .is_some_and(|accepted| accepted.send(server).is_ok());
        if !delivered {
            return Err(RealtimeError::Connect {
                url: redact(url),
                reason: "no listener".to_string(),
            });
        }
        Ok(Link::new(out_tx, in_rx))
    }
}

/// Server side of an in-process link.
pub struct ServerEnd {
    /// The URL the client dialled, token included.
    pub url: Url,
    to_client: UnboundedSender<Result<String>>,
    from_client: UnboundedReceiver<String>,
}

impl ServerEnd {
    /// Value of a query parameter on the dialled URL.
    pub fn query(&self, key: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// Next frame the client sent; `None` once the client closed the link.
    pub async fn recv(&mut self) -> Option<FrameEnvelope> {
        loop {
            let text = self.from_client.recv().await?;
            match decode_frame(&text) {
                Ok(envelope) => return Some(envelope),
                Err(e) => tracing::warn!(error = %e, "client sent an undecodable frame"),
            }
        }
    }

    /// Push a named event to the client.
    pub fn send_event(&self, name: &str, payload: Value) -> bool {
        self.send(WsEnvelope::new(Frame::event(name, payload)))
    }

    /// Acknowledge the client envelope `request_id`.
    pub fn ack(&self, request_id: &str, payload: Value) -> bool {
        self.send(WsEnvelope::reply_to(request_id, Frame::ack(payload)))
    }

    pub fn send(&self, envelope: FrameEnvelope) -> bool {
        match encode_frame(&envelope) {
            Ok(text) => self.send_raw(text),
            Err(_) => false,
        }
    }

    pub fn send_raw(&self, text: impl Into<String>) -> bool {
        self.to_client.send(Ok(text.into())).is_ok()
    }

    /// Drop the connection as a server would, with a reason.
    pub fn close(self, reason: &str) {
        let _ = self
            .to_client
            .send(Err(RealtimeError::Transport(reason.to_string())));
    }
}
