//! WebSocket relay: authenticates the socket, answers subscribe requests with
//! a snapshot and forwards the type's broadcasts until unsubscribed.

use std::collections::HashMap;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use kinderlink_shared::{
    decode_frame, encode_frame, EntityAction, EventName, Frame, FrameEnvelope, ProblemDetails,
    WsEnvelope, TOKEN_PARAM,
};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::routes::ApiProblem;
use crate::state::AppState;

/// WebSocket upgrade handler
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let token = query.get(TOKEN_PARAM).map(String::as_str);
    if !state.config.accepts(token) {
        tracing::warn!("websocket rejected: bad or missing token");
        return ApiProblem(ProblemDetails::unauthorized("a valid access token is required"))
            .into_response();
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let conn_id = Uuid::new_v4();
    tracing::info!(%conn_id, "websocket connection authenticated");
    ws.on_upgrade(move |socket| handle_socket(socket, conn_id, state))
}

/// Forwarding tasks for the types this socket follows.
type Subscriptions = HashMap<String, JoinHandle<()>>;

async fn handle_socket(socket: WebSocket, conn_id: Uuid, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (forward_tx, mut forward_rx) = mpsc::unbounded_channel::<FrameEnvelope>();
    let mut subscriptions = Subscriptions::new();

    // Task to forward frames to the WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(envelope) = forward_rx.recv().await {
            let text = match encode_frame(&envelope) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode frame");
                    continue;
                }
            };
            if sender.send(Message::text(text)).await.is_err() {
                break;
            }
        }
    });

    // Main receive loop
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match decode_frame(&text) {
                Ok(envelope) => {
                    handle_frame(envelope, conn_id, &mut subscriptions, &forward_tx, &state).await
                }
                Err(e) => tracing::debug!(%conn_id, error = %e, "ignoring undecodable frame"),
            },
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }

    // Cleanup
    for (_, handle) in subscriptions {
        handle.abort();
    }
    send_task.abort();

    tracing::info!(%conn_id, "websocket connection closed");
}

async fn handle_frame(
    envelope: FrameEnvelope,
    conn_id: Uuid,
    subscriptions: &mut Subscriptions,
    forward_tx: &mpsc::UnboundedSender<FrameEnvelope>,
    state: &AppState,
) {
    let Frame::Event {
        name,
        payload,
        wants_ack,
    } = envelope.payload
    else {
        tracing::debug!(%conn_id, "ignoring ack from client");
        return;
    };

    let event = EventName::parse(&name);
    let ack = |reply: Value| {
        if wants_ack {
            let _ = forward_tx.send(WsEnvelope::reply_to(envelope.id.clone(), Frame::ack(reply)));
        }
    };

    match (event.entity_type(), event.action()) {
        (Some(entity_type), Some(EntityAction::Subscribe)) => {
            tracing::debug!(%conn_id, entity_type, "subscribing");
            if subscriptions.contains_key(entity_type) {
                ack(json!({ "data": state.store.list(entity_type).await }));
                return;
            }
            let (snapshot, changes) = state.snapshot_and_subscribe(entity_type).await;
            // The snapshot must reach the socket before any later change
            ack(json!({ "data": snapshot }));
            let handle = forward(entity_type, changes, forward_tx.clone());
            subscriptions.insert(entity_type.to_string(), handle);
        }
        (Some(entity_type), Some(EntityAction::Unsubscribe)) => {
            tracing::debug!(%conn_id, entity_type, "unsubscribing");
            if let Some(handle) = subscriptions.remove(entity_type) {
                handle.abort();
            }
            ack(json!({ "ok": true }));
        }
        _ => {
            tracing::debug!(%conn_id, %event, ?payload, "unhandled event");
            ack(json!({ "error": format!("unknown event {}", event) }));
        }
    }
}

/// Forward `entity_type` broadcasts to this socket until aborted.
fn forward(
    entity_type: &str,
    mut broadcast_rx: broadcast::Receiver<FrameEnvelope>,
    forward_tx: mpsc::UnboundedSender<FrameEnvelope>,
) -> JoinHandle<()> {
    let entity_type_for_task = entity_type.to_string();

    tokio::spawn(async move {
        loop {
            match broadcast_rx.recv().await {
                Ok(envelope) => {
                    if forward_tx.send(envelope).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(entity_type = %entity_type_for_task, skipped, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::debug!(entity_type = %entity_type_for_task, "subscription task ended");
    })
}
