//! Shared test helpers for realtime client tests.

#![allow(dead_code)]

use kinderlink_client::ws::{MemoryConnector, ServerEnd};
use kinderlink_client::{ClientConfig, RealtimeClient, StaticCredentials};
use kinderlink_shared::{Frame, FrameEnvelope};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

pub const TOKEN: &str = "kita-secret";

pub fn client_with(connector: MemoryConnector) -> RealtimeClient {
    RealtimeClient::with_connector(
        ClientConfig::default().with_ws_url("ws://kita.test/ws"),
        connector,
        StaticCredentials::new(TOKEN),
    )
}

pub struct Harness {
    pub client: RealtimeClient,
    pub connector: MemoryConnector,
    pub server: ServerEnd,
    pub accepted: UnboundedReceiver<ServerEnd>,
}

/// A client that has completed its first connection.
pub async fn connected() -> Harness {
    let (connector, mut accepted) = MemoryConnector::new();
    let client = client_with(connector.clone());
    client.connect();
    let server = accepted.recv().await.expect("client should dial");
    client
        .watch_state()
        .wait_for(|state| state.is_connected())
        .await
        .expect("state channel open");
    Harness {
        client,
        connector,
        server,
        accepted,
    }
}

/// Name, payload and ack flag of an event frame.
pub fn event_parts(envelope: &FrameEnvelope) -> (&str, &Value, bool) {
    match &envelope.payload {
        Frame::Event {
            name,
            payload,
            wants_ack,
        } => (name.as_str(), payload, *wants_ack),
        other => panic!("expected an event frame, got {:?}", other),
    }
}
