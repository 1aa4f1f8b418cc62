//! The relay end to end: real sockets from the kinderlink client, REST calls
//! through the router.

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use kinderlink_client::{
    ClientConfig, Collection, RealtimeClient, RealtimeData, RealtimeError, StaticCredentials,
};
use kinderlink_server::{app, AppState, ServerConfig};
use serde_json::{json, Map, Value};
use tower::util::ServiceExt;

const TOKEN: &str = "kita";
const WAIT: Duration = Duration::from_secs(5);

async fn start(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app(state)).await.unwrap();
    });
    addr
}

fn state() -> AppState {
    AppState::new(ServerConfig::default().with_access_token(TOKEN))
}

fn client(addr: SocketAddr, token: &str) -> RealtimeClient {
    let config = ClientConfig::default().with_ws_url(format!("ws://{}/ws", addr));
    RealtimeClient::new(config, StaticCredentials::new(token))
}

fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("not an object"),
    }
}

async fn wait_revision(data: &RealtimeData<Value>, revision: u64) {
    tokio::time::timeout(
        WAIT,
        data.watch().wait_for(|tracked| tracked.revision >= revision),
    )
    .await
    .expect("revision in time")
    .expect("binder alive");
}

#[tokio::test]
async fn bound_collection_follows_server_changes() {
    let state = state();
    state.create("child", fields(json!({"name": "Mia"}))).await;
    let addr = start(state.clone()).await;

    let client = client(addr, TOKEN);
    client.connect();
    let data = RealtimeData::<Value>::bind(client.clone(), "child", Collection::many());

    wait_revision(&data, 1).await;
    assert_eq!(data.collection().as_slice(), &[json!({"id": 1, "name": "Mia"})]);

    state.create("child", fields(json!({"name": "Ben"}))).await;
    wait_revision(&data, 2).await;
    state
        .update("child", "1", fields(json!({"name": "Mia K."})))
        .await
        .unwrap();
    wait_revision(&data, 3).await;
    state.delete("child", "2").await.unwrap();
    wait_revision(&data, 4).await;

    assert_eq!(data.collection().as_slice(), &[json!({"id": 1, "name": "Mia K."})]);
    client.disconnect();
}

#[tokio::test]
async fn unknown_events_are_rejected_in_the_ack() {
    let addr = start(state()).await;
    let client = client(addr, TOKEN);
    client.connect();
    tokio::time::timeout(WAIT, client.watch_state().wait_for(|s| s.is_connected()))
        .await
        .unwrap()
        .unwrap();

    let result = client
        .emit_with_ack("child:adopt", json!({"id": 1}), WAIT)
        .await;
    match result {
        Err(RealtimeError::Server { message, .. }) => {
            assert_eq!(message, "unknown event child:adopt");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn wrong_token_surfaces_as_error_state() {
    let addr = start(state()).await;
    let client = client(addr, "not-the-token");
    client.connect();

    let state = tokio::time::timeout(
        WAIT,
        client.watch_state().wait_for(|s| s.error_message().is_some()),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert!(!state.is_connected());
    client.disconnect();
}

#[tokio::test]
async fn rest_crud_round() {
    let state = state();
    let router = app(state.clone());
    let mut updates = state.hub.channel("group").await.subscribe();

    let response = router
        .clone()
        .oneshot(
            Request::post("/api/entities/group")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"name":"Bears"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let created: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(created, json!({"id": 1, "name": "Bears"}));
    assert!(updates.recv().await.is_ok());

    let response = router
        .clone()
        .oneshot(
            Request::put("/api/entities/group/1")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"name":"Brown Bears"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .clone()
        .oneshot(Request::get("/api/entities/group").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let listed: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(listed, json!([{"id": 1, "name": "Brown Bears"}]));

    let response = router
        .clone()
        .oneshot(
            Request::delete("/api/entities/group/1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(state.store.list("group").await.is_empty());
}

#[tokio::test]
async fn rest_errors_are_problem_details() {
    let router = app(state());

    let response = router
        .clone()
        .oneshot(
            Request::delete("/api/entities/child/42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/problem+json"
    );
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let problem: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(problem["status"], 404);
    assert_eq!(problem["detail"], "no child with id 42");

    let response = router
        .oneshot(
            Request::post("/api/entities/child")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("[1, 2]"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn socket_without_token_is_unauthorized() {
    let router = app(state());
    let response = router
        .oneshot(Request::get("/ws").body(Body::empty()).unwrap())
        .await
        .unwrap();
    // Token check runs before the upgrade is attempted
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn binding_during_writes_loses_nothing() {
    let state = state();
    let addr = start(state.clone()).await;
    let client = client(addr, TOKEN);
    client.connect();
    tokio::time::timeout(WAIT, client.watch_state().wait_for(|s| s.is_connected()))
        .await
        .unwrap()
        .unwrap();

    let writer = {
        let state = state.clone();
        tokio::spawn(async move {
            for n in 0..50 {
                state.create("child", fields(json!({"name": n}))).await.unwrap();
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let data = RealtimeData::<Value>::bind(client.clone(), "child", Collection::many());
    writer.await.unwrap();

    tokio::time::timeout(
        WAIT,
        data.watch().wait_for(|tracked| tracked.items.len() == 50),
    )
    .await
    .expect("every child arrives")
    .expect("binder alive");
    assert_eq!(data.collection().as_slice(), state.store.list("child").await.as_slice());
    client.disconnect();
}
