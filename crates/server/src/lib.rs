//! Kinderlink relay
//!
//! A small Axum server that keeps entities in memory, serves them over a REST
//! API and pushes every change to the WebSocket clients that subscribed to the
//! entity type.

use axum::{
    routing::{get, put},
    Router,
};
use kinderlink_shared::WS_PATH;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod config;
pub mod hub;
pub mod routes;
pub mod state;
pub mod store;
pub mod ws;

pub use config::ServerConfig;
pub use state::AppState;

/// Build the router over `state`.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Entities
        .route(
            "/api/entities/{entity_type}",
            get(routes::entities::list_entities).post(routes::entities::create_entity),
        )
        .route(
            "/api/entities/{entity_type}/{id}",
            put(routes::entities::update_entity)
                .get(routes::entities::get_entity)
                .delete(routes::entities::delete_entity),
        )
        // WebSocket
        .route(WS_PATH, get(ws::ws_handler))
        // Apply middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
