//! Entity CRUD routes. Every successful mutation is broadcast to the type's
//! socket subscribers.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use kinderlink_shared::ProblemDetails;
use serde_json::{Map, Value};

use super::ApiProblem;
use crate::state::AppState;

type ApiResult<T> = Result<T, ApiProblem>;

fn object_body(body: Result<Json<Value>, JsonRejection>) -> ApiResult<Map<String, Value>> {
    match body {
        Ok(Json(Value::Object(fields))) => Ok(fields),
        Ok(Json(_)) => Err(ApiProblem(ProblemDetails::bad_request(
            "body must be a JSON object",
        ))),
        Err(rejection) => Err(ApiProblem(ProblemDetails::bad_request(rejection.body_text()))),
    }
}

fn missing(entity_type: &str, id: &str) -> ApiProblem {
    ApiProblem(ProblemDetails::not_found(format!(
        "no {} with id {}",
        entity_type, id
    )))
}

/// List every entity of a type
pub async fn list_entities(
    State(state): State<AppState>,
    Path(entity_type): Path<String>,
) -> Json<Vec<Value>> {
    Json(state.store.list(&entity_type).await)
}

/// Create an entity, assigning an id when the body has none
pub async fn create_entity(
    State(state): State<AppState>,
    Path(entity_type): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let fields = object_body(body)?;
    let entity = state.create(&entity_type, fields).await.ok_or_else(|| {
        ApiProblem(ProblemDetails::conflict(format!(
            "a {} with this id already exists",
            entity_type
        )))
    })?;
    tracing::info!(%entity_type, id = %entity["id"], "entity created");
    Ok((StatusCode::CREATED, Json(entity)))
}

pub async fn get_entity(
    State(state): State<AppState>,
    Path((entity_type, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    state
        .store
        .get(&entity_type, &id)
        .await
        .map(Json)
        .ok_or_else(|| missing(&entity_type, &id))
}

/// Merge the body's fields into an entity
pub async fn update_entity(
    State(state): State<AppState>,
    Path((entity_type, id)): Path<(String, String)>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let fields = object_body(body)?;
    let entity = state
        .update(&entity_type, &id, fields)
        .await
        .ok_or_else(|| missing(&entity_type, &id))?;
    tracing::info!(%entity_type, %id, "entity updated");
    Ok(Json(entity))
}

pub async fn delete_entity(
    State(state): State<AppState>,
    Path((entity_type, id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state
        .delete(&entity_type, &id)
        .await
        .ok_or_else(|| missing(&entity_type, &id))?;
    tracing::info!(%entity_type, %id, "entity deleted");
    Ok(StatusCode::NO_CONTENT)
}
