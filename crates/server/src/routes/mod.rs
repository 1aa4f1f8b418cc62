//! HTTP API route handlers.

pub mod entities;

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use kinderlink_shared::ProblemDetails;

/// An RFC7807 error response (`application/problem+json`).
#[derive(Debug)]
pub struct ApiProblem(pub ProblemDetails);

impl IntoResponse for ApiProblem {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            [(header::CONTENT_TYPE, "application/problem+json")],
            Json(self.0),
        )
            .into_response()
    }
}
