//! Operator endpoints: run-now, health, dead letters.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;

use courier_infra::RunRequest;

use crate::app::{errors, services::AppServices};

pub const DEFAULT_DEAD_LETTER_LIMIT: usize = 50;
pub const MAX_DEAD_LETTER_LIMIT: usize = 500;

pub fn router() -> Router {
    Router::new()
        .route("/run", post(run))
        .route("/health", get(health))
        .route("/dead-letters", get(list_dead_letters))
        .route("/dead-letters/:id/replay", post(replay_dead_letter))
}

/// Run one pass now. An empty body runs both phases with the default limit.
async fn run(Extension(services): Extension<Arc<AppServices>>, body: Bytes) -> Response {
    let request = if body.is_empty() {
        RunRequest::default()
    } else {
        match serde_json::from_slice::<RunRequest>(&body) {
            Ok(request) => request,
            Err(e) => {
                return errors::json_error(StatusCode::BAD_REQUEST, "invalid_request", e.to_string());
            }
        }
    };
    if request.limit == Some(0) {
        return errors::json_error(StatusCode::BAD_REQUEST, "invalid_request", "limit must be positive");
    }

    let report = services.pipeline.runner.run(request).await;
    Json(report).into_response()
}

async fn health(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.pipeline.health.all().await {
        Ok(records) => Json(records).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

async fn list_dead_letters(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<ListQuery>,
) -> Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_DEAD_LETTER_LIMIT)
        .clamp(1, MAX_DEAD_LETTER_LIMIT);
    match services.pipeline.dead_letters.list(limit).await {
        Ok(records) => Json(records).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn replay_dead_letter(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    match services.pipeline.dead_letters.replay(&id).await {
        Ok(record) => {
            tracing::info!(id = %record.id, kind = ?record.kind, "dead letter replayed");
            Json(record).into_response()
        }
        Err(e) => errors::pipeline_error_to_response(e),
    }
}
