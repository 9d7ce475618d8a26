use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use courier_infra::PipelineError;
use courier_infra::store::StoreError;

pub fn pipeline_error_to_response(err: PipelineError) -> Response {
    match err {
        PipelineError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        PipelineError::NotFound { .. } => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        PipelineError::MailerUnconfigured => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "mailer_unconfigured",
            err.to_string(),
        ),
        PipelineError::Store(e) => store_error_to_response(e),
    }
}

pub fn store_error_to_response(err: StoreError) -> Response {
    tracing::error!(error = %err, "store error while serving request");
    json_error(StatusCode::SERVICE_UNAVAILABLE, "store_error", err.to_string())
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
