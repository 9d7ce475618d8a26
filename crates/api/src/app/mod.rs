//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: pipeline wiring from [`courier_infra::Settings`]
//! - `routes/`: HTTP routes + handlers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};

pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/ops", routes::ops::router())
        .layer(Extension(services))
}
