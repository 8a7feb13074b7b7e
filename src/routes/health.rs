// src/routes/health.rs
//! Liveness endpoint.
//!
//! Exports a subrouter with `GET /health` to the gateway (`mod.rs`). The
//! handler does not touch the database, so it answers even while the pool
//! cannot connect.

use axum::{routing::get, Json, Router};
use serde::Serialize;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Subrouter containing the `/health` route, generic over the gateway state.
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/health", get(health))
}
