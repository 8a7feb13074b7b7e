//! Read-only HTTP surface over the seeded store.
//!
//! Each sibling module exports a subrouter; this gateway merges them and
//! attaches the shared state.

use axum::{http::StatusCode, response::IntoResponse, Json, Router};
use sqlx::PgPool;

use crate::Config;

mod health;
mod readings;
mod stations;

// ---

pub fn router(pool: PgPool, config: Config) -> Router {
    // ---
    Router::new()
        .merge(stations::router())
        .merge(readings::router())
        .merge(health::router())
        .with_state((pool, config))
}

/// Log a store failure and turn it into a 500 response.
fn internal_error(context: &str, err: anyhow::Error) -> axum::response::Response {
    // ---
    tracing::error!("{}: {:#}", context, err);
    (StatusCode::INTERNAL_SERVER_ERROR, Json("Internal error")).into_response()
}
