use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use sqlx::PgPool;
use tracing::debug;

use crate::{store, Config};

// ---

pub fn router() -> Router<(PgPool, Config)> {
    // ---
    Router::new().route("/stations", get(handler))
}

async fn handler(State((pool, _config)): State<(PgPool, Config)>) -> impl IntoResponse {
    // ---
    debug!("GET /stations");

    let mut conn = match pool.acquire().await {
        Ok(conn) => conn,
        Err(e) => return super::internal_error("Failed to acquire connection", e.into()),
    };

    match store::list_stations(&mut conn).await {
        Ok(stations) => (StatusCode::OK, Json(stations)).into_response(),
        Err(e) => super::internal_error("Failed to list stations", e),
    }
}
