use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{debug, info};

use crate::{store, Config};

// ---

pub fn router() -> Router<(PgPool, Config)> {
    // ---
    Router::new().route("/stations/{id}/readings", get(handler))
}

/// Query parameters for the readings listing.
#[derive(Debug, Deserialize)]
pub struct ReadingsQuery {
    limit: Option<u32>,
}

async fn handler(
    Path(station_id): Path<i32>,
    Query(params): Query<ReadingsQuery>,
    State((pool, config)): State<(PgPool, Config)>,
) -> impl IntoResponse {
    // ---
    debug!("GET /stations/{}/readings {:?}", station_id, params);

    let mut conn = match pool.acquire().await {
        Ok(conn) => conn,
        Err(e) => return super::internal_error("Failed to acquire connection", e.into()),
    };

    match store::find_station(&mut conn, station_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (StatusCode::NOT_FOUND, Json("Unknown station")).into_response();
        }
        Err(e) => return super::internal_error("Failed to look up station", e),
    }

    let limit = params.limit.unwrap_or(config.query_limit).min(config.query_limit);
    match store::readings_for_station(&mut conn, station_id, limit).await {
        Ok(readings) => {
            info!(
                "Returning {} readings for station {}",
                readings.len(),
                station_id
            );
            (StatusCode::OK, Json(readings)).into_response()
        }
        Err(e) => super::internal_error("Failed to load readings", e),
    }
}
