//! Idempotent writes and lookups against the weather-data store.
//!
//! Every table declares a unique constraint on its natural key, so every
//! insert is `INSERT ... ON CONFLICT (<natural key>) DO NOTHING`: inserting
//! the same entity twice leaves exactly one row and never updates it.
//!
//! Functions take a `&mut PgConnection` so callers decide the transaction
//! scope (`&mut *tx`).

use anyhow::{anyhow, Context, Result};
use sqlx::{PgConnection, Postgres, QueryBuilder};

use crate::flatten::{Band, MetricKind, ReadingRow};
use crate::models::{NewCity, NewDepartment, NewStation, WeatherReading, WeatherStation};
use crate::schema::RETENTION_INTERVAL;

// ---

/// Postgres accepts at most 65535 bind parameters per statement.
const MAX_BIND_PARAMS: usize = 65_535;

/// Insert stations not yet known by coordinates. Returns rows inserted.
pub async fn insert_stations(conn: &mut PgConnection, stations: &[NewStation]) -> Result<u64> {
    // ---
    let mut inserted = 0;
    for station in stations {
        inserted += sqlx::query(
            r#"
            INSERT INTO weather_stations (name, latitude, longitude)
            VALUES ($1, $2, $3)
            ON CONFLICT (latitude, longitude) DO NOTHING
            "#,
        )
        .bind(&station.name)
        .bind(station.latitude)
        .bind(station.longitude)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("Failed to insert station '{}'", station.name))?
        .rows_affected();
    }
    Ok(inserted)
}

/// Insert cities not yet known by (name, coordinates). Returns rows inserted.
pub async fn insert_cities(conn: &mut PgConnection, cities: &[NewCity]) -> Result<u64> {
    // ---
    let mut inserted = 0;
    for chunk in cities.chunks(MAX_BIND_PARAMS / 3) {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO cities (name, latitude, longitude) ");
        builder.push_values(chunk, |mut b, city| {
            b.push_bind(&city.name)
                .push_bind(city.latitude)
                .push_bind(city.longitude);
        });
        builder.push(" ON CONFLICT (name, latitude, longitude) DO NOTHING");

        inserted += builder
            .build()
            .execute(&mut *conn)
            .await
            .context("Failed to insert cities")?
            .rows_affected();
    }
    Ok(inserted)
}

/// Insert departments not yet known by code. Returns rows inserted.
pub async fn insert_departments(
    conn: &mut PgConnection,
    departments: &[NewDepartment],
) -> Result<u64> {
    // ---
    let mut inserted = 0;
    for department in departments {
        inserted += sqlx::query(
            r#"
            INSERT INTO departments (code, name, latitude, longitude)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (code) DO NOTHING
            "#,
        )
        .bind(&department.code)
        .bind(&department.name)
        .bind(department.latitude)
        .bind(department.longitude)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("Failed to insert department {}", department.code))?
        .rows_affected();
    }
    Ok(inserted)
}

/// Surrogate id of the station at exactly these coordinates.
pub async fn resolve_station_id(
    conn: &mut PgConnection,
    latitude: f64,
    longitude: f64,
) -> Result<Option<i32>> {
    // ---
    let id: Option<i32> = sqlx::query_scalar(
        "SELECT id FROM weather_stations WHERE latitude = $1 AND longitude = $2",
    )
    .bind(latitude)
    .bind(longitude)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(id)
}

/// Like [`resolve_station_id`], but a missing station is an error.
pub async fn require_station_id(
    conn: &mut PgConnection,
    latitude: f64,
    longitude: f64,
) -> Result<i32> {
    // ---
    resolve_station_id(conn, latitude, longitude)
        .await?
        .ok_or_else(|| anyhow!("No weather station at ({latitude}, {longitude})"))
}

/// Insert flattened rows of `band`, skipping (station, timestamp) pairs
/// already present. Returns rows inserted.
pub async fn insert_readings(
    conn: &mut PgConnection,
    band: Band,
    rows: &[ReadingRow],
) -> Result<u64> {
    // ---
    let metrics = band.metrics();
    if let Some(bad) = rows.iter().find(|r| r.values.len() != metrics.len()) {
        return Err(anyhow!(
            "Row for {} has {} values, {:?} band expects {}",
            bad.observed_at,
            bad.values.len(),
            band,
            metrics.len()
        ));
    }

    let columns: Vec<&str> = metrics.iter().map(|m| m.column).collect();
    let rows_per_statement = MAX_BIND_PARAMS / (metrics.len() + 2);

    let mut inserted = 0;
    for chunk in rows.chunks(rows_per_statement) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {} (station_id, observed_at, {}) ",
            band.table(),
            columns.join(", ")
        ));

        builder.push_values(chunk, |mut b, row| {
            b.push_bind(row.station_id).push_bind(row.observed_at);
            // Nulls are bound with the column's type so Postgres accepts them.
            for (metric, value) in metrics.iter().zip(&row.values) {
                match metric.kind {
                    MetricKind::Float => b.push_bind(value.as_f64()),
                    MetricKind::Integer => b.push_bind(value.as_i32()),
                    MetricKind::Flag => b.push_bind(value.as_bool()),
                    MetricKind::Timestamp => b.push_bind(value.as_timestamp()),
                };
            }
        });
        builder.push(" ON CONFLICT (station_id, observed_at) DO NOTHING");

        inserted += builder
            .build()
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to insert {} rows", band.table()))?
            .rows_affected();
    }
    Ok(inserted)
}

/// All stations, ordered by id.
pub async fn list_stations(conn: &mut PgConnection) -> Result<Vec<WeatherStation>> {
    // ---
    let stations = sqlx::query_as::<_, WeatherStation>(
        "SELECT id, name, latitude, longitude FROM weather_stations ORDER BY id",
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(stations)
}

/// The station with this surrogate id, if any.
pub async fn find_station(conn: &mut PgConnection, id: i32) -> Result<Option<WeatherStation>> {
    // ---
    let station = sqlx::query_as::<_, WeatherStation>(
        "SELECT id, name, latitude, longitude FROM weather_stations WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(station)
}

/// Most recent readings of a station, newest first.
pub async fn readings_for_station(
    conn: &mut PgConnection,
    station_id: i32,
    limit: u32,
) -> Result<Vec<WeatherReading>> {
    // ---
    let readings = sqlx::query_as::<_, WeatherReading>(
        r#"
        SELECT station_id, observed_at, temperature_2m, relative_humidity_2m,
               apparent_temperature, precipitation, weather_code, cloud_cover,
               pressure_msl, wind_speed_10m, wind_direction_10m
          FROM weather_readings
         WHERE station_id = $1
         ORDER BY observed_at DESC
         LIMIT $2
        "#,
    )
    .bind(station_id)
    .bind(i64::from(limit))
    .fetch_all(&mut *conn)
    .await?;
    Ok(readings)
}

/// Delete readings older than the retention window. The delete also fires
/// the retention trigger. Returns rows deleted.
pub async fn prune_readings(conn: &mut PgConnection) -> Result<u64> {
    // ---
    let deleted = sqlx::query("DELETE FROM weather_readings WHERE observed_at < now() - $1::interval")
        .bind(RETENTION_INTERVAL)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    Ok(deleted)
}
