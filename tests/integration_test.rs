//! End-to-end tests against a real PostgreSQL database.
//!
//! Set `TEST_DATABASE_URL` to a disposable database to run the database
//! tests; without it they print a notice and pass. Tests share the schema
//! (and the retention trigger deletes across stations), so they run one at a
//! time behind `DB_LOCK`.

use anyhow::Result;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    routing::get,
    Json, Router,
};
use chrono::{Duration, SubsecRound, TimeZone, Utc};
use serde_json::{json, Map, Value};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio::sync::Mutex;
use tower::ServiceExt;

use weatherstore_seed::config::{Config, DbTarget};
use weatherstore_seed::flatten::{flatten, Band, ReadingRow};
use weatherstore_seed::models::{NewCity, NewDepartment, NewStation};
use weatherstore_seed::pipeline::{self, Selection, Stage};
use weatherstore_seed::sources::{self, fixtures, forecast::Forecast};
use weatherstore_seed::{routes, schema, store};

static DB_LOCK: Mutex<()> = Mutex::const_new(());

// ---

async fn test_pool() -> Result<Option<PgPool>> {
    // ---
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping database test");
        return Ok(None);
    };

    let pool = PgPoolOptions::new().max_connections(2).connect(&url).await?;
    schema::migrate(&pool).await?;
    Ok(Some(pool))
}

fn test_config(url: &str) -> Config {
    // ---
    Config {
        db: DbTarget::Url(url.to_string()),
        db_pool_max: 1,
        communes_url: "http://localhost/communes".to_string(),
        departments_url: None,
        stations_url: None,
        forecast_url: "http://localhost/forecast".to_string(),
        forecast_days: 1,
        http_timeout_secs: 1,
        query_limit: 100,
    }
}

/// Source URLs pointing at a local fixture server.
fn fixture_config(db_url: &str, base: &str) -> Config {
    // ---
    Config {
        communes_url: format!("{base}/communes"),
        departments_url: Some(format!("{base}/broken")),
        stations_url: Some(format!("{base}/stations")),
        forecast_url: format!("{base}/forecast"),
        http_timeout_secs: 5,
        ..test_config(db_url)
    }
}

/// A forecast whose current reading falls on its second hourly timestamp.
fn overlapping_forecast() -> Value {
    // ---
    json!({
        "latitude": -63.5,
        "longitude": 103.5,
        "current": {"time": "2030-01-01T01:00", "temperature_2m": 5.0},
        "hourly": {
            "time": ["2030-01-01T00:00", "2030-01-01T01:00"],
            "temperature_2m": [4.0, 4.5],
            "dew_point_2m": [1.0, 1.1],
            "temperature_200m": [0.5, 0.6]
        },
        "daily": {"time": ["2030-01-01"], "temperature_2m_max": [6.0]}
    })
}

/// Serve fixture source documents on an ephemeral local port. Returns the
/// base URL.
async fn serve_fixtures() -> Result<String> {
    // ---
    let app = Router::new()
        .route(
            "/stations",
            get(|| async {
                Json(json!([{"name": "Fixture Station", "latitude": -63.5, "longitude": 103.5}]))
            }),
        )
        .route(
            "/communes",
            get(|| async {
                Json(json!([
                    {"nom": "Fixtureville", "centre": {"type": "Point", "coordinates": [103.5, -63.5]}}
                ]))
            }),
        )
        .route("/forecast", get(|| async { Json(overlapping_forecast()) }))
        .route(
            "/broken",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "upstream down") }),
        )
        .route("/garbage", get(|| async { "<html>not json</html>" }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move { axum::serve(listener, app).await });
    Ok(format!("http://{addr}"))
}

async fn hourly_extras_at(
    pool: &PgPool,
    station_id: i32,
    observed_at: chrono::DateTime<Utc>,
) -> Result<(Option<f64>, Option<f64>, Option<f64>)> {
    // ---
    let row = sqlx::query_as(
        "SELECT temperature_2m, dew_point_2m, temperature_200m \
         FROM weather_readings WHERE station_id = $1 AND observed_at = $2",
    )
    .bind(station_id)
    .bind(observed_at)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

fn section(value: Value) -> Map<String, Value> {
    // ---
    value.as_object().cloned().expect("section must be an object")
}

/// Remove a station left over from an earlier run (cascades to readings).
async fn delete_station_at(pool: &PgPool, latitude: f64, longitude: f64) -> Result<()> {
    // ---
    sqlx::query("DELETE FROM weather_stations WHERE latitude = $1 AND longitude = $2")
        .bind(latitude)
        .bind(longitude)
        .execute(pool)
        .await?;
    Ok(())
}

async fn count_readings(pool: &PgPool, station_id: i32) -> Result<i64> {
    // ---
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM weather_readings WHERE station_id = $1")
        .bind(station_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

async fn station(pool: &PgPool, name: &str, latitude: f64, longitude: f64) -> Result<i32> {
    // ---
    delete_station_at(pool, latitude, longitude).await?;
    let mut conn = pool.acquire().await?;
    store::insert_stations(
        &mut conn,
        &[NewStation {
            name: name.to_string(),
            latitude,
            longitude,
        }],
    )
    .await?;
    store::require_station_id(&mut conn, latitude, longitude).await
}

/// One seeding pass: the Paris station and its single reading, in one
/// transaction. Returns the station id and the readings inserted.
async fn seed_paris(pool: &PgPool, hourly: &Map<String, Value>) -> Result<(i32, u64)> {
    // ---
    let paris = NewStation {
        name: "Paris".to_string(),
        latitude: 48.85,
        longitude: 2.35,
    };

    let mut tx = pool.begin().await?;
    store::insert_stations(&mut tx, &[paris]).await?;
    let station_id = store::require_station_id(&mut tx, 48.85, 2.35).await?;
    let rows = flatten(station_id, hourly, Band::Hourly.metrics())?;
    let inserted = store::insert_readings(&mut tx, Band::Hourly, &rows).await?;
    tx.commit().await?;
    Ok((station_id, inserted))
}

// ---

#[tokio::test]
async fn health_answers_without_database() -> Result<()> {
    // ---
    let url = "postgres://nobody@127.0.0.1:1/none";
    let pool = PgPoolOptions::new().connect_lazy(url)?;
    let app = routes::router(pool, test_config(url));

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await?)?;
    assert_eq!(body, json!({"status": "ok"}));
    Ok(())
}

#[tokio::test]
async fn provisioning_twice_is_a_no_op() -> Result<()> {
    // ---
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };

    let applied = schema::migrate(&pool).await?;

    assert!(applied.is_empty(), "re-run applied {applied:?}");
    let latest = schema::MIGRATIONS.last().map(|m| m.version);
    assert_eq!(schema::current_version(&pool).await?, latest);
    Ok(())
}

#[tokio::test]
async fn reference_rows_are_inserted_once() -> Result<()> {
    // ---
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let mut conn = pool.acquire().await?;

    let latitude = -71.4321;
    let longitude = 171.1234;
    delete_station_at(&pool, latitude, longitude).await?;
    let new_station = NewStation {
        name: "Test Station".to_string(),
        latitude,
        longitude,
    };
    assert_eq!(store::insert_stations(&mut conn, &[new_station.clone()]).await?, 1);
    // Same coordinates under another name is still the same station.
    let renamed = NewStation {
        name: "Renamed".to_string(),
        ..new_station
    };
    assert_eq!(store::insert_stations(&mut conn, &[renamed]).await?, 0);

    let city = NewCity {
        name: "Testville".to_string(),
        latitude,
        longitude,
    };
    sqlx::query("DELETE FROM cities WHERE name = $1")
        .bind(&city.name)
        .execute(&mut *conn)
        .await?;
    let inserted = store::insert_cities(&mut conn, &[city.clone(), city.clone()]).await?;
    assert_eq!(inserted, 1);
    assert_eq!(store::insert_cities(&mut conn, &[city]).await?, 0);

    let department = NewDepartment {
        code: "T99".to_string(),
        name: "Test".to_string(),
        latitude,
        longitude,
    };
    sqlx::query("DELETE FROM departments WHERE code = $1")
        .bind(&department.code)
        .execute(&mut *conn)
        .await?;
    assert_eq!(store::insert_departments(&mut conn, &[department.clone()]).await?, 1);
    assert_eq!(store::insert_departments(&mut conn, &[department]).await?, 0);

    let stations: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM weather_stations WHERE latitude = $1 AND longitude = $2",
    )
    .bind(latitude)
    .bind(longitude)
    .fetch_one(&mut *conn)
    .await?;
    assert_eq!(stations, 1);
    Ok(())
}

#[tokio::test]
async fn readings_need_a_known_station() -> Result<()> {
    // ---
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let mut conn = pool.acquire().await?;

    delete_station_at(&pool, -80.0001, -170.0001).await?;
    assert_eq!(store::resolve_station_id(&mut conn, -80.0001, -170.0001).await?, None);
    assert!(store::require_station_id(&mut conn, -80.0001, -170.0001)
        .await
        .is_err());

    // A row whose station id does not exist violates the foreign key.
    let orphan = ReadingRow {
        station_id: i32::MAX,
        observed_at: Utc::now(),
        values: vec![weatherstore_seed::flatten::MetricValue::Null; Band::Hourly.metrics().len()],
    };
    assert!(store::insert_readings(&mut conn, Band::Hourly, &[orphan])
        .await
        .is_err());
    Ok(())
}

#[tokio::test]
async fn deleting_a_station_cascades_to_its_readings() -> Result<()> {
    // ---
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };

    let station_id = station(&pool, "Cascade", -60.5, 100.5).await?;
    let now = Utc::now().trunc_subsecs(0);
    let hourly = section(json!({
        "time": [now.to_rfc3339(), (now + Duration::hours(1)).to_rfc3339()],
        "temperature_2m": [1.0, 2.0]
    }));
    let daily = section(json!({
        "time": [now.format("%Y-%m-%d").to_string()],
        "temperature_2m_max": [3.0]
    }));

    let mut conn = pool.acquire().await?;
    let rows = flatten(station_id, &hourly, Band::Hourly.metrics())?;
    assert_eq!(store::insert_readings(&mut conn, Band::Hourly, &rows).await?, 2);
    let rows = flatten(station_id, &daily, Band::Daily.metrics())?;
    assert_eq!(store::insert_readings(&mut conn, Band::Daily, &rows).await?, 1);

    delete_station_at(&pool, -60.5, 100.5).await?;

    assert_eq!(count_readings(&pool, station_id).await?, 0);
    let daily_left: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM daily_weather_readings WHERE station_id = $1")
            .bind(station_id)
            .fetch_one(&pool)
            .await?;
    assert_eq!(daily_left, 0);
    Ok(())
}

#[tokio::test]
async fn deleting_any_reading_prunes_expired_ones() -> Result<()> {
    // ---
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };

    let station_id = station(&pool, "Retention", -61.25, 101.25).await?;
    let now = Utc::now().trunc_subsecs(0);
    let expired = now - Duration::days(30);
    let hourly = section(json!({
        "time": [expired.to_rfc3339(), now.to_rfc3339(), (now + Duration::hours(1)).to_rfc3339()],
        "temperature_2m": [0.5, 1.5, 2.5]
    }));

    let mut conn = pool.acquire().await?;
    let rows = flatten(station_id, &hourly, Band::Hourly.metrics())?;
    assert_eq!(store::insert_readings(&mut conn, Band::Hourly, &rows).await?, 3);

    // Delete one fresh reading; the trigger takes the expired one with it.
    sqlx::query("DELETE FROM weather_readings WHERE station_id = $1 AND observed_at = $2")
        .bind(station_id)
        .bind(rows[1].observed_at)
        .execute(&mut *conn)
        .await?;

    let left = store::readings_for_station(&mut conn, station_id, 10).await?;
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].temperature_2m, Some(2.5));

    delete_station_at(&pool, -61.25, 101.25).await?;
    Ok(())
}

#[tokio::test]
async fn seeding_paris_twice_keeps_one_reading() -> Result<()> {
    // ---
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    delete_station_at(&pool, 48.85, 2.35).await?;

    let hourly = section(json!({
        "time": ["2024-01-01T00:00:00Z"],
        "temperature_2m": [5.0]
    }));

    let (station_id, inserted) = seed_paris(&pool, &hourly).await?;
    assert_eq!(inserted, 1);

    let mut conn = pool.acquire().await?;
    let readings = store::readings_for_station(&mut conn, station_id, 100).await?;
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].temperature_2m, Some(5.0));
    assert_eq!(
        readings[0].observed_at,
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    );

    let (again_id, inserted_again) = seed_paris(&pool, &hourly).await?;
    assert_eq!(again_id, station_id);
    assert_eq!(inserted_again, 0);
    assert_eq!(count_readings(&pool, station_id).await?, 1);

    // The same row through the HTTP surface.
    let url = std::env::var("TEST_DATABASE_URL")?;
    let app = routes::router(pool.clone(), test_config(&url));
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/stations/{station_id}/readings"))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await?)?;
    assert_eq!(body.as_array().map(Vec::len), Some(1));
    assert_eq!(body[0]["temperature_2m"], json!(5.0));
    Ok(())
}

#[tokio::test]
async fn unknown_station_is_not_found() -> Result<()> {
    // ---
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };

    let url = std::env::var("TEST_DATABASE_URL")?;
    let app = routes::router(pool, test_config(&url));
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/stations/{}/readings", i32::MAX))
                .body(Body::empty())?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn current_reading_does_not_shadow_hourly_row() -> Result<()> {
    // ---
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };

    let station_id = station(&pool, "Overlap", -62.75, 102.75).await?;
    let forecast = Forecast::from_value(overlapping_forecast())?;

    let mut tx = pool.begin().await?;
    let (fetched, inserted) = pipeline::store_forecast(&mut tx, station_id, &forecast).await?;
    tx.commit().await?;

    // Two hourly rows, one current, one daily; the current one collides.
    assert_eq!(fetched, 4);
    assert_eq!(inserted, 3);
    assert_eq!(count_readings(&pool, station_id).await?, 2);

    let one_am = Utc.with_ymd_and_hms(2030, 1, 1, 1, 0, 0).unwrap();
    assert_eq!(
        hourly_extras_at(&pool, station_id, one_am).await?,
        (Some(4.5), Some(1.1), Some(0.6))
    );

    delete_station_at(&pool, -62.75, 102.75).await?;
    Ok(())
}

#[tokio::test]
async fn failed_fetches_abort_before_touching_the_database() -> Result<()> {
    // ---
    let base = serve_fixtures().await?;
    let url = "postgres://nobody@127.0.0.1:1/none";
    let pool = PgPoolOptions::new().connect_lazy(url)?;
    let client = sources::http_client(&fixture_config(url, &base))?;

    let broken = fixture_config(url, &base);
    let err = pipeline::seed(&pool, &client, &broken, Selection::Departments)
        .await
        .unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("Stage 'departments' failed"), "{message}");
    assert!(message.contains("500"), "{message}");

    let garbage = Config {
        stations_url: Some(format!("{base}/garbage")),
        ..fixture_config(url, &base)
    };
    let err = pipeline::seed(&pool, &client, &garbage, Selection::Stations)
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("Malformed JSON"), "{err:#}");

    let unset = Config {
        stations_url: None,
        ..fixture_config(url, &base)
    };
    let err = pipeline::seed(&pool, &client, &unset, Selection::Stations)
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("STATIONS_URL"), "{err:#}");
    Ok(())
}

#[tokio::test]
async fn failing_stage_keeps_earlier_stages_committed() -> Result<()> {
    // ---
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    delete_station_at(&pool, -63.5, 103.5).await?;
    sqlx::query("DELETE FROM cities WHERE name = 'Fixtureville'")
        .execute(&pool)
        .await?;

    let base = serve_fixtures().await?;
    let config = fixture_config(&std::env::var("TEST_DATABASE_URL")?, &base);
    let client = sources::http_client(&config)?;

    // Stations and cities succeed, departments gets a 500.
    let err = pipeline::seed(&pool, &client, &config, Selection::All)
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("Stage 'departments' failed"), "{err:#}");

    let mut conn = pool.acquire().await?;
    let station_id = store::resolve_station_id(&mut conn, -63.5, 103.5).await?;
    let Some(station_id) = station_id else {
        panic!("stations stage was rolled back");
    };
    let cities: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cities WHERE name = 'Fixtureville'")
        .fetch_one(&mut *conn)
        .await?;
    assert_eq!(cities, 1);
    // The run stopped before forecasts.
    assert_eq!(count_readings(&pool, station_id).await?, 0);

    delete_station_at(&pool, -63.5, 103.5).await?;
    Ok(())
}

#[tokio::test]
async fn forecast_stage_stores_each_reading_once() -> Result<()> {
    // ---
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    // The stage fetches a forecast for every known station.
    sqlx::query("DELETE FROM weather_stations").execute(&pool).await?;

    let base = serve_fixtures().await?;
    let config = fixture_config(&std::env::var("TEST_DATABASE_URL")?, &base);
    let client = sources::http_client(&config)?;

    pipeline::seed(&pool, &client, &config, Selection::Stations).await?;
    let reports = pipeline::seed(&pool, &client, &config, Selection::Forecasts).await?;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].stage, Stage::Forecasts);
    assert_eq!((reports[0].fetched, reports[0].inserted), (4, 3));

    let again = pipeline::seed(&pool, &client, &config, Selection::Forecasts).await?;
    assert_eq!(again[0].inserted, 0);

    let mut conn = pool.acquire().await?;
    let station_id = store::require_station_id(&mut conn, -63.5, 103.5).await?;
    let one_am = Utc.with_ymd_and_hms(2030, 1, 1, 1, 0, 0).unwrap();
    assert_eq!(
        hourly_extras_at(&pool, station_id, one_am).await?,
        (Some(4.5), Some(1.1), Some(0.6))
    );

    delete_station_at(&pool, -63.5, 103.5).await?;
    Ok(())
}

#[tokio::test]
async fn seeding_fixtures_twice_is_a_no_op() -> Result<()> {
    // ---
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    for city in fixtures::cities() {
        sqlx::query("DELETE FROM cities WHERE name = $1 AND latitude = $2 AND longitude = $3")
            .bind(&city.name)
            .bind(city.latitude)
            .bind(city.longitude)
            .execute(&pool)
            .await?;
    }
    for department in fixtures::departments() {
        sqlx::query("DELETE FROM departments WHERE code = $1")
            .bind(&department.code)
            .execute(&pool)
            .await?;
    }

    let url = std::env::var("TEST_DATABASE_URL")?;
    let config = test_config(&url);
    let client = sources::http_client(&config)?;

    let first = pipeline::seed(&pool, &client, &config, Selection::Fixtures).await?;
    assert_eq!(first[0].stage, Stage::Fixtures);
    assert_eq!(first[0].fetched, 9);
    assert_eq!(first[0].inserted, 9);

    let second = pipeline::seed(&pool, &client, &config, Selection::Fixtures).await?;
    assert_eq!(second[0].inserted, 0);

    let ain: String = sqlx::query_scalar("SELECT name FROM departments WHERE code = '01'")
        .fetch_one(&pool)
        .await?;
    assert_eq!(ain, "Ain");
    Ok(())
}
