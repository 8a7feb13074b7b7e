//! Database schema management for `weatherstore-seed`.
//!
//! The schema is an ordered list of versioned migrations. [`migrate`] applies
//! every migration not yet recorded in `schema_migrations`, each in its own
//! transaction, so re-running provisioning on an up-to-date database is a
//! no-op. Parent tables are always created before tables referencing them.

use anyhow::{Context, Result};
use sqlx::PgPool;

// ---

/// Arbitrary key for `pg_advisory_xact_lock`, serializing concurrent runs.
const MIGRATION_LOCK_KEY: i64 = 0x5745_4154_4845_52;

/// Readings older than this are removed by the retention trigger.
pub const RETENTION_INTERVAL: &str = "7 days";

/// One schema version.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    // ---
    pub version: i32,
    pub description: &'static str,
    pub statements: &'static [&'static str],
}

/// All migrations, in application order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "stations, readings, cities, departments",
        statements: V1,
    },
    Migration {
        version: 2,
        description: "daily readings",
        statements: V2,
    },
    Migration {
        version: 3,
        description: "reading retention trigger",
        statements: V3,
    },
];

const V1: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS weather_stations (
        id        SERIAL  PRIMARY KEY,
        name      TEXT    NOT NULL,
        latitude  FLOAT   NOT NULL,
        longitude FLOAT   NOT NULL,
        UNIQUE (latitude, longitude)
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS weather_readings (
        id                           SERIAL      PRIMARY KEY,
        station_id                   INTEGER     NOT NULL
            REFERENCES weather_stations (id) ON UPDATE NO ACTION ON DELETE CASCADE,
        observed_at                  TIMESTAMPTZ NOT NULL,
        temperature_2m               FLOAT,
        relative_humidity_2m         FLOAT,
        dew_point_2m                 FLOAT,
        apparent_temperature         FLOAT,
        is_day                       BOOLEAN,
        precipitation                FLOAT,
        rain                         FLOAT,
        showers                      FLOAT,
        snowfall                     FLOAT,
        weather_code                 INTEGER,
        cloud_cover                  FLOAT,
        cloud_cover_low              FLOAT,
        cloud_cover_mid              FLOAT,
        cloud_cover_high             FLOAT,
        pressure_msl                 FLOAT,
        surface_pressure             FLOAT,
        vapour_pressure_deficit      FLOAT,
        reference_evapotranspiration FLOAT,
        wind_speed_10m               FLOAT,
        wind_speed_20m               FLOAT,
        wind_speed_50m               FLOAT,
        wind_speed_100m              FLOAT,
        wind_speed_150m              FLOAT,
        wind_speed_200m              FLOAT,
        wind_direction_10m           FLOAT,
        wind_direction_20m           FLOAT,
        wind_direction_50m           FLOAT,
        wind_direction_100m          FLOAT,
        wind_direction_150m          FLOAT,
        wind_direction_200m          FLOAT,
        wind_gusts_10m               FLOAT,
        temperature_20m              FLOAT,
        temperature_50m              FLOAT,
        temperature_100m             FLOAT,
        temperature_150m             FLOAT,
        temperature_200m             FLOAT,
        UNIQUE (station_id, observed_at)
    );
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_weather_readings_observed_at
        ON weather_readings (observed_at);
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cities (
        id        SERIAL PRIMARY KEY,
        name      TEXT   NOT NULL,
        latitude  FLOAT  NOT NULL,
        longitude FLOAT  NOT NULL,
        UNIQUE (name, latitude, longitude)
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS departments (
        id        SERIAL PRIMARY KEY,
        code      TEXT   NOT NULL UNIQUE,
        name      TEXT   NOT NULL,
        latitude  FLOAT  NOT NULL,
        longitude FLOAT  NOT NULL
    );
    "#,
];

const V2: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS daily_weather_readings (
        id                            SERIAL      PRIMARY KEY,
        station_id                    INTEGER     NOT NULL
            REFERENCES weather_stations (id) ON UPDATE NO ACTION ON DELETE CASCADE,
        observed_at                   TIMESTAMPTZ NOT NULL,
        weather_code                  INTEGER,
        temperature_2m_max            FLOAT,
        temperature_2m_min            FLOAT,
        apparent_temperature_max      FLOAT,
        apparent_temperature_min      FLOAT,
        sunrise                       TIMESTAMPTZ,
        sunset                        TIMESTAMPTZ,
        daylight_duration             FLOAT,
        sunshine_duration             FLOAT,
        uv_index_max                  FLOAT,
        uv_index_clear_sky_max        FLOAT,
        precipitation_sum             FLOAT,
        rain_sum                      FLOAT,
        showers_sum                   FLOAT,
        snowfall_sum                  FLOAT,
        precipitation_hours           FLOAT,
        precipitation_probability_max FLOAT,
        wind_speed_10m_max            FLOAT,
        wind_gusts_10m_max            FLOAT,
        wind_direction_10m_dominant   FLOAT,
        shortwave_radiation_sum       FLOAT,
        reference_evapotranspiration  FLOAT,
        UNIQUE (station_id, observed_at)
    );
    "#,
];

// The trigger deletes from its own table, so it bails out when nested.
const V3: &[&str] = &[
    r#"
    CREATE OR REPLACE FUNCTION prune_old_weather_readings() RETURNS trigger AS $$
    BEGIN
        IF pg_trigger_depth() > 1 THEN
            RETURN NULL;
        END IF;
        DELETE FROM weather_readings
         WHERE observed_at < now() - INTERVAL '7 days';
        RETURN NULL;
    END;
    $$ LANGUAGE plpgsql;
    "#,
    r#"
    DROP TRIGGER IF EXISTS weather_readings_retention ON weather_readings;
    "#,
    r#"
    CREATE TRIGGER weather_readings_retention
        AFTER DELETE ON weather_readings
        FOR EACH STATEMENT
        EXECUTE FUNCTION prune_old_weather_readings();
    "#,
];

// ---

/// Bring the schema up to the latest version (idempotent).
///
/// Errors are propagated if any SQL execution fails; the failing migration is
/// rolled back and earlier ones stay applied.
pub async fn migrate(pool: &PgPool) -> Result<Vec<i32>> {
    // ---
    let mut applied = Vec::new();

    for migration in MIGRATIONS {
        let mut tx = pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version     INTEGER     PRIMARY KEY,
                description TEXT        NOT NULL,
                applied_at  TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            "#,
        )
        .execute(&mut *tx)
        .await?;

        let already: Option<i32> =
            sqlx::query_scalar("SELECT version FROM schema_migrations WHERE version = $1")
                .bind(migration.version)
                .fetch_optional(&mut *tx)
                .await?;
        if already.is_some() {
            tracing::debug!("Migration V{} already applied", migration.version);
            continue;
        }

        for statement in migration.statements {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .with_context(|| {
                    format!(
                        "Migration V{} ({}) failed",
                        migration.version, migration.description
                    )
                })?;
        }

        sqlx::query("INSERT INTO schema_migrations (version, description) VALUES ($1, $2)")
            .bind(migration.version)
            .bind(migration.description)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!(
            "Applied migration V{}: {}",
            migration.version,
            migration.description
        );
        applied.push(migration.version);
    }

    Ok(applied)
}

/// Highest applied migration version, `None` on an unprovisioned database.
pub async fn current_version(pool: &PgPool) -> Result<Option<i32>> {
    // ---
    let exists: bool = sqlx::query_scalar("SELECT to_regclass('schema_migrations') IS NOT NULL")
        .fetch_one(pool)
        .await?;
    if !exists {
        return Ok(None);
    }

    let version: Option<i32> = sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
        .fetch_one(pool)
        .await?;
    Ok(version)
}
