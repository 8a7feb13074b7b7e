//! ETL stages: fetch → flatten → insert-if-absent → commit.
//!
//! Stages run strictly one after another. Each stage opens its own
//! transaction and commits it at the end; an error drops the transaction
//! (rolling it back) and is returned to the caller, which aborts the run.
//! Work committed by earlier stages stays in place.

use std::fmt;

use anyhow::{Context, Result};
use reqwest::Client;
use sqlx::{PgConnection, PgPool};
use tracing::instrument;

use crate::flatten::Band;
use crate::sources::forecast::{self, Forecast};
use crate::sources::{communes, departments, fixtures, stations};
use crate::{store, Config};

// ---

/// A single seeding stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    // ---
    Stations,
    Cities,
    Departments,
    Forecasts,
    Fixtures,
}

impl Stage {
    // ---
    /// Stages fed by the configured sources, in run order.
    pub const ORDER: [Stage; 4] = [
        Stage::Stations,
        Stage::Cities,
        Stage::Departments,
        Stage::Forecasts,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Stations => "stations",
            Stage::Cities => "cities",
            Stage::Departments => "departments",
            Stage::Forecasts => "forecasts",
            Stage::Fixtures => "fixtures",
        };
        f.write_str(name)
    }
}

/// What `seed` was asked to run, as given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Selection {
    // ---
    Stations,
    Cities,
    Departments,
    Forecasts,
    /// Built-in demo cities and departments, no network needed.
    Fixtures,
    /// Stations, cities, departments and forecasts, in that order.
    All,
}

impl Selection {
    // ---
    /// The stages to run, in order.
    pub fn expand(self) -> &'static [Stage] {
        // ---
        match self {
            Selection::Stations => &[Stage::Stations],
            Selection::Cities => &[Stage::Cities],
            Selection::Departments => &[Stage::Departments],
            Selection::Forecasts => &[Stage::Forecasts],
            Selection::Fixtures => &[Stage::Fixtures],
            Selection::All => &Stage::ORDER,
        }
    }
}

/// Outcome of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageReport {
    // ---
    pub stage: Stage,
    /// Candidate rows produced by the source.
    pub fetched: usize,
    /// Rows actually inserted; the rest already existed.
    pub inserted: u64,
}

impl StageReport {
    fn log(&self) {
        tracing::info!(
            "Stage {} done: {} fetched, {} inserted, {} already present",
            self.stage,
            self.fetched,
            self.inserted,
            (self.fetched as u64).saturating_sub(self.inserted)
        );
    }
}

// ---

/// Run the stages of `selection`, in order. The first failing stage aborts
/// the run; stages before it stay committed.
pub async fn seed(
    pool: &PgPool,
    client: &Client,
    config: &Config,
    selection: Selection,
) -> Result<Vec<StageReport>> {
    // ---
    let stages = selection.expand();

    let mut reports = Vec::with_capacity(stages.len());
    for &stage in stages {
        let report = match stage {
            Stage::Stations => seed_stations(pool, client, config).await,
            Stage::Cities => seed_cities(pool, client, config).await,
            Stage::Departments => seed_departments(pool, client, config).await,
            Stage::Forecasts => seed_forecasts(pool, client, config).await,
            Stage::Fixtures => seed_fixtures(pool).await,
        }
        .with_context(|| format!("Stage '{stage}' failed"))?;

        report.log();
        reports.push(report);
    }
    Ok(reports)
}

#[instrument(skip_all)]
pub async fn seed_stations(pool: &PgPool, client: &Client, config: &Config) -> Result<StageReport> {
    // ---
    let url = config.require_stations_url()?;
    let candidates = stations::fetch(client, url).await?;

    let mut tx = pool.begin().await?;
    let inserted = store::insert_stations(&mut tx, &candidates).await?;
    tx.commit().await?;

    Ok(StageReport {
        stage: Stage::Stations,
        fetched: candidates.len(),
        inserted,
    })
}

#[instrument(skip_all)]
pub async fn seed_cities(pool: &PgPool, client: &Client, config: &Config) -> Result<StageReport> {
    // ---
    let candidates = communes::fetch(client, &config.communes_url).await?;

    let mut tx = pool.begin().await?;
    let inserted = store::insert_cities(&mut tx, &candidates).await?;
    tx.commit().await?;

    Ok(StageReport {
        stage: Stage::Cities,
        fetched: candidates.len(),
        inserted,
    })
}

#[instrument(skip_all)]
pub async fn seed_departments(
    pool: &PgPool,
    client: &Client,
    config: &Config,
) -> Result<StageReport> {
    // ---
    let url = config.require_departments_url()?;
    let candidates = departments::fetch(client, url).await?;

    let mut tx = pool.begin().await?;
    let inserted = store::insert_departments(&mut tx, &candidates).await?;
    tx.commit().await?;

    Ok(StageReport {
        stage: Stage::Departments,
        fetched: candidates.len(),
        inserted,
    })
}

/// Fetch and store the forecast of every known station, one station at a
/// time. Each station's readings are committed before the next fetch.
#[instrument(skip_all)]
pub async fn seed_forecasts(
    pool: &PgPool,
    client: &Client,
    config: &Config,
) -> Result<StageReport> {
    // ---
    let stations = {
        let mut conn = pool.acquire().await?;
        store::list_stations(&mut conn).await?
    };
    tracing::info!("Fetching forecasts for {} stations", stations.len());

    let mut fetched = 0;
    let mut inserted = 0;
    for station in &stations {
        let forecast = forecast::fetch(
            client,
            &config.forecast_url,
            station.latitude,
            station.longitude,
            config.forecast_days,
        )
        .await
        .with_context(|| format!("Forecast for station '{}'", station.name))?;

        let mut tx = pool.begin().await?;
        let station_id =
            store::require_station_id(&mut tx, station.latitude, station.longitude).await?;

        let (rows, added) = store_forecast(&mut tx, station_id, &forecast).await?;
        tx.commit().await?;
        fetched += rows;
        inserted += added;

        tracing::debug!("Stored forecast for station '{}'", station.name);
    }

    Ok(StageReport {
        stage: Stage::Forecasts,
        fetched,
        inserted,
    })
}

/// Flatten and insert every band of `forecast` for `station_id`. Returns
/// (rows flattened, rows inserted).
pub async fn store_forecast(
    conn: &mut PgConnection,
    station_id: i32,
    forecast: &Forecast,
) -> Result<(usize, u64)> {
    // ---
    let mut fetched = 0;
    let mut inserted = 0;
    for band in Band::INSERT_ORDER {
        let rows = forecast.rows(station_id, band)?;
        fetched += rows.len();
        inserted += store::insert_readings(conn, band, &rows).await?;
    }
    Ok((fetched, inserted))
}

/// Insert the built-in demo cities and departments in one transaction.
#[instrument(skip_all)]
pub async fn seed_fixtures(pool: &PgPool) -> Result<StageReport> {
    // ---
    let cities = fixtures::cities();
    let departments = fixtures::departments();

    let mut tx = pool.begin().await?;
    let inserted = store::insert_cities(&mut tx, &cities).await?
        + store::insert_departments(&mut tx, &departments).await?;
    tx.commit().await?;

    Ok(StageReport {
        stage: Stage::Fixtures,
        fetched: cities.len() + departments.len(),
        inserted,
    })
}
