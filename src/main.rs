//! Application entry point for `weatherstore-seed`.
//!
//! This binary orchestrates one invocation of the tool:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Establishing a PostgreSQL connection pool
//! - Dispatching the requested subcommand (provision, seed, run, prune, serve)
//!
//! Any failure is returned from `main`, which prints the error chain and
//! exits with a non-zero status.
//!
//! # Environment Variables
//! - `DATABASE_URL`, or `DB_NAME`/`DB_USER`/`DB_PASSWORD`/`DB_HOST`/`DB_PORT`
//! - `SEED_LOG_LEVEL` (optional) – log verbosity (default: `info`)
//! - `SEED_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See `config` for the remaining settings.
use std::{env, io::IsTerminal};

use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use weatherstore_seed::cli::{Cli, Commands};
use weatherstore_seed::{config, pipeline, routes, schema, sources, store, Config};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let pool = connect(&cfg).await?;

    match cli.command {
        Commands::Provision => provision(&pool).await?,
        Commands::Seed { stage } => {
            let client = sources::http_client(&cfg)?;
            pipeline::seed(&pool, &client, &cfg, stage).await?;
        }
        Commands::Run => {
            provision(&pool).await?;
            let client = sources::http_client(&cfg)?;
            pipeline::seed(&pool, &client, &cfg, pipeline::Selection::All).await?;
        }
        Commands::Prune => {
            let mut conn = pool.acquire().await?;
            let deleted = store::prune_readings(&mut conn).await?;
            tracing::info!("Pruned {} readings", deleted);
        }
        Commands::Serve { addr } => {
            let app = routes::router(pool.clone(), cfg);
            tracing::info!("Listening on {}", addr);
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;
        }
    }

    pool.close().await;
    tracing::info!("Connection closed.");
    Ok(())
}

// ---

async fn connect(cfg: &Config) -> Result<PgPool> {
    // ---
    tracing::info!("Attempting to connect to database: {}", cfg.db.masked());

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect_with(cfg.db.connect_options()?)
        .await
        .with_context(|| format!("Failed to connect to database '{}'", cfg.db.masked()))?;

    tracing::info!("Successfully connected to database");
    Ok(pool)
}

async fn provision(pool: &PgPool) -> Result<()> {
    // ---
    let applied = schema::migrate(pool).await?;
    let version = schema::current_version(pool).await?;
    if applied.is_empty() {
        tracing::info!("Schema already at version {:?}, nothing to apply", version);
    } else {
        tracing::info!("Schema migrated to version {:?}", version);
    }
    Ok(())
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `SEED_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by `RUST_LOG`, else the `SEED_LOG_LEVEL` env var
///
/// Called once at startup, before any logging macro is invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("SEED_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("SEED_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
