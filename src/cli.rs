//! Command line interface.

use std::net::SocketAddr;

use clap::{Parser, Subcommand};

use crate::pipeline::Selection;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
/// Provision and seed the weather-data store
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create or upgrade the database schema
    Provision,
    /// Run one seeding stage, or all of them
    Seed {
        #[arg(value_enum, default_value_t = Selection::All)]
        stage: Selection,
    },
    /// Provision, then run every source-fed seeding stage
    Run,
    /// Delete readings older than the retention window
    Prune,
    /// Serve the seeded data over HTTP
    Serve {
        #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
        addr: SocketAddr,
    },
}
