//! `weatherstore-seed`: provisioning and seeding of the weather-data store.
//!
//! Module map:
//! - `config`   – environment-driven [`Config`]
//! - `schema`   – versioned migrations
//! - `sources`  – HTTP adapters for stations, communes, departments, forecasts,
//!   plus the built-in demo fixtures
//! - `flatten`  – forecast band → flat rows
//! - `store`    – idempotent inserts and lookups
//! - `pipeline` – the ETL stages tying the above together
//! - `routes`   – read-only HTTP surface
//! - `cli`      – command line definition

pub mod cli;
pub mod config;
pub mod flatten;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod schema;
pub mod sources;
pub mod store;

pub use config::Config;

