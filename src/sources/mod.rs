//! External source adapters.
//!
//! Each adapter fetches one JSON resource and maps it to candidate rows.
//! Fetch failures (network error, non-2xx status, undecodable body) are
//! returned as errors and abort the run; nothing is retried.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;

use crate::Config;

pub mod communes;
pub mod departments;
pub mod fixtures;
pub mod forecast;
pub mod stations;

// ---

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Build the HTTP client shared by every adapter of a run.
pub fn http_client(config: &Config) -> Result<Client> {
    // ---
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .build()
        .context("Failed to build HTTP client")
}

/// GET `url` and decode its JSON body.
pub async fn fetch_json<T: DeserializeOwned>(client: &Client, url: &str) -> Result<T> {
    // ---
    tracing::debug!("Fetching {}", url);

    let response = client
        .get(url)
        .header("Accept", "application/json")
        .send()
        .await
        .with_context(|| format!("Request to {url} failed"))?;

    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("{url} answered with status {status}"));
    }

    response
        .json::<T>()
        .await
        .with_context(|| format!("Malformed JSON from {url}"))
}
