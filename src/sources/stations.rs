//! Weather station listing: a JSON array of `{name, latitude, longitude}`.

use anyhow::Result;
use reqwest::Client;

use crate::models::NewStation;

// ---

pub async fn fetch(client: &Client, url: &str) -> Result<Vec<NewStation>> {
    // ---
    let stations: Vec<NewStation> = super::fetch_json(client, url).await?;
    Ok(stations)
}
