//! Per-coordinate forecast from the Open-Meteo API.
//!
//! The request lists the metric keys of every [`Band`]; the response carries
//! one JSON section per band, each flattened by [`crate::flatten`].

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, Url};
use serde_json::{Map, Value};

use crate::flatten::{self, Band, ReadingRow};

// ---

/// Decoded forecast document: the raw top-level JSON object.
#[derive(Debug, Clone)]
pub struct Forecast {
    // ---
    body: Map<String, Value>,
}

/// Build the forecast request for one coordinate pair.
pub fn request_url(base: &str, latitude: f64, longitude: f64, days: u32) -> Result<Url> {
    // ---
    let mut params = vec![
        ("latitude", latitude.to_string()),
        ("longitude", longitude.to_string()),
        ("timezone", "GMT".to_string()),
        ("forecast_days", days.to_string()),
    ];
    for band in Band::ALL {
        let keys: Vec<&str> = band.metrics().iter().map(|m| m.key).collect();
        params.push((band.section(), keys.join(",")));
    }

    Url::parse_with_params(base, &params).with_context(|| format!("Invalid forecast URL {base}"))
}

pub async fn fetch(
    client: &Client,
    base: &str,
    latitude: f64,
    longitude: f64,
    days: u32,
) -> Result<Forecast> {
    // ---
    let url = request_url(base, latitude, longitude, days)?;
    let body: Value = super::fetch_json(client, url.as_str()).await?;
    Forecast::from_value(body)
}

impl Forecast {
    // ---
    pub fn from_value(body: Value) -> Result<Self> {
        // ---
        match body {
            Value::Object(body) => Ok(Forecast { body }),
            other => Err(anyhow!("Forecast body is not a JSON object: {other}")),
        }
    }

    /// The JSON section of `band`, if the response has one.
    pub fn section(&self, band: Band) -> Option<&Map<String, Value>> {
        // ---
        self.body.get(band.section()).and_then(Value::as_object)
    }

    /// Flattened rows of `band` for `station_id`. A missing section yields
    /// no rows.
    pub fn rows(&self, station_id: i32, band: Band) -> Result<Vec<ReadingRow>> {
        // ---
        match self.section(band) {
            Some(section) => flatten::flatten(station_id, section, band.metrics())
                .with_context(|| format!("Malformed '{}' forecast section", band.section())),
            None => {
                tracing::warn!("Forecast has no '{}' section", band.section());
                Ok(Vec::new())
            }
        }
    }
}
