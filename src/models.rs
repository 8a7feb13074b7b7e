//! Row models for the weather-data store.
//!
//! `New*` types are candidate rows decoded from the external sources and
//! keyed by their natural key; the plain types are rows read back from the
//! database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ---

/// Candidate weather station. Natural key: (latitude, longitude).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewStation {
    // ---
    #[serde(alias = "nom")]
    pub name: String,
    #[serde(alias = "lat", deserialize_with = "coordinate")]
    pub latitude: f64,
    #[serde(alias = "lon", alias = "lng", deserialize_with = "coordinate")]
    pub longitude: f64,
}

/// Candidate city. Natural key: (name, latitude, longitude).
#[derive(Debug, Clone, PartialEq)]
pub struct NewCity {
    // ---
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Candidate department. Natural key: code.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewDepartment {
    // ---
    #[serde(alias = "num_dep", alias = "numero", deserialize_with = "code")]
    pub code: String,
    #[serde(alias = "nom", alias = "dep_name")]
    pub name: String,
    #[serde(alias = "lat", deserialize_with = "coordinate")]
    pub latitude: f64,
    #[serde(alias = "lon", alias = "lng", deserialize_with = "coordinate")]
    pub longitude: f64,
}

/// Stored weather station.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WeatherStation {
    // ---
    pub id: i32,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Stored reading, reduced to the headline metrics served by the read API.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WeatherReading {
    // ---
    pub station_id: i32,
    pub observed_at: DateTime<Utc>,
    pub temperature_2m: Option<f64>,
    pub relative_humidity_2m: Option<f64>,
    pub apparent_temperature: Option<f64>,
    pub precipitation: Option<f64>,
    pub weather_code: Option<i32>,
    pub cloud_cover: Option<f64>,
    pub pressure_msl: Option<f64>,
    pub wind_speed_10m: Option<f64>,
    pub wind_direction_10m: Option<f64>,
}

// ---

/// Coordinates show up both as JSON numbers and as numeric strings.
fn coordinate<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    // ---
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Department codes are mostly numeric ("01", 75) but Corsica uses "2A"/"2B".
fn code<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    // ---
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(format!("{n:02}")),
        Raw::Text(s) => Ok(s.trim().to_string()),
    }
}
