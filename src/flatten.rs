//! Forecast flattening.
//!
//! The forecast API returns each granularity ("band") as a JSON object of
//! parallel arrays keyed by metric name, one value per entry of the `time`
//! array. Flattening turns one band into one [`ReadingRow`] per timestamp,
//! with the values laid out in the band's fixed column order.
//!
//! Missing data never fails: an absent key, a JSON `null`, or an array that
//! is shorter than `time` all yield [`MetricValue::Null`] at that index.
//! A value of the wrong JSON type is a malformed payload and does fail.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};

// ---

/// SQL type family of a metric column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    // ---
    /// `FLOAT` (double precision).
    Float,
    /// `INTEGER`, e.g. WMO weather codes.
    Integer,
    /// `BOOLEAN`; the API encodes these as 0/1.
    Flag,
    /// `TIMESTAMPTZ`, e.g. sunrise.
    Timestamp,
}

/// One metric: its key in the API payload, its column in the target table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metric {
    // ---
    pub key: &'static str,
    pub column: &'static str,
    pub kind: MetricKind,
}

const fn float(key: &'static str) -> Metric {
    Metric {
        key,
        column: key,
        kind: MetricKind::Float,
    }
}

const fn integer(key: &'static str) -> Metric {
    Metric {
        key,
        column: key,
        kind: MetricKind::Integer,
    }
}

/// Metrics of the instantaneous "current" section.
pub const CURRENT_METRICS: &[Metric] = &[
    float("temperature_2m"),
    float("relative_humidity_2m"),
    float("apparent_temperature"),
    Metric {
        key: "is_day",
        column: "is_day",
        kind: MetricKind::Flag,
    },
    float("precipitation"),
    float("rain"),
    float("showers"),
    float("snowfall"),
    integer("weather_code"),
    float("cloud_cover"),
    float("pressure_msl"),
    float("surface_pressure"),
    float("wind_speed_10m"),
    float("wind_direction_10m"),
    float("wind_gusts_10m"),
];

/// Metrics of the "hourly" section.
pub const HOURLY_METRICS: &[Metric] = &[
    float("temperature_2m"),
    float("relative_humidity_2m"),
    float("dew_point_2m"),
    float("apparent_temperature"),
    float("precipitation"),
    float("rain"),
    float("snowfall"),
    integer("weather_code"),
    float("cloud_cover"),
    float("cloud_cover_low"),
    float("cloud_cover_mid"),
    float("cloud_cover_high"),
    float("pressure_msl"),
    float("surface_pressure"),
    float("vapour_pressure_deficit"),
    Metric {
        key: "et0_fao_evapotranspiration",
        column: "reference_evapotranspiration",
        kind: MetricKind::Float,
    },
    float("wind_speed_10m"),
    float("wind_speed_20m"),
    float("wind_speed_50m"),
    float("wind_speed_100m"),
    float("wind_speed_150m"),
    float("wind_speed_200m"),
    float("wind_direction_10m"),
    float("wind_direction_20m"),
    float("wind_direction_50m"),
    float("wind_direction_100m"),
    float("wind_direction_150m"),
    float("wind_direction_200m"),
    float("wind_gusts_10m"),
    float("temperature_20m"),
    float("temperature_50m"),
    float("temperature_100m"),
    float("temperature_150m"),
    float("temperature_200m"),
];

/// Metrics of the "daily" section.
pub const DAILY_METRICS: &[Metric] = &[
    integer("weather_code"),
    float("temperature_2m_max"),
    float("temperature_2m_min"),
    float("apparent_temperature_max"),
    float("apparent_temperature_min"),
    Metric {
        key: "sunrise",
        column: "sunrise",
        kind: MetricKind::Timestamp,
    },
    Metric {
        key: "sunset",
        column: "sunset",
        kind: MetricKind::Timestamp,
    },
    float("daylight_duration"),
    float("sunshine_duration"),
    float("uv_index_max"),
    float("uv_index_clear_sky_max"),
    float("precipitation_sum"),
    float("rain_sum"),
    float("showers_sum"),
    float("snowfall_sum"),
    float("precipitation_hours"),
    float("precipitation_probability_max"),
    float("wind_speed_10m_max"),
    float("wind_gusts_10m_max"),
    float("wind_direction_10m_dominant"),
    float("shortwave_radiation_sum"),
    Metric {
        key: "et0_fao_evapotranspiration",
        column: "reference_evapotranspiration",
        kind: MetricKind::Float,
    },
];

/// Time granularity of a forecast section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    // ---
    Current,
    Hourly,
    Daily,
}

impl Band {
    // ---
    pub const ALL: [Band; 3] = [Band::Current, Band::Hourly, Band::Daily];

    /// Order in which a forecast's bands are stored. Hourly goes before
    /// current: both land in the same table under the same key, and a current
    /// reading on an hourly timestamp must not shadow the fuller hourly row.
    pub const INSERT_ORDER: [Band; 3] = [Band::Hourly, Band::Current, Band::Daily];

    /// Key of this band's section in the forecast payload (and query string).
    pub fn section(self) -> &'static str {
        // ---
        match self {
            Band::Current => "current",
            Band::Hourly => "hourly",
            Band::Daily => "daily",
        }
    }

    /// Table the band's rows land in. Current and hourly share the flat
    /// readings table; daily aggregates have their own.
    pub fn table(self) -> &'static str {
        // ---
        match self {
            Band::Current | Band::Hourly => "weather_readings",
            Band::Daily => "daily_weather_readings",
        }
    }

    /// Metrics of this band, in column order.
    pub fn metrics(self) -> &'static [Metric] {
        // ---
        match self {
            Band::Current => CURRENT_METRICS,
            Band::Hourly => HOURLY_METRICS,
            Band::Daily => DAILY_METRICS,
        }
    }
}

/// A single typed cell of a flattened row.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    // ---
    Null,
    Float(f64),
    Integer(i32),
    Flag(bool),
    Timestamp(DateTime<Utc>),
}

impl MetricValue {
    // ---
    pub fn is_null(&self) -> bool {
        matches!(self, MetricValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            MetricValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetricValue::Flag(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            MetricValue::Timestamp(v) => Some(*v),
            _ => None,
        }
    }
}

/// One flattened record, ready for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingRow {
    // ---
    pub station_id: i32,
    pub observed_at: DateTime<Utc>,
    /// Same length and order as the band's metric list.
    pub values: Vec<MetricValue>,
}

// ---

/// Flatten one forecast section into rows for `station_id`.
///
/// `section` is the JSON object of a band (`"hourly": {...}`). Its `time`
/// entry is either an array of timestamps or, for the "current" band, a single
/// timestamp whose metrics are scalars.
pub fn flatten(
    station_id: i32,
    section: &Map<String, Value>,
    metrics: &[Metric],
) -> Result<Vec<ReadingRow>> {
    // ---
    let timestamps = match section.get("time") {
        Some(Value::Array(items)) => items
            .iter()
            .map(parse_time_value)
            .collect::<Result<Vec<_>>>()?,
        Some(value @ Value::String(_)) => vec![parse_time_value(value)?],
        Some(other) => bail!("Unexpected \"time\" entry in forecast section: {other}"),
        None => bail!("Forecast section has no \"time\" entry"),
    };

    let mut rows = Vec::with_capacity(timestamps.len());
    for (index, observed_at) in timestamps.into_iter().enumerate() {
        let values = metrics
            .iter()
            .map(|metric| {
                let raw = section.get(metric.key).and_then(|v| value_at(v, index));
                convert(raw, metric.kind)
                    .with_context(|| format!("Metric '{}' at index {}", metric.key, index))
            })
            .collect::<Result<Vec<_>>>()?;

        rows.push(ReadingRow {
            station_id,
            observed_at,
            values,
        });
    }

    Ok(rows)
}

/// Value of a metric entry at `index`. Arrays are indexed, a scalar only
/// exists at index 0, and out-of-bounds yields `None`.
fn value_at(value: &Value, index: usize) -> Option<&Value> {
    // ---
    match value {
        Value::Array(items) => items.get(index),
        Value::Null => None,
        scalar => (index == 0).then_some(scalar),
    }
}

fn convert(raw: Option<&Value>, kind: MetricKind) -> Result<MetricValue> {
    // ---
    let value = match raw {
        None | Some(Value::Null) => return Ok(MetricValue::Null),
        Some(value) => value,
    };

    let converted = match kind {
        MetricKind::Float => value.as_f64().map(MetricValue::Float),
        MetricKind::Integer => as_integer(value).map(MetricValue::Integer),
        MetricKind::Flag => match value {
            Value::Bool(b) => Some(MetricValue::Flag(*b)),
            other => match as_integer(other) {
                Some(0) => Some(MetricValue::Flag(false)),
                Some(1) => Some(MetricValue::Flag(true)),
                _ => None,
            },
        },
        MetricKind::Timestamp => return parse_time_value(value).map(MetricValue::Timestamp),
    };

    converted.ok_or_else(|| anyhow!("Expected {:?} value, got {}", kind, value))
}

/// Integers may be serialized as integral floats (`3.0`).
fn as_integer(value: &Value) -> Option<i32> {
    // ---
    if let Some(i) = value.as_i64() {
        return i32::try_from(i).ok();
    }
    value
        .as_f64()
        .filter(|f| f.fract() == 0.0 && *f >= i32::MIN as f64 && *f <= i32::MAX as f64)
        .map(|f| f as i32)
}

fn parse_time_value(value: &Value) -> Result<DateTime<Utc>> {
    // ---
    match value {
        Value::String(s) => parse_timestamp(s),
        other => bail!("Expected a timestamp string, got {other}"),
    }
}

/// Parse the timestamp forms the forecast API emits.
///
/// Requests pin `timezone=GMT`, so offset-less values are read as UTC. A bare
/// date is midnight UTC of that day.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    // ---
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    bail!("Unrecognized timestamp '{s}'")
}
