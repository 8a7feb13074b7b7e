//! Commune listing from the French geocoding API (`geo.api.gouv.fr`).

use anyhow::Result;
use reqwest::Client;
use serde::Deserialize;

use crate::models::NewCity;

// ---

#[derive(Debug, Deserialize)]
pub struct Commune {
    // ---
    pub nom: String,
    pub centre: Option<GeoPoint>,
}

/// GeoJSON point: `coordinates` is `[longitude, latitude]`.
#[derive(Debug, Deserialize)]
pub struct GeoPoint {
    // ---
    pub coordinates: (f64, f64),
}

pub async fn fetch(client: &Client, url: &str) -> Result<Vec<NewCity>> {
    // ---
    let communes: Vec<Commune> = super::fetch_json(client, url).await?;
    Ok(to_cities(communes))
}

/// Communes without a centre cannot be placed and are skipped.
pub fn to_cities(communes: Vec<Commune>) -> Vec<NewCity> {
    // ---
    communes
        .into_iter()
        .filter_map(|commune| match commune.centre {
            Some(GeoPoint {
                coordinates: (longitude, latitude),
            }) => Some(NewCity {
                name: commune.nom,
                latitude,
                longitude,
            }),
            None => {
                tracing::debug!("Skipping commune '{}' without centre", commune.nom);
                None
            }
        })
        .collect()
}
