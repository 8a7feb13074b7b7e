//! Built-in demo rows: a handful of world cities and the first four French
//! departments. Seeding them needs no network access.

use crate::models::{NewCity, NewDepartment};

// ---

/// (name, latitude, longitude)
const CITIES: &[(&str, f64, f64)] = &[
    ("Paris", 48.8566, 2.3522),
    ("London", 51.5074, -0.1278),
    ("New York", 40.7128, -74.0060),
    ("Tokyo", 35.6762, 139.6503),
    ("Berlin", 52.5200, 13.4050),
];

/// (code, name, latitude, longitude) of each department's centre.
const DEPARTMENTS: &[(&str, &str, f64, f64)] = &[
    ("01", "Ain", 46.0994, 5.3489),
    ("02", "Aisne", 49.5598, 3.5610),
    ("03", "Allier", 46.3936, 3.1883),
    ("04", "Alpes-de-Haute-Provence", 44.1076, 6.2376),
];

pub fn cities() -> Vec<NewCity> {
    // ---
    CITIES
        .iter()
        .map(|&(name, latitude, longitude)| NewCity {
            name: name.to_string(),
            latitude,
            longitude,
        })
        .collect()
}

pub fn departments() -> Vec<NewDepartment> {
    // ---
    DEPARTMENTS
        .iter()
        .map(|&(code, name, latitude, longitude)| NewDepartment {
            code: code.to_string(),
            name: name.to_string(),
            latitude,
            longitude,
        })
        .collect()
}
