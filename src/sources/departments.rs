//! Static department metadata document.
//!
//! Expected shape: a JSON array of objects with a code, a name and the
//! coordinates of the department's reference point. Field names used by the
//! common public datasets (`num_dep`, `dep_name`, `nom`, `lat`, `lng`, ...)
//! are accepted, see [`NewDepartment`].

use anyhow::{bail, Result};
use reqwest::Client;

use crate::models::NewDepartment;

// ---

pub async fn fetch(client: &Client, url: &str) -> Result<Vec<NewDepartment>> {
    // ---
    let departments: Vec<NewDepartment> = super::fetch_json(client, url).await?;
    check_unique_codes(&departments)?;
    Ok(departments)
}

/// Two entries sharing a code would make the document ambiguous: only the
/// first would ever be stored.
pub(crate) fn check_unique_codes(departments: &[NewDepartment]) -> Result<()> {
    // ---
    let mut seen = std::collections::HashSet::new();
    for department in departments {
        if !seen.insert(department.code.as_str()) {
            bail!("Department code {} appears twice", department.code);
        }
    }
    Ok(())
}
