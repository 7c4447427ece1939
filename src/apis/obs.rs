//! The box description document published on OBS.
//!
//! The build service publishes one JSON file per box next to the built
//! images; it names the box and lists every version with its providers and
//! download URLs.

use serde::Deserialize;

use crate::common::error::Result;

#[derive(Debug, Clone, Deserialize)]
pub struct BoxDescription {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub short_description: Option<String>,
    #[serde(default)]
    pub versions: Vec<BoxVersion>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoxVersion {
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub providers: Vec<BoxProvider>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoxProvider {
    pub name: String,
    pub url: String,
}

pub async fn fetch_box_description(
    client: &reqwest::Client,
    url: &str,
) -> Result<BoxDescription> {
    let response = client.get(url).send().await?.error_for_status()?;
    Ok(response.json().await?)
}
