//! Publishing OBS-built Vagrant boxes to Vagrant Cloud.
//!
//! Two modes: upload (the default) ships artifacts that Vagrant Cloud does
//! not have yet and hosts them there; link wipes the box's versions and
//! recreates them pointing at the OBS download URLs instead.

use futures::StreamExt;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::apis::obs::{fetch_box_description, BoxDescription, BoxProvider, BoxVersion};
use crate::apis::vagrant_cloud::{CloudBox, CloudVersion, VagrantCloudClient};
use crate::common::error::Result;

#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub organization: String,
    /// Alternative name for the box, overriding the published one.
    pub new_name: Option<String>,
    /// Restrict uploads to a single provider.
    pub provider: Option<String>,
    /// Link to the OBS URLs instead of uploading.
    pub link: bool,
}

pub async fn run_publish(url: &str, token: String, options: PublishOptions) -> Result<()> {
    let api = VagrantCloudClient::new(token)?;

    let mut description = fetch_box_description(api.http(), url).await?;
    if let Some(name) = &options.new_name {
        description.name = name.clone();
    }

    if options.link {
        link_box(&api, &description, &options.organization).await
    } else {
        upload_missing(
            &api,
            &description,
            &options.organization,
            options.provider.as_deref(),
        )
        .await
    }
}

/// Fetch the box, creating it (public, with the published descriptions)
/// when the organization does not have it yet.
async fn ensure_box(
    api: &VagrantCloudClient,
    description: &BoxDescription,
    organization: &str,
) -> Result<CloudBox> {
    match api.get_box(organization, &description.name).await? {
        Some(existing) => Ok(existing),
        None => {
            info!("creating box {}/{}", organization, description.name);
            api.create_box(
                organization,
                &description.name,
                description.short_description.as_deref(),
                description.description.as_deref(),
            )
            .await
        }
    }
}

/// Replace whatever versions exist with links to the OBS downloads.
async fn link_box(
    api: &VagrantCloudClient,
    description: &BoxDescription,
    organization: &str,
) -> Result<()> {
    let existing = ensure_box(api, description, organization).await?;

    for version in &existing.versions {
        api.delete_version(organization, &description.name, &version.version)
            .await?;
    }

    for version in &description.versions {
        api.create_version(
            organization,
            &description.name,
            &version.version,
            version.description.as_deref(),
        )
        .await?;
        for provider in &version.providers {
            api.create_provider(
                organization,
                &description.name,
                &version.version,
                &provider.name,
                Some(&provider.url),
            )
            .await?;
        }
        api.release_version(organization, &description.name, &version.version)
            .await?;
        info!(
            "linked {}/{} {}",
            organization, description.name, version.version
        );
    }
    Ok(())
}

/// Providers of `version` that Vagrant Cloud does not have yet, optionally
/// restricted to a single provider name.
fn missing_providers<'a>(
    version: &'a BoxVersion,
    existing: Option<&CloudVersion>,
    only: Option<&str>,
) -> Vec<&'a BoxProvider> {
    version
        .providers
        .iter()
        .filter(|provider| {
            existing.map_or(true, |v| {
                !v.providers.iter().any(|p| p.name == provider.name)
            })
        })
        .filter(|provider| only.map_or(true, |only| provider.name == only))
        .collect()
}

/// Upload every provider artifact Vagrant Cloud is missing, then release
/// any version that received one.
async fn upload_missing(
    api: &VagrantCloudClient,
    description: &BoxDescription,
    organization: &str,
    only: Option<&str>,
) -> Result<()> {
    let existing = ensure_box(api, description, organization).await?;

    for version in &description.versions {
        let current = existing
            .versions
            .iter()
            .find(|v| v.version == version.version);
        let released = current.map_or(false, CloudVersion::released);

        if current.is_none() {
            api.create_version(
                organization,
                &description.name,
                &version.version,
                version.description.as_deref(),
            )
            .await?;
        }

        let mut provider_added = false;
        for provider in missing_providers(version, current, only) {
            api.create_provider(
                organization,
                &description.name,
                &version.version,
                &provider.name,
                None,
            )
            .await?;

            let artifact = download_artifact(api.http(), &provider.url).await?;
            api.upload_provider(
                organization,
                &description.name,
                &version.version,
                &provider.name,
                artifact.path(),
            )
            .await?;
            info!(
                "uploaded {} {} provider {}",
                description.name, version.version, provider.name
            );
            provider_added = true;
        }

        if provider_added && !released {
            api.release_version(organization, &description.name, &version.version)
                .await?;
        }
    }
    Ok(())
}

/// Stream a box artifact to a temporary file.
async fn download_artifact(client: &reqwest::Client, url: &str) -> Result<NamedTempFile> {
    let tmp = NamedTempFile::new()?;
    let mut file = tokio::fs::File::create(tmp.path()).await?;

    let response = client.get(url).send().await?.error_for_status()?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;
    Ok(tmp)
}
