//! Typed client for the Vagrant Cloud API v2.

use std::path::Path;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::common::error::{MetricsError, Result};

const API_BASE: &str = "https://app.vagrantup.com/api/v2";

#[derive(Debug, Clone, Deserialize)]
pub struct CloudBox {
    pub name: String,
    #[serde(default)]
    pub versions: Vec<CloudVersion>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudVersion {
    pub version: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub providers: Vec<CloudProvider>,
}

impl CloudVersion {
    pub fn released(&self) -> bool {
        self.status == "active"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudProvider {
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct UploadTarget {
    upload_path: String,
}

pub struct VagrantCloudClient {
    client: reqwest::Client,
    base: String,
    token: String,
}

impl VagrantCloudClient {
    pub fn new(token: String) -> Result<Self> {
        // Box downloads bounce through the OBS redirector a few times.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(20))
            .build()?;
        Ok(VagrantCloudClient {
            client,
            base: API_BASE.to_string(),
            token,
        })
    }

    #[cfg(test)]
    fn with_base(token: String, base: String) -> Self {
        VagrantCloudClient {
            client: reqwest::Client::new(),
            base,
            token,
        }
    }

    /// The plain HTTP client, for fetching documents and artifacts.
    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.header(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {}", self.token),
        )
    }

    async fn expect_success(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(MetricsError::VagrantCloud {
            message: format!("{} failed with {}: {}", what, status, body),
        })
    }

    pub async fn get_box(&self, organization: &str, name: &str) -> Result<Option<CloudBox>> {
        let url = self.url(&format!("box/{}/{}", organization, name));
        let response = self.authorized(self.client.get(&url)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::expect_success(response, "reading box").await?;
        Ok(Some(response.json().await?))
    }

    pub async fn create_box(
        &self,
        organization: &str,
        name: &str,
        short_description: Option<&str>,
        description: Option<&str>,
    ) -> Result<CloudBox> {
        let url = self.url("boxes");
        let body = json!({
            "box": {
                "username": organization,
                "name": name,
                "is_private": false,
                "short_description": short_description,
                "description": description,
            }
        });
        let response = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await?;
        let response = Self::expect_success(response, "creating box").await?;
        Ok(response.json().await?)
    }

    pub async fn create_version(
        &self,
        organization: &str,
        name: &str,
        version: &str,
        description: Option<&str>,
    ) -> Result<CloudVersion> {
        let url = self.url(&format!("box/{}/{}/versions", organization, name));
        let body = json!({
            "version": { "version": version, "description": description }
        });
        let response = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await?;
        let response = Self::expect_success(response, "creating version").await?;
        Ok(response.json().await?)
    }

    pub async fn delete_version(
        &self,
        organization: &str,
        name: &str,
        version: &str,
    ) -> Result<()> {
        let url = self.url(&format!("box/{}/{}/version/{}", organization, name, version));
        let response = self.authorized(self.client.delete(&url)).send().await?;
        Self::expect_success(response, "deleting version").await?;
        Ok(())
    }

    /// Create a provider; with `url` set the provider links to an external
    /// download instead of a hosted artifact.
    pub async fn create_provider(
        &self,
        organization: &str,
        name: &str,
        version: &str,
        provider: &str,
        url: Option<&str>,
    ) -> Result<()> {
        let endpoint = self.url(&format!(
            "box/{}/{}/version/{}/providers",
            organization, name, version
        ));
        let body = json!({ "provider": { "name": provider, "url": url } });
        let response = self
            .authorized(self.client.post(&endpoint))
            .json(&body)
            .send()
            .await?;
        Self::expect_success(response, "creating provider").await?;
        Ok(())
    }

    /// Upload a box artifact for an existing provider.
    pub async fn upload_provider(
        &self,
        organization: &str,
        name: &str,
        version: &str,
        provider: &str,
        artifact: &Path,
    ) -> Result<()> {
        let endpoint = self.url(&format!(
            "box/{}/{}/version/{}/provider/{}/upload",
            organization, name, version, provider
        ));
        let response = self.authorized(self.client.get(&endpoint)).send().await?;
        let response = Self::expect_success(response, "requesting upload target").await?;
        let target: UploadTarget = response.json().await?;
        debug!("uploading {} to {}", artifact.display(), target.upload_path);

        let file = tokio::fs::File::open(artifact).await?;
        let stream = tokio_util::io::ReaderStream::new(file);
        let response = self
            .client
            .put(&target.upload_path)
            .body(reqwest::Body::wrap_stream(stream))
            .send()
            .await?;
        Self::expect_success(response, "uploading artifact").await?;
        Ok(())
    }

    pub async fn release_version(
        &self,
        organization: &str,
        name: &str,
        version: &str,
    ) -> Result<()> {
        let url = self.url(&format!(
            "box/{}/{}/version/{}/release",
            organization, name, version
        ));
        let response = self.authorized(self.client.put(&url)).send().await?;
        Self::expect_success(response, "releasing version").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_release_state_follows_status() {
        let version: CloudVersion =
            serde_json::from_str(r#"{"version": "1.0", "status": "active"}"#).unwrap();
        assert!(version.released());

        let version: CloudVersion =
            serde_json::from_str(r#"{"version": "1.0", "status": "unreleased"}"#).unwrap();
        assert!(!version.released());
    }

    #[test]
    fn box_decodes_with_nested_versions() {
        let json = r#"{
            "name": "Tumbleweed.x86_64",
            "versions": [
                {"version": "1.0", "status": "active",
                 "providers": [{"name": "libvirt"}]}
            ]
        }"#;
        let cloud_box: CloudBox = serde_json::from_str(json).unwrap();
        assert_eq!(cloud_box.versions[0].providers[0].name, "libvirt");
    }

    #[test]
    fn urls_nest_under_the_api_base() {
        let client = VagrantCloudClient::with_base("t".into(), "https://api.test/v2".into());
        assert_eq!(
            client.url("box/opensuse/Tumbleweed.x86_64"),
            "https://api.test/v2/box/opensuse/Tumbleweed.x86_64"
        );
    }
}
