//! Release metadata and the GitHub Releases API client.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::UpdateConfig;
use crate::error::{UpdateError, UpdateResult};

/// A downloadable file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    /// File name as published
    pub name: String,
    /// Direct download URL
    pub download_url: String,
}

/// A tagged, timestamped release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDescriptor {
    /// Version string (the release tag)
    pub version: String,
    /// Publish timestamp
    pub published_at: DateTime<Utc>,
    /// Assets in publication order
    pub assets: Vec<AssetDescriptor>,
}

/// Source of release listings for a repository.
#[async_trait]
pub trait ReleaseLister: Send + Sync {
    /// List all published releases of `repo` (`owner/name`).
    async fn list_releases(&self, repo: &str) -> UpdateResult<Vec<ReleaseDescriptor>>;
}

/// Byte transport for asset downloads.
#[async_trait]
pub trait AssetDownloader: Send + Sync {
    /// Fetch the full body at `url`.
    async fn download(&self, url: &str) -> UpdateResult<Vec<u8>>;
}

#[derive(Debug, Deserialize)]
struct GithubRelease {
    tag_name: String,
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    assets: Vec<GithubAsset>,
}

#[derive(Debug, Deserialize)]
struct GithubAsset {
    name: String,
    browser_download_url: String,
}

impl GithubRelease {
    /// Drafts carry no publish date and are not installable.
    fn into_descriptor(self) -> Option<ReleaseDescriptor> {
        let published_at = self.published_at?;
        Some(ReleaseDescriptor {
            version: self.tag_name,
            published_at,
            assets: self
                .assets
                .into_iter()
                .map(|a| AssetDescriptor {
                    name: a.name,
                    download_url: a.browser_download_url,
                })
                .collect(),
        })
    }
}

/// Client for the GitHub Releases REST API.
#[derive(Clone)]
pub struct GithubClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl GithubClient {
    /// Create a client with the default configuration.
    pub fn new() -> UpdateResult<Self> {
        Self::from_config(&UpdateConfig::default())
    }

    /// Create a client from config. The bearer token is read once from the
    /// configured environment variable.
    pub fn from_config(config: &UpdateConfig) -> UpdateResult<Self> {
        let mut builder = Client::builder().user_agent(config.user_agent.as_str());
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty());

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Replace the bearer token.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.trim().is_empty());
        self
    }

    fn releases_url(&self, repo: &str) -> UpdateResult<String> {
        let repo = repo.trim();
        let valid = matches!(
            repo.split_once('/'),
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/')
        );
        if !valid {
            return Err(UpdateError::InvalidRepository {
                repo: repo.to_string(),
            });
        }

        Ok(format!("{}/repos/{}/releases?per_page=100", self.base_url, repo))
    }
}

#[async_trait]
impl ReleaseLister for GithubClient {
    async fn list_releases(&self, repo: &str) -> UpdateResult<Vec<ReleaseDescriptor>> {
        let url = self.releases_url(repo)?;
        tracing::debug!("Listing releases from {}", url);

        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(UpdateError::ServerError {
                status: status.as_u16(),
                message,
            });
        }

        let releases: Vec<GithubRelease> = response.json().await?;
        Ok(releases
            .into_iter()
            .filter_map(GithubRelease::into_descriptor)
            .collect())
    }
}

#[async_trait]
impl AssetDownloader for GithubClient {
    async fn download(&self, url: &str) -> UpdateResult<Vec<u8>> {
        tracing::debug!("Downloading {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::ServerError {
                status: status.as_u16(),
                message: format!("Download of {} failed", url),
            });
        }

        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}

/// Serves a single local file as the only asset of a synthetic release.
///
/// Lets a host exercise the full swap and restart path offline.
#[derive(Debug, Clone)]
pub struct LocalAssetSource {
    path: PathBuf,
    version: String,
}

impl LocalAssetSource {
    pub fn new(path: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            version: version.into(),
        }
    }

    /// Asset name published for the local file (its file name).
    pub fn asset_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Synthetic download URL for the local file.
    pub fn download_url(&self) -> String {
        format!("file://{}", self.path.display())
    }
}

#[async_trait]
impl ReleaseLister for LocalAssetSource {
    async fn list_releases(&self, _repo: &str) -> UpdateResult<Vec<ReleaseDescriptor>> {
        Ok(vec![ReleaseDescriptor {
            version: self.version.clone(),
            published_at: Utc::now() - Duration::days(1),
            assets: vec![AssetDescriptor {
                name: self.asset_name(),
                download_url: self.download_url(),
            }],
        }])
    }
}

#[async_trait]
impl AssetDownloader for LocalAssetSource {
    async fn download(&self, url: &str) -> UpdateResult<Vec<u8>> {
        if url != self.download_url() {
            return Err(UpdateError::ServerError {
                status: 404,
                message: format!("{} is not served by the local asset source", url),
            });
        }
        Ok(tokio::fs::read(&self.path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_releases_url() {
        let client = GithubClient::new().unwrap();
        assert_eq!(
            client.releases_url("owner/repo").unwrap(),
            "https://api.github.com/repos/owner/repo/releases?per_page=100"
        );
    }

    #[test]
    fn test_releases_url_rejects_bad_repo() {
        let client = GithubClient::new().unwrap();
        for repo in ["", "owner", "owner/", "/repo", "a/b/c"] {
            assert!(matches!(
                client.releases_url(repo),
                Err(UpdateError::InvalidRepository { .. })
            ));
        }
    }

    #[test]
    fn test_draft_release_is_skipped() {
        let raw = r#"[
            {"tag_name": "v2.0.0", "published_at": null, "assets": []},
            {"tag_name": "v1.0.0", "published_at": "2024-01-02T03:04:05Z",
             "assets": [{"name": "app.zip", "browser_download_url": "https://x/app.zip"}]}
        ]"#;
        let releases: Vec<GithubRelease> = serde_json::from_str(raw).unwrap();
        let descriptors: Vec<_> = releases
            .into_iter()
            .filter_map(GithubRelease::into_descriptor)
            .collect();

        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].version, "v1.0.0");
        assert_eq!(descriptors[0].assets[0].download_url, "https://x/app.zip");
    }

    #[tokio::test]
    async fn test_local_asset_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app-local.exe");
        std::fs::write(&path, b"payload").unwrap();

        let source = LocalAssetSource::new(&path, "v9.9.9");
        let releases = source.list_releases("ignored/repo").await.unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].assets[0].name, "app-local.exe");

        let bytes = source
            .download(&releases[0].assets[0].download_url)
            .await
            .unwrap();
        assert_eq!(bytes, b"payload");

        assert!(source.download("https://elsewhere/file").await.is_err());
    }
}
