//! Picks the single asset to install from a repository's latest release.

use regex::Regex;

use crate::api::{ReleaseDescriptor, ReleaseLister};
use crate::error::{UpdateError, UpdateResult};
use crate::version::{VersionComparison, compare_versions, version_order, versions_match};

/// Compiled asset-name pattern. Matches only when the whole name matches.
#[derive(Debug, Clone)]
pub struct AssetFilter {
    pattern: String,
    regex: Regex,
}

impl AssetFilter {
    pub fn new(pattern: &str) -> UpdateResult<Self> {
        let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|source| {
            UpdateError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            }
        })?;

        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// The pattern as supplied by the caller.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }
}

/// The unique asset selected for installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUpdate {
    pub asset_name: String,
    pub download_url: String,
    pub version: String,
}

impl ResolvedUpdate {
    /// All three fields must be non-empty for the update to be installable.
    pub fn is_valid(&self) -> bool {
        !self.asset_name.trim().is_empty()
            && !self.download_url.trim().is_empty()
            && !self.version.trim().is_empty()
    }

    pub fn is_archive(&self) -> bool {
        self.asset_name.to_ascii_lowercase().ends_with(".zip")
    }
}

/// Outcome of resolving the latest release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The latest release is the running version; nothing to install.
    UpToDate { version: String },
    /// A newer asset is available.
    Available(ResolvedUpdate),
}

/// Order releases newest first.
///
/// Releases sharing a publish timestamp are ordered by version (highest
/// first), then by raw tag descending, so the pick never depends on the order
/// the server returned them in.
pub fn sort_newest_first(releases: &mut [ReleaseDescriptor]) {
    releases.sort_by(|a, b| {
        b.published_at
            .cmp(&a.published_at)
            .then_with(|| version_order(&b.version, &a.version))
            .then_with(|| b.version.cmp(&a.version))
    });
}

/// Select the single asset of `release` matching `filter`.
pub fn select_asset(
    release: &ReleaseDescriptor,
    filter: &AssetFilter,
) -> UpdateResult<ResolvedUpdate> {
    let mut matches = release
        .assets
        .iter()
        .filter(|asset| filter.is_match(&asset.name));

    let Some(asset) = matches.next() else {
        return Err(UpdateError::NoAssetsFound {
            version: release.version.clone(),
            pattern: filter.pattern().to_string(),
        });
    };

    let rest: Vec<String> = matches.map(|a| a.name.clone()).collect();
    if !rest.is_empty() {
        let mut names = vec![asset.name.clone()];
        names.extend(rest);
        return Err(UpdateError::AmbiguousAsset {
            version: release.version.clone(),
            pattern: filter.pattern().to_string(),
            matches: names,
        });
    }

    Ok(ResolvedUpdate {
        asset_name: asset.name.clone(),
        download_url: asset.download_url.clone(),
        version: release.version.clone(),
    })
}

/// Resolve the asset to install from the latest release of `repo`.
pub async fn resolve_latest(
    lister: &dyn ReleaseLister,
    repo: &str,
    current_version: &str,
    filter: &AssetFilter,
) -> UpdateResult<Resolution> {
    let mut releases = lister.list_releases(repo).await?;
    if releases.is_empty() {
        return Err(UpdateError::NoReleasesFound {
            repo: repo.to_string(),
        });
    }

    sort_newest_first(&mut releases);
    let latest = &releases[0];
    tracing::debug!(
        "Latest release of {} is {} ({})",
        repo,
        latest.version,
        latest.published_at
    );

    if versions_match(&latest.version, current_version) {
        return Ok(Resolution::UpToDate {
            version: latest.version.clone(),
        });
    }

    if compare_versions(current_version, &latest.version) == VersionComparison::Newer {
        tracing::warn!(
            "Latest release {} sorts below running version {}; installing it anyway",
            latest.version,
            current_version
        );
    }

    select_asset(latest, filter).map(Resolution::Available)
}
