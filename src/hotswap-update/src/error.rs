//! Error types for hotswap-update.

use std::path::PathBuf;
use thiserror::Error;

use crate::install::SwapStep;

/// Result type for update operations.
pub type UpdateResult<T> = std::result::Result<T, UpdateError>;

/// Errors that can occur during update operations.
#[derive(Debug, Error)]
pub enum UpdateError {
    // Network errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Release server returned error {status}: {message}")]
    ServerError { status: u16, message: String },

    // Resolution errors
    #[error("Invalid repository identifier '{repo}', expected 'owner/name'")]
    InvalidRepository { repo: String },

    #[error("Invalid asset pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("No releases found for {repo}")]
    NoReleasesFound { repo: String },

    #[error("No assets in release {version} match {pattern}")]
    NoAssetsFound { version: String, pattern: String },

    #[error("Multiple assets in release {version} match {pattern}: {}", matches.join(", "))]
    AmbiguousAsset {
        version: String,
        pattern: String,
        matches: Vec<String>,
    },

    // Payload errors
    #[error("Archive format error: {message}")]
    ArchiveFormat { message: String },

    // Argument errors
    #[error("Resolved update is not valid (empty asset name, URL or version)")]
    LatestNotValid,

    #[error("Running executable path is empty")]
    RunningExePathIsEmpty,

    #[error("Running executable not found: {path}")]
    RunningExeNotFound { path: PathBuf },

    // Swap errors
    #[error("Filesystem error while {step} ({path}): {source}")]
    Filesystem {
        step: SwapStep,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Restart errors
    #[error("Restart failed: {message}")]
    RestartFailed { message: String },

    // Recovery errors
    #[error("Backup {path} still locked after {attempts} attempts: {source}")]
    BackupLocked {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    // Plumbing
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to load config: {message}")]
    ConfigError { message: String },
}

impl UpdateError {
    /// Check if this error is a network error.
    pub fn is_network_error(&self) -> bool {
        matches!(self, Self::Network(_) | Self::ServerError { .. })
    }

    /// Check if this error stems from bad caller input or empty upstream data.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRepository { .. }
                | Self::InvalidPattern { .. }
                | Self::NoReleasesFound { .. }
                | Self::NoAssetsFound { .. }
                | Self::AmbiguousAsset { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err = UpdateError::ServerError {
            status: 502,
            message: "bad gateway".to_string(),
        };
        assert!(err.is_network_error());
        assert!(!err.is_configuration_error());

        let err = UpdateError::AmbiguousAsset {
            version: "v1.0.0".to_string(),
            pattern: "^app.*$".to_string(),
            matches: vec!["app-a".to_string(), "app-b".to_string()],
        };
        assert!(err.is_configuration_error());
        assert_eq!(
            err.to_string(),
            "Multiple assets in release v1.0.0 match ^app.*$: app-a, app-b"
        );
    }

    #[test]
    fn test_filesystem_error_names_step() {
        let err = UpdateError::Filesystem {
            step: SwapStep::Backup,
            path: PathBuf::from("/opt/app"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().starts_with("Filesystem error while backing up"));
    }
}
