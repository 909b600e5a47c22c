//! Update configuration types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{UpdateError, UpdateResult};

/// How the old process hands control to the freshly swapped executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Spawn, wait for the child's ready signal, then exit (default)
    #[default]
    Supervised,
    /// Spawn and exit immediately, even if the spawn reported an error
    FireAndForget,
}

impl RestartPolicy {
    /// Get the policy as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Supervised => "supervised",
            Self::FireAndForget => "fire_and_forget",
        }
    }
}

impl std::fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry schedule for removing the backup file after a restart.
///
/// After failed attempt `n` (1-based) the cleanup sleeps `n * backoff`,
/// except after the last attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupRetry {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for CleanupRetry {
    fn default() -> Self {
        Self {
            attempts: 10,
            backoff: Duration::from_millis(100),
        }
    }
}

impl CleanupRetry {
    /// Delay to wait after the given failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

/// User configuration for updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Base URL of the GitHub REST API
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Environment variable holding an optional bearer token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// User-Agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds; requests block indefinitely when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,

    /// Restart handoff policy
    #[serde(default)]
    pub restart_policy: RestartPolicy,

    /// Seconds a supervised restart waits for the child's ready signal
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,

    /// Backup removal attempts after a restart
    #[serde(default = "default_cleanup_attempts")]
    pub cleanup_attempts: u32,

    /// Backoff step between backup removal attempts, in milliseconds
    #[serde(default = "default_cleanup_backoff")]
    pub cleanup_backoff_ms: u64,
}

fn default_api_base_url() -> String {
    crate::GITHUB_API_URL.to_string()
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_user_agent() -> String {
    crate::USER_AGENT.to_string()
}

fn default_ready_timeout() -> u64 {
    10
}

fn default_cleanup_attempts() -> u32 {
    10
}

fn default_cleanup_backoff() -> u64 {
    100
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            token_env: default_token_env(),
            user_agent: default_user_agent(),
            request_timeout_secs: None,
            restart_policy: RestartPolicy::Supervised,
            ready_timeout_secs: default_ready_timeout(),
            cleanup_attempts: default_cleanup_attempts(),
            cleanup_backoff_ms: default_cleanup_backoff(),
        }
    }
}

impl UpdateConfig {
    /// Standard config location (~/.hotswap/update.json).
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".hotswap").join("update.json"))
    }

    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let Some(path) = Self::default_path().filter(|p| p.exists()) else {
            return Self::default();
        };

        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring unreadable config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load config from an explicit file.
    pub fn load_from(path: &Path) -> UpdateResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| UpdateError::ConfigError {
            message: format!("{}: {}", path.display(), e),
        })?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save config to an explicit file, creating parent directories.
    pub fn save_to(&self, path: &Path) -> UpdateResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Request timeout, if one is configured.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// How long a supervised restart waits for the ready signal.
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    /// Retry schedule for post-restart cleanup.
    pub fn cleanup_retry(&self) -> CleanupRetry {
        CleanupRetry {
            attempts: self.cleanup_attempts.max(1),
            backoff: Duration::from_millis(self.cleanup_backoff_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = UpdateConfig::default();
        assert_eq!(config.api_base_url, "https://api.github.com");
        assert_eq!(config.token_env, "GITHUB_TOKEN");
        assert_eq!(config.restart_policy, RestartPolicy::Supervised);
        assert!(config.request_timeout().is_none());
        assert_eq!(config.cleanup_retry(), CleanupRetry::default());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: UpdateConfig =
            serde_json::from_str(r#"{"restart_policy":"fire_and_forget","cleanup_attempts":3}"#)
                .unwrap();
        assert_eq!(config.restart_policy, RestartPolicy::FireAndForget);
        assert_eq!(config.cleanup_retry().attempts, 3);
        assert_eq!(config.ready_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("update.json");

        let config = UpdateConfig {
            request_timeout_secs: Some(30),
            ..Default::default()
        };
        config.save_to(&path).unwrap();

        let loaded = UpdateConfig::load_from(&path).unwrap();
        assert_eq!(loaded.request_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_delay_after_is_linear() {
        let retry = CleanupRetry::default();
        assert_eq!(retry.delay_after(1), Duration::from_millis(100));
        assert_eq!(retry.delay_after(3), Duration::from_millis(300));
    }
}
