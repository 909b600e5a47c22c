//! Update manager - main API for update operations.

use std::path::Path;
use std::sync::Arc;

use crate::api::{AssetDownloader, GithubClient, ReleaseLister};
use crate::config::UpdateConfig;
use crate::download::fetch_payload;
use crate::error::{UpdateError, UpdateResult};
use crate::handoff::HandoffState;
use crate::install::{ExecutablePaths, ExecutableSwapper, FileOperator, OsFileOperator};
use crate::recovery::{self, RecoveryOutcome};
use crate::resolve::{self, AssetFilter, Resolution, ResolvedUpdate};
use crate::restart::{ProcessLauncher, Restarted, Restarter, TokioLauncher};

/// Outcome of an update operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Already on latest version
    AlreadyLatest { version: String },
    /// New executable is in place; the old one sits at `paths.backup`
    Updated {
        from: String,
        to: String,
        paths: ExecutablePaths,
    },
}

/// Manager for update operations.
///
/// Runs one update at a time: callers must not drive two pipelines
/// concurrently against the same executable.
pub struct UpdateManager {
    config: UpdateConfig,
    lister: Arc<dyn ReleaseLister>,
    downloader: Arc<dyn AssetDownloader>,
    files: Arc<dyn FileOperator>,
    restarter: Restarter,
}

/// Builder wiring the manager's collaborators.
pub struct UpdateManagerBuilder {
    config: UpdateConfig,
    lister: Option<Arc<dyn ReleaseLister>>,
    downloader: Option<Arc<dyn AssetDownloader>>,
    files: Option<Arc<dyn FileOperator>>,
    launcher: Option<Arc<dyn ProcessLauncher>>,
}

impl UpdateManagerBuilder {
    pub fn lister(mut self, lister: Arc<dyn ReleaseLister>) -> Self {
        self.lister = Some(lister);
        self
    }

    pub fn downloader(mut self, downloader: Arc<dyn AssetDownloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    /// Use one collaborator for both listing and downloading.
    pub fn source<S>(self, source: S) -> Self
    where
        S: ReleaseLister + AssetDownloader + 'static,
    {
        let source = Arc::new(source);
        self.lister(source.clone()).downloader(source)
    }

    pub fn files(mut self, files: Arc<dyn FileOperator>) -> Self {
        self.files = Some(files);
        self
    }

    pub fn launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Fill missing collaborators with the GitHub client, the real
    /// filesystem and `tokio::process`.
    pub fn build(self) -> UpdateResult<UpdateManager> {
        let (lister, downloader) = match (self.lister, self.downloader) {
            (Some(lister), Some(downloader)) => (lister, downloader),
            (lister, downloader) => {
                let client = Arc::new(GithubClient::from_config(&self.config)?);
                (
                    lister.unwrap_or_else(|| client.clone()),
                    downloader.unwrap_or(client),
                )
            }
        };

        let launcher = self.launcher.unwrap_or_else(|| Arc::new(TokioLauncher));
        let restarter = Restarter::new(
            launcher,
            self.config.restart_policy,
            self.config.ready_timeout(),
        );

        Ok(UpdateManager {
            files: self.files.unwrap_or_else(|| Arc::new(OsFileOperator)),
            config: self.config,
            lister,
            downloader,
            restarter,
        })
    }
}

impl UpdateManager {
    /// Create a new update manager with the config from the standard location.
    pub fn new() -> UpdateResult<Self> {
        Self::builder(UpdateConfig::load()).build()
    }

    pub fn builder(config: UpdateConfig) -> UpdateManagerBuilder {
        UpdateManagerBuilder {
            config,
            lister: None,
            downloader: None,
            files: None,
            launcher: None,
        }
    }

    /// Get the current configuration.
    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    /// Determine the asset to install from the latest release of `repo`.
    pub async fn resolve_latest(
        &self,
        repo: &str,
        current_version: &str,
        filter: &AssetFilter,
    ) -> UpdateResult<Resolution> {
        resolve::resolve_latest(self.lister.as_ref(), repo, current_version, filter).await
    }

    /// Download `update` and swap it over `running_exe`.
    ///
    /// Arguments are validated before anything is downloaded or written.
    pub async fn fetch_and_swap(
        &self,
        update: &ResolvedUpdate,
        running_exe: &Path,
    ) -> UpdateResult<ExecutablePaths> {
        if !update.is_valid() {
            return Err(UpdateError::LatestNotValid);
        }
        if running_exe.as_os_str().is_empty() {
            return Err(UpdateError::RunningExePathIsEmpty);
        }
        if !self.files.exists(running_exe).await {
            return Err(UpdateError::RunningExeNotFound {
                path: running_exe.to_path_buf(),
            });
        }

        tracing::info!("Installing {} ({})", update.asset_name, update.version);
        let payload = fetch_payload(self.downloader.as_ref(), update).await?;

        let mut swapper =
            ExecutableSwapper::new(self.files.as_ref(), ExecutablePaths::new(running_exe));
        swapper.swap(&payload).await?;
        Ok(swapper.paths().clone())
    }

    /// Full update flow without the restart: resolve -> fetch -> swap.
    pub async fn self_update(
        &self,
        repo: &str,
        current_version: &str,
        asset_pattern: &str,
        running_exe: &Path,
    ) -> UpdateResult<UpdateOutcome> {
        let filter = AssetFilter::new(asset_pattern)?;

        let update = match self.resolve_latest(repo, current_version, &filter).await? {
            Resolution::UpToDate { version } => {
                tracing::info!("Already on latest version {}", version);
                return Ok(UpdateOutcome::AlreadyLatest { version });
            }
            Resolution::Available(update) => update,
        };

        let paths = self.fetch_and_swap(&update, running_exe).await?;
        Ok(UpdateOutcome::Updated {
            from: current_version.to_string(),
            to: update.version,
            paths,
        })
    }

    /// Full update flow ending in a restart into the new executable.
    ///
    /// On success the current process exits, so this only returns
    /// `AlreadyLatest` or an error.
    pub async fn self_update_and_restart(
        &self,
        repo: &str,
        current_version: &str,
        asset_pattern: &str,
        running_exe: &Path,
    ) -> UpdateResult<UpdateOutcome> {
        match self
            .self_update(repo, current_version, asset_pattern, running_exe)
            .await?
        {
            UpdateOutcome::Updated { .. } => {
                let never = self.restarter.restart_and_handoff(running_exe).await?;
                match never {}
            }
            outcome => Ok(outcome),
        }
    }

    /// Spawn the executable with the handoff environment without exiting.
    pub async fn restart(&self, running_exe: &Path) -> UpdateResult<Restarted> {
        self.restarter.restart(running_exe).await
    }

    /// Remove the backup left by the update that started this process.
    pub async fn clean_up_after_update(
        &self,
        running_exe: &Path,
        handoff: &HandoffState,
    ) -> RecoveryOutcome {
        recovery::clean_up_after_update(
            self.files.as_ref(),
            handoff,
            std::process::id(),
            running_exe,
            self.config.cleanup_retry(),
        )
        .await
    }

    /// Startup hook: signal a supervising predecessor, then clean up.
    pub async fn finish_update(&self, running_exe: &Path) -> RecoveryOutcome {
        recovery::finish_update_with(
            self.files.as_ref(),
            &HandoffState::from_env(),
            running_exe,
            self.config.cleanup_retry(),
        )
        .await
    }

    /// Put the backup back in place of `running_exe`.
    pub async fn restore_backup(&self, running_exe: &Path) -> UpdateResult<()> {
        crate::install::restore_backup(self.files.as_ref(), &ExecutablePaths::new(running_exe)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_manager_creation() {
        let manager = UpdateManager::builder(UpdateConfig::default()).build();
        assert!(manager.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_pattern_fails_before_listing() {
        let manager = UpdateManager::builder(UpdateConfig {
            api_base_url: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        })
        .build()
        .unwrap();

        let err = manager
            .self_update("owner/repo", "v1.0.0", "app-(", Path::new("/opt/app"))
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::InvalidPattern { .. }));
    }
}
