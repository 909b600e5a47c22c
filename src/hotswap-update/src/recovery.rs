//! Post-restart cleanup run by the successor process.

use std::io;
use std::path::Path;

use crate::config::CleanupRetry;
use crate::error::{UpdateError, UpdateResult};
use crate::handoff::HandoffState;
use crate::install::{ExecutablePaths, FileOperator, OsFileOperator};

/// What startup recovery did.
#[derive(Debug)]
pub enum RecoveryOutcome {
    /// The process was not started by an update.
    NotAnUpdate,
    /// The handoff names this very process as its predecessor; nothing removed.
    SamePid,
    /// The backup was removed (or already gone).
    Cleaned,
    /// Backup removal failed. The application keeps running.
    CleanupFailed(UpdateError),
}

impl RecoveryOutcome {
    pub fn is_update_continuation(&self) -> bool {
        matches!(self, Self::Cleaned | Self::CleanupFailed(_))
    }
}

/// Delete `live`'s backup, waiting for the predecessor to release it.
///
/// The predecessor may still hold the file open while it exits, so failed
/// attempts are retried with a linear backoff. A backup that does not exist
/// counts as removed.
pub async fn remove_backup(
    files: &dyn FileOperator,
    live: &Path,
    retry: CleanupRetry,
) -> UpdateResult<()> {
    let backup = ExecutablePaths::new(live).backup;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match files.remove_file(&backup).await {
            Ok(()) => {
                tracing::info!("Removed backup {} (attempt {})", backup.display(), attempt);
                return Ok(());
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("No backup at {}", backup.display());
                return Ok(());
            }
            Err(e) if attempt >= retry.attempts => {
                return Err(UpdateError::BackupLocked {
                    path: backup,
                    attempts: attempt,
                    source: e,
                });
            }
            Err(e) => {
                let delay = retry.delay_after(attempt);
                tracing::warn!(
                    "Backup {} not removable yet ({}), retrying in {:?}",
                    backup.display(),
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Remove the backup left by the update that started this process.
pub async fn clean_up_after_update(
    files: &dyn FileOperator,
    handoff: &HandoffState,
    own_pid: u32,
    live: &Path,
    retry: CleanupRetry,
) -> RecoveryOutcome {
    if !handoff.update_finished {
        return RecoveryOutcome::NotAnUpdate;
    }
    if !handoff.is_continuation(own_pid) {
        tracing::warn!("Handoff names this process ({}) as its predecessor", own_pid);
        return RecoveryOutcome::SamePid;
    }

    match remove_backup(files, live, retry).await {
        Ok(()) => RecoveryOutcome::Cleaned,
        Err(e) => {
            tracing::warn!("Post-update cleanup failed: {}", e);
            RecoveryOutcome::CleanupFailed(e)
        }
    }
}

/// Startup hook for hosts: signal a supervising predecessor, then clean up.
///
/// Must run early in `main` of every binary that can be installed through
/// a supervised restart, otherwise the predecessor times out.
pub async fn finish_update(live: &Path) -> RecoveryOutcome {
    finish_update_with(&OsFileOperator, &HandoffState::from_env(), live, CleanupRetry::default()).await
}

/// [`finish_update`] with explicit collaborators.
pub async fn finish_update_with(
    files: &dyn FileOperator,
    handoff: &HandoffState,
    live: &Path,
    retry: CleanupRetry,
) -> RecoveryOutcome {
    let own_pid = std::process::id();
    if handoff.is_continuation(own_pid) {
        if let Err(e) = handoff.signal_ready().await {
            tracing::warn!("Failed to signal readiness: {}", e);
        }
    }
    clean_up_after_update(files, handoff, own_pid, live, retry).await
}
