//! Replacement of the running executable on disk.
//!
//! For a live executable `P` the swap walks
//! `Fetched -> Staged -> BackedUp -> Swapped`:
//!
//! 1. write the payload to `P.new.temp`
//! 2. rename `P` to `P.old`
//! 3. rename `P.new.temp` to `P`
//!
//! Between steps 2 and 3 `P` does not exist. A crash in that window leaves the
//! application uninstalled until `P.old` is restored by hand (or through
//! [`restore_backup`]). Failures are returned as-is and the filesystem is left
//! exactly as the failing step left it; nothing is rolled back.

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{UpdateError, UpdateResult};

/// Suffix of the staged payload next to the live executable.
pub const STAGED_SUFFIX: &str = ".new.temp";

/// Suffix of the backup of the replaced executable.
pub const BACKUP_SUFFIX: &str = ".old";

/// Raw filesystem primitives used by the swapper and the post-restart cleanup.
#[async_trait]
pub trait FileOperator: Send + Sync {
    async fn exists(&self, path: &Path) -> bool;

    /// Write `data` to `path`, replacing any existing file, and mark it
    /// executable where the platform has such a notion.
    async fn write_executable(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    async fn remove_file(&self, path: &Path) -> io::Result<()>;
}

/// [`FileOperator`] backed by the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFileOperator;

#[async_trait]
impl FileOperator for OsFileOperator {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn write_executable(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        tokio::fs::write(path, data).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
        }

        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        tokio::fs::rename(from, to).await
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// The live executable and its two transient siblings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutablePaths {
    pub live: PathBuf,
    pub staged: PathBuf,
    pub backup: PathBuf,
}

impl ExecutablePaths {
    pub fn new(live: impl Into<PathBuf>) -> Self {
        let live = live.into();
        Self {
            staged: with_suffix(&live, STAGED_SUFFIX),
            backup: with_suffix(&live, BACKUP_SUFFIX),
            live,
        }
    }
}

/// Where a swap currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SwapState {
    Fetched,
    Staged,
    BackedUp,
    Swapped,
}

/// Filesystem step that can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapStep {
    /// Removing a backup left over by an earlier update
    ClearStaleBackup,
    /// `Fetched -> Staged`
    Stage,
    /// `Staged -> BackedUp`
    Backup,
    /// `BackedUp -> Swapped`
    Swap,
    /// Explicit restore of the backup over the live path
    Restore,
}

impl fmt::Display for SwapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ClearStaleBackup => "clearing stale backup",
            Self::Stage => "staging",
            Self::Backup => "backing up",
            Self::Swap => "swapping",
            Self::Restore => "restoring backup",
        })
    }
}

fn fs_error(step: SwapStep, path: &Path, source: io::Error) -> UpdateError {
    UpdateError::Filesystem {
        step,
        path: path.to_path_buf(),
        source,
    }
}

/// Stages a payload and swaps it over the live executable.
pub struct ExecutableSwapper<'a> {
    files: &'a dyn FileOperator,
    paths: ExecutablePaths,
    state: SwapState,
}

impl<'a> ExecutableSwapper<'a> {
    pub fn new(files: &'a dyn FileOperator, paths: ExecutablePaths) -> Self {
        Self {
            files,
            paths,
            state: SwapState::Fetched,
        }
    }

    pub fn state(&self) -> SwapState {
        self.state
    }

    pub fn paths(&self) -> &ExecutablePaths {
        &self.paths
    }

    /// Run every remaining step. On error `state()` tells how far it got.
    pub async fn swap(&mut self, payload: &[u8]) -> UpdateResult<()> {
        self.clear_stale_backup().await?;
        self.stage(payload).await?;
        self.back_up().await?;
        self.swap_in().await
    }

    /// An earlier update whose cleanup never finished leaves `P.old` behind;
    /// the live file exists, so that copy is redundant.
    async fn clear_stale_backup(&self) -> UpdateResult<()> {
        let backup = &self.paths.backup;
        if self.files.exists(backup).await {
            tracing::warn!("Removing stale backup {}", backup.display());
            self.files
                .remove_file(backup)
                .await
                .map_err(|e| fs_error(SwapStep::ClearStaleBackup, backup, e))?;
        }
        Ok(())
    }

    async fn stage(&mut self, payload: &[u8]) -> UpdateResult<()> {
        let staged = &self.paths.staged;
        tracing::debug!("Staging {} bytes at {}", payload.len(), staged.display());
        self.files
            .write_executable(staged, payload)
            .await
            .map_err(|e| fs_error(SwapStep::Stage, staged, e))?;
        self.state = SwapState::Staged;
        Ok(())
    }

    async fn back_up(&mut self) -> UpdateResult<()> {
        let ExecutablePaths { live, backup, .. } = &self.paths;
        tracing::debug!("Moving {} to {}", live.display(), backup.display());
        self.files
            .rename(live, backup)
            .await
            .map_err(|e| fs_error(SwapStep::Backup, live, e))?;
        self.state = SwapState::BackedUp;
        Ok(())
    }

    async fn swap_in(&mut self) -> UpdateResult<()> {
        let ExecutablePaths { live, staged, .. } = &self.paths;
        tracing::debug!("Moving {} to {}", staged.display(), live.display());
        self.files
            .rename(staged, live)
            .await
            .map_err(|e| fs_error(SwapStep::Swap, staged, e))?;
        self.state = SwapState::Swapped;
        tracing::info!("Swapped new executable into {}", live.display());
        Ok(())
    }
}

/// Put `P.old` back at `P`, discarding whatever `P` currently holds.
///
/// Never called by the pipeline itself; hosts use it to recover from a failed
/// restart or an interrupted swap.
pub async fn restore_backup(files: &dyn FileOperator, paths: &ExecutablePaths) -> UpdateResult<()> {
    if !files.exists(&paths.backup).await {
        return Err(fs_error(
            SwapStep::Restore,
            &paths.backup,
            io::Error::new(io::ErrorKind::NotFound, "no backup to restore"),
        ));
    }

    if files.exists(&paths.live).await {
        files
            .remove_file(&paths.live)
            .await
            .map_err(|e| fs_error(SwapStep::Restore, &paths.live, e))?;
    }

    files
        .rename(&paths.backup, &paths.live)
        .await
        .map_err(|e| fs_error(SwapStep::Restore, &paths.backup, e))?;

    tracing::info!("Restored {} from backup", paths.live.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_paths_use_fixed_suffixes() {
        let paths = ExecutablePaths::new("/opt/tools/app.exe");
        assert_eq!(paths.staged, PathBuf::from("/opt/tools/app.exe.new.temp"));
        assert_eq!(paths.backup, PathBuf::from("/opt/tools/app.exe.old"));
    }

    #[tokio::test]
    async fn test_swap_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ExecutablePaths::new(dir.path().join("app"));
        std::fs::write(&paths.live, b"old-binary").unwrap();

        let mut swapper = ExecutableSwapper::new(&OsFileOperator, paths.clone());
        swapper.swap(b"new-binary").await.unwrap();

        assert_eq!(swapper.state(), SwapState::Swapped);
        assert_eq!(std::fs::read(&paths.live).unwrap(), b"new-binary");
        assert_eq!(std::fs::read(&paths.backup).unwrap(), b"old-binary");
        assert!(!paths.staged.exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&paths.live).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[tokio::test]
    async fn test_stale_backup_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ExecutablePaths::new(dir.path().join("app"));
        std::fs::write(&paths.live, b"v2").unwrap();
        std::fs::write(&paths.backup, b"v1").unwrap();

        let mut swapper = ExecutableSwapper::new(&OsFileOperator, paths.clone());
        swapper.swap(b"v3").await.unwrap();

        assert_eq!(std::fs::read(&paths.live).unwrap(), b"v3");
        assert_eq!(std::fs::read(&paths.backup).unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_missing_live_file_fails_at_backup() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ExecutablePaths::new(dir.path().join("app"));

        let mut swapper = ExecutableSwapper::new(&OsFileOperator, paths.clone());
        let err = swapper.swap(b"new").await.unwrap_err();

        assert!(matches!(
            err,
            UpdateError::Filesystem {
                step: SwapStep::Backup,
                ..
            }
        ));
        // Stage file is leaked, not cleaned up
        assert_eq!(swapper.state(), SwapState::Staged);
        assert!(paths.staged.exists());
    }

    /// Fails the second rename, leaving the unsafe window open.
    struct FailingSwap {
        renames: Mutex<u32>,
    }

    #[async_trait]
    impl FileOperator for FailingSwap {
        async fn exists(&self, path: &Path) -> bool {
            OsFileOperator.exists(path).await
        }

        async fn write_executable(&self, path: &Path, data: &[u8]) -> io::Result<()> {
            OsFileOperator.write_executable(path, data).await
        }

        async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
            let call = {
                let mut renames = self.renames.lock().unwrap();
                *renames += 1;
                *renames
            };
            if call == 2 {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
            OsFileOperator.rename(from, to).await
        }

        async fn remove_file(&self, path: &Path) -> io::Result<()> {
            OsFileOperator.remove_file(path).await
        }
    }

    #[tokio::test]
    async fn test_failed_swap_leaves_partial_state_and_restore_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ExecutablePaths::new(dir.path().join("app"));
        std::fs::write(&paths.live, b"old").unwrap();

        let files = FailingSwap {
            renames: Mutex::new(0),
        };
        let mut swapper = ExecutableSwapper::new(&files, paths.clone());
        let err = swapper.swap(b"new").await.unwrap_err();

        assert!(matches!(
            err,
            UpdateError::Filesystem {
                step: SwapStep::Swap,
                ..
            }
        ));
        assert_eq!(swapper.state(), SwapState::BackedUp);
        assert!(!paths.live.exists());
        assert!(paths.backup.exists());
        assert!(paths.staged.exists());

        restore_backup(&OsFileOperator, &paths).await.unwrap();
        assert_eq!(std::fs::read(&paths.live).unwrap(), b"old");
        assert!(!paths.backup.exists());
    }

    #[tokio::test]
    async fn test_restore_without_backup() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ExecutablePaths::new(dir.path().join("app"));
        let err = restore_backup(&OsFileOperator, &paths).await.unwrap_err();
        assert!(matches!(
            err,
            UpdateError::Filesystem {
                step: SwapStep::Restore,
                ..
            }
        ));
    }
}
