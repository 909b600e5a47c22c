//! Hotswap Update - self-replacing executable updates from GitHub Releases
//!
//! Provides the update pipeline for a running executable:
//! - Resolving the single matching asset of the latest release
//! - Downloading it and unwrapping single-file zip archives
//! - Swapping it over the running executable (`P` -> `P.old`, `P.new.temp` -> `P`)
//! - Restarting into the new executable with an environment handoff
//! - Removing the `P.old` backup from the restarted process
//!
//! # Example
//!
//! ```rust,ignore
//! use hotswap_update::{UpdateManager, UpdateOutcome, finish_update};
//!
//! let exe = std::env::current_exe()?;
//!
//! // First thing on startup: confirm a supervised restart and drop the backup
//! let recovery = finish_update(&exe).await;
//!
//! let manager = UpdateManager::new()?;
//! match manager
//!     .self_update_and_restart("owner/app", "v1.0.0", r"app-.*linux.*\.zip", &exe)
//!     .await?
//! {
//!     UpdateOutcome::AlreadyLatest { version } => println!("up to date ({version})"),
//!     UpdateOutcome::Updated { .. } => unreachable!("process exits after restart"),
//! }
//! ```

mod api;
mod archive;
mod config;
mod download;
mod error;
mod handoff;
mod install;
mod manager;
mod recovery;
mod resolve;
mod restart;
mod version;

pub use api::{
    AssetDescriptor, AssetDownloader, GithubClient, LocalAssetSource, ReleaseDescriptor,
    ReleaseLister,
};
pub use archive::extract_single_entry;
pub use config::{CleanupRetry, RestartPolicy, UpdateConfig};
pub use download::fetch_payload;
pub use error::{UpdateError, UpdateResult};
pub use handoff::{
    ENV_FINISH_UPDATE, ENV_PREDECESSOR_PID, ENV_READY_FILE, HandoffState,
    is_first_start_after_update, predecessor_process_id,
};
pub use install::{
    BACKUP_SUFFIX, ExecutablePaths, ExecutableSwapper, FileOperator, OsFileOperator,
    STAGED_SUFFIX, SwapState, SwapStep, restore_backup,
};
pub use manager::{UpdateManager, UpdateManagerBuilder, UpdateOutcome};
pub use recovery::{
    RecoveryOutcome, clean_up_after_update, finish_update, finish_update_with, remove_backup,
};
pub use resolve::{AssetFilter, Resolution, ResolvedUpdate, resolve_latest, sort_newest_first};
pub use restart::{ChildHandle, LaunchRequest, ProcessLauncher, Restarted, Restarter, TokioLauncher};
pub use version::{VersionComparison, compare_versions};

/// Default GitHub REST API URL
pub const GITHUB_API_URL: &str = "https://api.github.com";

/// User-Agent for release and asset requests
pub const USER_AGENT: &str = concat!("hotswap-update/", env!("CARGO_PKG_VERSION"));
