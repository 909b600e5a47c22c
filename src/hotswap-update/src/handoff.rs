//! Environment protocol between the replaced process and its successor.

use std::path::{Path, PathBuf};

use crate::error::UpdateResult;

/// Set to `1` in the successor's environment.
pub const ENV_FINISH_UPDATE: &str = "FINISH_UPDATE";

/// Process id of the process that performed the update.
pub const ENV_PREDECESSOR_PID: &str = "KILL_THIS_PID";

/// File the successor writes its pid into once it is running (supervised restarts only).
pub const ENV_READY_FILE: &str = "HOTSWAP_READY_FILE";

/// Handoff variables as seen by a process at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandoffState {
    pub update_finished: bool,
    pub predecessor_pid: Option<String>,
    pub ready_file: Option<PathBuf>,
}

impl HandoffState {
    /// Capture the handoff variables of the current process.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the state from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            update_finished: lookup(ENV_FINISH_UPDATE).as_deref() == Some("1"),
            predecessor_pid: lookup(ENV_PREDECESSOR_PID),
            ready_file: lookup(ENV_READY_FILE)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
        }
    }

    /// State handed to the successor of process `predecessor_pid`.
    pub fn for_successor(predecessor_pid: u32, ready_file: Option<&Path>) -> Self {
        Self {
            update_finished: true,
            predecessor_pid: Some(predecessor_pid.to_string()),
            ready_file: ready_file.map(Path::to_path_buf),
        }
    }

    /// Variables to add to the successor's environment.
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        let mut vars = Vec::with_capacity(3);
        if self.update_finished {
            vars.push((ENV_FINISH_UPDATE, "1".to_string()));
        }
        if let Some(pid) = &self.predecessor_pid {
            vars.push((ENV_PREDECESSOR_PID, pid.clone()));
        }
        if let Some(path) = &self.ready_file {
            vars.push((ENV_READY_FILE, path.to_string_lossy().into_owned()));
        }
        vars
    }

    /// True when this process continues an update started by another process.
    pub fn is_continuation(&self, own_pid: u32) -> bool {
        self.update_finished && self.predecessor_pid.as_deref() != Some(own_pid.to_string().as_str())
    }

    /// Tell a supervising predecessor that this process is up.
    ///
    /// Returns `false` when no ready file was requested.
    pub async fn signal_ready(&self) -> UpdateResult<bool> {
        let Some(path) = &self.ready_file else {
            return Ok(false);
        };
        tokio::fs::write(path, std::process::id().to_string()).await?;
        tracing::debug!("Signalled readiness through {}", path.display());
        Ok(true)
    }
}

/// Whether this process was started by a completed update.
pub fn is_first_start_after_update() -> bool {
    HandoffState::from_env().update_finished
}

/// Process id of the process that started this one during an update.
pub fn predecessor_process_id() -> Option<String> {
    HandoffState::from_env().predecessor_pid
}
