//! Launching the swapped executable and handing control to it.

use std::convert::Infallible;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::RestartPolicy;
use crate::error::{UpdateError, UpdateResult};
use crate::handoff::{ENV_READY_FILE, HandoffState};

/// How often a supervised restart looks for the ready signal.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A process to start in place of the current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub program: PathBuf,
    /// Added on top of the inherited environment
    pub env: Vec<(String, String)>,
    /// Removed from the inherited environment
    pub env_remove: Vec<String>,
}

/// A spawned child process.
pub trait ChildHandle: Send {
    fn id(&self) -> Option<u32>;

    /// `Some(status description)` once the child has exited.
    fn try_wait(&mut self) -> io::Result<Option<String>>;

    fn kill(&mut self) -> io::Result<()>;
}

/// Spawns processes that inherit stdio and the current environment.
pub trait ProcessLauncher: Send + Sync {
    fn spawn(&self, request: &LaunchRequest) -> io::Result<Box<dyn ChildHandle>>;
}

impl ChildHandle for tokio::process::Child {
    fn id(&self) -> Option<u32> {
        tokio::process::Child::id(self)
    }

    fn try_wait(&mut self) -> io::Result<Option<String>> {
        Ok(tokio::process::Child::try_wait(self)?.map(|status| status.to_string()))
    }

    fn kill(&mut self) -> io::Result<()> {
        self.start_kill()
    }
}

/// [`ProcessLauncher`] backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLauncher;

impl ProcessLauncher for TokioLauncher {
    fn spawn(&self, request: &LaunchRequest) -> io::Result<Box<dyn ChildHandle>> {
        let mut command = tokio::process::Command::new(&request.program);
        for key in &request.env_remove {
            command.env_remove(key);
        }
        command
            .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let child = command.spawn()?;
        Ok(Box::new(child))
    }
}

/// Result of a restart that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restarted {
    pub pid: Option<u32>,
    /// The child confirmed it is running (supervised policy only)
    pub confirmed: bool,
}

/// Starts the new executable according to a [`RestartPolicy`].
#[derive(Clone)]
pub struct Restarter {
    launcher: Arc<dyn ProcessLauncher>,
    policy: RestartPolicy,
    ready_timeout: Duration,
    ready_file: PathBuf,
}

impl Restarter {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        policy: RestartPolicy,
        ready_timeout: Duration,
    ) -> Self {
        Self {
            launcher,
            policy,
            ready_timeout,
            ready_file: default_ready_file(),
        }
    }

    /// Use a specific ready file instead of the per-process default.
    pub fn with_ready_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ready_file = path.into();
        self
    }

    /// Spawn `exe` with the handoff environment and, when supervised, wait for
    /// it to come up. The current process keeps running.
    pub async fn restart(&self, exe: &Path) -> UpdateResult<Restarted> {
        match self.policy {
            RestartPolicy::FireAndForget => self.spawn_detached(exe),
            RestartPolicy::Supervised => self.spawn_supervised(exe).await,
        }
    }

    /// Restart and terminate the current process.
    ///
    /// Returns only when a supervised restart fails. Under fire-and-forget the
    /// process exits even if the spawn itself failed.
    pub async fn restart_and_handoff(&self, exe: &Path) -> UpdateResult<Infallible> {
        match self.restart(exe).await {
            Ok(restarted) => {
                tracing::info!(
                    "Handing off to {} (pid {:?}), exiting",
                    exe.display(),
                    restarted.pid
                );
                std::process::exit(0)
            }
            Err(e) if self.policy == RestartPolicy::FireAndForget => {
                tracing::error!("Restart of {} failed, exiting anyway: {}", exe.display(), e);
                std::process::exit(0)
            }
            Err(e) => Err(e),
        }
    }

    fn request(&self, exe: &Path, ready_file: Option<&Path>) -> LaunchRequest {
        let handoff = HandoffState::for_successor(std::process::id(), ready_file);
        LaunchRequest {
            program: exe.to_path_buf(),
            env: handoff
                .env_vars()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            env_remove: if ready_file.is_none() {
                vec![ENV_READY_FILE.to_string()]
            } else {
                Vec::new()
            },
        }
    }

    fn spawn_detached(&self, exe: &Path) -> UpdateResult<Restarted> {
        let child = self
            .launcher
            .spawn(&self.request(exe, None))
            .map_err(|e| spawn_error(exe, e))?;

        Ok(Restarted {
            pid: child.id(),
            confirmed: false,
        })
    }

    async fn spawn_supervised(&self, exe: &Path) -> UpdateResult<Restarted> {
        let ready_file = self.ready_file.as_path();
        remove_ready_file(ready_file).await;

        let mut child = self
            .launcher
            .spawn(&self.request(exe, Some(ready_file)))
            .map_err(|e| spawn_error(exe, e))?;
        let pid = child.id();
        tracing::debug!("Spawned {} (pid {:?}), waiting for ready signal", exe.display(), pid);

        let deadline = Instant::now() + self.ready_timeout;
        let result = loop {
            if is_ready(ready_file, pid).await {
                break Ok(Restarted {
                    pid,
                    confirmed: true,
                });
            }

            match child.try_wait() {
                Ok(None) => {}
                // Signal and exit may land between two polls
                Ok(Some(_)) if is_ready(ready_file, pid).await => {
                    break Ok(Restarted {
                        pid,
                        confirmed: true,
                    });
                }
                Ok(Some(status)) => {
                    break Err(UpdateError::RestartFailed {
                        message: format!(
                            "{} exited before signalling readiness ({})",
                            exe.display(),
                            status
                        ),
                    });
                }
                Err(e) => {
                    break Err(UpdateError::RestartFailed {
                        message: format!("failed to poll {}: {}", exe.display(), e),
                    });
                }
            }

            if Instant::now() >= deadline {
                if let Err(e) = child.kill() {
                    tracing::warn!("Failed to kill unresponsive successor: {}", e);
                }
                break Err(UpdateError::RestartFailed {
                    message: format!(
                        "{} did not signal readiness within {:?}",
                        exe.display(),
                        self.ready_timeout
                    ),
                });
            }

            tokio::time::sleep(READY_POLL_INTERVAL).await;
        };

        remove_ready_file(ready_file).await;
        result
    }
}

fn default_ready_file() -> PathBuf {
    std::env::temp_dir().join(format!("hotswap-ready-{}", std::process::id()))
}

fn spawn_error(exe: &Path, e: io::Error) -> UpdateError {
    UpdateError::RestartFailed {
        message: format!("failed to spawn {}: {}", exe.display(), e),
    }
}

/// The ready file holds the successor's pid once it is up.
async fn is_ready(path: &Path, expected_pid: Option<u32>) -> bool {
    let Ok(content) = tokio::fs::read_to_string(path).await else {
        return false;
    };
    match content.trim().parse::<u32>() {
        Ok(pid) => expected_pid.is_none_or(|expected| expected == pid),
        Err(_) => false,
    }
}

async fn remove_ready_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove ready file {}: {}", path.display(), e),
    }
}
