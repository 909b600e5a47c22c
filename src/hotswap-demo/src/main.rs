//! Hotswap demo - a host binary that replaces itself with a newer release.
//!
//! Run without flags to see whether this process was started by an update.
//! `--update` pulls the latest GitHub release, `--update-file` installs a
//! local file instead so the swap and restart can be tried offline.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use hotswap_update::{
    LocalAssetSource, RecoveryOutcome, RestartPolicy, UpdateConfig, UpdateManager, UpdateOutcome,
};

/// Version of this binary as published in release tags
const VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Parser)]
#[command(name = "hotswap-demo", version, about)]
struct Cli {
    /// Check the latest release and install it if newer
    #[arg(long)]
    update: bool,

    /// Install this local file as the new version instead of a release asset
    #[arg(long, value_name = "PATH", conflicts_with = "update")]
    update_file: Option<PathBuf>,

    /// Version reported for --update-file
    #[arg(long, default_value = "local")]
    file_version: String,

    /// GitHub repository to pull releases from (owner/name)
    #[arg(long, env = "HOTSWAP_REPO", default_value = "hotswap-rs/hotswap")]
    repo: String,

    /// Regular expression the release asset name must match in full
    #[arg(long, default_value = r"hotswap-demo-.*\.zip")]
    pattern: String,

    /// Spawn the new executable and exit without waiting for it to start
    #[arg(long)]
    fire_and_forget: bool,

    /// Enable debug logging
    #[arg(long, short = 'v')]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn recovery_message(outcome: &RecoveryOutcome) -> String {
    match outcome {
        RecoveryOutcome::NotAnUpdate => format!("hotswap-demo {} started", VERSION),
        RecoveryOutcome::SamePid => {
            format!("hotswap-demo {} started (handoff names this process)", VERSION)
        }
        RecoveryOutcome::Cleaned | RecoveryOutcome::CleanupFailed(_) => {
            format!("hotswap-demo {} started after update", VERSION)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let exe = std::env::current_exe().context("Failed to locate the running executable")?;

    let mut config = UpdateConfig::load();
    if cli.fire_and_forget {
        config.restart_policy = RestartPolicy::FireAndForget;
    }

    let mut builder = UpdateManager::builder(config);
    let mut pattern = cli.pattern.clone();
    if let Some(path) = &cli.update_file {
        let source = LocalAssetSource::new(path, cli.file_version.clone());
        pattern = regex::escape(&source.asset_name());
        builder = builder.source(source);
    }
    let manager = builder.build().context("Failed to set up the updater")?;

    let recovery = manager.finish_update(&exe).await;
    println!("{}", recovery_message(&recovery));
    if let RecoveryOutcome::CleanupFailed(e) = &recovery {
        tracing::warn!("Old executable was not removed: {}", e);
    }

    if !cli.update && cli.update_file.is_none() {
        return Ok(());
    }

    tracing::info!("Checking {} for updates (pattern {})", cli.repo, pattern);
    let outcome = manager
        .self_update_and_restart(&cli.repo, VERSION, &pattern, &exe)
        .await
        .with_context(|| format!("Update from {} failed", cli.repo))?;

    match outcome {
        UpdateOutcome::AlreadyLatest { version } => {
            tracing::info!("Already on the latest version ({})", version);
        }
        UpdateOutcome::Updated { to, paths, .. } => {
            // Only reachable if the restart returned without exiting
            println!("Updated to {} at {}", to, paths.live.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_update_file_conflicts_with_update() {
        let parsed = Cli::try_parse_from(["hotswap-demo", "--update", "--update-file", "a.zip"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_recovery_message() {
        assert!(recovery_message(&RecoveryOutcome::NotAnUpdate).ends_with(" started"));
        assert!(recovery_message(&RecoveryOutcome::Cleaned).ends_with("after update"));
        let failed = RecoveryOutcome::CleanupFailed(hotswap_update::UpdateError::ConfigError {
            message: "locked".to_string(),
        });
        assert!(recovery_message(&failed).ends_with("after update"));
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["hotswap-demo"]).unwrap();
        assert!(!cli.update);
        assert!(!cli.fire_and_forget);
        assert_eq!(cli.file_version, "local");
        assert!(cli.update_file.is_none());
    }
}
