//! lockbump command-line entry point.
//!
//! Refreshes the dependency lock file of one configured target repository and
//! opens a pull request with the result:
//!
//! ```text
//! BUILD_FOR=my-app TOKEN_MY_APP=... lockbump bundle
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lockbump_core::config::{resolve_token, ConfigResolver};
use lockbump_core::git::PullRequestOutcome;
use lockbump_core::strategy::CommitOutcome;
use lockbump_core::{Pipeline, ProcessRunner, RunConfig, RunReport, Strategy};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Update a repository's dependency lock file and propose it as a pull request.
#[derive(Parser, Debug)]
#[command(name = "lockbump", version)]
struct Cli {
    /// Update strategy: `bundle` or `carton`.
    strategy: Strategy,

    /// Target name; selects `<data-dir>/<target>.yaml` and `TOKEN_<TARGET>`.
    #[arg(long, env = "BUILD_FOR")]
    build_for: String,

    /// Directory holding `__user_config__.yaml` and per-target YAML files.
    #[arg(long, env = "LOCKBUMP_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Scratch directory the target is cloned into. Wiped on every run.
    #[arg(long, env = "LOCKBUMP_REPOS_DIR", default_value = "repos")]
    repos_dir: PathBuf,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let token = target_token(&cli.data_dir, &cli.build_for)?;

    let run_config = RunConfig {
        target: cli.build_for,
        token,
        strategy: cli.strategy,
        data_dir: cli.data_dir,
        workspace_root: cli.repos_dir,
        started_at: Utc::now(),
    };
    info!(?run_config, "starting run");

    let target = run_config.target.clone();
    let pipeline = Pipeline::new(run_config, Arc::new(ProcessRunner))
        .context("failed to load built-in configuration")?;
    let report = pipeline
        .run()
        .await
        .with_context(|| format!("lock update for '{target}' failed"))?;

    log_report(&report);
    Ok(())
}

/// Read the target's token, after confirming the target is configured so an
/// unknown target is reported as such rather than as a missing variable.
fn target_token(data_dir: &Path, target: &str) -> Result<String> {
    ConfigResolver::new(data_dir)
        .and_then(|resolver| resolver.resolve(target))
        .context("failed to load configuration")?;
    resolve_token(target).context("failed to resolve credentials")
}

fn log_report(report: &RunReport) {
    let commit = match report.commit {
        CommitOutcome::Committed => "committed",
        CommitOutcome::NothingToCommit => "nothing to commit",
    };
    match &report.pull_request {
        PullRequestOutcome::Created(pr) => info!(
            branch = %report.branch,
            commit,
            number = pr.number,
            url = %pr.html_url,
            "pull request opened"
        ),
        PullRequestOutcome::AlreadyExists { message } => info!(
            branch = %report.branch,
            commit,
            %message,
            "pull request not opened"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_args() {
        let cli = Cli::try_parse_from([
            "lockbump",
            "carton",
            "--build-for",
            "perl-app",
            "--data-dir",
            "/etc/lockbump",
        ])
        .unwrap();
        assert_eq!(cli.strategy, Strategy::Carton);
        assert_eq!(cli.build_for, "perl-app");
        assert_eq!(cli.data_dir, PathBuf::from("/etc/lockbump"));
        assert_eq!(cli.repos_dir, PathBuf::from("repos"));
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_unknown_target_reported_before_token() {
        let dir = tempfile::tempdir().unwrap();
        let err = target_token(dir.path(), "lockbump-cli-ghost").unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("no configuration for target 'lockbump-cli-ghost'"));
        assert!(!message.contains("TOKEN_"));
    }

    #[test]
    fn test_configured_target_without_token() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("lockbump-cli-tokenless.yaml"),
            "url: 'https://github.com/acme/app.git'\n",
        )
        .unwrap();
        let err = target_token(dir.path(), "lockbump-cli-tokenless").unwrap_err();
        assert!(format!("{err:#}").contains("TOKEN_LOCKBUMP_CLI_TOKENLESS"));
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let result = Cli::try_parse_from(["lockbump", "npm", "--build-for", "app"]);
        assert!(result.is_err());
    }
}
