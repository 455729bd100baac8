//! Dependency update strategies.
//!
//! Every strategy runs the same sequence inside the clone:
//!
//! 1. set the commit identity in the clone's own git config,
//! 2. branch `feature/<strategy>-<stamp>` off the base remote branch,
//! 3. run the strategy's update commands,
//! 4. stage whichever of its lock files exist,
//! 5. commit (an empty commit is tolerated),
//! 6. push the branch to the authorized remote.
//!
//! Only step 5 may fail without aborting the run.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use regex_lite::Regex;
use tracing::{debug, info, instrument, warn};

use crate::command::{CommandRunner, CommandSpec};
use crate::config::EffectiveConfig;
use crate::errors::{CommandError, StrategyError};
use crate::git::remote_url::AuthorizedRemote;
use crate::stamp::RunStamp;

/// Variables an enclosing bundler process may have exported; bundler is run
/// without them so it resolves against the clone's Gemfile only.
const BUNDLER_ENV: &[&str] = &[
    "BUNDLE_GEMFILE",
    "BUNDLE_BIN_PATH",
    "BUNDLER_VERSION",
    "BUNDLER_SETUP",
    "RUBYOPT",
    "RUBYLIB",
];

/// The closed set of supported update procedures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Ruby / Bundler: `Gemfile.lock`.
    Bundle,
    /// Perl / Carton: `carton.lock` or `cpanfile.snapshot`.
    Carton,
}

impl Strategy {
    pub const ALL: [Strategy; 2] = [Strategy::Bundle, Strategy::Carton];

    pub fn name(self) -> &'static str {
        match self {
            Self::Bundle => "bundle",
            Self::Carton => "carton",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Bundle => "Bundle",
            Self::Carton => "Carton",
        }
    }

    /// `feature/<strategy>-<stamp>`.
    pub fn branch_name(self, stamp: &RunStamp) -> String {
        format!("feature/{}-{}", self.name(), stamp)
    }

    /// `<Strategy> update <stamp>`.
    pub fn commit_message(self, stamp: &RunStamp) -> String {
        format!("{} update {}", self.label(), stamp)
    }

    /// Same text as the commit message.
    pub fn pull_request_title(self, stamp: &RunStamp) -> String {
        self.commit_message(stamp)
    }

    /// Candidate lock files, relative to the clone root.
    pub fn lock_files(self) -> &'static [&'static str] {
        match self {
            Self::Bundle => &["Gemfile.lock"],
            Self::Carton => &["carton.lock", "cpanfile.snapshot"],
        }
    }

    fn update_commands(self, clone_dir: &Path, config: &EffectiveConfig) -> Vec<CommandSpec> {
        match self {
            Self::Bundle => {
                let mut install = CommandSpec::new("bundle").args([
                    "--gemfile",
                    "Gemfile",
                    "--no-deployment",
                    "--without",
                    "nothing",
                    "--path",
                    "vendor/bundle",
                ]);
                if let Some(jobs) = bundler_jobs_option(config.bundler_parallel_number) {
                    install = install.arg(jobs);
                }
                let update = CommandSpec::new("bundle").arg("update");
                [install, update]
                    .into_iter()
                    .map(|cmd| clean_bundler_env(cmd).current_dir(clone_dir))
                    .collect()
            }
            Self::Carton => vec![
                CommandSpec::new("carton").arg("install").current_dir(clone_dir),
                CommandSpec::new("carton").arg("update").current_dir(clone_dir),
            ],
        }
    }

    /// Workspace edits made before the update commands run.
    fn prepare(self, clone_dir: &Path) -> Result<(), StrategyError> {
        match self {
            Self::Bundle => comment_out_ruby_directive(&clone_dir.join("Gemfile")),
            Self::Carton => Ok(()),
        }
    }

    /// Run the full update sequence in `ctx.clone_dir`.
    #[instrument(skip(self, runner, ctx), fields(strategy = %self, dir = %ctx.clone_dir.display()))]
    pub async fn run(
        self,
        runner: &dyn CommandRunner,
        ctx: &UpdateContext<'_>,
    ) -> Result<UpdateReport, StrategyError> {
        let dir = ctx.clone_dir;
        let branch = self.branch_name(ctx.stamp);
        let git = || CommandSpec::new("git").current_dir(dir);

        let name = ctx.config.commiter_name.as_str();
        let email = ctx.config.commiter_email.as_str();
        step(runner, "git config", git().args(["config", "user.name", name])).await?;
        step(runner, "git config", git().args(["config", "user.email", email])).await?;

        info!(%branch, base = %ctx.config.base_remote_branch, "creating feature branch");
        step(
            runner,
            "git checkout",
            git().args([
                "checkout",
                "-b",
                branch.as_str(),
                ctx.config.base_remote_branch.as_str(),
            ]),
        )
        .await?;

        self.prepare(dir)?;
        for cmd in self.update_commands(dir, ctx.config) {
            info!(cmd = %cmd, "running dependency update");
            step(runner, "dependency update", cmd).await?;
        }

        let mut staged = Vec::new();
        for &lock_file in self.lock_files() {
            if dir.join(lock_file).exists() {
                step(runner, "git add", git().args(["add", lock_file])).await?;
                staged.push(PathBuf::from(lock_file));
            } else {
                debug!(lock_file, "lock file not present, skipping");
            }
        }

        let message = self.commit_message(ctx.stamp);
        let commit = commit_update(runner, git().args(["commit", "-m", message.as_str()])).await?;

        info!(remote = %ctx.remote, %branch, "pushing feature branch");
        step(
            runner,
            "git push",
            git()
                .args(["push", ctx.remote.expose(), branch.as_str()])
                .secret(ctx.remote.credential()),
        )
        .await?;

        Ok(UpdateReport {
            branch,
            staged,
            commit,
        })
    }
}

impl FromStr for Strategy {
    type Err = StrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.name() == s)
            .ok_or_else(|| StrategyError::UnknownStrategy(s.to_string()))
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Inputs a strategy needs from the pipeline.
#[derive(Debug)]
pub struct UpdateContext<'a> {
    pub clone_dir: &'a Path,
    pub config: &'a EffectiveConfig,
    pub stamp: &'a RunStamp,
    pub remote: &'a AuthorizedRemote,
}

/// Result of the commit step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// `git commit` exited non-zero, normally because the update changed
    /// nothing. The run carries on.
    NothingToCommit,
}

/// What a strategy run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    pub branch: String,
    pub staged: Vec<PathBuf>,
    pub commit: CommitOutcome,
}

async fn step(
    runner: &dyn CommandRunner,
    step: &'static str,
    cmd: CommandSpec,
) -> Result<(), StrategyError> {
    runner
        .run(&cmd)
        .await
        .map(|_| ())
        .map_err(|source| StrategyError::StepFailed { step, source })
}

async fn commit_update(
    runner: &dyn CommandRunner,
    cmd: CommandSpec,
) -> Result<CommitOutcome, StrategyError> {
    match runner.run(&cmd).await {
        Ok(_) => {
            info!("committed lock file update");
            Ok(CommitOutcome::Committed)
        }
        Err(CommandError::Failed {
            exit_code, stderr, ..
        }) => {
            warn!(exit_code, %stderr, "nothing committed, continuing");
            Ok(CommitOutcome::NothingToCommit)
        }
        Err(source) => Err(StrategyError::StepFailed {
            step: "git commit",
            source,
        }),
    }
}

fn clean_bundler_env(cmd: CommandSpec) -> CommandSpec {
    BUNDLER_ENV.iter().fold(cmd, |cmd, key| cmd.env_remove(*key))
}

/// `--jobs=N` when more than one job is requested.
fn bundler_jobs_option(parallel_number: u32) -> Option<String> {
    (parallel_number > 1).then(|| format!("--jobs={parallel_number}"))
}

/// Turn `ruby '...'` lines of a Gemfile into comments so the locally
/// installed interpreter does not have to match the pinned version.
fn comment_out_ruby_directive(gemfile: &Path) -> Result<(), StrategyError> {
    if !gemfile.exists() {
        debug!(path = %gemfile.display(), "no Gemfile to adjust");
        return Ok(());
    }
    let io_err = |source| StrategyError::IoError {
        path: gemfile.to_path_buf(),
        source,
    };
    let contents = std::fs::read_to_string(gemfile).map_err(io_err)?;
    static RUBY_DIRECTIVE: OnceLock<Regex> = OnceLock::new();
    let re = RUBY_DIRECTIVE
        .get_or_init(|| Regex::new(r"(?m)^ruby").expect("ruby directive pattern is valid"));
    let rewritten = re.replace_all(&contents, "#ruby");
    if rewritten != contents {
        std::fs::write(gemfile, rewritten.as_bytes()).map_err(io_err)?;
        debug!(path = %gemfile.display(), "commented out ruby directive");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn stamp() -> RunStamp {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 8, 9).single().unwrap();
        RunStamp::render(at, "%Y%m%d%H%M%S").unwrap()
    }

    #[test]
    fn test_names_and_messages() {
        let s = stamp();
        assert_eq!(Strategy::Bundle.branch_name(&s), "feature/bundle-20240309070809");
        assert_eq!(Strategy::Carton.branch_name(&s), "feature/carton-20240309070809");
        assert_eq!(Strategy::Bundle.commit_message(&s), "Bundle update 20240309070809");
        assert_eq!(
            Strategy::Carton.pull_request_title(&s),
            "Carton update 20240309070809"
        );
    }

    #[test]
    fn test_parse_strategy() {
        assert_eq!("bundle".parse::<Strategy>().unwrap(), Strategy::Bundle);
        assert_eq!("carton".parse::<Strategy>().unwrap(), Strategy::Carton);
        assert!(matches!(
            "npm".parse::<Strategy>(),
            Err(StrategyError::UnknownStrategy(ref s)) if s == "npm"
        ));
    }

    #[test]
    fn test_bundler_jobs_option() {
        assert_eq!(bundler_jobs_option(0), None);
        assert_eq!(bundler_jobs_option(1), None);
        assert_eq!(bundler_jobs_option(4).as_deref(), Some("--jobs=4"));
    }

    #[test]
    fn test_comment_out_ruby_directive() {
        let dir = tempfile::tempdir().unwrap();
        let gemfile = dir.path().join("Gemfile");
        std::fs::write(
            &gemfile,
            "source 'https://rubygems.org'\nruby '2.0.0'\ngem 'rails'\n  ruby_like 'x'\n",
        )
        .unwrap();
        comment_out_ruby_directive(&gemfile).unwrap();
        assert_eq!(
            std::fs::read_to_string(&gemfile).unwrap(),
            "source 'https://rubygems.org'\n#ruby '2.0.0'\ngem 'rails'\n  ruby_like 'x'\n"
        );
    }

    #[test]
    fn test_missing_gemfile_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        assert!(comment_out_ruby_directive(&dir.path().join("Gemfile")).is_ok());
    }

    #[test]
    fn test_bundle_commands_drop_bundler_env() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = "commiter_name: a\ncommiter_email: a@b\ngithub_account: me\n\
                    url: https://github.com/acme/app\ntype: fork\n\
                    base_remote_branch: origin/master\npull_request_base: master\n\
                    timestamp_format: '%Y'\nbundler_parallel_number: 3\n";
        let config = EffectiveConfig::from_mapping(serde_yaml::from_str(yaml).unwrap()).unwrap();
        let cmds = Strategy::Bundle.update_commands(dir.path(), &config);
        assert_eq!(
            cmds[0].to_string(),
            "bundle --gemfile Gemfile --no-deployment --without nothing --path vendor/bundle --jobs=3"
        );
        assert_eq!(cmds[1].to_string(), "bundle update");
        assert!(cmds.iter().all(|c| c.env_remove.contains(&"BUNDLE_GEMFILE".to_string())));
        assert!(cmds.iter().all(|c| c.cwd.as_deref() == Some(dir.path())));
    }
}
