//! The update pipeline.
//!
//! One run per process, strictly in order:
//! `Load → Fetch → RunStrategy → PublishPullRequest → Done`.
//! The first fatal error stops the run; later stages never start.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info, instrument};

use crate::command::CommandRunner;
use crate::config::{ConfigResolver, EffectiveConfig};
use crate::errors::{ConfigError, CoreError};
use crate::git::fetch::{CloneSource, RepositoryFetcher};
use crate::git::github::{
    GitHubClient, PullRequestOutcome, PullRequestPublisher, PullRequestRequest,
};
use crate::git::remote_url::{
    authorize, repository_identity, target_owner, AuthorizedRemote, RepoType,
};
use crate::stamp::RunStamp;
use crate::strategy::{CommitOutcome, Strategy, UpdateContext};

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Fetch,
    RunStrategy,
    PublishPullRequest,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load => write!(f, "load"),
            Self::Fetch => write!(f, "fetch"),
            Self::RunStrategy => write!(f, "run_strategy"),
            Self::PublishPullRequest => write!(f, "publish_pull_request"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// A fatal error together with the stage it stopped the run in.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: CoreError,
}

/// Everything the process boundary reads from arguments and environment.
#[derive(Clone)]
pub struct RunConfig {
    /// Target name; selects `<data_dir>/<target>.yaml` and the clone dir.
    pub target: String,
    /// Credential for the target, already read from `TOKEN_<TARGET>`.
    pub token: String,
    pub strategy: Strategy,
    pub data_dir: PathBuf,
    pub workspace_root: PathBuf,
    /// Process start time; the run stamp is rendered from it exactly once.
    pub started_at: DateTime<Utc>,
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("target", &self.target)
            .field("token", &"***")
            .field("strategy", &self.strategy)
            .field("data_dir", &self.data_dir)
            .field("workspace_root", &self.workspace_root)
            .field("started_at", &self.started_at)
            .finish()
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub stage: Stage,
    pub stamp: RunStamp,
    pub branch: String,
    pub commit: CommitOutcome,
    pub request: PullRequestRequest,
    pub pull_request: PullRequestOutcome,
}

/// Values derived during `Load` and used by the later stages.
struct Plan {
    config: EffectiveConfig,
    repo_type: RepoType,
    remote: AuthorizedRemote,
    stamp: RunStamp,
    request: PullRequestRequest,
}

/// Composes config resolution, fetch, strategy and publish for one target.
pub struct Pipeline {
    run: RunConfig,
    resolver: ConfigResolver,
    runner: Arc<dyn CommandRunner>,
    publisher: Option<Arc<dyn PullRequestPublisher>>,
}

impl Pipeline {
    /// Build a pipeline reading configuration from `run.data_dir`. The GitHub
    /// client is created from the resolved configuration unless one is
    /// supplied with [`with_publisher`](Self::with_publisher).
    pub fn new(run: RunConfig, runner: Arc<dyn CommandRunner>) -> Result<Self, ConfigError> {
        let resolver = ConfigResolver::new(&run.data_dir)?;
        Ok(Self {
            run,
            resolver,
            runner,
            publisher: None,
        })
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn PullRequestPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Execute every stage once.
    #[instrument(skip(self), fields(target = %self.run.target, strategy = %self.run.strategy))]
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let plan = self.load().map_err(|e| fail(Stage::Load, e))?;

        enter(Stage::Fetch);
        let fetcher = RepositoryFetcher::new(&self.run.workspace_root);
        let source = CloneSource::for_type(plan.repo_type, &plan.config.url, &plan.remote);
        let clone_dir = fetcher
            .fetch(self.runner.as_ref(), &self.run.target, source)
            .await
            .map_err(|e| fail(Stage::Fetch, e))?;

        enter(Stage::RunStrategy);
        let ctx = UpdateContext {
            clone_dir: &clone_dir,
            config: &plan.config,
            stamp: &plan.stamp,
            remote: &plan.remote,
        };
        let update = self
            .run
            .strategy
            .run(self.runner.as_ref(), &ctx)
            .await
            .map_err(|e| fail(Stage::RunStrategy, e))?;

        enter(Stage::PublishPullRequest);
        let publisher = self
            .publisher(&plan.config)
            .map_err(|e| fail(Stage::PublishPullRequest, e))?;
        let pull_request = publisher
            .publish(&plan.request)
            .await
            .map_err(|e| fail(Stage::PublishPullRequest, e))?;

        enter(Stage::Done);
        info!(
            branch = %update.branch,
            commit = ?update.commit,
            pr_created = pull_request.is_created(),
            "run complete"
        );
        Ok(RunReport {
            stage: Stage::Done,
            stamp: plan.stamp,
            branch: update.branch,
            commit: update.commit,
            request: plan.request,
            pull_request,
        })
    }

    /// Resolve config and derive everything that depends only on it. No
    /// filesystem writes, subprocesses or network calls happen here.
    fn load(&self) -> Result<Plan, CoreError> {
        enter(Stage::Load);
        let config = self.resolver.resolve(&self.run.target)?;

        let repo_type: RepoType = config.repo_type.parse()?;
        let remote = authorize(
            &config.url,
            &config.repo_type,
            &self.run.token,
            &config.github_account,
        )?;
        let identity = repository_identity(&config.url)?;
        let owner = target_owner(&config.repo_type, &config.url, &config.github_account)?;

        let stamp = RunStamp::render(self.run.started_at, &config.timestamp_format)?;
        let strategy = self.run.strategy;
        let branch = strategy.branch_name(&stamp);
        let request = PullRequestRequest {
            repo_identity: identity,
            base: config.pull_request_base.clone(),
            head: format!("{owner}:{branch}"),
            title: strategy.pull_request_title(&stamp),
            body: config.pull_request_body.clone(),
        };
        info!(
            repo = %request.repo_identity,
            %repo_type,
            remote = %remote,
            head = %request.head,
            base = %request.base,
            "run planned"
        );

        Ok(Plan {
            config,
            repo_type,
            remote,
            stamp,
            request,
        })
    }

    fn publisher(&self, config: &EffectiveConfig) -> Result<Arc<dyn PullRequestPublisher>, CoreError> {
        if let Some(publisher) = &self.publisher {
            return Ok(Arc::clone(publisher));
        }
        let client: Arc<dyn PullRequestPublisher> = Arc::new(GitHubClient::new(
            config.github_api_url.as_str(),
            self.run.token.as_str(),
        )?);
        Ok(client)
    }
}

fn enter(stage: Stage) {
    info!(%stage, "entering stage");
}

fn fail(stage: Stage, source: impl Into<CoreError>) -> PipelineError {
    let source = source.into();
    error!(%stage, error = %source, "stage failed");
    PipelineError { stage, source }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Load.to_string(), "load");
        assert_eq!(Stage::PublishPullRequest.to_string(), "publish_pull_request");
    }

    #[test]
    fn test_run_config_debug_hides_token() {
        let run = RunConfig {
            target: "app".into(),
            token: "ghp_secret".into(),
            strategy: Strategy::Bundle,
            data_dir: PathBuf::from("data"),
            workspace_root: PathBuf::from("repos"),
            started_at: Utc::now(),
        };
        let rendered = format!("{run:?}");
        assert!(!rendered.contains("ghp_secret"));
        assert!(rendered.contains("app"));
    }

    #[test]
    fn test_pipeline_error_display() {
        let err = PipelineError {
            stage: Stage::Fetch,
            source: crate::errors::AuthError::InvalidType("x".into()).into(),
        };
        assert!(err.to_string().starts_with("fetch stage failed: "));
    }
}
