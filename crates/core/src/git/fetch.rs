//! Workspace reset and clone of the target repository.

use std::path::{Path, PathBuf};

use tracing::{info, instrument};

use crate::command::{CommandRunner, CommandSpec};
use crate::errors::FetchError;
use crate::git::remote_url::{AuthorizedRemote, RepoType};

/// Where the clone is read from.
#[derive(Debug, Clone, Copy)]
pub enum CloneSource<'a> {
    /// The plain upstream URL; the repository is publicly readable.
    Public(&'a str),
    /// The credentialed URL; required to read private repositories.
    Authorized(&'a AuthorizedRemote),
}

impl<'a> CloneSource<'a> {
    /// Private repositories clone with credentials; fork and shared
    /// repositories clone anonymously and only push with credentials.
    pub fn for_type(repo_type: RepoType, public_url: &'a str, remote: &'a AuthorizedRemote) -> Self {
        if repo_type.clone_needs_credentials() {
            Self::Authorized(remote)
        } else {
            Self::Public(public_url)
        }
    }

    fn command(&self, dest: &Path) -> CommandSpec {
        let dest = dest.to_string_lossy().to_string();
        match self {
            Self::Public(url) => CommandSpec::new("git").args(["clone", *url, dest.as_str()]),
            Self::Authorized(remote) => CommandSpec::new("git")
                .args(["clone", remote.expose(), dest.as_str()])
                .secret(remote.credential()),
        }
    }

    fn display_url(&self) -> String {
        match self {
            Self::Public(url) => (*url).to_string(),
            Self::Authorized(remote) => remote.redacted(),
        }
    }
}

/// Owns the scratch workspace that clones are placed in.
#[derive(Debug, Clone)]
pub struct RepositoryFetcher {
    workspace_root: PathBuf,
}

impl RepositoryFetcher {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }

    /// `<workspace_root>/<target>`.
    pub fn clone_path(&self, target: &str) -> PathBuf {
        self.workspace_root.join(target)
    }

    /// Recreate the workspace and clone `source` into it. Returns the clone
    /// directory.
    #[instrument(skip(self, runner, source), fields(root = %self.workspace_root.display()))]
    pub async fn fetch(
        &self,
        runner: &dyn CommandRunner,
        target: &str,
        source: CloneSource<'_>,
    ) -> Result<PathBuf, FetchError> {
        self.reset_workspace()?;

        let dest = self.clone_path(target);
        let url = source.display_url();
        info!(%url, dest = %dest.display(), "cloning target repository");
        runner
            .run(&source.command(&dest))
            .await
            .map_err(|source| FetchError::CloneFailed { url, source })?;

        info!("clone completed");
        Ok(dest)
    }

    /// Remove everything under the workspace root and recreate it.
    fn reset_workspace(&self) -> Result<(), FetchError> {
        let path = &self.workspace_root;
        let wrap = |source| FetchError::Workspace {
            path: path.clone(),
            source,
        };
        if path.exists() {
            std::fs::remove_dir_all(path).map_err(wrap)?;
        }
        std::fs::create_dir_all(path).map_err(wrap)?;
        Ok(())
    }
}
