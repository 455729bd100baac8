//! Git and GitHub plumbing: remote authorization, cloning, pull requests.

pub mod fetch;
pub mod github;
pub mod remote_url;

pub use fetch::{CloneSource, RepositoryFetcher};
pub use github::{GitHubClient, PullRequestOutcome, PullRequestPublisher, PullRequestRequest};
pub use remote_url::{authorize, repository_identity, target_owner, AuthorizedRemote, RepoType};
