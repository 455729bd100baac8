//! Error types for the lockbump core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.
//!
//! Two outcomes that look like failures are deliberately *not* errors: an
//! empty commit ([`crate::strategy::CommitOutcome::NothingToCommit`]) and a
//! duplicate pull request ([`crate::git::github::PullRequestOutcome::AlreadyExists`]).

use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error(transparent)]
    GitHub(#[from] GitHubError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The per-target configuration file is absent or empty.
    #[error("no configuration for target '{target}' (expected {})", path.display())]
    Missing { target: String, path: PathBuf },

    /// A layer could not be parsed.
    #[error("configuration parse error in {}: {detail}", path.display())]
    ParseError { path: PathBuf, detail: String },

    /// A required key is absent from every layer.
    #[error("required configuration key '{0}' is not set in any layer")]
    MissingKey(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (credential for target '{target}')")]
    EnvVarMissing { var: String, target: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading a config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Remote authorization errors
// ---------------------------------------------------------------------------

/// Errors from deriving authorized remotes and repository identities.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The repository type is not `fork`, `shared` or `private`.
    #[error("invalid repository type '{0}' (expected fork, shared or private)")]
    InvalidType(String),

    /// The source URL could not be parsed.
    #[error("invalid repository url '{url}': {detail}")]
    InvalidUrl { url: String, detail: String },

    /// No `owner/name` pair could be extracted from the URL.
    #[error("cannot derive owner/name from repository url '{0}'")]
    NoIdentity(String),
}

// ---------------------------------------------------------------------------
// Subprocess errors
// ---------------------------------------------------------------------------

/// Errors from running external commands.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The program was not found on `$PATH`.
    #[error("{0} binary not found")]
    BinaryNotFound(String),

    /// A command exited with a non-zero status.
    #[error("command `{command}` failed (exit {exit_code}): {stderr}")]
    Failed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// Generic I/O wrapper.
    #[error("command I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Fetch errors
// ---------------------------------------------------------------------------

/// Errors from preparing the workspace and cloning the target.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The workspace directory could not be reset.
    #[error("failed to reset workspace {}: {source}", path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `git clone` failed.
    #[error("failed to clone {url}: {source}")]
    CloneFailed {
        url: String,
        #[source]
        source: CommandError,
    },
}

// ---------------------------------------------------------------------------
// Strategy errors
// ---------------------------------------------------------------------------

/// Errors from running an update strategy inside the clone.
#[derive(Debug, Error)]
pub enum StrategyError {
    /// The requested strategy name is not one of the known variants.
    #[error("unknown update strategy '{0}' (expected bundle or carton)")]
    UnknownStrategy(String),

    /// A step of the strategy failed.
    #[error("{step} failed: {source}")]
    StepFailed {
        step: &'static str,
        #[source]
        source: CommandError,
    },

    /// A workspace file could not be read or rewritten.
    #[error("strategy I/O error at {}: {source}", path.display())]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// GitHub API errors
// ---------------------------------------------------------------------------

/// Errors from GitHub REST API interactions.
#[derive(Debug, Error)]
pub enum GitHubError {
    /// HTTP-level transport error (network, TLS, etc.).
    #[error("GitHub HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The API returned a non-success status code.
    #[error("GitHub API error (HTTP {status}): {body}")]
    ApiError { status: u16, body: String },

    /// Authentication token is missing or invalid.
    #[error("GitHub authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Rate limit exceeded.
    #[error("GitHub rate limit exceeded, resets at {reset_at}")]
    RateLimited { reset_at: String },
}

/// Convenience alias used across the crate.
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = ConfigError::Missing {
            target: "fenix-knight".into(),
            path: PathBuf::from("data/fenix-knight.yaml"),
        };
        assert_eq!(
            err.to_string(),
            "no configuration for target 'fenix-knight' (expected data/fenix-knight.yaml)"
        );

        let err = AuthError::InvalidType("bogus".into());
        assert!(err.to_string().contains("'bogus'"));

        let err = ConfigError::EnvVarMissing {
            var: "TOKEN_FENIX_KNIGHT".into(),
            target: "fenix-knight".into(),
        };
        assert!(err.to_string().contains("TOKEN_FENIX_KNIGHT"));

        let err = GitHubError::RateLimited {
            reset_at: "1700000000".into(),
        };
        assert!(err.to_string().contains("rate limit"));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let core_err: CoreError = AuthError::InvalidType("x".into()).into();
        assert!(matches!(core_err, CoreError::Auth(AuthError::InvalidType(_))));

        let core_err: CoreError = StrategyError::UnknownStrategy("npm".into()).into();
        assert!(matches!(core_err, CoreError::Strategy(_)));
    }
}
