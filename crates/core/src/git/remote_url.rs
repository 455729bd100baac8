//! Repository-type aware remote URL derivation.
//!
//! The repository `type` decides three things:
//!
//! | type      | push remote path | clone URL  | PR head owner            |
//! |-----------|------------------|------------|--------------------------|
//! | `fork`    | `/<account>/..`  | public     | `<account>`              |
//! | `shared`  | unchanged        | public     | upstream owner (path[0]) |
//! | `private` | unchanged        | authorized | upstream owner (path[0]) |
//!
//! The token is embedded as the basic-auth user with the fixed password
//! marker [`TOKEN_PASSWORD_MARKER`].

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex_lite::Regex;
use url::Url;

use crate::errors::AuthError;

/// Password placed next to the token in authorized URLs.
pub const TOKEN_PASSWORD_MARKER: &str = "x-oauth-basic";

// ---------------------------------------------------------------------------
// Repository type
// ---------------------------------------------------------------------------

/// Relationship between the operator and the target repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoType {
    /// Push to the operator's fork; open the PR from `<account>:<branch>`.
    Fork,
    /// Push directly to the upstream repository.
    Shared,
    /// Like `Shared`, but the repository is not publicly readable.
    Private,
}

impl RepoType {
    /// Whether cloning itself needs credentials.
    pub fn clone_needs_credentials(self) -> bool {
        matches!(self, Self::Private)
    }
}

impl FromStr for RepoType {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fork" => Ok(Self::Fork),
            "shared" => Ok(Self::Shared),
            "private" => Ok(Self::Private),
            other => Err(AuthError::InvalidType(other.to_string())),
        }
    }
}

impl fmt::Display for RepoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fork => write!(f, "fork"),
            Self::Shared => write!(f, "shared"),
            Self::Private => write!(f, "private"),
        }
    }
}

// ---------------------------------------------------------------------------
// Authorized remote
// ---------------------------------------------------------------------------

/// A remote URL carrying the token. `Debug` and `Display` redact it.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizedRemote {
    url: Url,
}

impl AuthorizedRemote {
    /// The full URL including the credential, for handing to git.
    pub fn expose(&self) -> &str {
        self.url.as_str()
    }

    /// The URL with the credential replaced by `***`.
    pub fn redacted(&self) -> String {
        let mut url = self.url.clone();
        if !url.username().is_empty() {
            let _ = url.set_username("***");
            let _ = url.set_password(None);
        }
        url.to_string()
    }

    /// The credential as it appears inside [`expose`](Self::expose), for
    /// masking in command lines.
    pub fn credential(&self) -> &str {
        self.url.username()
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }
}

impl fmt::Display for AuthorizedRemote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl fmt::Debug for AuthorizedRemote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AuthorizedRemote").field(&self.redacted()).finish()
    }
}

/// Compute the credentialed push (and, for `private`, clone) URL.
pub fn authorize(
    url: &str,
    repo_type: &str,
    token: &str,
    account: &str,
) -> Result<AuthorizedRemote, AuthError> {
    let repo_type: RepoType = repo_type.parse()?;
    let mut parsed = parse_url(url)?;

    if repo_type == RepoType::Fork {
        let path = path_for_fork(parsed.path(), account);
        parsed.set_path(&path);
    }

    let bad_credential = |_| AuthError::InvalidUrl {
        url: url.to_string(),
        detail: "url cannot carry credentials".into(),
    };
    parsed.set_username(token).map_err(bad_credential)?;
    parsed
        .set_password(Some(TOKEN_PASSWORD_MARKER))
        .map_err(bad_credential)?;

    Ok(AuthorizedRemote { url: parsed })
}

/// Replace the first path segment with `account`.
fn path_for_fork(path: &str, account: &str) -> String {
    let rest = path.strip_prefix('/').unwrap_or(path);
    if rest.is_empty() || rest.starts_with('/') {
        return path.to_string();
    }
    match rest.find('/') {
        Some(idx) => format!("/{account}{}", &rest[idx..]),
        None => format!("/{account}"),
    }
}

// ---------------------------------------------------------------------------
// PR head owner and identity
// ---------------------------------------------------------------------------

/// The account a pull request head is expressed against.
pub fn target_owner(repo_type: &str, url: &str, account: &str) -> Result<String, AuthError> {
    match repo_type.parse::<RepoType>()? {
        RepoType::Fork => Ok(account.to_string()),
        RepoType::Shared | RepoType::Private => {
            let parsed = parse_url(url)?;
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next())
                .filter(|owner| !owner.is_empty())
                .map(str::to_string)
                .ok_or_else(|| AuthError::NoIdentity(url.to_string()))
        }
    }
}

/// `owner/name` from the trailing two path components, without `.git`.
pub fn repository_identity(url: &str) -> Result<String, AuthError> {
    static IDENTITY: OnceLock<Regex> = OnceLock::new();
    let re = IDENTITY.get_or_init(|| {
        Regex::new(r"([^/]+?/[^/]+?)(?:\.git)?$").expect("identity pattern is valid")
    });

    re.captures(url.trim_end_matches('/'))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| AuthError::NoIdentity(url.to_string()))
}

fn parse_url(url: &str) -> Result<Url, AuthError> {
    let parsed = Url::parse(url).map_err(|e| AuthError::InvalidUrl {
        url: url.to_string(),
        detail: e.to_string(),
    })?;
    if parsed.cannot_be_a_base() || parsed.host_str().is_none() {
        return Err(AuthError::InvalidUrl {
            url: url.to_string(),
            detail: "expected scheme://host/owner/name".into(),
        });
    }
    Ok(parsed)
}
