//! GitHub REST API client and pull request publishing.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::errors::GitHubError;

/// Everything needed to open the update pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestRequest {
    /// `owner/name` of the repository the PR is opened against.
    pub repo_identity: String,
    pub base: String,
    /// `<owner>:<feature branch>`.
    pub head: String,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub html_url: String,
    pub state: String,
}

/// Terminal states of a publish attempt that count as success.
#[derive(Debug, Clone)]
pub enum PullRequestOutcome {
    /// A new pull request was opened.
    Created(PullRequest),
    /// GitHub answered 422: the PR already exists or there is nothing to
    /// merge. Reruns land here.
    AlreadyExists { message: String },
}

impl PullRequestOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Opens pull requests. Implemented by [`GitHubClient`] and by test fakes.
#[async_trait]
pub trait PullRequestPublisher: Send + Sync {
    async fn publish(&self, request: &PullRequestRequest) -> Result<PullRequestOutcome, GitHubError>;
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

/// Asynchronous GitHub REST API client.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Result<Self, GitHubError> {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        let token = token.into();
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("lockbump/", env!("CARGO_PKG_VERSION"))),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        info!(api_url = %api_url, "created GitHubClient");
        Ok(Self {
            http,
            api_url,
            token,
        })
    }

    /// `POST /repos/{repo}/pulls`. A 422 answer is classified, not an error.
    #[instrument(skip(self, body))]
    pub async fn create_pull_request(
        &self,
        repo: &str,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequestOutcome, GitHubError> {
        let url = format!("{}/repos/{}/pulls", self.api_url, repo);
        let payload =
            serde_json::json!({ "title": title, "body": body, "head": head, "base": base });
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;

        if resp.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let message = error_message(resp).await;
            info!(%message, "pull request not created (already exists or nothing to merge)");
            return Ok(PullRequestOutcome::AlreadyExists { message });
        }

        let resp = check_response(resp).await?;
        let pr: PullRequest = resp.json().await?;
        info!(number = pr.number, url = %pr.html_url, "created pull request");
        Ok(PullRequestOutcome::Created(pr))
    }
}

#[async_trait]
impl PullRequestPublisher for GitHubClient {
    async fn publish(&self, request: &PullRequestRequest) -> Result<PullRequestOutcome, GitHubError> {
        self.create_pull_request(
            &request.repo_identity,
            &request.title,
            &request.body,
            &request.head,
            &request.base,
        )
        .await
    }
}

async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, GitHubError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(GitHubError::AuthenticationFailed(format!("HTTP {}", status)));
    }
    let remaining = resp
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && remaining.as_deref() == Some("0"))
    {
        let reset = resp
            .headers()
            .get("x-ratelimit-reset")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        return Err(GitHubError::RateLimited { reset_at: reset });
    }
    if status == StatusCode::FORBIDDEN {
        return Err(GitHubError::AuthenticationFailed(error_message(resp).await));
    }
    let body = error_message(resp).await;
    debug!(status = status.as_u16(), %body, "GitHub API error");
    Err(GitHubError::ApiError {
        status: status.as_u16(),
        body,
    })
}

/// Best-effort human-readable message from a GitHub error response.
async fn error_message(resp: reqwest::Response) -> String {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiErrorBody>(&text) {
        Ok(parsed) => {
            let mut parts: Vec<String> = parsed.message.into_iter().collect();
            parts.extend(parsed.errors.into_iter().filter_map(|e| e.message));
            if parts.is_empty() {
                format!("HTTP {}", status)
            } else {
                parts.join(": ")
            }
        }
        Err(_) if text.is_empty() => format!("HTTP {}", status),
        Err(_) => text,
    }
}
