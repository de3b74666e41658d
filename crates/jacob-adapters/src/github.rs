//! GitHub REST client for the operations a run needs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use jacob_core::issue::Issue;
use jacob_core::protocol::{
    GitHubApi, NewPullRequest, PullRequest, PullRequestUpdate, ReviewSubmission,
};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
const API_TIMEOUT_SECS: u64 = 60;
const ACCEPT_JSON: &str = "application/vnd.github+json";
const ACCEPT_DIFF: &str = "application/vnd.github.diff";
const API_VERSION: &str = "2022-11-28";
const PER_PAGE: usize = 100;

/// Maximum length for error body content in error messages
const MAX_ERROR_BODY_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("GitHub token is not configured")]
    MissingToken,
    #[error("invalid repository name '{0}', expected owner/name")]
    InvalidRepo(String),
    #[error("GitHub API error ({status}): {message}")]
    Api { status: u16, message: String },
}

/// Truncate and redact an API error body before it reaches logs.
fn sanitize_error_body(body: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "token",
        "secret",
        "password",
        "credential",
        "bearer",
        "ghp_",
        "gho_",
        "ghs_",
        "ghu_",
        "github_pat_",
    ];

    let truncated = jacob_core::util::truncate(body, MAX_ERROR_BODY_LEN);
    let lower = truncated.to_lowercase();
    if SECRET_PATTERNS.iter().any(|p| lower.contains(p)) {
        return "(error details redacted - may contain sensitive data)".to_string();
    }
    truncated
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

fn describe_api_error(body: &str) -> String {
    if let Ok(api_error) = serde_json::from_str::<ApiErrorResponse>(body) {
        let detail = api_error
            .errors
            .first()
            .and_then(|e| e.message.clone())
            .unwrap_or_default();
        if detail.is_empty() {
            return api_error.message;
        }
        return format!("{}: {}", api_error.message, detail);
    }
    sanitize_error_body(body)
}

/// Extract owner and repo from a git remote URL.
///
/// Supports:
/// - git@github.com:owner/repo.git
/// - https://github.com/owner/repo.git
/// - https://github.com/owner/repo
pub fn parse_remote_url(url: &str) -> Option<(String, String)> {
    if let Some(rest) = url.strip_prefix("git@github.com:") {
        return split_owner_repo(rest.trim_end_matches(".git"));
    }

    if url.contains("github.com") {
        if let Ok(parsed) = url::Url::parse(url) {
            let path = parsed
                .path()
                .trim_start_matches('/')
                .trim_end_matches('/')
                .trim_end_matches(".git");
            return split_owner_repo(path);
        }
        let path = url
            .split("github.com")
            .nth(1)?
            .trim_start_matches(['/', ':'])
            .trim_end_matches(".git");
        return split_owner_repo(path);
    }

    None
}

fn split_owner_repo(path: &str) -> Option<(String, String)> {
    let (owner, repo) = path.split_once('/')?;
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}

fn validate_repo(repo: &str) -> Result<(), GitHubError> {
    match repo.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok(())
        }
        _ => Err(GitHubError::InvalidRepo(repo.to_string())),
    }
}

#[derive(Deserialize)]
struct UserResponse {
    login: String,
}

#[derive(Deserialize)]
struct LabelResponse {
    name: String,
}

#[derive(Deserialize)]
struct IssueResponse {
    number: u64,
    title: String,
    body: Option<String>,
    #[serde(default)]
    assignees: Vec<UserResponse>,
    #[serde(default)]
    labels: Vec<LabelResponse>,
}

impl From<IssueResponse> for Issue {
    fn from(raw: IssueResponse) -> Self {
        Issue {
            number: raw.number,
            title: raw.title,
            body: raw.body,
            assignees: raw.assignees.into_iter().map(|u| u.login).collect(),
            labels: raw.labels.into_iter().map(|l| l.name).collect(),
        }
    }
}

#[derive(Deserialize)]
struct RefResponse {
    #[serde(rename = "ref")]
    name: String,
}

#[derive(Deserialize)]
struct PullRequestResponse {
    number: u64,
    title: String,
    body: Option<String>,
    html_url: String,
    head: RefResponse,
    base: RefResponse,
    user: UserResponse,
    #[serde(default)]
    draft: bool,
}

impl From<PullRequestResponse> for PullRequest {
    fn from(raw: PullRequestResponse) -> Self {
        PullRequest {
            number: raw.number,
            title: raw.title,
            body: raw.body,
            html_url: raw.html_url,
            head_ref: raw.head.name,
            base_ref: raw.base.name,
            author_login: raw.user.login,
            draft: raw.draft,
        }
    }
}

#[derive(Deserialize)]
struct RepoResponse {
    default_branch: String,
}

#[derive(Deserialize)]
struct PullRequestFileResponse {
    filename: String,
}

#[derive(Serialize)]
struct UpdatePullRequestRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<&'a str>,
}

impl<'a> From<&'a PullRequestUpdate> for UpdatePullRequestRequest<'a> {
    fn from(update: &'a PullRequestUpdate) -> Self {
        UpdatePullRequestRequest {
            title: update.title.as_deref(),
            body: update.body.as_deref(),
        }
    }
}

#[derive(Serialize)]
struct ReviewCommentRequest<'a> {
    path: &'a str,
    line: usize,
    side: &'static str,
    body: &'a str,
}

#[derive(Serialize)]
struct ReviewRequest<'a> {
    body: &'a str,
    event: jacob_core::review::ReviewEvent,
    comments: Vec<ReviewCommentRequest<'a>>,
}

impl<'a> From<&'a ReviewSubmission> for ReviewRequest<'a> {
    fn from(review: &'a ReviewSubmission) -> Self {
        ReviewRequest {
            body: &review.body,
            event: review.event,
            comments: review
                .comments
                .iter()
                .map(|c| ReviewCommentRequest {
                    path: &c.path,
                    line: c.line,
                    side: "RIGHT",
                    body: &c.body,
                })
                .collect(),
        }
    }
}

/// [`GitHubApi`] over the REST v3 API, authenticated with a bearer token.
#[derive(Debug, Clone)]
pub struct RestGitHub {
    client: reqwest::Client,
    api_url: String,
}

impl RestGitHub {
    pub fn new(token: &str, api_url: &str) -> Result<Self> {
        if token.trim().is_empty() {
            return Err(GitHubError::MissingToken.into());
        }
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_JSON));
        headers.insert(USER_AGENT, HeaderValue::from_static("jacob-agent"));
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static(API_VERSION));
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .context("GitHub token contains invalid header characters")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    fn request(&self, method: Method, repo: &str, path: &str) -> Result<RequestBuilder> {
        validate_repo(repo)?;
        let url = format!("{}/repos/{}{}", self.api_url, repo, path);
        Ok(self.client.request(method, url))
    }

    async fn send(request: RequestBuilder) -> Result<Response> {
        let resp = request
            .send()
            .await
            .context("Failed to send GitHub request")?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(GitHubError::Api {
            status: status.as_u16(),
            message: describe_api_error(&body),
        }
        .into())
    }

    async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
        Self::send(request)
            .await?
            .json()
            .await
            .context("Failed to parse GitHub response")
    }
}

#[async_trait]
impl GitHubApi for RestGitHub {
    async fn get_issue(&self, repo: &str, number: u64) -> Result<Issue> {
        let req = self.request(Method::GET, repo, &format!("/issues/{}", number))?;
        let raw: IssueResponse = Self::send_json(req).await?;
        Ok(raw.into())
    }

    async fn get_default_branch(&self, repo: &str) -> Result<String> {
        let req = self.request(Method::GET, repo, "")?;
        let raw: RepoResponse = Self::send_json(req).await?;
        Ok(raw.default_branch)
    }

    async fn get_pull_request(&self, repo: &str, number: u64) -> Result<PullRequest> {
        let req = self.request(Method::GET, repo, &format!("/pulls/{}", number))?;
        let raw: PullRequestResponse = Self::send_json(req).await?;
        Ok(raw.into())
    }

    async fn find_open_pull_request(&self, repo: &str, head: &str) -> Result<Option<PullRequest>> {
        let owner = repo.split('/').next().unwrap_or_default();
        let req = self
            .request(Method::GET, repo, "/pulls")?
            .query(&[("state", "open"), ("head", &format!("{}:{}", owner, head))]);
        let raw: Vec<PullRequestResponse> = Self::send_json(req).await?;
        Ok(raw
            .into_iter()
            .map(PullRequest::from)
            .find(|pr| pr.head_ref == head))
    }

    async fn create_pull_request(&self, repo: &str, pr: &NewPullRequest) -> Result<PullRequest> {
        let req = self.request(Method::POST, repo, "/pulls")?.json(pr);
        let raw: PullRequestResponse = Self::send_json(req).await?;
        Ok(raw.into())
    }

    async fn update_pull_request(
        &self,
        repo: &str,
        number: u64,
        update: &PullRequestUpdate,
    ) -> Result<PullRequest> {
        let req = self
            .request(Method::PATCH, repo, &format!("/pulls/{}", number))?
            .json(&UpdatePullRequestRequest::from(update));
        let raw: PullRequestResponse = Self::send_json(req).await?;
        Ok(raw.into())
    }

    async fn request_reviewers(&self, repo: &str, number: u64, reviewers: &[String]) -> Result<()> {
        if reviewers.is_empty() {
            return Ok(());
        }
        let req = self
            .request(
                Method::POST,
                repo,
                &format!("/pulls/{}/requested_reviewers", number),
            )?
            .json(&serde_json::json!({ "reviewers": reviewers }));
        Self::send(req).await?;
        Ok(())
    }

    async fn get_pull_request_diff(&self, repo: &str, number: u64) -> Result<String> {
        let req = self
            .request(Method::GET, repo, &format!("/pulls/{}", number))?
            .header(ACCEPT, ACCEPT_DIFF);
        Self::send(req)
            .await?
            .text()
            .await
            .context("Failed to read pull request diff")
    }

    async fn list_pull_request_files(&self, repo: &str, number: u64) -> Result<Vec<String>> {
        let mut files = Vec::new();
        let mut page = 1usize;
        loop {
            let req = self
                .request(Method::GET, repo, &format!("/pulls/{}/files", number))?
                .query(&[("per_page", PER_PAGE), ("page", page)]);
            let batch: Vec<PullRequestFileResponse> = Self::send_json(req).await?;
            let done = batch.len() < PER_PAGE;
            files.extend(batch.into_iter().map(|f| f.filename));
            if done {
                return Ok(files);
            }
            page += 1;
        }
    }

    async fn create_review(&self, repo: &str, number: u64, review: &ReviewSubmission) -> Result<()> {
        let req = self
            .request(Method::POST, repo, &format!("/pulls/{}/reviews", number))?
            .json(&ReviewRequest::from(review));
        Self::send(req).await?;
        Ok(())
    }

    async fn add_issue_comment(&self, repo: &str, number: u64, body: &str) -> Result<()> {
        let req = self
            .request(Method::POST, repo, &format!("/issues/{}/comments", number))?
            .json(&serde_json::json!({ "body": body }));
        Self::send(req).await?;
        Ok(())
    }
}
