//! Contracts for the external collaborators a run talks to.
//!
//! Adapters implement these against git, GitHub and the project's build
//! tooling; the engine only sees the traits.

use crate::issue::Issue;
use crate::review::{ReviewComment, ReviewEvent};
use crate::settings::RepoSettings;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Outcome of the project's own build or typecheck command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BuildResult {
    Passed,
    Failed { errors: String },
}

impl BuildResult {
    pub fn is_success(&self) -> bool {
        matches!(self, BuildResult::Passed)
    }

    pub fn errors(&self) -> Option<&str> {
        match self {
            BuildResult::Passed => None,
            BuildResult::Failed { errors } => Some(errors),
        }
    }
}

#[async_trait]
pub trait BuildRunner: Send + Sync {
    async fn run_build_check(&self, root: &Path, settings: &RepoSettings) -> Result<BuildResult>;

    async fn install_package(&self, root: &Path, settings: &RepoSettings, package: &str)
        -> Result<()>;
}

/// Branch, commit and push on the run's private checkout.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Check out `branch`, creating it when needed. Returns true when created.
    async fn ensure_branch(&self, branch: &str) -> Result<bool>;

    /// Stage everything and commit. `None` when there was nothing to commit.
    async fn commit_all(&self, message: &str) -> Result<Option<String>>;

    async fn push(&self, branch: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub html_url: String,
    pub head_ref: String,
    pub base_ref: String,
    pub author_login: String,
    pub draft: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
    pub draft: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestUpdate {
    pub title: Option<String>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewSubmission {
    pub body: String,
    pub event: ReviewEvent,
    pub comments: Vec<ReviewComment>,
}

/// The GitHub operations the agent needs. `repo` is always `owner/name`.
#[async_trait]
pub trait GitHubApi: Send + Sync {
    async fn get_issue(&self, repo: &str, number: u64) -> Result<Issue>;

    async fn get_default_branch(&self, repo: &str) -> Result<String>;

    async fn get_pull_request(&self, repo: &str, number: u64) -> Result<PullRequest>;

    async fn find_open_pull_request(&self, repo: &str, head: &str) -> Result<Option<PullRequest>>;

    async fn create_pull_request(&self, repo: &str, pr: &NewPullRequest) -> Result<PullRequest>;

    async fn update_pull_request(
        &self,
        repo: &str,
        number: u64,
        update: &PullRequestUpdate,
    ) -> Result<PullRequest>;

    async fn request_reviewers(&self, repo: &str, number: u64, reviewers: &[String]) -> Result<()>;

    async fn get_pull_request_diff(&self, repo: &str, number: u64) -> Result<String>;

    async fn list_pull_request_files(&self, repo: &str, number: u64) -> Result<Vec<String>>;

    async fn create_review(&self, repo: &str, number: u64, review: &ReviewSubmission) -> Result<()>;

    async fn add_issue_comment(&self, repo: &str, number: u64, body: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_result_accessors() {
        assert!(BuildResult::Passed.is_success());
        let failed = BuildResult::Failed {
            errors: "TS2304".to_string(),
        };
        assert!(!failed.is_success());
        assert_eq!(failed.errors(), Some("TS2304"));
        assert_eq!(
            serde_json::to_value(&failed).unwrap()["status"],
            "failed"
        );
    }
}
