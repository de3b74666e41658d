//! In-memory collaborators for flow tests.

use crate::events::Events;
use crate::llm::transport::{Completion, CompletionRequest, LlmTransport, TransportError};
use crate::llm::{Gateway, RetryPolicy, Usage};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use jacob_core::events::{EventSink, MemoryEventSink, RunContext};
use jacob_core::issue::Issue;
use jacob_core::protocol::{
    BuildResult, BuildRunner, GitHubApi, NewPullRequest, PullRequest, PullRequestUpdate,
    ReviewSubmission, SourceControl,
};
use jacob_core::settings::RepoSettings;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TEST_REPO: &str = "acme/web";

// ═══════════════════════════════════════════════════════════════════════════
//  LLM
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    RateLimited,
    Error(String),
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        ScriptedReply::Text(text.into())
    }
}

struct Route {
    needle: Option<String>,
    replies: VecDeque<ScriptedReply>,
    sticky: bool,
}

/// Replays canned replies. Routed scripts pick the first route whose needle
/// appears in the system prompt and repeat a route's last reply forever.
pub struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<ScriptedReply>) -> Arc<Self> {
        Self::with_routes(vec![Route {
            needle: None,
            replies: replies.into(),
            sticky: false,
        }])
    }

    pub fn repeating(reply: ScriptedReply) -> Arc<Self> {
        Self::with_routes(vec![Route {
            needle: None,
            replies: VecDeque::from([reply]),
            sticky: true,
        }])
    }

    pub fn routed(routes: Vec<(&str, Vec<ScriptedReply>)>) -> Arc<Self> {
        Self::with_routes(
            routes
                .into_iter()
                .map(|(needle, replies)| Route {
                    needle: Some(needle.to_string()),
                    replies: replies.into(),
                    sticky: true,
                })
                .collect(),
        )
    }

    fn with_routes(routes: Vec<Route>) -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(routes),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests().len()
    }

    /// Requests whose system prompt contains `needle`.
    pub fn calls_matching(&self, needle: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.messages.first().is_some_and(|m| m.flattened().contains(needle)))
            .count()
    }

    fn next_reply(&self, system: &str) -> Option<ScriptedReply> {
        let mut routes = self.routes.lock().ok()?;
        let route = routes.iter_mut().find(|route| match &route.needle {
            Some(needle) => system.contains(needle.as_str()),
            None => true,
        })?;
        if route.sticky && route.replies.len() == 1 {
            route.replies.front().cloned()
        } else {
            route.replies.pop_front()
        }
    }
}

#[async_trait]
impl LlmTransport for ScriptedTransport {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, TransportError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let system = request
            .messages
            .first()
            .map(|m| m.flattened())
            .unwrap_or_default();
        match self.next_reply(&system) {
            Some(ScriptedReply::Text(content)) => Ok(Completion {
                content,
                usage: Usage {
                    input_tokens: 100,
                    output_tokens: 20,
                },
            }),
            Some(ScriptedReply::RateLimited) => Err(TransportError::RateLimited("429".to_string())),
            Some(ScriptedReply::Error(message)) => Err(TransportError::Network(message)),
            None => Err(TransportError::Network(format!(
                "no scripted reply for system prompt: {}",
                jacob_core::util::prefix_chars(&system, 60)
            ))),
        }
    }
}

pub fn test_policy() -> RetryPolicy {
    RetryPolicy {
        rate_limit_retries: 10,
        rate_limit_base_delay: Duration::ZERO,
        structured_retries: 3,
    }
}

pub fn test_events(sink: Arc<MemoryEventSink>) -> Events {
    let sink: Arc<dyn EventSink> = sink;
    Events::new(sink, RunContext::new(TEST_REPO).with_issue(42))
}

pub fn gateway_with(transport: Arc<ScriptedTransport>, sink: Arc<MemoryEventSink>) -> Gateway {
    Gateway::new(transport, test_events(sink)).with_policy(test_policy())
}

// ═══════════════════════════════════════════════════════════════════════════
//  GITHUB
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct GitHubState {
    issues: BTreeMap<u64, Issue>,
    pull_requests: Vec<PullRequest>,
    diffs: BTreeMap<u64, String>,
    files: BTreeMap<u64, Vec<String>>,
    comments: Vec<(u64, String)>,
    reviews: Vec<(u64, ReviewSubmission)>,
    reviewers: Vec<(u64, Vec<String>)>,
    created: usize,
    updated: usize,
}

#[derive(Default)]
pub struct FakeGitHub {
    state: Mutex<GitHubState>,
    reject_reviewers: bool,
}

impl FakeGitHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answers reviewer requests the way GitHub does for non-collaborators.
    pub fn rejecting_reviewers() -> Arc<Self> {
        Arc::new(Self {
            reject_reviewers: true,
            ..Self::default()
        })
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut GitHubState) -> R) -> Result<R> {
        let mut state = self.state.lock().map_err(|_| anyhow!("fake github poisoned"))?;
        Ok(f(&mut state))
    }

    pub fn add_issue(&self, issue: Issue) {
        let _ = self.with_state(|s| s.issues.insert(issue.number, issue));
    }

    pub fn add_pull_request(&self, pr: PullRequest, diff: &str, files: &[&str]) {
        let _ = self.with_state(|s| {
            s.diffs.insert(pr.number, diff.to_string());
            s.files
                .insert(pr.number, files.iter().map(|f| f.to_string()).collect());
            s.pull_requests.push(pr);
        });
    }

    pub fn pull_requests(&self) -> Vec<PullRequest> {
        self.with_state(|s| s.pull_requests.clone()).unwrap_or_default()
    }

    pub fn comments(&self) -> Vec<(u64, String)> {
        self.with_state(|s| s.comments.clone()).unwrap_or_default()
    }

    pub fn reviews(&self) -> Vec<(u64, ReviewSubmission)> {
        self.with_state(|s| s.reviews.clone()).unwrap_or_default()
    }

    pub fn requested_reviewers(&self) -> Vec<(u64, Vec<String>)> {
        self.with_state(|s| s.reviewers.clone()).unwrap_or_default()
    }

    pub fn created_count(&self) -> usize {
        self.with_state(|s| s.created).unwrap_or_default()
    }

    pub fn updated_count(&self) -> usize {
        self.with_state(|s| s.updated).unwrap_or_default()
    }
}

pub fn pull_request(number: u64, head: &str, author: &str) -> PullRequest {
    PullRequest {
        number,
        title: format!("PR {}", number),
        body: Some("Body".to_string()),
        html_url: format!("https://github.com/{}/pull/{}", TEST_REPO, number),
        head_ref: head.to_string(),
        base_ref: "main".to_string(),
        author_login: author.to_string(),
        draft: false,
    }
}

#[async_trait]
impl GitHubApi for FakeGitHub {
    async fn get_issue(&self, _repo: &str, number: u64) -> Result<Issue> {
        self.with_state(|s| s.issues.get(&number).cloned())?
            .ok_or_else(|| anyhow!("issue #{} not found", number))
    }

    async fn get_default_branch(&self, _repo: &str) -> Result<String> {
        Ok("main".to_string())
    }

    async fn get_pull_request(&self, _repo: &str, number: u64) -> Result<PullRequest> {
        self.with_state(|s| s.pull_requests.iter().find(|pr| pr.number == number).cloned())?
            .ok_or_else(|| anyhow!("pull request #{} not found", number))
    }

    async fn find_open_pull_request(&self, _repo: &str, head: &str) -> Result<Option<PullRequest>> {
        self.with_state(|s| s.pull_requests.iter().find(|pr| pr.head_ref == head).cloned())
    }

    async fn create_pull_request(&self, _repo: &str, pr: &NewPullRequest) -> Result<PullRequest> {
        self.with_state(|s| {
            let number = 100 + s.pull_requests.len() as u64;
            let created = PullRequest {
                number,
                title: pr.title.clone(),
                body: Some(pr.body.clone()),
                html_url: format!("https://github.com/{}/pull/{}", TEST_REPO, number),
                head_ref: pr.head.clone(),
                base_ref: pr.base.clone(),
                author_login: "jacob-ai-bot[bot]".to_string(),
                draft: pr.draft,
            };
            s.pull_requests.push(created.clone());
            s.created += 1;
            created
        })
    }

    async fn update_pull_request(
        &self,
        _repo: &str,
        number: u64,
        update: &PullRequestUpdate,
    ) -> Result<PullRequest> {
        self.with_state(|s| {
            let pr = s.pull_requests.iter_mut().find(|pr| pr.number == number)?;
            if let Some(title) = &update.title {
                pr.title = title.clone();
            }
            if let Some(body) = &update.body {
                pr.body = Some(body.clone());
            }
            let updated = pr.clone();
            s.updated += 1;
            Some(updated)
        })?
        .ok_or_else(|| anyhow!("pull request #{} not found", number))
    }

    async fn request_reviewers(&self, _repo: &str, number: u64, reviewers: &[String]) -> Result<()> {
        if self.reject_reviewers {
            return Err(anyhow!(
                "GitHub API error 422: Reviews may only be requested from collaborators."
            ));
        }
        self.with_state(|s| s.reviewers.push((number, reviewers.to_vec())))
    }

    async fn get_pull_request_diff(&self, _repo: &str, number: u64) -> Result<String> {
        self.with_state(|s| s.diffs.get(&number).cloned().unwrap_or_default())
    }

    async fn list_pull_request_files(&self, _repo: &str, number: u64) -> Result<Vec<String>> {
        self.with_state(|s| s.files.get(&number).cloned().unwrap_or_default())
    }

    async fn create_review(&self, _repo: &str, number: u64, review: &ReviewSubmission) -> Result<()> {
        self.with_state(|s| s.reviews.push((number, review.clone())))
    }

    async fn add_issue_comment(&self, _repo: &str, number: u64, body: &str) -> Result<()> {
        self.with_state(|s| s.comments.push((number, body.to_string())))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  GIT
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct ScmState {
    branches: Vec<String>,
    commits: Vec<String>,
    pushes: Vec<String>,
}

/// Records branch, commit and push calls. Every commit succeeds unless the
/// tree is marked clean.
#[derive(Default)]
pub struct FakeSourceControl {
    state: Mutex<ScmState>,
    clean: bool,
}

impl FakeSourceControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn clean() -> Arc<Self> {
        Arc::new(Self {
            clean: true,
            ..Self::default()
        })
    }

    pub fn branches(&self) -> Vec<String> {
        self.state.lock().map(|s| s.branches.clone()).unwrap_or_default()
    }

    pub fn commits(&self) -> Vec<String> {
        self.state.lock().map(|s| s.commits.clone()).unwrap_or_default()
    }

    pub fn pushes(&self) -> Vec<String> {
        self.state.lock().map(|s| s.pushes.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SourceControl for FakeSourceControl {
    async fn ensure_branch(&self, branch: &str) -> Result<bool> {
        let mut state = self.state.lock().map_err(|_| anyhow!("fake scm poisoned"))?;
        if state.branches.iter().any(|b| b == branch) {
            return Ok(false);
        }
        state.branches.push(branch.to_string());
        Ok(true)
    }

    async fn commit_all(&self, message: &str) -> Result<Option<String>> {
        if self.clean {
            return Ok(None);
        }
        let mut state = self.state.lock().map_err(|_| anyhow!("fake scm poisoned"))?;
        state.commits.push(message.to_string());
        Ok(Some(format!("{:07x}", state.commits.len())))
    }

    async fn push(&self, branch: &str) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| anyhow!("fake scm poisoned"))?;
        state.pushes.push(branch.to_string());
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  BUILD
// ═══════════════════════════════════════════════════════════════════════════

/// Replays build results; the last one repeats.
pub struct FakeBuildRunner {
    results: Mutex<VecDeque<BuildResult>>,
    checks: Mutex<usize>,
    installs: Mutex<Vec<String>>,
}

impl FakeBuildRunner {
    pub fn sequence(results: Vec<BuildResult>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results.into()),
            checks: Mutex::new(0),
            installs: Mutex::new(Vec::new()),
        })
    }

    pub fn passing() -> Arc<Self> {
        Self::sequence(vec![BuildResult::Passed])
    }

    pub fn failing(errors: &str) -> Arc<Self> {
        Self::sequence(vec![BuildResult::Failed {
            errors: errors.to_string(),
        }])
    }

    pub fn check_count(&self) -> usize {
        self.checks.lock().map(|c| *c).unwrap_or_default()
    }

    pub fn installs(&self) -> Vec<String> {
        self.installs.lock().map(|i| i.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl BuildRunner for FakeBuildRunner {
    async fn run_build_check(&self, _root: &Path, _settings: &RepoSettings) -> Result<BuildResult> {
        if let Ok(mut checks) = self.checks.lock() {
            *checks += 1;
        }
        let mut results = self.results.lock().map_err(|_| anyhow!("fake build poisoned"))?;
        let result = if results.len() > 1 {
            results.pop_front()
        } else {
            results.front().cloned()
        };
        Ok(result.unwrap_or(BuildResult::Passed))
    }

    async fn install_package(&self, _root: &Path, _settings: &RepoSettings, package: &str) -> Result<()> {
        if let Ok(mut installs) = self.installs.lock() {
            installs.push(package.to_string());
        }
        Ok(())
    }
}
