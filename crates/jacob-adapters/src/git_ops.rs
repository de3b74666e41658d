//! Git operations on a run's private checkout.
//!
//! Clone and push shell out to `git` so credentials and transports behave as
//! they do for a user; everything else goes through git2.

use crate::util::run_command_with_timeout;
use anyhow::{Context, Result};
use async_trait::async_trait;
use git2::{IndexAddOption, Repository, Signature};
use jacob_core::protocol::SourceControl;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

const GIT_CLONE_TIMEOUT_SECS: u64 = 600;
const GIT_PUSH_TIMEOUT_SECS: u64 = 180;
const MAX_GIT_REF_LENGTH: usize = 255;
const COMMIT_AUTHOR_NAME: &str = "jacob-ai-bot";
const COMMIT_AUTHOR_EMAIL: &str = "jacob-ai-bot@users.noreply.github.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchCreateOutcome {
    pub branch_name: String,
    pub created_new: bool,
}

fn open_repo_discover(repo_path: &Path) -> Result<Repository> {
    Repository::discover(repo_path).with_context(|| {
        format!(
            "Failed to open repository from path '{}'",
            repo_path.display()
        )
    })
}

/// HTTPS remote for `owner/name`, with the token embedded when given.
pub fn remote_url(full_name: &str, token: Option<&str>) -> String {
    match token {
        Some(token) if !token.is_empty() => format!(
            "https://x-access-token:{}@github.com/{}.git",
            token, full_name
        ),
        _ => format!("https://github.com/{}.git", full_name),
    }
}

fn redact(text: &str, token: Option<&str>) -> String {
    match token {
        Some(token) if !token.is_empty() => text.replace(token, "***"),
        _ => text.to_string(),
    }
}

/// Clone `owner/name` into `dest`, optionally checking out `branch`.
pub fn clone_repository(
    full_name: &str,
    token: Option<&str>,
    dest: &Path,
    branch: Option<&str>,
) -> Result<()> {
    if let Some(branch) = branch {
        if !is_valid_git_ref(branch) {
            return Err(anyhow::anyhow!("Invalid branch name '{}'", branch));
        }
    }
    let mut cmd = Command::new("git");
    cmd.arg("clone");
    if let Some(branch) = branch {
        cmd.args(["--branch", branch]);
    }
    cmd.arg(remote_url(full_name, token))
        .arg(dest)
        .env("GIT_TERMINAL_PROMPT", "0");

    let output = run_command_with_timeout(&mut cmd, Duration::from_secs(GIT_CLONE_TIMEOUT_SECS))
        .map_err(|e| anyhow::anyhow!("Failed to run git clone: {}", e))?;
    if output.timed_out {
        return Err(anyhow::anyhow!(
            "git clone of {} timed out after {}s",
            full_name,
            GIT_CLONE_TIMEOUT_SECS
        ));
    }
    if !output.success() {
        return Err(anyhow::anyhow!(
            "git clone of {} failed: {}",
            full_name,
            redact(output.stderr.trim(), token)
        ));
    }
    Ok(())
}

pub fn checkout_branch(repo_path: &Path, name: &str) -> Result<()> {
    let repo = open_repo_discover(repo_path)?;

    let (object, reference) = repo
        .revparse_ext(name)
        .context(format!("Branch '{}' not found", name))?;

    repo.checkout_tree(&object, None)?;

    match reference {
        Some(r) => repo.set_head(r.name().unwrap_or("HEAD"))?,
        None => repo.set_head_detached(object.id())?,
    }

    Ok(())
}

/// Check out `branch`: the local branch if present, else one tracking
/// `origin/{branch}`, else a new branch from HEAD.
pub fn ensure_branch(repo_path: &Path, branch: &str) -> Result<BranchCreateOutcome> {
    if !is_valid_git_ref(branch) {
        return Err(anyhow::anyhow!("Invalid branch name '{}'", branch));
    }
    let repo = open_repo_discover(repo_path)?;

    if repo.find_branch(branch, git2::BranchType::Local).is_ok() {
        if get_current_branch(repo_path).ok().as_deref() != Some(branch) {
            checkout_branch(repo_path, branch)?;
        }
        return Ok(BranchCreateOutcome {
            branch_name: branch.to_string(),
            created_new: false,
        });
    }

    let remote_ref = format!("origin/{}", branch);
    let (base_commit, created_new) =
        match repo.find_branch(&remote_ref, git2::BranchType::Remote) {
            Ok(remote) => (
                remote
                    .get()
                    .peel_to_commit()
                    .context("Failed to resolve remote branch commit")?,
                false,
            ),
            Err(_) => (
                repo.head()
                    .context("Failed to read HEAD")?
                    .peel_to_commit()
                    .context("Failed to resolve HEAD commit")?,
                true,
            ),
        };

    let mut local = repo
        .branch(branch, &base_commit, false)
        .context(format!("Failed to create branch '{}'", branch))?;
    if !created_new {
        local.set_upstream(Some(&remote_ref))?;
    }

    if let Err(error) = checkout_branch(repo_path, branch) {
        let _ = repo
            .find_branch(branch, git2::BranchType::Local)
            .and_then(|mut b| b.delete());
        return Err(anyhow::anyhow!(
            "Failed to checkout branch '{}': {}",
            branch,
            error
        ));
    }

    Ok(BranchCreateOutcome {
        branch_name: branch.to_string(),
        created_new,
    })
}

pub fn is_valid_git_ref(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_GIT_REF_LENGTH {
        return false;
    }

    // A leading hyphen would be read as a flag by the git CLI.
    if name.starts_with('-') {
        return false;
    }

    if name.starts_with('.') || name.ends_with('.') || name.ends_with('/') {
        return false;
    }

    if name.ends_with(".lock") {
        return false;
    }

    if name.contains("..") || name.contains("@{") || name.contains("//") {
        return false;
    }

    !name.chars().any(|c| {
        c.is_control()
            || matches!(
                c,
                ' ' | '~'
                    | '^'
                    | ':'
                    | '?'
                    | '*'
                    | '['
                    | '\\'
                    | '\''
                    | '"'
                    | '`'
                    | '$'
                    | '!'
                    | '&'
                    | ';'
                    | '|'
                    | '<'
                    | '>'
            )
    })
}

/// Stage every change in the working tree, including deletions.
pub fn stage_all(repo_path: &Path) -> Result<()> {
    let repo = open_repo_discover(repo_path)?;
    let mut index = repo.index()?;
    index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
    index.update_all(["*"].iter(), None)?;
    index.write()?;
    Ok(())
}

fn is_unborn(err: &git2::Error) -> bool {
    matches!(
        err.code(),
        git2::ErrorCode::UnbornBranch | git2::ErrorCode::NotFound
    )
}

/// Stage and commit everything. Returns `None` when the staged tree matches
/// HEAD, so a step that rewrote a file with identical content adds no commit.
pub fn commit_all(repo_path: &Path, message: &str) -> Result<Option<String>> {
    stage_all(repo_path)?;
    let repo = open_repo_discover(repo_path)?;
    let tree = repo.find_tree(repo.index()?.write_tree()?)?;

    let parent = match repo.head() {
        Ok(head) => Some(head.peel_to_commit()?),
        Err(err) if is_unborn(&err) => None,
        Err(err) => return Err(err.into()),
    };
    if parent.as_ref().map(|c| c.tree_id()) == Some(tree.id()) {
        return Ok(None);
    }

    let author = commit_signature(&repo)?;
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    let oid = repo
        .commit(Some("HEAD"), &author, &author, message, &tree, &parents)
        .with_context(|| format!("Failed to commit '{}'", message))?;
    Ok(Some(oid.to_string()))
}

/// The checkout's configured identity, else the bot account.
fn commit_signature(repo: &Repository) -> Result<Signature<'static>> {
    let config = repo.config()?;
    let name = config
        .get_string("user.name")
        .unwrap_or_else(|_| COMMIT_AUTHOR_NAME.to_string());
    let email = config
        .get_string("user.email")
        .unwrap_or_else(|_| COMMIT_AUTHOR_EMAIL.to_string());
    Ok(Signature::now(&name, &email)?)
}

/// Push `branch` to `origin`, setting upstream. Run checkouts are fresh
/// clones, so `origin` always carries the credentials used to clone.
pub fn push_branch(repo_path: &Path, branch: &str) -> Result<()> {
    if env_flag("JACOB_DISABLE_PUSH") {
        return Err(anyhow::anyhow!("Push blocked: JACOB_DISABLE_PUSH is set"));
    }
    if !is_valid_git_ref(branch) {
        return Err(anyhow::anyhow!("Invalid branch name '{}'", branch));
    }

    let refspec = format!("HEAD:refs/heads/{}", branch);
    let mut cmd = Command::new("git");
    cmd.current_dir(repo_path)
        .args(["push", "--set-upstream", "origin", &refspec])
        .env("GIT_TERMINAL_PROMPT", "0");

    let output = run_command_with_timeout(&mut cmd, Duration::from_secs(GIT_PUSH_TIMEOUT_SECS))
        .map_err(|e| anyhow::anyhow!("Failed to run git push: {}", e))?;
    if output.timed_out {
        return Err(anyhow::anyhow!(
            "Pushing {} timed out after {}s",
            branch,
            GIT_PUSH_TIMEOUT_SECS
        ));
    }
    if !output.success() {
        return Err(anyhow::anyhow!(
            "Pushing {} failed: {}",
            branch,
            redact_remote_credentials(output.stderr.trim())
        ));
    }
    tracing::debug!(branch, "pushed branch");
    Ok(())
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}

/// Mask `x-access-token:<token>@` userinfo that git echoes back in errors.
fn redact_remote_credentials(text: &str) -> String {
    const MARKER: &str = "x-access-token:";
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find(MARKER) {
        let after = &rest[pos + MARKER.len()..];
        out.push_str(&rest[..pos + MARKER.len()]);
        match after.find('@') {
            Some(at) => {
                out.push_str("***");
                rest = &after[at..];
            }
            None => {
                rest = after;
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn get_current_branch(repo_path: &Path) -> Result<String> {
    let repo = open_repo_discover(repo_path)?;
    let head = repo.head().context("Failed to read HEAD")?;
    head.shorthand()
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("HEAD does not name a branch"))
}

/// [`SourceControl`] over a local checkout. Blocking git work runs on the
/// blocking pool.
#[derive(Debug, Clone)]
pub struct LocalGit {
    root: PathBuf,
}

impl LocalGit {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T> + Send + 'static,
    {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || f(&root))
            .await
            .context("git task panicked")?
    }
}

#[async_trait]
impl SourceControl for LocalGit {
    async fn ensure_branch(&self, branch: &str) -> Result<bool> {
        let branch = branch.to_string();
        let outcome = self
            .blocking(move |root| ensure_branch(root, &branch))
            .await?;
        if outcome.created_new {
            tracing::info!(branch = %outcome.branch_name, "created working branch");
        }
        Ok(outcome.created_new)
    }

    async fn commit_all(&self, message: &str) -> Result<Option<String>> {
        let message = message.to_string();
        self.blocking(move |root| commit_all(root, &message)).await
    }

    async fn push(&self, branch: &str) -> Result<()> {
        let branch = branch.to_string();
        self.blocking(move |root| push_branch(root, &branch)).await
    }
}
