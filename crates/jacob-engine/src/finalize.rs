//! Commit, push and open or update the pull request for a run.

use crate::error::AgentResult;
use crate::run::{RunTarget, Services};
use anyhow::Context;
use jacob_core::protocol::{BuildResult, NewPullRequest, PullRequest, PullRequestUpdate};
use jacob_core::repair::build_error_comment;

/// What to commit and how the pull request should read.
#[derive(Debug, Clone, Default)]
pub struct FinalizeRequest<'a> {
    pub branch: &'a str,
    pub commit_message: &'a str,
    /// Title and body for a newly created PR. An existing PR keeps its own
    /// when these are `None`.
    pub pr_title: Option<&'a str>,
    pub pr_body: Option<&'a str>,
    pub reviewers: &'a [String],
    /// Known PR for the branch; looked up by head otherwise.
    pub existing_pr: Option<&'a PullRequest>,
    /// Result of a build already run on the final tree.
    pub build: Option<BuildResult>,
    /// Attempt number of the build error being repaired, if any.
    pub build_error_attempt: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeOutcome {
    pub pull_request: PullRequest,
    pub created: bool,
    pub commit: Option<String>,
    pub build: BuildResult,
}

/// Commit any remaining changes, push, then create the PR or update the
/// existing one. A failing build is reported on the PR as a comment that the
/// repair flow can pick up.
pub async fn check_and_commit(
    services: &Services,
    target: &RunTarget,
    request: FinalizeRequest<'_>,
) -> AgentResult<FinalizeOutcome> {
    let build = match request.build {
        Some(build) => build,
        None => {
            services
                .builder
                .run_build_check(&target.root, &target.settings)
                .await?
        }
    };

    services.scm.ensure_branch(request.branch).await?;
    let commit = services.scm.commit_all(request.commit_message).await?;
    if commit.is_some() {
        services.scm.push(request.branch).await?;
    }

    let existing = match request.existing_pr {
        Some(pr) => Some(pr.clone()),
        None => services
            .github
            .find_open_pull_request(&target.repo, request.branch)
            .await?,
    };

    let (pull_request, created) = match existing {
        Some(pr) => {
            let update = PullRequestUpdate {
                title: request.pr_title.map(str::to_string),
                body: request.pr_body.map(str::to_string),
            };
            let pr = if update.title.is_some() || update.body.is_some() {
                services
                    .github
                    .update_pull_request(&target.repo, pr.number, &update)
                    .await
                    .with_context(|| format!("failed to update PR #{}", pr.number))?
            } else {
                pr
            };
            tracing::info!(pr = pr.number, "updated existing pull request");
            (pr, false)
        }
        None => {
            let base = services.github.get_default_branch(&target.repo).await?;
            let title = request.pr_title.unwrap_or(request.commit_message);
            let pr = services
                .github
                .create_pull_request(
                    &target.repo,
                    &NewPullRequest {
                        title: title.to_string(),
                        body: request.pr_body.unwrap_or_default().to_string(),
                        head: request.branch.to_string(),
                        base,
                        draft: false,
                    },
                )
                .await
                .context("failed to create pull request")?;
            tracing::info!(pr = pr.number, url = %pr.html_url, "opened pull request");
            if let Err(err) = services
                .github
                .request_reviewers(&target.repo, pr.number, request.reviewers)
                .await
            {
                tracing::warn!(pr = pr.number, error = %err, "failed to request reviewers");
            }
            (pr, true)
        }
    };

    if let Some(errors) = build.errors() {
        let attempt = request.build_error_attempt.map_or(1, |n| n + 1);
        tracing::warn!(pr = pull_request.number, attempt, "final build failed");
        services
            .github
            .add_issue_comment(
                &target.repo,
                pull_request.number,
                &build_error_comment(errors, attempt),
            )
            .await?;
    }

    Ok(FinalizeOutcome {
        pull_request,
        created,
        commit,
        build,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        gateway_with, pull_request, FakeBuildRunner, FakeGitHub, FakeSourceControl,
        ScriptedTransport,
    };
    use jacob_core::events::MemoryEventSink;
    use jacob_core::repair::parse_build_error_comment;
    use jacob_core::settings::RepoSettings;
    use std::sync::Arc;

    fn services(
        github: Arc<FakeGitHub>,
        scm: Arc<FakeSourceControl>,
        builder: Arc<FakeBuildRunner>,
    ) -> Services {
        Services {
            gateway: gateway_with(ScriptedTransport::new(vec![]), Arc::new(MemoryEventSink::new())),
            github,
            scm,
            builder,
        }
    }

    fn target() -> RunTarget {
        RunTarget::new("acme/web", "/tmp/unused", RepoSettings::default())
    }

    #[tokio::test]
    async fn test_finalizing_twice_updates_the_same_pr() {
        let github = FakeGitHub::new();
        let scm = FakeSourceControl::new();
        let svc = services(github.clone(), scm.clone(), FakeBuildRunner::passing());
        let reviewers = vec!["octocat".to_string()];
        let request = FinalizeRequest {
            branch: "jacob-issue-42",
            commit_message: "JACoB PR for Issue Add a health check endpoint",
            pr_title: Some("JACoB PR for Issue Add a health check endpoint"),
            pr_body: Some("## Changes Performed:"),
            reviewers: &reviewers,
            ..FinalizeRequest::default()
        };

        let first = check_and_commit(&svc, &target(), request.clone()).await.unwrap();
        let second = check_and_commit(&svc, &target(), request).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.pull_request.number, second.pull_request.number);
        assert_eq!(github.pull_requests().len(), 1);
        assert_eq!(github.created_count(), 1);
        assert_eq!(github.updated_count(), 1);
        assert_eq!(github.requested_reviewers(), vec![(first.pull_request.number, reviewers)]);
        assert_eq!(scm.pushes().len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_reviewers_still_returns_pr() {
        let github = FakeGitHub::rejecting_reviewers();
        let svc = services(github.clone(), FakeSourceControl::new(), FakeBuildRunner::passing());
        let reviewers = vec!["outside-contributor".to_string()];

        let outcome = check_and_commit(
            &svc,
            &target(),
            FinalizeRequest {
                branch: "jacob-issue-42",
                commit_message: "JACoB PR for Issue Add a health check endpoint",
                reviewers: &reviewers,
                ..FinalizeRequest::default()
            },
        )
        .await
        .unwrap();

        assert!(outcome.created);
        assert_eq!(github.pull_requests().len(), 1);
        assert!(github.requested_reviewers().is_empty());
        assert!(github.comments().is_empty());
    }

    #[tokio::test]
    async fn test_failed_build_posts_attempt_comment() {
        let github = FakeGitHub::new();
        let existing = pull_request(7, "jacob-issue-42", "jacob-ai-bot[bot]");
        github.add_pull_request(existing.clone(), "", &[]);
        let svc = services(
            github.clone(),
            FakeSourceControl::new(),
            FakeBuildRunner::failing("src/health.ts(1,1): error TS1005"),
        );

        let outcome = check_and_commit(
            &svc,
            &target(),
            FinalizeRequest {
                branch: "jacob-issue-42",
                commit_message: "JACoB fix error: TS1005",
                existing_pr: Some(&existing),
                build_error_attempt: Some(1),
                ..FinalizeRequest::default()
            },
        )
        .await
        .unwrap();

        assert!(!outcome.build.is_success());
        assert_eq!(github.updated_count(), 0);
        let comments = github.comments();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].0, 7);
        let report = parse_build_error_comment(&comments[0].1).unwrap();
        assert_eq!(report.attempt, 2);
        assert!(report.errors.contains("TS1005"));
    }

    #[tokio::test]
    async fn test_clean_tree_skips_push() {
        let github = FakeGitHub::new();
        github.add_pull_request(pull_request(3, "jacob-issue-9", "someone"), "", &[]);
        let scm = FakeSourceControl::clean();
        let svc = services(github, scm.clone(), FakeBuildRunner::passing());

        let outcome = check_and_commit(
            &svc,
            &target(),
            FinalizeRequest {
                branch: "jacob-issue-9",
                commit_message: "noop",
                build: Some(BuildResult::Passed),
                ..FinalizeRequest::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(outcome.commit, None);
        assert!(scm.pushes().is_empty());
        assert_eq!(outcome.pull_request.number, 3);
    }
}
