//! Automated review of an existing pull request.

use crate::error::{AgentError, AgentResult};
use crate::llm::prompts::{code_review_system, code_review_user, CodeReviewPromptParams};
use crate::llm::RequestOptions;
use crate::run::{RunTarget, Services};
use anyhow::anyhow;
use jacob_adapters::source::{get_source_map, get_types};
use jacob_adapters::util::read_repo_file;
use jacob_core::branch::issue_number_from_branch;
use jacob_core::diff::{new_or_modified_ranges, RangeMap};
use jacob_core::files::{add_line_numbers, concatenate_files, line_count_map, FILEPATH_MARKER};
use jacob_core::issue::Issue;
use jacob_core::protocol::{PullRequest, ReviewSubmission};
use jacob_core::review::{decide_review, extract_review_comments, select_comments, ReviewEvent};
use std::collections::BTreeMap;

/// Shortest review response that can hold a file marker and a comment.
const MIN_REVIEW_RESPONSE_CHARS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewOutcome {
    pub event: ReviewEvent,
    pub comments_posted: usize,
    pub comments_dropped: usize,
}

/// True when the PR was opened by the account the review is posted as.
pub fn is_self_authored(pr: &PullRequest, bot_username: Option<&str>) -> bool {
    let Some(bot) = bot_username.map(str::trim).filter(|b| !b.is_empty()) else {
        return false;
    };
    let strip = |login: &str| login.trim_end_matches("[bot]").to_ascii_lowercase();
    strip(&pr.author_login) == strip(bot)
}

/// PR files with line numbers, plus the line count of each.
fn numbered_pr_files(
    target: &RunTarget,
    files: &[String],
    ranges: &RangeMap,
) -> AgentResult<(String, BTreeMap<String, usize>)> {
    let mut contents = Vec::new();
    for path in files {
        if !ranges.contains_key(path) {
            continue;
        }
        match read_repo_file(&target.root, path)? {
            Some(content) => contents.push((path.clone(), content)),
            None => tracing::debug!(file = %path, "PR file missing from checkout"),
        }
    }
    let numbered: Vec<(String, String)> = contents
        .iter()
        .map(|(path, content)| (path.clone(), add_line_numbers(content)))
        .collect();
    let code = concatenate_files(numbered.iter().map(|(p, c)| (p.as_str(), c.as_str())));
    let counts = line_count_map(contents.iter().map(|(p, c)| (p.as_str(), c.as_str())));
    Ok((code, counts))
}

pub(crate) async fn linked_issue(services: &Services, target: &RunTarget, pr: &PullRequest) -> Option<Issue> {
    let number = issue_number_from_branch(&pr.head_ref)?;
    match services.github.get_issue(&target.repo, number).await {
        Ok(issue) => {
            tracing::info!(issue = number, pr = pr.number, "loaded issue linked to PR");
            Some(issue)
        }
        Err(err) => {
            tracing::warn!(issue = number, error = %err, "could not load linked issue");
            None
        }
    }
}

/// Review the new and modified lines of `pr` and submit the review.
pub async fn code_review(
    services: &Services,
    target: &RunTarget,
    pr: &PullRequest,
    bot_username: Option<&str>,
) -> AgentResult<ReviewOutcome> {
    let issue = linked_issue(services, target, pr).await;
    if issue.is_none() {
        tracing::info!(pr = pr.number, branch = %pr.head_ref, "no issue associated with PR branch");
    }

    let root = target.root.clone();
    let settings = target.settings.clone();
    let (source_map, types) =
        tokio::task::spawn_blocking(move || (get_source_map(&root), get_types(&root, &settings)))
            .await
            .map_err(|e| anyhow!("source extraction task failed: {}", e))?;

    let diff = services
        .github
        .get_pull_request_diff(&target.repo, pr.number)
        .await?;
    let ranges = new_or_modified_ranges(&diff);
    let files = services
        .github
        .list_pull_request_files(&target.repo, pr.number)
        .await?;
    let (code, line_counts) = numbered_pr_files(target, &files, &ranges)?;

    let pr_title_and_body = format!("{}\n{}", pr.title, pr.body.as_deref().unwrap_or_default());
    let issue_text = issue.as_ref().map(Issue::issue_text).unwrap_or_default();
    let response = services
        .gateway
        .send_request(
            &code_review_user(&CodeReviewPromptParams {
                source_map: &source_map.text,
                types: &types,
                code: &code,
                pr_title_and_body: &pr_title_and_body,
                issue_text: &issue_text,
            }),
            &code_review_system(),
            RequestOptions::default(),
        )
        .await?;

    if response.chars().count() < MIN_REVIEW_RESPONSE_CHARS || !response.contains(FILEPATH_MARKER) {
        tracing::warn!(pr = pr.number, "review response had no annotated files");
        return Err(AgentError::NoReviewOutput);
    }

    let proposed = extract_review_comments(&response).map_err(|e| anyhow!(e))?;
    let selection = select_comments(proposed, &ranges, &line_counts);
    for comment in &selection.dropped {
        tracing::warn!(
            file = %comment.path,
            line = comment.line,
            "Comment does not apply to new or modified code (ignoring)"
        );
    }

    let decision = decide_review(selection.kept.len(), is_self_authored(pr, bot_username));
    let outcome = ReviewOutcome {
        event: decision.event,
        comments_posted: selection.kept.len(),
        comments_dropped: selection.dropped.len(),
    };
    services
        .github
        .create_review(
            &target.repo,
            pr.number,
            &ReviewSubmission {
                body: decision.body,
                event: decision.event,
                comments: selection.kept,
            },
        )
        .await?;
    tracing::info!(pr = pr.number, event = ?outcome.event, comments = outcome.comments_posted, "review submitted");
    Ok(outcome)
}
