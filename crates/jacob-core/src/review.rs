//! Review comment extraction and the review decision.

use crate::diff::{range_contains, RangeMap};
use crate::files::{parse_file_blocks, split_numbered_line, FileBlockError};
use crate::source_map::normalize_repo_path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const COMMENT_START: &str = "__COMMENT_START__";
pub const COMMENT_END: &str = "__COMMENT_END__";

pub const NO_ISSUES_BODY: &str =
    "I have performed a code review on this PR and found no issues. Looks good!";
pub const COMMENTS_BODY: &str =
    "I have performed a code review on this PR and I've added some comments.";
pub const SELF_FIX_NOTE: &str =
    "\nI will attempt to fix these issues and push up a new commit to the PR.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewComment {
    pub path: String,
    pub line: usize,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewEvent {
    Approve,
    RequestChanges,
    Comment,
}

/// Pull inline comments out of an annotated multi-file response. A comment
/// belongs to the numbered line immediately before it.
pub fn extract_review_comments(response: &str) -> Result<Vec<ReviewComment>, FileBlockError> {
    let blocks = parse_file_blocks(response)?;
    let mut comments = Vec::new();

    for block in blocks {
        let mut last_line = 1usize;
        let mut pending: Option<String> = None;

        for line in block.content.lines() {
            if let Some(open) = pending.as_mut() {
                match line.find(COMMENT_END) {
                    Some(end) => {
                        open.push('\n');
                        open.push_str(&line[..end]);
                        let body = pending.take().unwrap_or_default();
                        push_comment(&mut comments, &block.path, last_line, &body);
                    }
                    None => {
                        open.push('\n');
                        open.push_str(line);
                    }
                }
                continue;
            }

            if let Some(start) = line.find(COMMENT_START) {
                let rest = &line[start + COMMENT_START.len()..];
                match rest.find(COMMENT_END) {
                    Some(end) => push_comment(&mut comments, &block.path, last_line, &rest[..end]),
                    None => pending = Some(rest.to_string()),
                }
                continue;
            }

            if let Some((number, _)) = split_numbered_line(line) {
                last_line = number.max(1);
            }
        }

        if let Some(body) = pending {
            push_comment(&mut comments, &block.path, last_line, &body);
        }
    }
    Ok(comments)
}

fn push_comment(comments: &mut Vec<ReviewComment>, path: &str, line: usize, body: &str) {
    let body = body.trim();
    if body.is_empty() {
        return;
    }
    comments.push(ReviewComment {
        path: path.to_string(),
        line,
        body: body.to_string(),
    });
}

/// Comments split into those posted and those discarded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentSelection {
    pub kept: Vec<ReviewComment>,
    pub dropped: Vec<ReviewComment>,
}

/// Clamp each comment to its file's length, then keep only comments that land
/// on a new or modified line.
pub fn select_comments(
    proposed: Vec<ReviewComment>,
    ranges: &RangeMap,
    line_counts: &BTreeMap<String, usize>,
) -> CommentSelection {
    let mut selection = CommentSelection::default();
    for mut comment in proposed {
        comment.path = normalize_repo_path(&comment.path);
        if let Some(&len) = line_counts.get(&comment.path) {
            comment.line = comment.line.min(len.max(1));
        }
        if range_contains(ranges, &comment.path, comment.line) {
            selection.kept.push(comment);
        } else {
            selection.dropped.push(comment);
        }
    }
    selection
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewDecision {
    pub event: ReviewEvent,
    pub body: String,
}

/// Approve when nothing qualifies, otherwise request changes. A self-authored
/// PR cannot be approved or rejected by its author, so it gets a plain comment.
pub fn decide_review(comment_count: usize, self_authored: bool) -> ReviewDecision {
    let (event, body) = if comment_count == 0 {
        (ReviewEvent::Approve, NO_ISSUES_BODY.to_string())
    } else {
        let mut body = COMMENTS_BODY.to_string();
        if self_authored {
            body.push_str(SELF_FIX_NOTE);
        }
        (ReviewEvent::RequestChanges, body)
    };
    ReviewDecision {
        event: if self_authored {
            ReviewEvent::Comment
        } else {
            event
        },
        body,
    }
}
