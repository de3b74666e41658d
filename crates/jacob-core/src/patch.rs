//! Patch delimiter protocol and unified-diff application.
//!
//! Code-change responses wrap their diff in `<code_patch>` tags. Full-file
//! rewrites use `<file_content>` tags. Diffs are applied with a tolerant hunk
//! matcher because model output rarely carries exact line numbers.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("patch contains no hunks")]
    NoHunks,
    #[error("hunk {index} did not match the file (first context line: {first_line:?})")]
    HunkNotFound { index: usize, first_line: String },
}

fn tag_regex(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

/// Contents of the first `<code_patch>` block, or `None` when the response
/// proposes no change.
pub fn extract_code_patch(response: &str) -> Option<String> {
    static CODE_PATCH: OnceLock<Option<Regex>> = OnceLock::new();
    let re = tag_regex(&CODE_PATCH, r"<code_patch>([\s\S]*?)</code_patch>")?;
    let patch = re.captures(response)?.get(1)?.as_str();
    let patch = strip_code_fence(patch);
    (!patch.trim().is_empty()).then(|| patch.to_string())
}

/// Contents of the first `<file_content>` block.
pub fn extract_file_content(response: &str) -> Option<String> {
    static FILE_CONTENT: OnceLock<Option<Regex>> = OnceLock::new();
    let re = tag_regex(&FILE_CONTENT, r"<file_content>([\s\S]*?)</file_content>")?;
    let content = re.captures(response)?.get(1)?.as_str();
    let content = strip_code_fence(content).trim_start_matches('\n');
    Some(ensure_trailing_newline(content.trim_end()))
}

/// Remove one surrounding ``` fence, if present.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return text.trim_matches('\n');
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => "",
    };
    body.strip_suffix("```").unwrap_or(body).trim_end_matches('\n')
}

fn ensure_trailing_newline(content: &str) -> String {
    if content.is_empty() || content.ends_with('\n') {
        content.to_string()
    } else {
        format!("{}\n", content)
    }
}

fn is_file_header(line: &str) -> bool {
    line.starts_with("--- ")
        || line.starts_with("+++ ")
        || line.starts_with("diff --git")
        || line.starts_with("index ")
        || line.starts_with("new file mode")
        || line.starts_with("deleted file mode")
        || line == "---"
        || line == "+++"
}

/// Turn a new-file diff into plain content: headers and hunk markers are
/// dropped, removed lines are skipped and `+` prefixes are stripped.
pub fn strip_diff_syntax(patch: &str) -> String {
    let mut out = Vec::new();
    for line in patch.lines() {
        if is_file_header(line) || line.starts_with("@@") || line.starts_with('\\') {
            continue;
        }
        if let Some(added) = line.strip_prefix('+') {
            out.push(added);
        } else if line.starts_with('-') {
            continue;
        } else if let Some(context) = line.strip_prefix(' ') {
            out.push(context);
        } else {
            out.push(line);
        }
    }
    ensure_trailing_newline(out.join("\n").trim_end())
}

/// True when content still looks like a diff rather than a source file.
pub fn has_diff_artifacts(content: &str) -> bool {
    content.lines().any(|line| {
        line.starts_with("@@")
            || line.starts_with("+++ ")
            || line.starts_with("--- ")
            || line.starts_with('+')
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Hunk {
    old_start: Option<usize>,
    lines: Vec<HunkLine>,
}

impl Hunk {
    fn old_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(s) | HunkLine::Remove(s) => Some(s.as_str()),
                HunkLine::Add(_) => None,
            })
            .collect()
    }

    fn new_lines(&self) -> Vec<String> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(s) | HunkLine::Add(s) => Some(s.clone()),
                HunkLine::Remove(_) => None,
            })
            .collect()
    }
}

fn parse_hunks(patch: &str) -> Vec<Hunk> {
    static HUNK_HEADER: OnceLock<Option<Regex>> = OnceLock::new();
    let header = tag_regex(&HUNK_HEADER, r"^@@ -(\d+)(?:,\d+)? \+\d+(?:,\d+)? @@");

    let mut hunks = Vec::new();
    let mut current: Option<Hunk> = None;
    for line in patch.lines() {
        if line.starts_with("@@") {
            if let Some(hunk) = current.take() {
                hunks.push(hunk);
            }
            let old_start = header
                .and_then(|re| re.captures(line))
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse::<usize>().ok());
            current = Some(Hunk {
                old_start,
                lines: Vec::new(),
            });
            continue;
        }
        if line.starts_with("--- ") || line.starts_with("+++ ") || line.starts_with("diff --git") {
            if let Some(hunk) = current.take() {
                hunks.push(hunk);
            }
            continue;
        }
        let Some(hunk) = current.as_mut() else {
            continue;
        };
        if line.starts_with('\\') {
            continue;
        }
        let parsed = if let Some(rest) = line.strip_prefix('+') {
            HunkLine::Add(rest.to_string())
        } else if let Some(rest) = line.strip_prefix('-') {
            HunkLine::Remove(rest.to_string())
        } else if let Some(rest) = line.strip_prefix(' ') {
            HunkLine::Context(rest.to_string())
        } else {
            HunkLine::Context(line.to_string())
        };
        hunk.lines.push(parsed);
    }
    if let Some(hunk) = current {
        hunks.push(hunk);
    }
    hunks.retain(|h| !h.lines.is_empty());

    // Trailing blank context lines are usually padding, not file content.
    for hunk in &mut hunks {
        while matches!(hunk.lines.last(), Some(HunkLine::Context(s)) if s.trim().is_empty()) {
            hunk.lines.pop();
        }
    }
    hunks
}

fn block_matches(file: &[String], at: usize, block: &[&str], loose: bool) -> bool {
    if at + block.len() > file.len() {
        return false;
    }
    block.iter().enumerate().all(|(i, expected)| {
        let actual = file[at + i].as_str();
        if loose {
            actual.trim() == expected.trim()
        } else {
            actual == *expected
        }
    })
}

fn find_block(file: &[String], block: &[&str], from: usize, hint: Option<usize>) -> Option<usize> {
    for loose in [false, true] {
        if let Some(hint) = hint {
            if hint >= from && block_matches(file, hint, block, loose) {
                return Some(hint);
            }
        }
        if let Some(pos) = (from..=file.len().saturating_sub(block.len()))
            .find(|&at| block_matches(file, at, block, loose))
        {
            return Some(pos);
        }
    }
    None
}

/// Apply a unified diff to `original`. Hunks are located by their context and
/// removed lines; the header line numbers are only a hint.
pub fn apply_unified_diff(original: &str, patch: &str) -> Result<String, PatchError> {
    let hunks = parse_hunks(patch);
    if hunks.is_empty() {
        return Err(PatchError::NoHunks);
    }

    let eol = if original.contains("\r\n") { "\r\n" } else { "\n" };
    let mut file: Vec<String> = original.lines().map(str::to_string).collect();
    let mut cursor = 0usize;
    let mut offset: isize = 0;

    for (index, hunk) in hunks.iter().enumerate() {
        let old = hunk.old_lines();
        let new = hunk.new_lines();
        let hint = hunk
            .old_start
            .map(|start| (start.saturating_sub(1) as isize + offset).max(0) as usize);

        let at = if old.is_empty() {
            hint.unwrap_or(file.len()).clamp(cursor, file.len())
        } else {
            find_block(&file, &old, cursor, hint).ok_or_else(|| PatchError::HunkNotFound {
                index: index + 1,
                first_line: old.first().map(|s| s.to_string()).unwrap_or_default(),
            })?
        };

        let new_len = new.len();
        file.splice(at..at + old.len(), new);
        offset += new_len as isize - old.len() as isize;
        cursor = at + new_len;
    }

    let mut out = file.join(eol);
    if original.ends_with('\n') || original.is_empty() {
        out.push_str(eol);
    }
    Ok(out)
}
