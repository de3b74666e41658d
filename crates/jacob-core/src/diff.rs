//! Added-line ranges from a unified PR diff.

use crate::source_map::normalize_repo_path;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Inclusive 1-based line range in the new version of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    pub fn contains(&self, line: usize) -> bool {
        (self.start..=self.end).contains(&line)
    }
}

pub type RangeMap = BTreeMap<String, Vec<LineRange>>;

pub fn range_contains(ranges: &RangeMap, path: &str, line: usize) -> bool {
    ranges
        .get(&normalize_repo_path(path))
        .is_some_and(|ranges| ranges.iter().any(|r| r.contains(line)))
}

fn hunk_new_start(line: &str) -> Option<usize> {
    static HEADER: OnceLock<Option<Regex>> = OnceLock::new();
    let re = HEADER
        .get_or_init(|| Regex::new(r"^@@ -\d+(?:,\d+)? \+(\d+)(?:,\d+)? @@").ok())
        .as_ref()?;
    re.captures(line)?.get(1)?.as_str().parse().ok()
}

/// Map each file in the diff to the ranges of lines it adds or modifies.
/// Deleted files are omitted.
pub fn new_or_modified_ranges(diff: &str) -> RangeMap {
    let mut map: RangeMap = BTreeMap::new();
    let mut file: Option<String> = None;
    let mut new_line = 0usize;
    let mut in_hunk = false;
    let mut after_old_header = false;

    for line in diff.lines() {
        let header_allowed = !in_hunk || after_old_header;
        after_old_header = line.starts_with("--- ");
        if line.starts_with("diff --git") {
            file = None;
            in_hunk = false;
            continue;
        }
        // a `+++ ` header only follows a `--- ` header; inside a hunk it is an added line
        if let Some(path) = line.strip_prefix("+++ ").filter(|_| header_allowed) {
            in_hunk = false;
            let path = path.trim();
            file = if path == "/dev/null" {
                None
            } else {
                Some(normalize_repo_path(path.strip_prefix("b/").unwrap_or(path)))
            };
            continue;
        }
        if line.starts_with("--- ") && !in_hunk {
            continue;
        }
        if let Some(start) = hunk_new_start(line) {
            new_line = start;
            in_hunk = true;
            continue;
        }
        if !in_hunk {
            continue;
        }
        let Some(path) = file.as_ref() else {
            continue;
        };

        if line.starts_with('+') {
            let ranges = map.entry(path.clone()).or_default();
            match ranges.last_mut() {
                Some(last) if last.end + 1 == new_line => last.end = new_line,
                _ => ranges.push(LineRange {
                    start: new_line,
                    end: new_line,
                }),
            }
            new_line += 1;
        } else if line.starts_with('-') || line.starts_with('\\') {
            // removed lines do not exist in the new file
        } else {
            new_line += 1;
        }
    }
    map
}
