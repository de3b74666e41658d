//! Working-branch naming.

use regex::Regex;
use std::sync::OnceLock;

const BRANCH_PREFIX: &str = "jacob-issue-";

/// Deterministic working branch for an issue. Every run for the same issue
/// targets the same branch.
pub fn jacob_branch_name(issue_number: u64) -> String {
    format!("{}{}", BRANCH_PREFIX, issue_number)
}

/// Recover the issue number from `jacob-issue-{n}` or `jacob-issue-{n}-{suffix}`.
pub fn issue_number_from_branch(branch: &str) -> Option<u64> {
    static BRANCH_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = BRANCH_RE
        .get_or_init(|| Regex::new(r"(?:^|/)jacob-issue-(\d+)(?:-|$)").ok())
        .as_ref()?;
    re.captures(branch)?.get(1)?.as_str().parse().ok()
}

pub fn is_jacob_branch(branch: &str) -> bool {
    issue_number_from_branch(branch).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_name_round_trips_issue_number() {
        let branch = jacob_branch_name(42);
        assert_eq!(branch, "jacob-issue-42");
        assert_eq!(issue_number_from_branch(&branch), Some(42));
    }

    #[test]
    fn test_issue_number_from_suffixed_branch() {
        assert_eq!(issue_number_from_branch("jacob-issue-7-1718000000"), Some(7));
        assert_eq!(issue_number_from_branch("origin/jacob-issue-12"), Some(12));
    }

    #[test]
    fn test_non_jacob_branches() {
        assert_eq!(issue_number_from_branch("main"), None);
        assert_eq!(issue_number_from_branch("feature/jacob-issue-x"), None);
        assert!(!is_jacob_branch("jacob-issue-12abc"));
    }
}
