//! Build-error reports exchanged through PR comments.

use crate::util::tail_chars;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

const ERROR_HEADING: &str = "## Error Message";
const FENCE_OPEN: &str = "\n```\n";
const MAX_COMMENT_ERROR_CHARS: usize = 6000;

/// Build errors recovered from a PR comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildErrorReport {
    pub errors: String,
    pub attempt: u32,
}

/// Comment posted when the final build of a run fails.
pub fn build_error_comment(errors: &str, attempt: u32) -> String {
    format!(
        "JACoB here...\n\nThe build check failed after my changes. I'll take another look at it.\n\n{} (Attempt Number {}):\n{}{}\n```\n",
        ERROR_HEADING,
        attempt,
        FENCE_OPEN,
        tail_chars(errors.trim(), MAX_COMMENT_ERROR_CHARS)
    )
}

/// Parse the `## Error Message` section. The attempt number defaults to 1.
pub fn parse_build_error_comment(body: &str) -> Option<BuildErrorReport> {
    static ATTEMPT: OnceLock<Option<Regex>> = OnceLock::new();

    let (_, section) = body.split_once(ERROR_HEADING)?;
    let heading_end = section.find(FENCE_OPEN)?;
    let heading = &section[..heading_end];
    let attempt = ATTEMPT
        .get_or_init(|| Regex::new(r"Attempt\s+Number\s+(\d+)").ok())
        .as_ref()
        .and_then(|re| re.captures(heading))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(1);

    let rest = &section[heading_end + FENCE_OPEN.len()..];
    let errors = rest.split("```").next().unwrap_or_default().trim_end();
    Some(BuildErrorReport {
        errors: errors.to_string(),
        attempt,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildError {
    pub file_path: String,
    #[serde(default)]
    pub starting_line_number: usize,
    #[serde(default)]
    pub ending_line_number: usize,
    pub error: String,
    #[serde(default)]
    pub code: String,
}

/// Structured diagnosis of a failed build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildErrorAssessment {
    #[serde(default)]
    pub errors: Vec<BuildError>,
    #[serde(default)]
    pub needs_npm_install: bool,
    #[serde(default)]
    pub npm_package_to_install: Option<String>,
    #[serde(default)]
    pub files_to_update: Vec<String>,
    #[serde(default)]
    pub cause_of_error: String,
    #[serde(default)]
    pub ideas_for_fixing_error: String,
    #[serde(default)]
    pub suggested_fix: String,
}

impl BuildErrorAssessment {
    pub fn validate(&self) -> Result<(), String> {
        if self.needs_npm_install
            && self
                .npm_package_to_install
                .as_deref()
                .is_none_or(|p| p.trim().is_empty())
        {
            return Err("needsNpmInstall is true but npmPackageToInstall is empty".to_string());
        }
        if !self.needs_npm_install && self.files_to_update.is_empty() {
            return Err("filesToUpdate must list at least one file".to_string());
        }
        if let Some(bad) = self
            .errors
            .iter()
            .find(|e| e.ending_line_number < e.starting_line_number)
        {
            return Err(format!(
                "error in {} ends before it starts ({}-{})",
                bad.file_path, bad.starting_line_number, bad.ending_line_number
            ));
        }
        Ok(())
    }

    pub fn package_to_install(&self) -> Option<&str> {
        if !self.needs_npm_install {
            return None;
        }
        self.npm_package_to_install
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }

    pub fn commit_message(&self) -> String {
        format!(
            "JACoB fix error: {}",
            self.errors.first().map(|e| e.error.as_str()).unwrap_or_default()
        )
    }

    /// One line per error, as fed to the repair prompt.
    pub fn error_messages(&self) -> String {
        self.errors
            .iter()
            .map(|e| {
                format!(
                    "Error in {} ({}-{}): {}. Code: {}",
                    e.file_path, e.starting_line_number, e.ending_line_number, e.error, e.code
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Comment explaining a repair that could not be completed.
    pub fn failure_comment(&self) -> String {
        let mut comment = String::from(
            "JACoB here once again...\n\nUnfortunately, I wasn't able to resolve the error(s).\n\nHere is some information about the error(s):\n\n",
        );
        let errors = self.error_messages();
        if !errors.is_empty() {
            comment.push_str(&format!("{}\n\n", errors));
        }
        if !self.cause_of_error.is_empty() {
            comment.push_str(&format!("{}\n\n", self.cause_of_error));
        }
        if !self.ideas_for_fixing_error.is_empty() {
            comment.push_str(&format!(
                "Here are some ideas for fixing the error(s):\n\n{}\n\n",
                self.ideas_for_fixing_error
            ));
        }
        if !self.suggested_fix.is_empty() {
            comment.push_str(&format!(
                "Here is the suggested fix:\n\n{}\n",
                self.suggested_fix
            ));
        }
        comment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assessment() -> BuildErrorAssessment {
        serde_json::from_str(
            r#"{
                "errors": [{"filePath":"src/health.ts","startingLineNumber":3,"endingLineNumber":4,"error":"Cannot find name 'res'","code":"TS2304"}],
                "needsNpmInstall": false,
                "filesToUpdate": ["src/health.ts"],
                "causeOfError": "res is not declared",
                "ideasForFixingError": "pass res in",
                "suggestedFix": "add a parameter"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_comment_round_trips_errors_and_attempt() {
        let comment = build_error_comment("src/a.ts(1,1): error TS1005", 2);
        let report = parse_build_error_comment(&comment).unwrap();
        assert_eq!(report.attempt, 2);
        assert_eq!(report.errors, "src/a.ts(1,1): error TS1005");
    }

    #[test]
    fn test_attempt_defaults_to_one() {
        let body = "## Error Message:\n\n```\nboom\n```\n";
        let report = parse_build_error_comment(body).unwrap();
        assert_eq!(report.attempt, 1);
        assert_eq!(report.errors, "boom");
        assert_eq!(parse_build_error_comment("all good"), None);
    }

    #[test]
    fn test_assessment_messages() {
        let a = assessment();
        assert!(a.validate().is_ok());
        assert_eq!(a.commit_message(), "JACoB fix error: Cannot find name 'res'");
        assert_eq!(
            a.error_messages(),
            "Error in src/health.ts (3-4): Cannot find name 'res'. Code: TS2304"
        );
        assert!(a.failure_comment().starts_with("JACoB here once again..."));
        assert!(a
            .failure_comment()
            .contains("Error in src/health.ts (3-4): Cannot find name 'res'"));
        assert_eq!(a.package_to_install(), None);
    }

    #[test]
    fn test_assessment_validation() {
        let mut a = assessment();
        a.needs_npm_install = true;
        assert!(a.validate().is_err());
        a.npm_package_to_install = Some(" zod ".to_string());
        assert!(a.validate().is_ok());
        assert_eq!(a.package_to_install(), Some("zod"));

        let mut b = assessment();
        b.files_to_update.clear();
        assert!(b.validate().is_err());
    }
}
