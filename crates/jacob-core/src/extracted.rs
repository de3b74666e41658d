//! Structured intent extracted from an issue.

use crate::source_map::SourceMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueType {
    #[serde(alias = "bug", alias = "Bug")]
    Bug,
    #[serde(alias = "feature", alias = "Feature")]
    Feature,
    #[serde(alias = "documentation", alias = "Documentation")]
    Documentation,
    #[serde(alias = "other", alias = "Other")]
    Other,
}

pub const MAX_QUALITY_SCORE: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedIssueInfo {
    pub issue_type: IssueType,
    pub issue_quality_score: f64,
    pub commit_title: String,
    #[serde(default)]
    pub files_to_create: Vec<String>,
    #[serde(default)]
    pub files_to_update: Vec<String>,
    #[serde(default)]
    pub files_to_delete: Vec<String>,
    #[serde(default)]
    pub steps_to_address_issue: Vec<String>,
}

impl ExtractedIssueInfo {
    /// Check the response against the checkout it was produced for.
    pub fn validate(&self, source_map: &SourceMap) -> Result<(), String> {
        if !self.issue_quality_score.is_finite()
            || !(0.0..=MAX_QUALITY_SCORE).contains(&self.issue_quality_score)
        {
            return Err(format!(
                "issueQualityScore must be between 0 and {}, got {}",
                MAX_QUALITY_SCORE, self.issue_quality_score
            ));
        }
        if self.commit_title.trim().is_empty() {
            return Err("commitTitle must not be empty".to_string());
        }
        if let Some(existing) = self
            .files_to_create
            .iter()
            .find(|path| source_map.contains(path))
        {
            return Err(format!(
                "filesToCreate contains {} which already exists",
                existing
            ));
        }
        if let Some(missing) = self
            .files_to_update
            .iter()
            .find(|path| !source_map.contains(path))
        {
            return Err(format!(
                "filesToUpdate contains {} which does not exist",
                missing
            ));
        }
        Ok(())
    }

    pub fn has_targets(&self) -> bool {
        !self.files_to_create.is_empty() || !self.files_to_update.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn map() -> SourceMap {
        SourceMap::flat(BTreeSet::from(["src/index.ts".to_string()]))
    }

    fn info() -> ExtractedIssueInfo {
        serde_json::from_str(
            r#"{
                "issueType": "FEATURE",
                "issueQualityScore": 4,
                "commitTitle": "Add health check",
                "filesToCreate": ["src/health.ts"],
                "filesToUpdate": ["src/index.ts"]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_valid_response_passes() {
        let info = info();
        assert_eq!(info.issue_type, IssueType::Feature);
        assert!(info.files_to_delete.is_empty());
        assert!(info.validate(&map()).is_ok());
        assert!(info.has_targets());
    }

    #[test]
    fn test_rejects_creating_existing_file() {
        let mut info = info();
        info.files_to_create = vec!["./src/index.ts".to_string()];
        let err = info.validate(&map()).unwrap_err();
        assert!(err.contains("already exists"));
    }

    #[test]
    fn test_rejects_updating_missing_file() {
        let mut info = info();
        info.files_to_update = vec!["src/missing.ts".to_string()];
        assert!(info.validate(&map()).unwrap_err().contains("does not exist"));
    }

    #[test]
    fn test_rejects_out_of_range_score() {
        let mut info = info();
        info.issue_quality_score = 7.5;
        assert!(info.validate(&map()).is_err());
    }

    #[test]
    fn test_no_targets() {
        let mut info = info();
        info.files_to_create.clear();
        info.files_to_update.clear();
        assert!(!info.has_targets());
    }
}
