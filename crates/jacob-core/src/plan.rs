//! Plans, plan steps and the PR changelog assembled from them.

use crate::source_map::{normalize_repo_path, SourceMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanStepKind {
    EditFiles,
    CreateNewCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    #[serde(rename = "type")]
    pub kind: PlanStepKind,
    pub title: String,
    pub file_path: String,
    pub instructions: String,
    #[serde(default)]
    pub exit_criteria: String,
}

impl PlanStep {
    pub fn is_new_file(&self) -> bool {
        self.kind == PlanStepKind::CreateNewCode
    }

    pub fn normalized_path(&self) -> String {
        normalize_repo_path(&self.file_path)
    }

    /// Per-file instructions handed to the patch prompt.
    pub fn file_plan(&self) -> String {
        format!(
            "Instructions for {}:\n\n{}\n\nExit Criteria:\n\n{}",
            self.file_path, self.instructions, self.exit_criteria
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// New-file steps must not target an existing path; edit steps must,
    /// counting files created by earlier steps of the same plan.
    pub fn validate(&self, source_map: &SourceMap) -> Result<(), String> {
        let mut created: BTreeSet<String> = BTreeSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            if step.file_path.trim().is_empty() {
                return Err(format!("step {} has an empty filePath", index + 1));
            }
            let path = step.normalized_path();
            let exists = source_map.contains(&step.file_path) || created.contains(&path);
            match step.kind {
                PlanStepKind::CreateNewCode if exists => {
                    return Err(format!(
                        "step {} is CreateNewCode but {} already exists",
                        index + 1,
                        step.file_path
                    ));
                }
                PlanStepKind::EditFiles if !exists => {
                    return Err(format!(
                        "step {} is EditFiles but {} does not exist",
                        index + 1,
                        step.file_path
                    ));
                }
                PlanStepKind::CreateNewCode => {
                    created.insert(path);
                }
                PlanStepKind::EditFiles => {}
            }
        }
        Ok(())
    }
}

/// Human-readable record of every step executed across iterations, used as
/// the PR body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeLog {
    body: String,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one iteration's steps under a "Changes Performed" heading.
    pub fn record_iteration(&mut self, steps: &[PlanStep]) {
        if steps.is_empty() {
            return;
        }
        self.body.push_str("## Changes Performed:\n\n");
        for (index, step) in steps.iter().enumerate() {
            self.body.push_str(&format!(
                "### Step {}: {}\n\n#### Files: \n\n{}\n\n#### Details: \n\n{}\n\n#### Exit Criteria\n\n{}\n\n\n",
                index + 1,
                step.title,
                step.file_path,
                step.instructions,
                step.exit_criteria
            ));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn step(kind: PlanStepKind, path: &str) -> PlanStep {
        PlanStep {
            kind,
            title: "Add health route".to_string(),
            file_path: path.to_string(),
            instructions: "Export a handler".to_string(),
            exit_criteria: "Returns 200".to_string(),
        }
    }

    fn map() -> SourceMap {
        SourceMap::flat(BTreeSet::from(["src/index.ts".to_string()]))
    }

    #[test]
    fn test_plan_step_deserializes_wire_shape() {
        let step: PlanStep = serde_json::from_str(
            r#"{"type":"CreateNewCode","title":"t","filePath":"src/a.ts","instructions":"i","exitCriteria":"e"}"#,
        )
        .unwrap();
        assert!(step.is_new_file());
        assert_eq!(step.file_plan(), "Instructions for src/a.ts:\n\ni\n\nExit Criteria:\n\ne");
    }

    #[test]
    fn test_plan_validation() {
        let ok = Plan {
            steps: vec![
                step(PlanStepKind::CreateNewCode, "src/health.ts"),
                step(PlanStepKind::EditFiles, "src/index.ts"),
            ],
        };
        assert!(ok.validate(&map()).is_ok());

        let create_existing = Plan {
            steps: vec![step(PlanStepKind::CreateNewCode, "src/index.ts")],
        };
        assert!(create_existing.validate(&map()).is_err());

        let edit_missing = Plan {
            steps: vec![step(PlanStepKind::EditFiles, "src/health.ts")],
        };
        assert!(edit_missing.validate(&map()).is_err());

        let edit_after_create = Plan {
            steps: vec![
                step(PlanStepKind::CreateNewCode, "./src/health.ts"),
                step(PlanStepKind::EditFiles, "src/health.ts"),
            ],
        };
        assert!(edit_after_create.validate(&map()).is_ok());
    }

    #[test]
    fn test_changelog_accumulates_iterations() {
        let mut log = ChangeLog::new();
        log.record_iteration(&[]);
        assert!(log.is_empty());

        log.record_iteration(&[step(PlanStepKind::CreateNewCode, "src/health.ts")]);
        log.record_iteration(&[step(PlanStepKind::EditFiles, "src/index.ts")]);
        assert_eq!(log.as_str().matches("## Changes Performed:").count(), 2);
        assert!(log.as_str().contains("### Step 1: Add health route\n\n#### Files: \n\nsrc/health.ts"));
        assert!(log.as_str().contains("#### Exit Criteria\n\nReturns 200"));
    }
}
