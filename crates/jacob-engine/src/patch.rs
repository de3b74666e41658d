//! Per-step patch application: ask for a `<code_patch>`, turn it into file
//! content, write it, then commit and push one commit per step.

use crate::error::AgentResult;
use crate::llm::prompts::{
    apply_patch_fallback_user, code_edit_files_diff_system, code_edit_files_diff_user,
    new_file_content_user, CodeEditPromptParams, FILE_CONTENT_SYSTEM,
};
use crate::llm::RequestOptions;
use crate::run::{RepoContext, RunTarget, Services};
use jacob_adapters::util::{read_repo_file, write_repo_file};
use jacob_core::files::concatenate_files;
use jacob_core::patch::{
    apply_unified_diff, extract_code_patch, extract_file_content, has_diff_artifacts,
    strip_diff_syntax,
};
use jacob_core::plan::PlanStep;

/// Prompt context shared by every step of an iteration.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub branch: &'a str,
    pub issue_text: &'a str,
    pub research: &'a str,
    pub repo: &'a RepoContext,
    /// Patches applied by earlier steps of this iteration.
    pub code_patch: &'a str,
    pub snapshot_url: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedStep {
    pub patch: String,
    pub files_changed: Vec<ChangedFile>,
    pub commit: Option<String>,
}

pub struct PatchEngine<'a> {
    services: &'a Services,
    target: &'a RunTarget,
}

impl<'a> PatchEngine<'a> {
    pub fn new(services: &'a Services, target: &'a RunTarget) -> Self {
        Self { services, target }
    }

    /// `None` when the model proposed no change or the change could not be
    /// turned into file content. Neither aborts the run. `ctx.branch` must
    /// already be checked out.
    pub async fn apply_step(
        &self,
        step: &PlanStep,
        ctx: &StepContext<'_>,
    ) -> AgentResult<Option<AppliedStep>> {
        let path = step.normalized_path();
        let original = if step.is_new_file() {
            None
        } else {
            read_repo_file(&self.target.root, &path)?
        };
        let code = original
            .as_deref()
            .map(|content| concatenate_files([(path.as_str(), content)]))
            .unwrap_or_default();
        let plan = step.file_plan();

        let user = code_edit_files_diff_user(&CodeEditPromptParams {
            source_map: &ctx.repo.source_map.text,
            types: &ctx.repo.types,
            packages: &ctx.repo.packages,
            styles: &ctx.repo.styles,
            images: &ctx.repo.images_text(),
            code: &code,
            issue_text: ctx.issue_text,
            research: ctx.research,
            plan: &plan,
            code_patch: ctx.code_patch,
        });
        let response = self
            .services
            .gateway
            .send_vision_request(
                &user,
                &code_edit_files_diff_system(),
                ctx.snapshot_url,
                RequestOptions::default(),
            )
            .await?;

        let Some(patch) = extract_code_patch(&response) else {
            tracing::info!(file = %path, "No changes were made in this step.");
            return Ok(None);
        };

        let content = if step.is_new_file() {
            Some(self.new_file_content(&patch).await)
        } else {
            self.edited_file_content(&path, original.as_deref().unwrap_or_default(), &patch)
                .await
        };
        let Some(content) = content else {
            tracing::warn!(file = %path, "patch could not be applied, skipping step");
            return Ok(None);
        };

        write_repo_file(&self.target.root, &path, &content)?;
        self.services.gateway.events().code(&path, &content).await;

        let commit = self.services.scm.commit_all(&step.title).await?;
        match &commit {
            Some(id) => {
                self.services.scm.push(ctx.branch).await?;
                tracing::info!(file = %path, commit = %id, "committed step");
            }
            None => tracing::info!(file = %path, "step left the tree unchanged"),
        }

        Ok(Some(AppliedStep {
            patch,
            files_changed: vec![ChangedFile { path, content }],
            commit,
        }))
    }

    /// Full content for a new file. Falls back to stripping the diff locally
    /// when the model does not return clean content.
    async fn new_file_content(&self, patch: &str) -> String {
        let response = self
            .services
            .gateway
            .send_request(
                &new_file_content_user(patch),
                FILE_CONTENT_SYSTEM,
                RequestOptions::default(),
            )
            .await;
        match response.map(|r| extract_file_content(&r)) {
            Ok(Some(content)) if !has_diff_artifacts(&content) => content,
            Ok(_) => {
                tracing::warn!("file content response unusable, stripping diff locally");
                strip_diff_syntax(patch)
            }
            Err(err) => {
                tracing::warn!(error = %err, "file content request failed, stripping diff locally");
                strip_diff_syntax(patch)
            }
        }
    }

    /// Apply the diff; when its hunks do not match, ask for the whole file.
    async fn edited_file_content(&self, path: &str, original: &str, patch: &str) -> Option<String> {
        match apply_unified_diff(original, patch) {
            Ok(content) => return Some(content),
            Err(err) => tracing::info!(file = %path, error = %err, "diff did not apply, requesting full file"),
        }
        let response = self
            .services
            .gateway
            .send_request(
                &apply_patch_fallback_user(path, original, patch),
                FILE_CONTENT_SYSTEM,
                RequestOptions::default(),
            )
            .await;
        match response {
            Ok(text) => extract_file_content(&text),
            Err(err) => {
                tracing::warn!(file = %path, error = %err, "full file request failed");
                None
            }
        }
    }
}
