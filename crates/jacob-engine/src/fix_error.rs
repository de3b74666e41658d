//! Repair of a failed build reported in a PR comment.

use crate::error::{AgentError, AgentResult};
use crate::finalize::{check_and_commit, FinalizeOutcome, FinalizeRequest};
use crate::llm::prompts::{
    assess_build_error_user, code_fix_error_system, code_fix_error_user, FixErrorPromptParams,
    ASSESS_BUILD_ERROR_SYSTEM,
};
use crate::llm::RequestOptions;
use crate::review::linked_issue;
use crate::run::{RepoContext, RunTarget, Services};
use anyhow::anyhow;
use jacob_adapters::util::{read_repo_file, write_repo_file};
use jacob_core::files::{concatenate_files, parse_file_blocks, FILEPATH_MARKER};
use jacob_core::protocol::PullRequest;
use jacob_core::repair::{parse_build_error_comment, BuildErrorAssessment};

const MIN_FIX_RESPONSE_CHARS: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct FixErrorOutcome {
    pub attempt: u32,
    pub assessment: BuildErrorAssessment,
    pub installed_package: Option<String>,
    pub files_written: Vec<String>,
    pub finalized: FinalizeOutcome,
}

/// Diagnose the build errors in `comment_body` and push a fix to the PR
/// branch. When the fix fails an explanatory comment is posted on the PR
/// before the error is returned.
pub async fn fix_error(
    services: &Services,
    target: &RunTarget,
    pr: &PullRequest,
    comment_body: &str,
) -> AgentResult<FixErrorOutcome> {
    let report = parse_build_error_comment(comment_body).ok_or(AgentError::MissingBuildErrors)?;
    tracing::info!(pr = pr.number, attempt = report.attempt, "repairing build errors");

    let issue = linked_issue(services, target, pr).await;
    let repo = RepoContext::load(&target.root, &target.settings).await?;

    let assessment: BuildErrorAssessment = services
        .gateway
        .send_structured_request(
            &assess_build_error_user(&repo.source_map.text, &report.errors),
            ASSESS_BUILD_ERROR_SYSTEM,
            RequestOptions::default(),
            BuildErrorAssessment::validate,
        )
        .await?;
    tracing::info!(
        errors = assessment.errors.len(),
        files = assessment.files_to_update.len(),
        install = assessment.package_to_install().unwrap_or("-"),
        "assessed build errors"
    );

    let issue_body = issue.as_ref().map(|i| i.body_text().to_string()).unwrap_or_default();
    let result = apply_fix(services, target, pr, &repo, &assessment, &issue_body, report.attempt).await;

    match result {
        Ok((installed_package, files_written, finalized)) => Ok(FixErrorOutcome {
            attempt: report.attempt,
            assessment,
            installed_package,
            files_written,
            finalized,
        }),
        Err(err) => {
            tracing::error!(pr = pr.number, error = %err, "build error repair failed");
            if let Err(comment_err) = services
                .github
                .add_issue_comment(&target.repo, pr.number, &assessment.failure_comment())
                .await
            {
                tracing::warn!(error = %comment_err, "failed to post repair failure comment");
            }
            Err(err)
        }
    }
}

async fn apply_fix(
    services: &Services,
    target: &RunTarget,
    pr: &PullRequest,
    repo: &RepoContext,
    assessment: &BuildErrorAssessment,
    issue_body: &str,
    attempt: u32,
) -> AgentResult<(Option<String>, Vec<String>, FinalizeOutcome)> {
    let commit_message = assessment.commit_message();
    let mut installed = None;
    let mut written = Vec::new();

    if let Some(package) = assessment.package_to_install() {
        services
            .builder
            .install_package(&target.root, &target.settings, package)
            .await?;
        services
            .gateway
            .events()
            .command(&format!("install {}", package), &target.root.display().to_string(), Some(0), "")
            .await;
        installed = Some(package.to_string());
    } else {
        let mut files = Vec::new();
        for path in &assessment.files_to_update {
            match read_repo_file(&target.root, path)? {
                Some(content) => files.push((path.clone(), content)),
                None => tracing::warn!(file = %path, "file to update not found"),
            }
        }
        let code = concatenate_files(files.iter().map(|(p, c)| (p.as_str(), c.as_str())));

        let response = services
            .gateway
            .send_request(
                &code_fix_error_user(&FixErrorPromptParams {
                    code: &code,
                    issue_body,
                    error_messages: &assessment.error_messages(),
                    source_map: &repo.source_map.text,
                    types: &repo.types,
                    images: &repo.images_text(),
                }),
                &code_fix_error_system(),
                RequestOptions::default(),
            )
            .await?;
        if response.chars().count() < MIN_FIX_RESPONSE_CHARS || !response.contains(FILEPATH_MARKER) {
            return Err(AgentError::NoFixOutput);
        }

        for block in parse_file_blocks(&response).map_err(|e| anyhow!(e))? {
            write_repo_file(&target.root, &block.path, &block.content)?;
            services.gateway.events().code(&block.path, &block.content).await;
            written.push(block.path);
        }
    }

    let finalized = check_and_commit(
        services,
        target,
        FinalizeRequest {
            branch: &pr.head_ref,
            commit_message: &commit_message,
            existing_pr: Some(pr),
            build_error_attempt: Some(attempt),
            ..FinalizeRequest::default()
        },
    )
    .await?;
    Ok((installed, written, finalized))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        gateway_with, pull_request, FakeBuildRunner, FakeGitHub, FakeSourceControl,
        ScriptedReply, ScriptedTransport,
    };
    use jacob_core::events::MemoryEventSink;
    use jacob_core::repair::build_error_comment;
    use jacob_core::settings::RepoSettings;
    use std::sync::Arc;

    const ASSESS: &str = "diagnosing a failed build";
    const FIX: &str = "fixing build errors";

    struct Harness {
        _dir: tempfile::TempDir,
        services: Services,
        target: RunTarget,
        github: Arc<FakeGitHub>,
        scm: Arc<FakeSourceControl>,
        builder: Arc<FakeBuildRunner>,
        sink: Arc<MemoryEventSink>,
        pr: PullRequest,
    }

    fn harness(transport: Arc<ScriptedTransport>, builder: Arc<FakeBuildRunner>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/health.ts"), "export const health = () => { ok: true\n").unwrap();
        let github = FakeGitHub::new();
        let pr = pull_request(12, "jacob-issue-42", "jacob-ai-bot[bot]");
        github.add_pull_request(pr.clone(), "", &["src/health.ts"]);
        let scm = FakeSourceControl::new();
        let sink = Arc::new(MemoryEventSink::new());
        let services = Services {
            gateway: gateway_with(transport, sink.clone()),
            github: github.clone(),
            scm: scm.clone(),
            builder: builder.clone(),
        };
        Harness {
            target: RunTarget::new("acme/web", dir.path(), RepoSettings::default()),
            _dir: dir,
            services,
            github,
            scm,
            builder,
            sink,
            pr,
        }
    }

    fn assessment(install: Option<&str>) -> ScriptedReply {
        let install = match install {
            Some(p) => format!(r#""needsNpmInstall": true, "npmPackageToInstall": "{}""#, p),
            None => r#""needsNpmInstall": false"#.to_string(),
        };
        ScriptedReply::text(format!(
            r#"{{"errors":[{{"filePath":"src/health.ts","startingLineNumber":1,"endingLineNumber":1,"error":"'}}' expected","code":"export const health"}}],{},"filesToUpdate":["src/health.ts"],"causeOfError":"Unclosed brace"}}"#,
            install
        ))
    }

    #[tokio::test]
    async fn test_rewrites_files_and_commits_with_first_error() {
        let transport = ScriptedTransport::routed(vec![
            (ASSESS, vec![assessment(None)]),
            (FIX, vec![ScriptedReply::text("__FILEPATH__src/health.ts__\nexport const health = () => ({ ok: true });\n")]),
        ]);
        let h = harness(transport, FakeBuildRunner::passing());
        let comment = build_error_comment("src/health.ts(1,40): error TS1005: '}' expected.", 2);

        let outcome = fix_error(&h.services, &h.target, &h.pr, &comment).await.unwrap();

        assert_eq!(outcome.attempt, 2);
        assert_eq!(outcome.files_written, vec!["src/health.ts"]);
        let written = std::fs::read_to_string(h.target.root.join("src/health.ts")).unwrap();
        assert_eq!(written, "export const health = () => ({ ok: true });\n");
        assert_eq!(h.scm.commits(), vec!["JACoB fix error: '}' expected"]);
        assert_eq!(h.sink.count("code"), 1);
        assert!(!outcome.finalized.created);
        assert!(h.github.comments().is_empty());
    }

    #[tokio::test]
    async fn test_installs_missing_package() {
        let transport = ScriptedTransport::routed(vec![(ASSESS, vec![assessment(Some("zod"))])]);
        let h = harness(transport.clone(), FakeBuildRunner::passing());
        let comment = build_error_comment("Cannot find module 'zod'", 1);

        let outcome = fix_error(&h.services, &h.target, &h.pr, &comment).await.unwrap();
        assert_eq!(outcome.installed_package.as_deref(), Some("zod"));
        assert_eq!(h.builder.installs(), vec!["zod"]);
        assert_eq!(transport.calls_matching(FIX), 0);
        assert_eq!(h.sink.count("command"), 1);
    }

    #[tokio::test]
    async fn test_missing_code_posts_failure_comment() {
        let transport = ScriptedTransport::routed(vec![
            (ASSESS, vec![assessment(None)]),
            (FIX, vec![ScriptedReply::text("I could not fix this.")]),
        ]);
        let h = harness(transport, FakeBuildRunner::passing());
        let comment = build_error_comment("error TS1005", 1);

        let err = fix_error(&h.services, &h.target, &h.pr, &comment).await.unwrap_err();
        assert!(matches!(err, AgentError::NoFixOutput));
        let comments = h.github.comments();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].0, 12);
        assert!(comments[0].1.starts_with("JACoB here once again..."));
        assert!(comments[0].1.contains("Unclosed brace"));
        assert!(h.scm.commits().is_empty());
    }

    #[tokio::test]
    async fn test_still_failing_build_reports_next_attempt() {
        let transport = ScriptedTransport::routed(vec![
            (ASSESS, vec![assessment(None)]),
            (FIX, vec![ScriptedReply::text("__FILEPATH__src/health.ts__\nexport const health = 1;\n")]),
        ]);
        let h = harness(transport, FakeBuildRunner::failing("error TS2322"));
        let comment = build_error_comment("error TS1005", 3);

        fix_error(&h.services, &h.target, &h.pr, &comment).await.unwrap();
        let report = parse_build_error_comment(&h.github.comments()[0].1).unwrap();
        assert_eq!(report.attempt, 4);
        assert!(report.errors.contains("TS2322"));
    }

    #[tokio::test]
    async fn test_comment_without_error_section_is_rejected() {
        let h = harness(ScriptedTransport::new(vec![]), FakeBuildRunner::passing());
        let err = fix_error(&h.services, &h.target, &h.pr, "Please take a look").await.unwrap_err();
        assert!(matches!(err, AgentError::MissingBuildErrors));
    }
}
