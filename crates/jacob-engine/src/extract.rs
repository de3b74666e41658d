//! Issue intent extraction.

use crate::llm::prompts::{extract_issue_user, EXTRACT_ISSUE_SYSTEM};
use crate::llm::{Gateway, GatewayError, RequestOptions};
use jacob_core::extracted::ExtractedIssueInfo;
use jacob_core::source_map::SourceMap;

/// Ask which files an issue touches. Responses naming a new file that already
/// exists, or an existing file that does not, are rejected and retried.
pub async fn extract_issue(
    gateway: &Gateway,
    source_map: &SourceMap,
    issue_text: &str,
) -> Result<ExtractedIssueInfo, GatewayError> {
    let info: ExtractedIssueInfo = gateway
        .send_structured_request(
            &extract_issue_user(&source_map.text, issue_text),
            EXTRACT_ISSUE_SYSTEM,
            RequestOptions::default(),
            |info: &ExtractedIssueInfo| info.validate(source_map),
        )
        .await?;

    tracing::info!(
        issue_type = ?info.issue_type,
        quality = info.issue_quality_score,
        create = info.files_to_create.len(),
        update = info.files_to_update.len(),
        "extracted issue intent"
    );
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{gateway_with, ScriptedReply, ScriptedTransport};
    use jacob_core::events::MemoryEventSink;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn source_map() -> SourceMap {
        SourceMap::flat(BTreeSet::from(["src/index.ts".to_string()]))
    }

    fn reply(create: &str, update: &str) -> ScriptedReply {
        ScriptedReply::text(format!(
            r#"{{"issueType":"FEATURE","issueQualityScore":4,"commitTitle":"Add health check","filesToCreate":[{}],"filesToUpdate":[{}],"stepsToAddressIssue":["Add the route"]}}"#,
            create, update
        ))
    }

    #[tokio::test]
    async fn test_conflicting_paths_are_retried() {
        let transport = ScriptedTransport::new(vec![
            reply(r#""src/index.ts""#, ""),
            reply("", r#""src/missing.ts""#),
            reply(r#""src/health.ts""#, r#""src/index.ts""#),
        ]);
        let gateway = gateway_with(transport.clone(), Arc::new(MemoryEventSink::new()));

        let info = extract_issue(&gateway, &source_map(), "Add a health check endpoint")
            .await
            .unwrap();
        assert_eq!(info.files_to_create, vec!["src/health.ts"]);
        assert_eq!(info.files_to_update, vec!["src/index.ts"]);
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn test_schema_violation_exhausts_retries() {
        let transport = ScriptedTransport::repeating(ScriptedReply::text(r#"{"issueType":"FEATURE"}"#));
        let gateway = gateway_with(transport.clone(), Arc::new(MemoryEventSink::new()));

        let err = extract_issue(&gateway, &source_map(), "Add a health check endpoint")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::StructuredRetriesExhausted { attempts: 4, .. }));
        assert_eq!(transport.call_count(), 4);
    }
}
