//! Plan requests.

use crate::llm::prompts::{plan_user, PlanPromptParams, PLAN_SYSTEM};
use crate::llm::{Gateway, GatewayError, RequestOptions};
use jacob_core::plan::Plan;
use jacob_core::source_map::SourceMap;

/// Inputs to one planning call. The patch log and build errors come from the
/// previous iteration and are empty on the first one.
#[derive(Debug, Clone, Copy)]
pub struct PlanningInput<'a> {
    pub issue_text: &'a str,
    pub source_map: &'a SourceMap,
    pub research: &'a str,
    pub code_patch: &'a str,
    pub build_errors: &'a str,
}

pub async fn create_plan(gateway: &Gateway, input: PlanningInput<'_>) -> Result<Plan, GatewayError> {
    let user = plan_user(&PlanPromptParams {
        issue_text: input.issue_text,
        source_map: &input.source_map.text,
        research: input.research,
        code_patch: input.code_patch,
        build_errors: input.build_errors,
    });
    let plan: Plan = gateway
        .send_structured_request(&user, PLAN_SYSTEM, RequestOptions::default(), |plan: &Plan| {
            plan.validate(input.source_map)
        })
        .await?;
    tracing::info!(steps = plan.steps.len(), "plan created");
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{gateway_with, ScriptedReply, ScriptedTransport};
    use jacob_core::events::MemoryEventSink;
    use jacob_core::plan::PlanStepKind;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_plan_includes_feedback_and_validates_kinds() {
        let map = SourceMap::flat(BTreeSet::from(["src/index.ts".to_string()]));
        let transport = ScriptedTransport::new(vec![
            // an edit step for a file that does not exist is rejected
            ScriptedReply::text(
                r#"{"steps":[{"type":"EditFiles","title":"t","filePath":"src/health.ts","instructions":"i"}]}"#,
            ),
            ScriptedReply::text(
                r#"{"steps":[{"type":"CreateNewCode","title":"Create health route","filePath":"src/health.ts","instructions":"Export a handler","exitCriteria":"Returns 200"}]}"#,
            ),
        ]);
        let gateway = gateway_with(transport.clone(), Arc::new(MemoryEventSink::new()));

        let plan = create_plan(
            &gateway,
            PlanningInput {
                issue_text: "Add a health check endpoint",
                source_map: &map,
                research: "",
                code_patch: "--- a/src/index.ts",
                build_errors: "TS2304: Cannot find name 'health'",
            },
        )
        .await
        .unwrap();

        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].kind, PlanStepKind::CreateNewCode);
        let user = transport.requests()[0].messages[1].flattened();
        assert!(user.contains("TS2304"));
        assert!(user.contains("--- a/src/index.ts"));
        assert_eq!(transport.call_count(), 2);
    }
}
