//! Event emission for a single run. Sink failures are logged and swallowed
//! so observability never breaks the success path.

use jacob_core::events::{
    AgentEvent, CodeEvent, CommandEvent, EventEnvelope, EventSink, PlanEvent, PlanStepEvent,
    PromptEvent, RunContext,
};
use jacob_core::plan::{Plan, PlanStep};
use jacob_core::util::{file_name_of, language_for_path};
use std::sync::Arc;

#[derive(Clone)]
pub struct Events {
    sink: Arc<dyn EventSink>,
    run: RunContext,
}

impl Events {
    pub fn new(sink: Arc<dyn EventSink>, run: RunContext) -> Self {
        Self { sink, run }
    }

    pub fn run(&self) -> &RunContext {
        &self.run
    }

    pub async fn emit(&self, event: AgentEvent) {
        let kind = event.kind();
        let envelope = EventEnvelope::new(&self.run, event);
        if let Err(err) = self.sink.emit(&envelope).await {
            tracing::warn!(
                run_id = %self.run.run_id,
                kind,
                error = %err,
                "failed to emit event"
            );
        }
    }

    pub async fn prompt(&self, event: PromptEvent) {
        self.emit(AgentEvent::Prompt(event)).await;
    }

    pub async fn code(&self, file_path: &str, content: &str) {
        self.emit(AgentEvent::Code(code_event(file_path, content)))
            .await;
    }

    pub async fn plan(&self, iteration: usize, plan: &Plan) {
        self.emit(AgentEvent::Plan(PlanEvent {
            iteration,
            plan: plan.clone(),
        }))
        .await;
    }

    pub async fn plan_step(&self, iteration: usize, index: usize, step: &PlanStep) {
        self.emit(AgentEvent::PlanStep(PlanStepEvent {
            iteration,
            index,
            step: step.clone(),
        }))
        .await;
    }

    pub async fn command(&self, command: &str, directory: &str, exit_code: Option<i32>, response: &str) {
        self.emit(AgentEvent::Command(CommandEvent {
            command: command.to_string(),
            directory: directory.to_string(),
            exit_code,
            response: response.to_string(),
        }))
        .await;
    }
}

pub fn code_event(file_path: &str, content: &str) -> CodeEvent {
    CodeEvent {
        file_name: file_name_of(file_path).to_string(),
        file_path: file_path.to_string(),
        language: language_for_path(file_path).map(str::to_string),
        code_block: content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use jacob_core::events::MemoryEventSink;

    struct FailingSink;

    #[async_trait]
    impl EventSink for FailingSink {
        async fn emit(&self, _envelope: &EventEnvelope) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("disk full"))
        }
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_propagate() {
        let events = Events::new(Arc::new(FailingSink), RunContext::new("acme/api"));
        events.code("src/a.ts", "x").await;
    }

    #[tokio::test]
    async fn test_code_event_fields() {
        let sink = Arc::new(MemoryEventSink::new());
        let events = Events::new(sink.clone(), RunContext::new("acme/api").with_issue(42));
        events.code("src/health.ts", "export {}").await;
        match &sink.events()[0] {
            AgentEvent::Code(code) => {
                assert_eq!(code.file_name, "health.ts");
                assert_eq!(code.file_path, "src/health.ts");
                assert_eq!(code.language.as_deref(), Some("typescript"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
