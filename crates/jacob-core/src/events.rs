//! Observability events emitted during a run.
//!
//! Events travel through an [`EventSink`] handed to each component. Sinks are
//! a side channel: callers log a failed emission and carry on.

use crate::plan::{Plan, PlanStep};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

/// Identifies the run an event belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunContext {
    pub run_id: Uuid,
    pub repo_full_name: String,
    pub issue_number: Option<u64>,
    pub pull_request_number: Option<u64>,
}

impl RunContext {
    pub fn new(repo_full_name: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            repo_full_name: repo_full_name.into(),
            issue_number: None,
            pull_request_number: None,
        }
    }

    pub fn with_issue(mut self, number: u64) -> Self {
        self.issue_number = Some(number);
        self
    }

    pub fn with_pull_request(mut self, number: u64) -> Self {
        self.pull_request_number = Some(number);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptMessage {
    pub prompt_type: String,
    pub prompt: String,
}

/// One completed model call with its usage and cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptEvent {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub duration_ms: u64,
    pub request_prompts: Vec<PromptMessage>,
    pub response_prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeEvent {
    pub file_name: String,
    pub file_path: String,
    pub language: Option<String>,
    pub code_block: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanEvent {
    pub iteration: usize,
    pub plan: Plan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStepEvent {
    pub iteration: usize,
    pub index: usize,
    pub step: PlanStep,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEvent {
    pub command: String,
    pub directory: String,
    pub exit_code: Option<i32>,
    pub response: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Prompt(PromptEvent),
    Code(CodeEvent),
    Plan(PlanEvent),
    PlanStep(PlanStepEvent),
    Command(CommandEvent),
}

impl AgentEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::Prompt(_) => "prompt",
            AgentEvent::Code(_) => "code",
            AgentEvent::Plan(_) => "plan",
            AgentEvent::PlanStep(_) => "plan_step",
            AgentEvent::Command(_) => "command",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub run: RunContext,
    pub at: DateTime<Utc>,
    pub event: AgentEvent,
}

impl EventEnvelope {
    pub fn new(run: &RunContext, event: AgentEvent) -> Self {
        Self {
            run: run.clone(),
            at: Utc::now(),
            event,
        }
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, envelope: &EventEnvelope) -> anyhow::Result<()>;
}

/// Sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<EventEnvelope>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AgentEvent> {
        self.events
            .lock()
            .map(|events| events.iter().map(|e| e.event.clone()).collect())
            .unwrap_or_default()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events().iter().filter(|e| e.kind() == kind).count()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn emit(&self, envelope: &EventEnvelope) -> anyhow::Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow::anyhow!("event store lock poisoned"))?
            .push(envelope.clone());
        Ok(())
    }
}
