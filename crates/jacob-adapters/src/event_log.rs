//! Event sinks backed by a JSONL file or by the tracing subscriber.

use anyhow::{Context, Result};
use async_trait::async_trait;
use fs2::FileExt;
use jacob_core::events::{AgentEvent, EventEnvelope, EventSink};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Appends one JSON object per event. Writers hold an exclusive lock so
/// concurrent runs never interleave lines.
#[derive(Debug, Clone)]
pub struct JsonlEventSink {
    path: PathBuf,
}

impl JsonlEventSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(path: &Path, row: &str) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create '{}'", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open event log '{}'", path.display()))?;
        FileExt::lock_exclusive(&file).context("Failed to lock event log")?;
        let written = writeln!(file, "{}", row);
        let _ = FileExt::unlock(&file);
        written.context("Failed to append to event log")
    }
}

#[async_trait]
impl EventSink for JsonlEventSink {
    async fn emit(&self, envelope: &EventEnvelope) -> Result<()> {
        let row = serde_json::to_string(envelope)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Self::append(&path, &row))
            .await
            .context("event log task panicked")?
    }
}

/// Reports events as structured log lines only.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn emit(&self, envelope: &EventEnvelope) -> Result<()> {
        let run_id = envelope.run.run_id.to_string();
        let repo = envelope.run.repo_full_name.as_str();
        match &envelope.event {
            AgentEvent::Prompt(p) => tracing::info!(
                %run_id, repo, model = %p.model, input_tokens = p.input_tokens,
                output_tokens = p.output_tokens, cost = p.cost, duration_ms = p.duration_ms,
                "prompt"
            ),
            AgentEvent::Code(c) => {
                tracing::info!(%run_id, repo, file = %c.file_path, "code")
            }
            AgentEvent::Plan(p) => tracing::info!(
                %run_id, repo, iteration = p.iteration, steps = p.plan.steps.len(), "plan"
            ),
            AgentEvent::PlanStep(s) => tracing::info!(
                %run_id, repo, iteration = s.iteration, index = s.index,
                file = %s.step.file_path, title = %s.step.title, "plan step"
            ),
            AgentEvent::Command(c) => tracing::info!(
                %run_id, repo, command = %c.command, exit_code = ?c.exit_code, "command"
            ),
        }
        Ok(())
    }
}

/// Fan an event out to several sinks. Every sink is tried; the first error
/// is returned.
pub struct MultiEventSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl MultiEventSink {
    pub fn new(sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl EventSink for MultiEventSink {
    async fn emit(&self, envelope: &EventEnvelope) -> Result<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(err) = sink.emit(envelope).await {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
