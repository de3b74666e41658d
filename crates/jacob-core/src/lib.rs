//! Core domain model for JACoB: issues, plans, patches and review data.
//!
//! Nothing in this crate performs I/O; adapters and the engine build on it.

pub mod branch;
pub mod diff;
pub mod events;
pub mod extracted;
pub mod files;
pub mod issue;
pub mod patch;
pub mod plan;
pub mod protocol;
pub mod repair;
pub mod review;
pub mod settings;
pub mod source_map;
pub mod util;

pub use events::{AgentEvent, EventEnvelope, EventSink, RunContext};
pub use extracted::{ExtractedIssueInfo, IssueType};
pub use issue::{Issue, ResearchItem};
pub use plan::{ChangeLog, Plan, PlanStep, PlanStepKind};
pub use protocol::{BuildResult, BuildRunner, GitHubApi, PullRequest, SourceControl};
pub use settings::RepoSettings;
pub use source_map::SourceMap;
