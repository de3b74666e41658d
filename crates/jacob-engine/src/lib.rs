//! Orchestration for JACoB: the LLM gateway and the flows built on it.

pub mod agent;
pub mod error;
pub mod events;
pub mod extract;
pub mod finalize;
pub mod fix_error;
pub mod llm;
pub mod patch;
pub mod plan;
pub mod review;
pub mod run;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::{Agent, AgentLimits, AgentState, RunOutcome};
pub use error::{AgentError, AgentResult};
pub use events::Events;
pub use finalize::{check_and_commit, FinalizeOutcome, FinalizeRequest};
pub use fix_error::{fix_error, FixErrorOutcome};
pub use llm::{Gateway, GatewayError, Model, RequestOptions, RetryPolicy};
pub use review::{code_review, ReviewOutcome};
pub use run::{RepoContext, RunTarget, Services};
