use crate::llm::GatewayError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Nothing to do: no files to create or update were identified for issue #{issue}")]
    NothingToDo { issue: u64 },
    #[error("No plan generated: {0}")]
    NoPlan(#[source] GatewayError),
    #[error("No changes were made for issue #{issue}")]
    NoChanges { issue: u64 },
    #[error("No codeWithComments generated")]
    NoReviewOutput,
    #[error("No code generated")]
    NoFixOutput,
    #[error("No build error message found in the pull request comment")]
    MissingBuildErrors,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type AgentResult<T> = Result<T, AgentError>;
