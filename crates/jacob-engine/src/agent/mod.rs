//! Issue-to-PR run: extract intent, then plan, execute and verify until the
//! build passes or the iteration bound is hit, then finalize.

use crate::error::{AgentError, AgentResult};
use crate::extract::extract_issue;
use crate::finalize::{check_and_commit, FinalizeOutcome, FinalizeRequest};
use crate::patch::{PatchEngine, StepContext};
use crate::plan::{create_plan, PlanningInput};
use crate::run::{RepoContext, RunTarget, Services};
use jacob_core::branch::jacob_branch_name;
use jacob_core::extracted::ExtractedIssueInfo;
use jacob_core::issue::{format_research, Issue, ResearchItem};
use jacob_core::plan::{ChangeLog, Plan};
use jacob_core::protocol::BuildResult;


pub const DEFAULT_MAX_PLAN_ITERATIONS: usize = 3;
pub const DEFAULT_MAX_STEPS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Planning,
    Executing,
    Verifying,
    /// Build passed or the planner had nothing left to do.
    Done,
    /// Iteration bound reached with a failing build.
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentLimits {
    pub max_plan_iterations: usize,
    pub max_steps: usize,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_plan_iterations: DEFAULT_MAX_PLAN_ITERATIONS,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

/// Result of the plan/execute/verify loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    pub state: AgentState,
    pub iterations: usize,
    pub steps_applied: usize,
    pub changelog: ChangeLog,
    pub last_build: Option<BuildResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub extracted: ExtractedIssueInfo,
    pub edit: EditOutcome,
    pub finalized: FinalizeOutcome,
}

/// Comment posted on an issue when its run fails.
pub fn fatal_error_comment(error: &AgentError) -> String {
    format!(
        "JACoB here...\n\nUnfortunately, I ran into trouble working on this issue and had to stop.\n\nHere is some information about the error:\n\n```\n{}\n```\n",
        error
    )
}

pub struct Agent {
    services: Services,
    target: RunTarget,
    limits: AgentLimits,
}

impl Agent {
    pub fn new(services: Services, target: RunTarget) -> Self {
        Self {
            services,
            target,
            limits: AgentLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: AgentLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Turn an issue into a pull request. Any failure is reported on the
    /// issue before it is returned.
    pub async fn run_issue(&self, issue: &Issue, research: &[ResearchItem]) -> AgentResult<RunOutcome> {
        match self.process_issue(issue, research).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                tracing::error!(issue = issue.number, error = %err, "issue run failed");
                if let Err(comment_err) = self
                    .services
                    .github
                    .add_issue_comment(&self.target.repo, issue.number, &fatal_error_comment(&err))
                    .await
                {
                    tracing::warn!(issue = issue.number, error = %comment_err, "failed to post error comment");
                }
                Err(err)
            }
        }
    }

    async fn process_issue(&self, issue: &Issue, research: &[ResearchItem]) -> AgentResult<RunOutcome> {
        tracing::info!(issue = issue.number, repo = %self.target.repo, "processing issue");
        let mut repo = RepoContext::load(&self.target.root, &self.target.settings).await?;

        let extracted = extract_issue(&self.services.gateway, &repo.source_map, &issue.issue_text()).await?;
        if !extracted.has_targets() {
            return Err(AgentError::NothingToDo {
                issue: issue.number,
            });
        }

        let edit = self
            .edit_files(issue, &mut repo, &format_research(research))
            .await?;
        if edit.steps_applied == 0 {
            return Err(AgentError::NoChanges {
                issue: issue.number,
            });
        }

        let title = format!("JACoB PR for Issue {}", issue.title);
        let finalized = check_and_commit(
            &self.services,
            &self.target,
            FinalizeRequest {
                branch: &jacob_branch_name(issue.number),
                commit_message: &title,
                pr_title: Some(&title),
                pr_body: Some(edit.changelog.as_str()),
                reviewers: &issue.assignees,
                build: edit.last_build.clone(),
                ..FinalizeRequest::default()
            },
        )
        .await?;

        Ok(RunOutcome {
            extracted,
            edit,
            finalized,
        })
    }

    /// The plan/execute/verify loop. Checks out the issue branch first, then
    /// runs steps strictly in order; each sees the patches applied before it
    /// in the same iteration.
    pub async fn edit_files(
        &self,
        issue: &Issue,
        repo: &mut RepoContext,
        research: &str,
    ) -> AgentResult<EditOutcome> {
        let events = self.services.gateway.events();
        let engine = PatchEngine::new(&self.services, &self.target);
        let branch = jacob_branch_name(issue.number);

        // Every step reads from the working branch. An existing branch may
        // carry an earlier run's work, so the context is rebuilt from it.
        if !self.services.scm.ensure_branch(&branch).await? {
            tracing::info!(%branch, "continuing on existing branch");
            *repo = RepoContext::load(&self.target.root, &self.target.settings).await?;
        }
        let issue_text = issue.issue_text();
        let snapshot_url = issue.snapshot_url();

        let mut state = AgentState::Planning;
        let mut plan = Plan::default();
        let mut code_patch = String::new();
        let mut build_errors = String::new();
        let mut changelog = ChangeLog::new();
        let mut iterations = 0usize;
        let mut steps_applied = 0usize;
        let mut last_build = None;

        loop {
            state = match state {
                AgentState::Planning => {
                    iterations += 1;
                    if iterations > 1 {
                        repo.refresh_source_map(&self.target.root).await?;
                    }
                    plan = create_plan(
                        &self.services.gateway,
                        PlanningInput {
                            issue_text: &issue_text,
                            source_map: &repo.source_map,
                            research,
                            code_patch: &code_patch,
                            build_errors: &build_errors,
                        },
                    )
                    .await
                    .map_err(AgentError::NoPlan)?;
                    code_patch.clear();
                    build_errors.clear();
                    events.plan(iterations, &plan).await;

                    if plan.is_empty() {
                        tracing::info!(issue = issue.number, iteration = iterations, "plan has no steps");
                        AgentState::Done
                    } else {
                        AgentState::Executing
                    }
                }
                AgentState::Executing => {
                    if plan.steps.len() > self.limits.max_steps {
                        tracing::warn!(
                            steps = plan.steps.len(),
                            limit = self.limits.max_steps,
                            "plan truncated"
                        );
                    }
                    let steps = &plan.steps[..plan.steps.len().min(self.limits.max_steps)];
                    for (index, step) in steps.iter().enumerate() {
                        tracing::info!(
                            iteration = iterations,
                            step = index + 1,
                            file = %step.file_path,
                            title = %step.title,
                            "executing step"
                        );
                        events.plan_step(iterations, index, step).await;
                        let ctx = StepContext {
                            branch: &branch,
                            issue_text: &issue_text,
                            research,
                            repo: &*repo,
                            code_patch: &code_patch,
                            snapshot_url: snapshot_url.as_deref(),
                        };
                        if let Some(applied) = engine.apply_step(step, &ctx).await? {
                            steps_applied += 1;
                            code_patch.push_str(&format!("\n{}\n", applied.patch));
                        }
                    }
                    changelog.record_iteration(steps);
                    AgentState::Verifying
                }
                AgentState::Verifying => {
                    let result = self
                        .services
                        .builder
                        .run_build_check(&self.target.root, &self.target.settings)
                        .await?;
                    events
                        .command(
                            "build check",
                            &self.target.root.display().to_string(),
                            Some(if result.is_success() { 0 } else { 1 }),
                            result.errors().unwrap_or_default(),
                        )
                        .await;
                    let next = match &result {
                        BuildResult::Passed => {
                            tracing::info!(iteration = iterations, "build passed");
                            AgentState::Done
                        }
                        BuildResult::Failed { errors } => {
                            build_errors = errors.clone();
                            if iterations >= self.limits.max_plan_iterations {
                                tracing::warn!(iterations, "iteration bound reached with a failing build");
                                AgentState::Exhausted
                            } else {
                                tracing::info!(iteration = iterations, "build failed, replanning");
                                AgentState::Planning
                            }
                        }
                    };
                    last_build = Some(result);
                    next
                }
                AgentState::Done | AgentState::Exhausted => break,
            };
        }

        Ok(EditOutcome {
            state,
            iterations,
            steps_applied,
            changelog,
            last_build,
        })
    }
}
