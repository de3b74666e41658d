//! JACoB - turns GitHub issues into pull requests.
//!
//! Each subcommand clones the target repository into a private workspace,
//! runs one flow against it and removes the checkout afterwards.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use jacob_adapters::config::AppConfig;
use jacob_adapters::credentials::{self, CredentialKind};
use jacob_adapters::source::{get_source_map, get_types};
use jacob_adapters::telemetry::init_tracing;
use jacob_adapters::{
    load_repo_settings, CommandBuildRunner, JsonlEventSink, LocalGit, MultiEventSink, RestGitHub,
    RunWorkspace, TracingEventSink,
};
use jacob_core::issue::ResearchItem;
use jacob_core::{EventSink, GitHubApi, RunContext};
use jacob_engine::llm::transport::create_http_client;
use jacob_engine::llm::{AnthropicTransport, OpenAiCompatibleTransport, ProviderRouter};
use jacob_engine::{
    code_review, fix_error, Agent, AgentLimits, Events, Gateway, Model, RetryPolicy, RunTarget,
    Services,
};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(
    name = "jacob",
    about = "AI agent that turns GitHub issues into pull requests",
    long_about = "J A C o B\n\n\
                  Plans code changes for an issue, applies them step by step,\n\
                  verifies the build and opens a pull request. Also reviews\n\
                  pull requests and repairs reported build errors.",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file (defaults to ~/.config/jacob/config.toml)
    #[arg(long, global = true, env = "JACOB_CONFIG")]
    config: Option<PathBuf>,

    /// Override the primary model
    #[arg(long, global = true)]
    model: Option<String>,

    /// Work on a copy of this local checkout instead of cloning from GitHub
    #[arg(long, global = true)]
    checkout: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Implement an issue and open (or update) its pull request
    RunIssue {
        /// Repository as owner/name
        #[arg(long)]
        repo: String,
        #[arg(long)]
        issue: u64,
        /// JSON array of research items to hand to the planner
        #[arg(long)]
        research: Option<PathBuf>,
    },
    /// Review a pull request and submit inline comments
    Review {
        #[arg(long)]
        repo: String,
        #[arg(long)]
        pr: u64,
    },
    /// Repair the build errors reported in a pull request comment
    FixError {
        #[arg(long)]
        repo: String,
        #[arg(long)]
        pr: u64,
        /// Body of the build error comment
        #[arg(long, conflicts_with = "comment_file", required_unless_present = "comment_file")]
        comment: Option<String>,
        #[arg(long)]
        comment_file: Option<PathBuf>,
    },
    /// Print the source map and type declarations of a local checkout
    SourceMap {
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Save a credential to the system keychain
    SetCredential {
        kind: CredentialArg,
        /// Read from stdin when omitted
        value: Option<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CredentialArg {
    Openai,
    Anthropic,
    Github,
}

impl From<CredentialArg> for CredentialKind {
    fn from(arg: CredentialArg) -> Self {
        match arg {
            CredentialArg::Openai => CredentialKind::OpenAiApiKey,
            CredentialArg::Anthropic => CredentialKind::AnthropicApiKey,
            CredentialArg::Github => CredentialKind::GitHubToken,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = cli.log_level.parse::<Level>().unwrap_or(Level::INFO);
    init_tracing(cli.json_logs, level);

    let mut config = AppConfig::load(cli.config.as_deref());
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }

    match &cli.command {
        Command::RunIssue {
            repo,
            issue,
            research,
        } => run_issue(&cli, &config, repo, *issue, research.as_deref()).await,
        Command::Review { repo, pr } => review(&cli, &config, repo, *pr).await,
        Command::FixError {
            repo,
            pr,
            comment,
            comment_file,
        } => {
            let body = match (comment, comment_file) {
                (Some(body), _) => body.clone(),
                (None, Some(path)) => std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read '{}'", path.display()))?,
                (None, None) => bail!("--comment or --comment-file is required"),
            };
            repair(&cli, &config, repo, *pr, &body).await
        }
        Command::SourceMap { path } => print_source_map(path),
        Command::SetCredential { kind, value } => set_credential(*kind, value.as_deref()),
    }
}

async fn run_issue(
    cli: &Cli,
    config: &AppConfig,
    repo: &str,
    number: u64,
    research: Option<&Path>,
) -> Result<()> {
    let github = connect_github(config)?;
    let issue = github.get_issue(repo, number).await?;
    let research = match research {
        Some(path) => load_research(path)?,
        None => Vec::new(),
    };

    let run = RunContext::new(repo).with_issue(number);
    let session = Session::open(cli, config, github, run, None).await?;
    let agent = Agent::new(session.services.clone(), session.target.clone()).with_limits(
        AgentLimits {
            max_plan_iterations: config.max_plan_iterations,
            max_steps: config.max_steps,
        },
    );

    let result = agent.run_issue(&issue, &research).await;
    session.close();
    let outcome = result?;

    let summary = serde_json::json!({
        "issue": number,
        "state": format!("{:?}", outcome.edit.state),
        "iterations": outcome.edit.iterations,
        "stepsApplied": outcome.edit.steps_applied,
        "buildPassed": outcome.finalized.build.is_success(),
        "created": outcome.finalized.created,
        "pullRequest": outcome.finalized.pull_request,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    eprintln!("  + {}", outcome.finalized.pull_request.html_url);
    Ok(())
}

async fn review(cli: &Cli, config: &AppConfig, repo: &str, number: u64) -> Result<()> {
    let github = connect_github(config)?;
    let pr = github.get_pull_request(repo, number).await?;

    let run = RunContext::new(repo).with_pull_request(number);
    let session = Session::open(cli, config, github, run, Some(&pr.head_ref)).await?;
    let result = code_review(
        &session.services,
        &session.target,
        &pr,
        config.github_app_username.as_deref(),
    )
    .await;
    session.close();
    let outcome = result?;

    eprintln!(
        "  + {:?} with {} comment(s) ({} dropped)",
        outcome.event, outcome.comments_posted, outcome.comments_dropped
    );
    Ok(())
}

async fn repair(cli: &Cli, config: &AppConfig, repo: &str, number: u64, comment: &str) -> Result<()> {
    let github = connect_github(config)?;
    let pr = github.get_pull_request(repo, number).await?;

    let run = RunContext::new(repo).with_pull_request(number);
    let session = Session::open(cli, config, github, run, Some(&pr.head_ref)).await?;
    let result = fix_error(&session.services, &session.target, &pr, comment).await;
    session.close();
    let outcome = result?;

    if let Some(package) = &outcome.installed_package {
        eprintln!("  + installed {package}");
    }
    for path in &outcome.files_written {
        eprintln!("  + rewrote {path}");
    }
    if outcome.finalized.build.is_success() {
        eprintln!("  + build passes after attempt {}", outcome.attempt);
    } else {
        eprintln!("  ! build still failing after attempt {}", outcome.attempt);
    }
    Ok(())
}

fn print_source_map(path: &Path) -> Result<()> {
    let root = path
        .canonicalize()
        .with_context(|| format!("Failed to resolve '{}'", path.display()))?;
    let settings = load_repo_settings(&root)?;

    let source_map = get_source_map(&root);
    println!("{}", source_map.text);
    let types = get_types(&root, &settings);
    if !types.trim().is_empty() {
        println!();
        println!("{}", types);
    }
    Ok(())
}

fn set_credential(kind: CredentialArg, value: Option<&str>) -> Result<()> {
    let value = match value {
        Some(value) => value.to_string(),
        None => {
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            line
        }
    };
    if value.trim().is_empty() {
        bail!("Refusing to store an empty credential");
    }

    let kind = CredentialKind::from(kind);
    credentials::store(kind, &value)?;
    if credentials::lookup(kind).is_none() {
        eprintln!("  ! Saved, but the credential cannot be read back.");
        eprintln!("  ! Workaround: set the {} environment variable.", kind.env_var());
        bail!("Credential verification failed");
    }
    eprintln!("  + {} saved", kind.env_var());
    Ok(())
}

fn load_research(path: &Path) -> Result<Vec<ResearchItem>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read '{}'", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("'{}' is not a JSON array of research items", path.display()))
}

fn connect_github(config: &AppConfig) -> Result<Arc<RestGitHub>> {
    let token = credentials::lookup(CredentialKind::GitHubToken).ok_or_else(|| {
        anyhow!("No GitHub token found. Set GITHUB_TOKEN or run `jacob set-credential github`.")
    })?;
    Ok(Arc::new(RestGitHub::new(&token, &config.github_api_url)?))
}

fn build_events(config: &AppConfig, run: RunContext) -> Events {
    let mut sinks: Vec<Box<dyn EventSink>> = vec![Box::new(TracingEventSink)];
    if let Some(path) = &config.event_log {
        sinks.push(Box::new(JsonlEventSink::new(path.clone())));
    }
    Events::new(Arc::new(MultiEventSink::new(sinks)), run)
}

fn build_gateway(config: &AppConfig, events: Events) -> Result<Gateway> {
    let client = create_http_client(Duration::from_secs(config.request_timeout_secs))?;

    let mut router = ProviderRouter::new();
    let mut configured = false;
    if let Some(key) = credentials::lookup(CredentialKind::OpenAiApiKey) {
        router = router.with_compatible(Arc::new(OpenAiCompatibleTransport::new(
            client.clone(),
            &config.openai_base_url,
            &key,
        )));
        configured = true;
    }
    if let Some(key) = credentials::lookup(CredentialKind::AnthropicApiKey) {
        router = router.with_anthropic(Arc::new(AnthropicTransport::new(
            client,
            &config.anthropic_base_url,
            &key,
        )));
        configured = true;
    }
    if !configured {
        bail!(
            "No model provider key found. Set OPENAI_API_KEY or ANTHROPIC_API_KEY, \
             or run `jacob set-credential`."
        );
    }

    let model: Model = config.model.parse()?;
    let vision_model: Model = config.vision_model.parse()?;
    if !vision_model.supports_vision() {
        bail!("vision_model {} does not accept image input", vision_model);
    }
    Ok(Gateway::new(Arc::new(router), events)
        .with_models(model, vision_model)
        .with_temperature(config.temperature)
        .with_policy(RetryPolicy {
            rate_limit_retries: config.rate_limit_retries,
            rate_limit_base_delay: Duration::from_secs(config.rate_limit_base_delay_secs),
            structured_retries: config.structured_retries,
        }))
}

/// Everything one flow needs, plus the checkout it owns.
struct Session {
    services: Services,
    target: RunTarget,
    workspace: RunWorkspace,
}

impl Session {
    async fn open(
        cli: &Cli,
        config: &AppConfig,
        github: Arc<RestGitHub>,
        run: RunContext,
        branch: Option<&str>,
    ) -> Result<Self> {
        let repo = run.repo_full_name.clone();
        let run_id = run.run_id.to_string();
        let gateway = build_gateway(config, build_events(config, run))?;

        let local = cli.checkout.clone();
        let branch = branch.map(str::to_string);
        let clone_repo = repo.clone();
        let workspace = tokio::task::spawn_blocking(move || match local {
            Some(source) => RunWorkspace::from_local(&source, branch.as_deref(), &run_id),
            None => {
                let token = credentials::lookup(CredentialKind::GitHubToken);
                RunWorkspace::clone(&clone_repo, token.as_deref(), branch.as_deref(), &run_id)
            }
        })
        .await??;

        let root = workspace.root().to_path_buf();
        let settings = load_repo_settings(&root)?;
        let services = Services {
            gateway,
            github,
            scm: Arc::new(LocalGit::new(root.clone())),
            builder: Arc::new(CommandBuildRunner::new(Duration::from_secs(
                config.build_timeout_secs,
            ))),
        };
        Ok(Self {
            services,
            target: RunTarget::new(repo, root, settings),
            workspace,
        })
    }

    fn close(self) {
        if let Err(err) = self.workspace.cleanup() {
            tracing::warn!(error = %err, "failed to remove run workspace");
        }
    }
}
