//! I/O adapters: git, GitHub, the project's build tooling, configuration,
//! credentials and the source map.

pub mod build;
pub mod config;
pub mod credentials;
pub mod event_log;
pub mod git_ops;
pub mod github;
pub mod repo_settings;
pub mod source;
pub mod telemetry;
pub mod util;
pub mod workspace;

pub use build::CommandBuildRunner;
pub use config::AppConfig;
pub use event_log::{JsonlEventSink, MultiEventSink, TracingEventSink};
pub use git_ops::LocalGit;
pub use github::RestGitHub;
pub use repo_settings::load_repo_settings;
pub use workspace::RunWorkspace;
