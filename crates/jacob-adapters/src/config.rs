//! Application configuration.
//!
//! Stored as TOML in `~/.config/jacob/config.toml` (or `$JACOB_CONFIG`), then
//! overlaid with environment variables.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20240620";
pub const DEFAULT_VISION_MODEL: &str = "gpt-4o-2024-05-13";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model: String,
    pub vision_model: String,
    pub temperature: f32,
    pub max_plan_iterations: usize,
    pub max_steps: usize,
    pub structured_retries: u32,
    pub rate_limit_retries: u32,
    pub rate_limit_base_delay_secs: u64,
    pub request_timeout_secs: u64,
    pub build_timeout_secs: u64,
    pub openai_base_url: String,
    pub anthropic_base_url: String,
    pub github_api_url: String,
    /// Login of the account JACoB acts as; reviews of its own PRs degrade to comments.
    pub github_app_username: Option<String>,
    /// Append events as JSON lines to this file instead of only logging them.
    pub event_log: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            vision_model: DEFAULT_VISION_MODEL.to_string(),
            temperature: 0.2,
            max_plan_iterations: 3,
            max_steps: 10,
            structured_retries: 3,
            rate_limit_retries: 10,
            rate_limit_base_delay_secs: 60,
            request_timeout_secs: 600,
            build_timeout_secs: 600,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            anthropic_base_url: "https://api.anthropic.com/v1".to_string(),
            github_api_url: "https://api.github.com".to_string(),
            github_app_username: None,
            event_log: None,
        }
    }
}

impl AppConfig {
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("JACOB_CONFIG") {
            if !path.trim().is_empty() {
                return Some(PathBuf::from(path.trim()));
            }
        }
        dirs::config_dir().map(|p| p.join("jacob").join("config.toml"))
    }

    /// Load from `path` (or the default location) and apply environment
    /// overrides. A corrupt file is moved aside and defaults are used.
    pub fn load(path: Option<&Path>) -> Self {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);
        let mut config = path
            .as_deref()
            .map(Self::load_file)
            .unwrap_or_default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config.sanitize();
        config
    }

    fn load_file(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match toml::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                preserve_corrupt_config(path, &content);
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "config file was corrupted; a backup was saved and defaults were loaded"
                );
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(model) = get("JACOB_MODEL") {
            self.model = model;
        }
        if let Some(model) = get("JACOB_VISION_MODEL") {
            self.vision_model = model;
        }
        if let Some(url) = get("JACOB_OPENAI_BASE_URL") {
            self.openai_base_url = url;
        }
        if let Some(url) = get("JACOB_ANTHROPIC_BASE_URL") {
            self.anthropic_base_url = url;
        }
        if let Some(user) = get("JACOB_GITHUB_APP_USERNAME").or_else(|| get("GITHUB_APP_USERNAME")) {
            self.github_app_username = Some(user);
        }
        if let Some(delay) = get("JACOB_RATE_LIMIT_DELAY_SECS").and_then(|v| v.parse().ok()) {
            self.rate_limit_base_delay_secs = delay;
        }
        if let Some(path) = get("JACOB_EVENT_LOG") {
            self.event_log = Some(PathBuf::from(path));
        }
    }

    fn sanitize(&mut self) {
        self.temperature = self.temperature.clamp(0.0, 2.0);
        self.max_plan_iterations = self.max_plan_iterations.max(1);
        self.max_steps = self.max_steps.max(1);
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("toml.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}
