//! Running the target project's build check and package installs.

use crate::util::run_shell_with_timeout;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use jacob_core::protocol::{BuildResult, BuildRunner};
use jacob_core::settings::RepoSettings;
use std::path::Path;
use std::time::Duration;

const MAX_BUILD_OUTPUT_TAIL_CHARS: usize = 8_000;

const JS_CHECK_SCRIPTS: &[&str] = &["typecheck", "type-check", "check:type", "build"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Npm,
    Yarn,
    Pnpm,
}

impl PackageManager {
    pub fn detect(root: &Path) -> Self {
        if root.join("pnpm-lock.yaml").exists() {
            PackageManager::Pnpm
        } else if root.join("yarn.lock").exists() {
            PackageManager::Yarn
        } else {
            PackageManager::Npm
        }
    }

    fn run_script(self, script: &str) -> String {
        match self {
            PackageManager::Npm => format!("npm run {}", script),
            PackageManager::Yarn => format!("yarn {}", script),
            PackageManager::Pnpm => format!("pnpm run {}", script),
        }
    }

    fn add(self, package: &str) -> String {
        match self {
            PackageManager::Npm => format!("npm install {}", package),
            PackageManager::Yarn => format!("yarn add {}", package),
            PackageManager::Pnpm => format!("pnpm add {}", package),
        }
    }
}

/// The command that verifies the project: the configured one, else a
/// typecheck/build script, `cargo check` or `go build`.
pub fn detect_build_command(root: &Path, settings: &RepoSettings) -> Option<String> {
    if let Some(cmd) = settings
        .build_command
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
    {
        return Some(cmd.to_string());
    }

    let package_json = root.join("package.json");
    if let Ok(content) = std::fs::read_to_string(&package_json) {
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&content) {
            if let Some(scripts) = parsed.get("scripts").and_then(|v| v.as_object()) {
                if let Some(script) = JS_CHECK_SCRIPTS.iter().find(|s| scripts.contains_key(**s)) {
                    return Some(PackageManager::detect(root).run_script(script));
                }
            }
        }
    }

    if root.join("Cargo.toml").exists() {
        return Some("cargo check".to_string());
    }

    if root.join("go.mod").exists() {
        return Some("go build ./...".to_string());
    }

    None
}

fn install_command(root: &Path, settings: &RepoSettings, package: &str) -> String {
    match settings
        .install_command
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
    {
        Some(cmd) => format!("{} {}", cmd, package),
        None => PackageManager::detect(root).add(package),
    }
}

/// npm package names and specs only; anything else is refused before it
/// reaches a shell.
fn is_safe_package_spec(package: &str) -> bool {
    !package.is_empty()
        && !package.starts_with('-')
        && package
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '/' | '-' | '_' | '.' | '^' | '~'))
}

#[derive(Debug, Clone)]
pub struct CommandBuildRunner {
    timeout: Duration,
}

impl CommandBuildRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl BuildRunner for CommandBuildRunner {
    async fn run_build_check(&self, root: &Path, settings: &RepoSettings) -> Result<BuildResult> {
        let Some(command) = detect_build_command(root, settings) else {
            tracing::info!(root = %root.display(), "no build command found, skipping build check");
            return Ok(BuildResult::Passed);
        };

        tracing::info!(%command, "running build check");
        let output = run_shell_with_timeout(&command, root, self.timeout).await?;
        if output.success() {
            return Ok(BuildResult::Passed);
        }

        let errors = jacob_core::util::tail_chars(
            output.combined_output().trim(),
            MAX_BUILD_OUTPUT_TAIL_CHARS,
        );
        tracing::warn!(%command, timed_out = output.timed_out, "build check failed");
        Ok(BuildResult::Failed { errors })
    }

    async fn install_package(&self, root: &Path, settings: &RepoSettings, package: &str) -> Result<()> {
        let package = package.trim();
        if !is_safe_package_spec(package) {
            return Err(anyhow!("Refusing to install package '{}'", package));
        }
        let command = install_command(root, settings, package);
        tracing::info!(%command, "installing package");
        let output = run_shell_with_timeout(&command, root, self.timeout).await?;
        if output.success() {
            Ok(())
        } else {
            Err(anyhow!(
                "`{}` failed: {}",
                command,
                jacob_core::util::tail_chars(
                    output.combined_output().trim(),
                    MAX_BUILD_OUTPUT_TAIL_CHARS
                )
            ))
        }
    }
}
