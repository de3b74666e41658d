//! Credential storage for provider keys and the GitHub token.
//!
//! All secrets live in one keychain entry as JSON. When the keychain is
//! disabled (tests, CI, `JACOB_DISABLE_KEYRING=1`) a 0600 file is used instead.

use anyhow::{anyhow, Context, Result};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

const KEYRING_SERVICE: &str = "jacob-credentials";
const KEYRING_USERNAME: &str = "default";

static KEYRING_ERROR_WARNED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    OpenAiApiKey,
    AnthropicApiKey,
    GitHubToken,
}

impl CredentialKind {
    pub fn env_var(self) -> &'static str {
        match self {
            CredentialKind::OpenAiApiKey => "OPENAI_API_KEY",
            CredentialKind::AnthropicApiKey => "ANTHROPIC_API_KEY",
            CredentialKind::GitHubToken => "GITHUB_TOKEN",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredCredentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    openai_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    anthropic_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    github_token: Option<String>,
}

impl StoredCredentials {
    fn slot(&mut self, kind: CredentialKind) -> &mut Option<String> {
        match kind {
            CredentialKind::OpenAiApiKey => &mut self.openai_api_key,
            CredentialKind::AnthropicApiKey => &mut self.anthropic_api_key,
            CredentialKind::GitHubToken => &mut self.github_token,
        }
    }
}

/// Where secrets are persisted for this process.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Backend {
    Keychain,
    File(PathBuf),
}

impl Backend {
    fn current() -> Result<Self> {
        if cfg!(test) || env_flag("JACOB_DISABLE_KEYRING") {
            return credentials_file().map(Backend::File);
        }
        Ok(Backend::Keychain)
    }

    fn read(&self) -> Result<StoredCredentials> {
        match self {
            Backend::Keychain => {
                let entry = Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)?;
                match entry.get_password() {
                    Ok(json) => serde_json::from_str(&json)
                        .context("Keychain entry is not valid credentials JSON"),
                    Err(keyring::Error::NoEntry) => Ok(StoredCredentials::default()),
                    Err(err) => Err(err.into()),
                }
            }
            Backend::File(path) => {
                if !path.exists() {
                    return Ok(StoredCredentials::default());
                }
                let json = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read '{}'", path.display()))?;
                serde_json::from_str(&json)
                    .with_context(|| format!("'{}' is not valid credentials JSON", path.display()))
            }
        }
    }

    fn write(&self, creds: &StoredCredentials) -> Result<()> {
        let json = serde_json::to_string(creds)?;
        match self {
            Backend::Keychain => {
                Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)?.set_password(&json)?;
                Ok(())
            }
            Backend::File(path) => write_private_file(path, &json),
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn credentials_file() -> Result<PathBuf> {
    if let Some(path) = std::env::var("JACOB_CREDENTIALS_FILE")
        .ok()
        .filter(|p| !p.trim().is_empty())
    {
        return Ok(PathBuf::from(path.trim()));
    }
    if cfg!(test) {
        return Ok(std::env::temp_dir().join("jacob-test-credentials.json"));
    }
    dirs::config_dir()
        .map(|dir| dir.join("jacob").join("credentials.json"))
        .ok_or_else(|| anyhow!("No config directory to keep credentials in"))
}

/// Replace `path` atomically with a file only the owner can read.
fn write_private_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create '{}'", parent.display()))?;
    }
    let staging = path.with_extension("json.tmp");
    let mut file = fs::File::create(&staging)
        .with_context(|| format!("Failed to create '{}'", staging.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write '{}'", staging.display()))?;
    fs::rename(&staging, path)
        .with_context(|| format!("Failed to replace '{}'", path.display()))
}

fn read_credentials() -> Result<StoredCredentials> {
    Backend::current()?.read()
}

/// Environment first, then the credential store.
pub fn lookup(kind: CredentialKind) -> Option<String> {
    if let Some(value) = std::env::var(kind.env_var())
        .ok()
        .filter(|v| !v.trim().is_empty())
    {
        return Some(value);
    }
    match read_credentials() {
        Ok(mut creds) => creds.slot(kind).take(),
        Err(err) => {
            if !KEYRING_ERROR_WARNED.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    error = %err,
                    "credential store unavailable; set JACOB_DISABLE_KEYRING=1 or use environment variables"
                );
            }
            None
        }
    }
}

pub fn store(kind: CredentialKind, value: &str) -> Result<()> {
    let backend = Backend::current()?;
    let mut creds = backend.read().unwrap_or_default();
    *creds.slot(kind) = Some(value.trim().to_string());
    backend.write(&creds)
}
