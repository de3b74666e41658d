//! Per-repository settings, read from `jacob.json` by the adapters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RepoDirectories {
    pub types: Option<String>,
    pub images: Option<String>,
    pub components: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RepoSettings {
    pub language: Option<String>,
    pub install_command: Option<String>,
    pub build_command: Option<String>,
    pub format_command: Option<String>,
    pub package_dependencies: BTreeMap<String, String>,
    pub style: Option<String>,
    pub directories: RepoDirectories,
}

impl RepoSettings {
    /// Dependencies rendered as `name: version` lines for prompts.
    pub fn dependencies_text(&self) -> String {
        self.package_dependencies
            .iter()
            .map(|(name, version)| format!("{}: {}", name, version))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
