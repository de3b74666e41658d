//! Loading `jacob.json` from the checkout root.

use anyhow::{Context, Result};
use jacob_core::settings::RepoSettings;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const SETTINGS_FILE: &str = "jacob.json";

/// Read `jacob.json`, defaulting when absent. Dependencies fall back to
/// `package.json` when the settings file does not list them.
pub fn load_repo_settings(root: &Path) -> Result<RepoSettings> {
    let path = root.join(SETTINGS_FILE);
    let mut settings = match fs::read_to_string(&path) {
        Ok(content) => serde_json::from_str::<RepoSettings>(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => RepoSettings::default(),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };

    if settings.package_dependencies.is_empty() {
        settings.package_dependencies = read_package_json_dependencies(root);
    }
    Ok(settings)
}

fn read_package_json_dependencies(root: &Path) -> BTreeMap<String, String> {
    let Ok(content) = fs::read_to_string(root.join("package.json")) else {
        return BTreeMap::new();
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&content) else {
        return BTreeMap::new();
    };
    ["dependencies", "devDependencies"]
        .iter()
        .filter_map(|key| value.get(key).and_then(|v| v.as_object()))
        .flat_map(|deps| deps.iter())
        .map(|(name, version)| {
            (
                name.clone(),
                version.as_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}
