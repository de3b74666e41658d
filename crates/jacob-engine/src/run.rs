//! What a flow operates on: the checkout, its collaborators and the
//! prompt context extracted from it.

use crate::llm::Gateway;
use anyhow::{Context, Result};
use jacob_adapters::source::{get_images, get_source_map, get_types};
use jacob_core::protocol::{BuildRunner, GitHubApi, SourceControl};
use jacob_core::settings::RepoSettings;
use jacob_core::source_map::SourceMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The private checkout a run works in.
#[derive(Debug, Clone)]
pub struct RunTarget {
    /// `owner/name`
    pub repo: String,
    pub root: PathBuf,
    pub settings: RepoSettings,
}

impl RunTarget {
    pub fn new(repo: impl Into<String>, root: impl Into<PathBuf>, settings: RepoSettings) -> Self {
        Self {
            repo: repo.into(),
            root: root.into(),
            settings,
        }
    }
}

/// External collaborators shared by every flow of a run.
#[derive(Clone)]
pub struct Services {
    pub gateway: Gateway,
    pub github: Arc<dyn GitHubApi>,
    pub scm: Arc<dyn SourceControl>,
    pub builder: Arc<dyn BuildRunner>,
}

/// Prompt context read from the checkout.
#[derive(Debug, Clone, Default)]
pub struct RepoContext {
    pub source_map: SourceMap,
    pub types: String,
    pub images: Vec<String>,
    pub packages: String,
    pub styles: String,
}

impl RepoContext {
    pub async fn load(root: &Path, settings: &RepoSettings) -> Result<Self> {
        let root = root.to_path_buf();
        let task_settings = settings.clone();
        let (source_map, types, images) = tokio::task::spawn_blocking(move || {
            (
                get_source_map(&root),
                get_types(&root, &task_settings),
                get_images(&root, &task_settings),
            )
        })
        .await
        .context("source extraction task failed")?;

        Ok(Self {
            source_map,
            types,
            images: images
                .iter()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .collect(),
            packages: settings
                .package_dependencies
                .keys()
                .cloned()
                .collect::<Vec<_>>()
                .join("\n"),
            styles: settings.style.clone().unwrap_or_default(),
        })
    }

    /// Re-read the source map after files were created.
    pub async fn refresh_source_map(&mut self, root: &Path) -> Result<()> {
        let root = root.to_path_buf();
        self.source_map = tokio::task::spawn_blocking(move || get_source_map(&root))
            .await
            .context("source extraction task failed")?;
        Ok(())
    }

    pub fn images_text(&self) -> String {
        self.images.join("\n")
    }
}
