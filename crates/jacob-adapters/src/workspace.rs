//! Private per-run checkouts. The directory is removed when the
//! [`RunWorkspace`] is dropped, whether the run succeeded or not.

use crate::git_ops::{clone_repository, is_valid_git_ref};
use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

const WORKSPACE_PREFIX: &str = "jacob-run-";

#[derive(Debug)]
pub struct RunWorkspace {
    dir: tempfile::TempDir,
    root: PathBuf,
}

impl RunWorkspace {
    /// Clone `full_name` at `branch` (or the default branch) into a fresh
    /// temporary directory.
    pub fn clone(
        full_name: &str,
        token: Option<&str>,
        branch: Option<&str>,
        run_id: &str,
    ) -> Result<Self> {
        let dir = Self::tempdir(run_id)?;
        let root = dir.path().join("repo");
        clone_repository(full_name, token, &root, branch)?;
        tracing::info!(repo = full_name, path = %root.display(), "cloned run workspace");
        Ok(Self { dir, root })
    }

    /// Copy of an existing local checkout, cloned so that the caller's
    /// working tree is never touched.
    pub fn from_local(source: &Path, branch: Option<&str>, run_id: &str) -> Result<Self> {
        if let Some(branch) = branch {
            if !is_valid_git_ref(branch) {
                return Err(anyhow!("Invalid branch name '{}'", branch));
            }
        }
        let source = source
            .canonicalize()
            .with_context(|| format!("Failed to resolve '{}'", source.display()))?;
        let dir = Self::tempdir(run_id)?;
        let root = dir.path().join("repo");

        let mut builder = git2::build::RepoBuilder::new();
        if let Some(branch) = branch {
            builder.branch(branch);
        }
        builder
            .clone(&source.to_string_lossy(), &root)
            .with_context(|| format!("Failed to clone '{}'", source.display()))?;
        Ok(Self { dir, root })
    }

    fn tempdir(run_id: &str) -> Result<tempfile::TempDir> {
        let safe: String = run_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        tempfile::Builder::new()
            .prefix(&format!("{}{}-", WORKSPACE_PREFIX, safe))
            .tempdir()
            .context("Failed to create run workspace directory")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remove the checkout now and surface any error.
    pub fn cleanup(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir
            .close()
            .with_context(|| format!("Failed to remove run workspace '{}'", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Repository, Signature};

    fn setup_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        std::fs::write(dir.path().join("README.md"), "# api\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("README.md")).unwrap();
        let tree_id = index.write_tree().unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("Test User", "test@example.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
            .unwrap();
        dir
    }

    #[test]
    fn test_workspace_is_removed_on_drop() {
        let source = setup_repo();
        let path;
        {
            let ws = RunWorkspace::from_local(source.path(), None, "run/1").unwrap();
            path = ws.root().to_path_buf();
            assert!(path.join("README.md").exists());
            assert!(path
                .parent()
                .unwrap()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("jacob-run-run_1-"));
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_workspace_cleanup_removes_checkout() {
        let source = setup_repo();
        let ws = RunWorkspace::from_local(source.path(), None, "run-2").unwrap();
        let path = ws.root().to_path_buf();
        ws.cleanup().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_workspace_rejects_bad_branch() {
        let source = setup_repo();
        assert!(RunWorkspace::from_local(source.path(), Some("a..b"), "run-3").is_err());
    }
}
