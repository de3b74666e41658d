use anyhow::{anyhow, Context, Result};
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct CommandRunResult {
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandRunResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.is_some_and(|s| s.success())
    }

    /// stdout and stderr joined, the way build output is reported.
    pub fn combined_output(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (true, true) => String::new(),
            (false, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(pipe) = pipe {
            let _ = BufReader::new(pipe).read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Run a blocking command, killing it when `timeout` elapses.
pub fn run_command_with_timeout(
    command: &mut Command,
    timeout: Duration,
) -> Result<CommandRunResult, String> {
    let mut child = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("could not spawn {:?}: {}", command.get_program(), e))?;
    let out = drain(child.stdout.take());
    let err = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let mut timed_out = false;
    let status = loop {
        if let Some(status) = child.try_wait().map_err(|e| format!("wait failed: {}", e))? {
            break Some(status);
        }
        if Instant::now() >= deadline {
            timed_out = true;
            let _ = child.kill();
            break child.wait().ok();
        }
        thread::sleep(Duration::from_millis(50));
    };

    Ok(CommandRunResult {
        status,
        stdout: out.join().unwrap_or_default(),
        stderr: err.join().unwrap_or_default(),
        timed_out,
    })
}

/// Run a shell command line inside `dir` on the async runtime.
pub async fn run_shell_with_timeout(
    command_line: &str,
    dir: &Path,
    timeout: Duration,
) -> Result<CommandRunResult> {
    let mut command = if cfg!(windows) {
        let mut c = tokio::process::Command::new("cmd");
        c.arg("/C").arg(command_line);
        c
    } else {
        let mut c = tokio::process::Command::new("sh");
        c.arg("-c").arg(command_line);
        c
    };
    command
        .current_dir(dir)
        .env("CI", "true")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command
        .spawn()
        .with_context(|| format!("Failed to start `{}`", command_line))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => {
            let output = output.with_context(|| format!("Failed to wait for `{}`", command_line))?;
            Ok(CommandRunResult {
                status: Some(output.status),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                timed_out: false,
            })
        }
        // the child is killed when its future is dropped
        Err(_) => Ok(CommandRunResult {
            status: None,
            stdout: String::new(),
            stderr: format!(
                "`{}` timed out after {}s",
                command_line,
                timeout.as_secs()
            ),
            timed_out: true,
        }),
    }
}

#[derive(Debug)]
pub struct RepoPath {
    pub absolute: PathBuf,
    pub relative: PathBuf,
}

/// Resolve a repository-relative path that may not exist yet, refusing
/// anything that would escape the checkout.
pub fn resolve_repo_path_allow_new(repo_root: &Path, candidate: &Path) -> Result<RepoPath> {
    if candidate.as_os_str().is_empty() {
        return Err(anyhow!("Path is empty"));
    }
    if candidate.is_absolute() {
        return Err(anyhow!(
            "Absolute paths are not allowed: {}",
            candidate.display()
        ));
    }
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(anyhow!(
            "Parent traversal is not allowed: {}",
            candidate.display()
        ));
    }

    let root = repo_root
        .canonicalize()
        .context("Failed to resolve repo root")?;
    let joined = root.join(candidate);
    let parent = joined
        .parent()
        .ok_or_else(|| anyhow!("Invalid path: {}", candidate.display()))?;
    let parent_canon = canonicalize_existing_parent(parent)?;

    if !parent_canon.starts_with(&root) {
        return Err(anyhow!("Path escapes repository: {}", candidate.display()));
    }

    let relative = joined
        .strip_prefix(&root)
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|_| candidate.to_path_buf());

    Ok(RepoPath {
        absolute: joined,
        relative,
    })
}

fn canonicalize_existing_parent(path: &Path) -> Result<PathBuf> {
    let mut current = path.to_path_buf();
    while !current.exists() {
        if !current.pop() {
            return Err(anyhow!("Path has no existing parent"));
        }
    }
    current
        .canonicalize()
        .with_context(|| format!("Failed to resolve path {}", current.display()))
}

/// Write a file inside the checkout, creating parent directories.
pub fn write_repo_file(repo_root: &Path, relative: &str, content: &str) -> Result<PathBuf> {
    let resolved = resolve_repo_path_allow_new(repo_root, Path::new(relative))?;
    if let Some(parent) = resolved.absolute.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(&resolved.absolute, content)
        .with_context(|| format!("Failed to write {}", resolved.relative.display()))?;
    Ok(resolved.absolute)
}

/// Read a file inside the checkout. Missing files read as `None`.
pub fn read_repo_file(repo_root: &Path, relative: &str) -> Result<Option<String>> {
    let resolved = resolve_repo_path_allow_new(repo_root, Path::new(relative))?;
    match std::fs::read_to_string(&resolved.absolute) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", relative)),
    }
}
