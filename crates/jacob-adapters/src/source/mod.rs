//! Read-only summaries of a checkout: source map, type listing and images.
//!
//! These never fail the pipeline. Unreadable or unparsable files are skipped
//! and logged; an empty outline degrades to a flat file listing.

mod parser;

pub use parser::{outline_file, type_declarations, Language};

use jacob_core::settings::RepoSettings;
use jacob_core::source_map::{FileOutline, SourceMap};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

const MAX_PARSE_BYTES: u64 = 512 * 1024;
const DEFAULT_TYPE_DIRS: &[&str] = &["src/types", "types", "src/@types", "@types"];
const DEFAULT_IMAGE_DIRS: &[&str] = &["public", "src/images", "src/assets", "assets"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg", "webp", "ico"];

fn is_ignored(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_str().unwrap_or("");
    let ignored = [
        "target",
        "node_modules",
        ".git",
        "dist",
        "build",
        ".next",
        "coverage",
        "__pycache__",
        ".pytest_cache",
        "vendor",
    ];
    ignored.contains(&name) || (entry.file_type().is_dir() && name.starts_with('.'))
}

fn walk_files(root: &Path) -> impl Iterator<Item = DirEntry> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_ignored(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Every non-ignored file in the checkout, as repository-relative paths.
pub fn list_repo_files(root: &Path) -> BTreeSet<String> {
    walk_files(root).map(|e| relative(root, e.path())).collect()
}

/// Outline every supported source file and render the source map.
pub fn get_source_map(root: &Path) -> SourceMap {
    let files = list_repo_files(root);
    let candidates: Vec<&String> = files
        .iter()
        .filter(|f| Language::from_path(Path::new(f)) != Language::Unknown)
        .collect();

    let outlines: Vec<FileOutline> = candidates
        .par_iter()
        .filter_map(|rel| {
            let path = root.join(rel);
            let too_big = std::fs::metadata(&path)
                .map(|m| m.len() > MAX_PARSE_BYTES)
                .unwrap_or(true);
            if too_big {
                return None;
            }
            let content = std::fs::read_to_string(&path).ok()?;
            match outline_file(&path, &content) {
                Ok(symbols) => Some(FileOutline {
                    path: rel.to_string(),
                    symbols,
                }),
                Err(err) => {
                    tracing::debug!(file = %rel, error = %err, "skipping unparsable file");
                    None
                }
            }
        })
        .collect();

    let map = SourceMap::from_outlines(&outlines, files);
    if !map.structured {
        tracing::info!(root = %root.display(), "no symbols found, using flat file listing");
    }
    map
}

fn settings_dir_or_defaults(
    root: &Path,
    configured: Option<&str>,
    defaults: &[&str],
) -> Vec<PathBuf> {
    match configured {
        Some(dir) => vec![root.join(dir)],
        None => defaults.iter().map(|d| root.join(d)).collect(),
    }
}

/// Type declarations from the configured types directory (or the usual
/// locations) plus any `.d.ts` file, each prefixed with its path.
pub fn get_types(root: &Path, settings: &RepoSettings) -> String {
    let mut files: BTreeSet<PathBuf> = BTreeSet::new();
    for dir in settings_dir_or_defaults(root, settings.directories.types.as_deref(), DEFAULT_TYPE_DIRS) {
        if dir.is_dir() {
            files.extend(walk_files(&dir).map(|e| e.into_path()));
        } else if dir.with_extension("ts").is_file() {
            files.insert(dir.with_extension("ts"));
        }
    }
    files.extend(
        walk_files(root)
            .map(|e| e.into_path())
            .filter(|p| p.to_string_lossy().ends_with(".d.ts")),
    );

    let mut out = String::new();
    for path in files {
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let decls = match type_declarations(&path, &content) {
            Ok(decls) => decls,
            Err(err) => {
                tracing::debug!(file = %path.display(), error = %err, "skipping types file");
                continue;
            }
        };
        if decls.is_empty() {
            continue;
        }
        out.push_str(&format!("// {}\n", relative(root, &path)));
        for decl in decls {
            out.push_str(&decl);
            out.push('\n');
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

/// Image assets available to generated code, as repository-relative paths.
pub fn get_images(root: &Path, settings: &RepoSettings) -> Vec<PathBuf> {
    let mut images: BTreeSet<PathBuf> = BTreeSet::new();
    for dir in settings_dir_or_defaults(root, settings.directories.images.as_deref(), DEFAULT_IMAGE_DIRS) {
        if !dir.is_dir() {
            continue;
        }
        images.extend(
            walk_files(&dir)
                .filter(|e| {
                    e.path()
                        .extension()
                        .and_then(|x| x.to_str())
                        .is_some_and(|x| IMAGE_EXTENSIONS.contains(&x.to_ascii_lowercase().as_str()))
                })
                .map(|e| PathBuf::from(relative(root, e.path()))),
        );
    }
    images.into_iter().collect()
}
