//! Textual repository summaries used as prompt context.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlineKind {
    Function,
    Method,
    Class,
    Struct,
    Enum,
    Trait,
    Interface,
    Type,
    Constant,
    Module,
}

impl fmt::Display for OutlineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OutlineKind::Function => "function",
            OutlineKind::Method => "method",
            OutlineKind::Class => "class",
            OutlineKind::Struct => "struct",
            OutlineKind::Enum => "enum",
            OutlineKind::Trait => "trait",
            OutlineKind::Interface => "interface",
            OutlineKind::Type => "type",
            OutlineKind::Constant => "const",
            OutlineKind::Module => "mod",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineSymbol {
    pub kind: OutlineKind,
    pub name: String,
    pub line: usize,
}

/// Symbols found in one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOutline {
    pub path: String,
    pub symbols: Vec<OutlineSymbol>,
}

/// Summary of a checkout: the rendered text plus the set of files it covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMap {
    pub text: String,
    pub files: BTreeSet<String>,
    /// False when no symbols could be derived and `text` is a flat listing.
    pub structured: bool,
}

impl SourceMap {
    /// Render outlines, falling back to a flat listing when nothing was parsed.
    pub fn from_outlines(outlines: &[FileOutline], files: BTreeSet<String>) -> Self {
        let mut outlines: Vec<&FileOutline> =
            outlines.iter().filter(|o| !o.symbols.is_empty()).collect();
        if outlines.is_empty() {
            return Self::flat(files);
        }
        outlines.sort_by(|a, b| a.path.cmp(&b.path));

        let mut text = String::new();
        for outline in outlines {
            text.push_str(&outline.path);
            text.push_str(":\n");
            for symbol in &outline.symbols {
                text.push_str(&format!("  {} {}\n", symbol.kind, symbol.name));
            }
        }

        let outlined: BTreeSet<&str> = text
            .lines()
            .filter_map(|line| line.strip_suffix(':'))
            .collect();
        let rest: Vec<&String> = files
            .iter()
            .filter(|f| !outlined.contains(f.as_str()))
            .collect();
        if !rest.is_empty() {
            text.push_str("\nOther files:\n");
            for file in rest {
                text.push_str(file);
                text.push('\n');
            }
        }

        Self {
            text,
            files,
            structured: true,
        }
    }

    pub fn flat(files: BTreeSet<String>) -> Self {
        let text = files
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            text,
            files,
            structured: false,
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains(&normalize_repo_path(path))
    }
}

/// Normalise a repository-relative path as produced by an LLM: strips `./`,
/// leading slashes and converts backslashes.
pub fn normalize_repo_path(path: &str) -> String {
    let path = path.trim().replace('\\', "/");
    let mut path = path.as_str();
    loop {
        if let Some(rest) = path.strip_prefix("./") {
            path = rest;
        } else if let Some(rest) = path.strip_prefix('/') {
            path = rest;
        } else {
            break;
        }
    }
    path.to_string()
}
