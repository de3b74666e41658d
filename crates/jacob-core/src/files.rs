//! Multi-file text protocol.
//!
//! Several prompts exchange whole files as one string where every file starts
//! with a `__FILEPATH__{path}__` marker line.

use crate::patch::strip_code_fence;
use crate::source_map::normalize_repo_path;
use std::collections::BTreeMap;
use thiserror::Error;

pub const FILEPATH_MARKER: &str = "__FILEPATH__";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlock {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FileBlockError {
    #[error("response contains no __FILEPATH__ markers")]
    NoMarkers,
    #[error("marker on line {line} has an empty path")]
    EmptyPath { line: usize },
    #[error("file {path} appears more than once")]
    DuplicatePath { path: String },
}

/// Path named by a marker line, if the line is one.
fn marker_path(line: &str) -> Option<&str> {
    let rest = line.trim().strip_prefix(FILEPATH_MARKER)?;
    Some(rest.strip_suffix("__").unwrap_or(rest).trim())
}

fn finish_block(
    current: Option<(String, Vec<&str>)>,
    blocks: &mut Vec<FileBlock>,
) -> Result<(), FileBlockError> {
    let Some((path, lines)) = current else {
        return Ok(());
    };
    if blocks.iter().any(|b| b.path == path) {
        return Err(FileBlockError::DuplicatePath { path });
    }
    let joined = lines.join("\n");
    let content = strip_code_fence(&joined).trim_end();
    let content = if content.is_empty() {
        String::new()
    } else {
        format!("{}\n", content)
    };
    blocks.push(FileBlock { path, content });
    Ok(())
}

/// Split a multi-file response into `(path, content)` pairs in order.
/// Text before the first marker is ignored.
pub fn parse_file_blocks(text: &str) -> Result<Vec<FileBlock>, FileBlockError> {
    let mut blocks: Vec<FileBlock> = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for (index, line) in text.lines().enumerate() {
        if let Some(path) = marker_path(line) {
            if path.is_empty() {
                return Err(FileBlockError::EmptyPath { line: index + 1 });
            }
            finish_block(current.take(), &mut blocks)?;
            current = Some((normalize_repo_path(path), Vec::new()));
        } else if let Some((_, lines)) = current.as_mut() {
            lines.push(line);
        }
    }
    finish_block(current.take(), &mut blocks)?;

    if blocks.is_empty() {
        return Err(FileBlockError::NoMarkers);
    }
    Ok(blocks)
}

/// Join files into one marker-delimited string.
pub fn concatenate_files<'a>(files: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut out = String::new();
    for (path, content) in files {
        out.push_str(&format!("{}{}__\n", FILEPATH_MARKER, path));
        out.push_str(content);
        if !content.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}

/// Prefix every line with its 1-based number: `12| code`.
pub fn add_line_numbers(content: &str) -> String {
    content
        .lines()
        .enumerate()
        .map(|(i, line)| format!("{}| {}", i + 1, line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse a `12| code` line back into its number and text.
pub fn split_numbered_line(line: &str) -> Option<(usize, &str)> {
    let (number, rest) = line.split_once('|')?;
    let number = number.trim().parse().ok()?;
    Some((number, rest.strip_prefix(' ').unwrap_or(rest)))
}

/// Line counts per file, keyed by normalised path.
pub fn line_count_map<'a>(files: impl IntoIterator<Item = (&'a str, &'a str)>) -> BTreeMap<String, usize> {
    files
        .into_iter()
        .map(|(path, content)| (normalize_repo_path(path), content.lines().count()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_two_files_in_order() {
        let text = "Sure, here are the files.\n__FILEPATH__src/a.ts__\nconst a = 1;\n__FILEPATH__./src/b.ts__\n```ts\nconst b = 2;\n```\n";
        let blocks = parse_file_blocks(text).unwrap();
        assert_eq!(
            blocks,
            vec![
                FileBlock {
                    path: "src/a.ts".to_string(),
                    content: "const a = 1;\n".to_string()
                },
                FileBlock {
                    path: "src/b.ts".to_string(),
                    content: "const b = 2;\n".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_malformed_marker_sequences_are_errors() {
        assert_eq!(parse_file_blocks("plain text").unwrap_err(), FileBlockError::NoMarkers);
        assert_eq!(
            parse_file_blocks("__FILEPATH____\nx").unwrap_err(),
            FileBlockError::EmptyPath { line: 1 }
        );
        assert_eq!(
            parse_file_blocks("__FILEPATH__a.ts__\n1\n__FILEPATH__a.ts__\n2").unwrap_err(),
            FileBlockError::DuplicatePath {
                path: "a.ts".to_string()
            }
        );
    }

    #[test]
    fn test_concatenate_then_parse() {
        let joined = concatenate_files([("src/a.ts", "x\n"), ("src/b.ts", "y")]);
        assert_eq!(joined, "__FILEPATH__src/a.ts__\nx\n__FILEPATH__src/b.ts__\ny\n");
        assert_eq!(parse_file_blocks(&joined).unwrap().len(), 2);
    }

    #[test]
    fn test_line_numbers() {
        assert_eq!(add_line_numbers("a\nb"), "1| a\n2| b");
        assert_eq!(split_numbered_line("12| let x = 1;"), Some((12, "let x = 1;")));
        assert_eq!(split_numbered_line("no number"), None);
        let counts = line_count_map([("./a.ts", "1\n2\n3\n")]);
        assert_eq!(counts.get("a.ts"), Some(&3));
    }
}
