//! Small text helpers shared across crates.

/// Truncate a string to `max` characters, appending `...` when shortened.
pub fn truncate(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }

    if max <= 3 {
        return s.chars().take(max).collect();
    }

    let truncated: String = s.chars().take(max - 3).collect();
    format!("{}...", truncated)
}

/// Keep the first `max` characters without any ellipsis.
pub fn prefix_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Keep the last `max_chars` characters of a string.
pub fn tail_chars(s: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    let count = s.chars().count();
    if count <= max_chars {
        return s.to_string();
    }
    s.chars()
        .skip(count.saturating_sub(max_chars))
        .collect::<String>()
}

/// Best-effort language label for a file path, used in code-change events.
pub fn language_for_path(path: &str) -> Option<&'static str> {
    let ext = path.rsplit_once('.').map(|(_, ext)| ext)?;
    let language = match ext.to_ascii_lowercase().as_str() {
        "ts" | "tsx" => "typescript",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "rs" => "rust",
        "py" => "python",
        "go" => "go",
        "css" | "scss" => "css",
        "json" => "json",
        "md" | "mdx" => "markdown",
        "html" => "html",
        "yml" | "yaml" => "yaml",
        "toml" => "toml",
        _ => return None,
    };
    Some(language)
}

/// Final path component, used as a display name.
pub fn file_name_of(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
