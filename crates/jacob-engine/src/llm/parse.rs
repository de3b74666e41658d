//! Lenient parsing of model output into typed values.
//!
//! Responses are stripped of markdown fences, cleaned of JSONC comments and
//! trailing commas, then deserialized and checked by a caller-supplied
//! validator. The outcome says which of those stages failed.

use serde::de::DeserializeOwned;

/// Result of turning one response into a `T`.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredOutcome<T> {
    Ok(T),
    /// The text could not be read as JSON at all.
    ParseError(String),
    /// Valid JSON that does not match `T`, or a `T` the validator rejected.
    SchemaError(String),
}

/// Strip a surrounding markdown code fence, or pull the first fenced block
/// out of surrounding prose.
pub fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let body = if trimmed.starts_with("```") {
        trimmed
    } else if let Some(start) = trimmed.find("\n```") {
        &trimmed[start + 1..]
    } else {
        return trimmed;
    };
    let after_open = &body[3..];
    let after_header = match after_open.find('\n') {
        Some(idx) => &after_open[idx + 1..],
        None => after_open,
    };
    match after_header.find("```") {
        Some(end) => after_header[..end].trim(),
        None => after_header.trim(),
    }
}

/// Remove `//` and `/* */` comments and trailing commas outside strings.
pub fn strip_jsonc(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Extract a balanced JSON fragment starting at the first `{` or `[`.
/// Delimiters inside strings are ignored.
pub fn extract_json_fragment(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(ch) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Read model output as a JSON value, trying progressively looser readings.
pub fn parse_lenient_json(text: &str) -> Result<serde_json::Value, String> {
    let unfenced = strip_markdown_fences(text);
    let mut candidates = vec![unfenced.to_string(), strip_jsonc(unfenced)];
    if let Some(fragment) = extract_json_fragment(unfenced) {
        candidates.push(strip_jsonc(fragment));
    }

    let mut last_err = String::from("empty response");
    for candidate in candidates {
        if candidate.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<serde_json::Value>(&candidate) {
            Ok(value) => return Ok(value),
            Err(err) => last_err = err.to_string(),
        }
    }
    Err(last_err)
}

pub fn parse_structured<T, V>(text: &str, validate: V) -> StructuredOutcome<T>
where
    T: DeserializeOwned,
    V: Fn(&T) -> Result<(), String>,
{
    let value = match parse_lenient_json(text) {
        Ok(value) => value,
        Err(err) => return StructuredOutcome::ParseError(err),
    };
    let parsed: T = match serde_json::from_value(value) {
        Ok(parsed) => parsed,
        Err(err) => return StructuredOutcome::SchemaError(err.to_string()),
    };
    match validate(&parsed) {
        Ok(()) => StructuredOutcome::Ok(parsed),
        Err(err) => StructuredOutcome::SchemaError(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Probe {
        name: String,
        #[serde(default)]
        tags: Vec<String>,
    }

    fn no_check(_: &Probe) -> Result<(), String> {
        Ok(())
    }

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_markdown_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_markdown_fences("  {\"a\":1}  "), "{\"a\":1}");
        assert_eq!(
            strip_markdown_fences("Here you go:\n```\n[1]\n```\nthanks"),
            "[1]"
        );
    }

    #[test]
    fn test_strip_jsonc_keeps_strings_intact() {
        let text = r#"{
            // the name
            "name": "a // b, }", /* inline */
            "tags": ["x", "y",],
        }"#;
        let cleaned = strip_jsonc(text);
        let value: serde_json::Value = serde_json::from_str(&cleaned).unwrap();
        assert_eq!(value["name"], "a // b, }");
        assert_eq!(value["tags"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_fragment_ignores_surrounding_prose() {
        assert_eq!(
            extract_json_fragment("Sure! {\"a\": \"}\"} done"),
            Some("{\"a\": \"}\"}")
        );
        assert_eq!(extract_json_fragment("no json"), None);
        assert_eq!(extract_json_fragment("{\"a\": [1}"), None);
    }

    #[test]
    fn test_parse_structured_outcomes() {
        assert_eq!(
            parse_structured("```json\n{\"name\": \"x\",}\n```", no_check),
            StructuredOutcome::Ok(Probe {
                name: "x".to_string(),
                tags: vec![]
            })
        );
        assert!(matches!(
            parse_structured::<Probe, _>("not json at all", no_check),
            StructuredOutcome::ParseError(_)
        ));
        assert!(matches!(
            parse_structured::<Probe, _>("{\"title\": \"x\"}", no_check),
            StructuredOutcome::SchemaError(_)
        ));
        let outcome = parse_structured("{\"name\": \"\"}", |p: &Probe| {
            if p.name.is_empty() {
                Err("name is empty".to_string())
            } else {
                Ok(())
            }
        });
        assert_eq!(outcome, StructuredOutcome::SchemaError("name is empty".to_string()));
    }

    #[test]
    fn test_arrays_parse_as_vectors() {
        let parsed = parse_structured::<Vec<Probe>, _>(
            "[{\"name\": \"a\"}, {\"name\": \"b\"}]",
            |_| Ok(()),
        );
        assert!(matches!(parsed, StructuredOutcome::Ok(ref v) if v.len() == 2));
    }
}
