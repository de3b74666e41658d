//! Issue input and research context.

use pulldown_cmark::{Event, Parser, Tag};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// A GitHub issue as read by the agent. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub assignees: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl Issue {
    pub fn body_text(&self) -> &str {
        self.body.as_deref().unwrap_or_default()
    }

    /// Title and body joined the way every prompt consumes them.
    pub fn issue_text(&self) -> String {
        format!("{}\n{}", self.title, self.body_text())
    }

    /// First image referenced by the issue body, used as the design snapshot.
    pub fn snapshot_url(&self) -> Option<String> {
        first_image_url(self.body_text())
    }
}

/// Find the first image in Markdown text, either `![alt](url)` or an inline `<img src>`.
pub fn first_image_url(markdown: &str) -> Option<String> {
    for event in Parser::new(markdown) {
        match event {
            Event::Start(Tag::Image { dest_url, .. }) => {
                let url = dest_url.trim();
                if !url.is_empty() {
                    return Some(url.to_string());
                }
            }
            Event::Html(html) | Event::InlineHtml(html) => {
                if let Some(url) = img_src(&html) {
                    return Some(url);
                }
            }
            _ => {}
        }
    }
    None
}

fn img_src(html: &str) -> Option<String> {
    static IMG_SRC: OnceLock<Option<Regex>> = OnceLock::new();
    let re = IMG_SRC
        .get_or_init(|| Regex::new(r#"(?i)<img[^>]*\ssrc\s*=\s*["']([^"']+)["']"#).ok())
        .as_ref()?;
    re.captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|url| !url.is_empty())
}

/// One answered research question attached to a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub question: String,
    pub answer: String,
}

pub fn format_research(items: &[ResearchItem]) -> String {
    items
        .iter()
        .map(|item| {
            format!(
                "### {} \n\n#### Question: {} \n\n{}",
                item.kind, item.question, item.answer
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
