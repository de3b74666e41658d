// ═══════════════════════════════════════════════════════════════════════════════
// SHARED BUILDING BLOCKS
// ═══════════════════════════════════════════════════════════════════════════════

use jacob_core::files::FILEPATH_MARKER;
use jacob_core::review::{COMMENT_END, COMMENT_START};

/// Output rules for any prompt that returns whole files.
const FULL_FILE_RULES: &str = r#"FILE OUTPUT:
- Return every file you change in full. Never elide code with comments like "rest of file".
- Start each file with a line `__FILEPATH__<relative/path>__` followed by the complete file content.
- No markdown fences, commentary or line numbers."#;

const CODE_QUALITY_RULES: &str = r#"QUALITY:
- Match the existing style, naming and imports of the codebase.
- Only use packages that are already installed.
- Keep changes scoped to the task."#;

/// Section heading followed by its content, or nothing when the content is empty.
fn section(heading: &str, content: &str) -> String {
    let content = content.trim();
    if content.is_empty() {
        String::new()
    } else {
        format!("\n\n## {}\n\n{}", heading, content)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ISSUE EXTRACTION
// ═══════════════════════════════════════════════════════════════════════════════

pub const EXTRACT_ISSUE_SYSTEM: &str = r#"You are a senior engineer triaging a GitHub issue against a codebase.

Read the issue and the source map, then decide which files must change.

OUTPUT (JSON object only):
{
  "issueType": "BUG|FEATURE|DOCUMENTATION|OTHER",
  "issueQualityScore": 0-5,
  "commitTitle": "Short imperative commit title",
  "filesToCreate": ["path/relative/to/root"],
  "filesToUpdate": ["path/relative/to/root"],
  "filesToDelete": [],
  "stepsToAddressIssue": ["One concrete step per entry"]
}

RULES:
- filesToCreate must not contain any path that already appears in the source map.
- filesToUpdate may only contain paths that appear in the source map.
- Leave both lists empty when the issue cannot be addressed with code changes."#;

pub fn extract_issue_user(source_map: &str, issue_text: &str) -> String {
    format!(
        "## Source Map\n\n{}\n\n## GitHub Issue\n\n{}\n\nReturn the JSON object now.",
        source_map.trim(),
        issue_text.trim()
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// PLANNING
// ═══════════════════════════════════════════════════════════════════════════════

pub const PLAN_SYSTEM: &str = r#"You are a lead engineer turning a GitHub issue into an ordered plan of file changes.

Each step touches exactly one file. Steps run in order and later steps can rely on earlier ones.

OUTPUT (JSON object only):
{
  "steps": [{
    "type": "EditFiles|CreateNewCode",
    "title": "Short title used as the commit message",
    "filePath": "path/relative/to/root",
    "instructions": "Precise instructions for this file",
    "exitCriteria": "How to tell this step is complete"
  }]
}

RULES:
- Use CreateNewCode only for paths that are not in the source map, EditFiles only for paths that are.
- If code changes were already made, plan only the remaining work.
- If build errors are listed, plan the changes that fix them.
- Return an empty steps list when nothing remains to be done."#;

#[derive(Debug, Clone, Copy, Default)]
pub struct PlanPromptParams<'a> {
    pub issue_text: &'a str,
    pub source_map: &'a str,
    pub research: &'a str,
    pub code_patch: &'a str,
    pub build_errors: &'a str,
}

pub fn plan_user(params: &PlanPromptParams<'_>) -> String {
    let mut prompt = format!(
        "## GitHub Issue\n\n{}{}",
        params.issue_text.trim(),
        section("Source Map", params.source_map)
    );
    prompt.push_str(&section("Research", params.research));
    prompt.push_str(&section(
        "Code Changes Already Made (unified diffs)",
        params.code_patch,
    ));
    prompt.push_str(&section("Build Errors After Those Changes", params.build_errors));
    prompt.push_str("\n\nReturn the JSON plan now.");
    prompt
}

// ═══════════════════════════════════════════════════════════════════════════════
// CODE EDITS
// ═══════════════════════════════════════════════════════════════════════════════

pub const VISION_PROMPT: &str = r#"The image above is a design snapshot attached to the issue. Match its layout, spacing, colors and copy as closely as the codebase allows."#;

pub const CODE_EDIT_FILES_DIFF_SYSTEM: &str = r#"You are an expert engineer implementing one step of a plan.

Return a single unified diff for the target file wrapped in <code_patch></code_patch> tags.

DIFF FORMAT:
- Start with `--- a/<path>` and `+++ b/<path>` headers. Use `--- /dev/null` for a new file.
- Each hunk starts with `@@ -start,count +start,count @@`.
- Context lines start with a space, removed lines with `-`, added lines with `+`.
- Copy context lines exactly from the current file.

If the step needs no change, reply without a <code_patch> block."#;

#[derive(Debug, Clone, Copy, Default)]
pub struct CodeEditPromptParams<'a> {
    pub source_map: &'a str,
    pub types: &'a str,
    pub packages: &'a str,
    pub styles: &'a str,
    pub images: &'a str,
    pub code: &'a str,
    pub issue_text: &'a str,
    pub research: &'a str,
    pub plan: &'a str,
    pub code_patch: &'a str,
}

pub fn code_edit_files_diff_system() -> String {
    format!("{}\n\n{}", CODE_EDIT_FILES_DIFF_SYSTEM, CODE_QUALITY_RULES)
}

pub fn code_edit_files_diff_user(params: &CodeEditPromptParams<'_>) -> String {
    let mut prompt = format!("## GitHub Issue\n\n{}", params.issue_text.trim());
    prompt.push_str(&section("Plan For This Step", params.plan));
    prompt.push_str(&section("Research", params.research));
    prompt.push_str(&section("Source Map", params.source_map));
    prompt.push_str(&section("Types", params.types));
    prompt.push_str(&section("Installed Packages", params.packages));
    prompt.push_str(&section("Style Guidance", params.styles));
    prompt.push_str(&section("Available Images", params.images));
    prompt.push_str(&section("Changes Made In Earlier Steps", params.code_patch));
    if params.code.trim().is_empty() {
        prompt.push_str("\n\n## Current File\n\nThis is a new file. It does not exist yet.");
    } else {
        prompt.push_str(&section("Current File", params.code));
    }
    prompt.push_str("\n\nReturn the <code_patch> now.");
    prompt
}

pub const FILE_CONTENT_SYSTEM: &str =
    "You turn diffs into complete file contents. Reply with the file inside <file_content> tags and nothing else.";

/// Ask for the full content of a new file described by a diff.
pub fn new_file_content_user(patch: &str) -> String {
    format!(
        r#"I want to create a new file with the following patch:

{patch}

Please provide the complete file content based on this patch. Your response should:
1. Include the entire file content, not just the changed parts.
2. Remove any diff-specific syntax (like +, -, @@ lines).
3. Be surrounded by <file_content> tags.
4. Contain no additional commentary, explanations, or code blocks.

Here's an example of how your response should be formatted:

<file_content>
export function greet(name: string): string {{
  return `Hello, ${{name}}!`;
}}
</file_content>"#,
        patch = patch.trim()
    )
}

/// Ask for the full updated content when a diff does not apply cleanly.
pub fn apply_patch_fallback_user(file_path: &str, original: &str, patch: &str) -> String {
    format!(
        r#"I want to apply the following patch to `{file_path}`, but it does not apply cleanly.

Current content of the file:

<original>
{original}
</original>

Patch:

{patch}

Please provide the complete updated file content with the intent of the patch applied. Your response should:
1. Include the entire file content, not just the changed parts.
2. Remove any diff-specific syntax (like +, -, @@ lines).
3. Be surrounded by <file_content> tags.
4. Contain no additional commentary, explanations, or code blocks."#,
        file_path = file_path,
        original = original,
        patch = patch.trim()
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// CODE REVIEW
// ═══════════════════════════════════════════════════════════════════════════════

pub fn code_review_system() -> String {
    format!(
        r#"You are a meticulous senior engineer reviewing a pull request{issue_hint}.

Each file is shown after a `{marker}<path>__` line with every line prefixed by its line number.

OUTPUT:
- Repeat each file exactly as given, starting with its `{marker}<path>__` line and keeping the line numbers.
- Insert each comment on its own lines directly after the numbered line it refers to:
{start} Comment text in plain Markdown. {end}
- Only comment on real problems: bugs, missing edge cases, security issues or clear deviations from the issue.
- If there is nothing to flag, repeat the file markers with no comments."#,
        issue_hint = " against the issue it addresses",
        marker = FILEPATH_MARKER,
        start = COMMENT_START,
        end = COMMENT_END
    )
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CodeReviewPromptParams<'a> {
    pub source_map: &'a str,
    pub types: &'a str,
    pub code: &'a str,
    pub pr_title_and_body: &'a str,
    pub issue_text: &'a str,
}

pub fn code_review_user(params: &CodeReviewPromptParams<'_>) -> String {
    let mut prompt = format!("## Pull Request\n\n{}", params.pr_title_and_body.trim());
    prompt.push_str(&section("GitHub Issue", params.issue_text));
    prompt.push_str(&section("Source Map", params.source_map));
    prompt.push_str(&section("Types", params.types));
    prompt.push_str(&section("Changed Files", params.code));
    prompt.push_str("\n\nReview the changed files now.");
    prompt
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILD ERROR REPAIR
// ═══════════════════════════════════════════════════════════════════════════════

pub const ASSESS_BUILD_ERROR_SYSTEM: &str = r#"You are diagnosing a failed build.

OUTPUT (JSON object only):
{
  "errors": [{
    "filePath": "path/relative/to/root",
    "startingLineNumber": 1,
    "endingLineNumber": 1,
    "error": "The compiler message",
    "code": "The offending code"
  }],
  "needsNpmInstall": false,
  "npmPackageToInstall": null,
  "filesToUpdate": ["path/relative/to/root"],
  "causeOfError": "Short explanation",
  "ideasForFixingError": "Short list of ideas",
  "suggestedFix": "The fix you recommend"
}

RULES:
- Set needsNpmInstall only when the build fails because a package is missing, and name that package.
- filesToUpdate lists every file that must change to fix the errors."#;

pub fn assess_build_error_user(source_map: &str, errors: &str) -> String {
    format!(
        "## Source Map\n\n{}\n\n## Build Output\n\n{}\n\nReturn the JSON assessment now.",
        source_map.trim(),
        errors.trim()
    )
}

pub fn code_fix_error_system() -> String {
    format!(
        "You are an expert engineer fixing build errors in a pull request.\n\n{}\n\n{}",
        FULL_FILE_RULES, CODE_QUALITY_RULES
    )
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FixErrorPromptParams<'a> {
    pub code: &'a str,
    pub issue_body: &'a str,
    pub error_messages: &'a str,
    pub source_map: &'a str,
    pub types: &'a str,
    pub images: &'a str,
}

pub fn code_fix_error_user(params: &FixErrorPromptParams<'_>) -> String {
    let mut prompt = format!("## Errors\n\n{}", params.error_messages.trim());
    prompt.push_str(&section("Original Issue", params.issue_body));
    prompt.push_str(&section("Source Map", params.source_map));
    prompt.push_str(&section("Types", params.types));
    prompt.push_str(&section("Available Images", params.images));
    prompt.push_str(&section("Files To Fix", params.code));
    prompt.push_str("\n\nReturn the fixed files now.");
    prompt
}
