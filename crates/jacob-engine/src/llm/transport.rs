//! Provider transports. Every provider is reduced to one request shape and
//! one response shape so the gateway never branches on vendor details.

use super::models::{Model, Provider, Usage};
use async_trait::async_trait;
use jacob_core::util::truncate;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_ERROR_CONTENT_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    ImageUrl(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl ChatMessage {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::Text(text.into())],
        }
    }

    /// Text parts joined, images rendered as their URL.
    pub fn flattened(&self) -> String {
        self.content
            .iter()
            .map(|part| match part {
                ContentPart::Text(text) => text.clone(),
                ContentPart::ImageUrl(url) => format!("[image: {}]", url),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: Model,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub json_mode: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
    pub usage: Usage,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("rate limited by provider: {0}")]
    RateLimited(String),
    #[error("no transport configured for {0:?} models")]
    Unconfigured(Provider),
    #[error("request failed: {0}")]
    Network(String),
    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("unreadable provider response: {0}")]
    InvalidResponse(String),
    #[error("request was refused: {0}")]
    Refused(String),
}

#[async_trait]
pub trait LlmTransport: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, TransportError>;
}

/// Sanitize API response content for error messages to prevent credential leakage.
fn sanitize_api_response(content: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "api_key",
        "apikey",
        "secret",
        "password",
        "credential",
        "bearer",
        "sk-",
    ];

    let truncated = truncate(content, MAX_ERROR_CONTENT_LEN);
    let lower = truncated.to_lowercase();
    if SECRET_PATTERNS.iter().any(|p| lower.contains(p)) {
        return "(response details redacted - may contain sensitive data)".to_string();
    }
    truncated
}

pub fn create_http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))
}

async fn read_response(response: reqwest::Response) -> Result<String, TransportError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| TransportError::Network(e.to_string()))?;
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(TransportError::RateLimited(sanitize_api_response(&text)));
    }
    if !status.is_success() {
        return Err(TransportError::Api {
            status: status.as_u16(),
            message: sanitize_api_response(&text),
        });
    }
    Ok(text)
}

// ═══════════════════════════════════════════════════════════════════════════
//  OPENAI-COMPATIBLE CHAT COMPLETIONS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Serialize)]
struct OpenAiImageUrl<'a> {
    url: &'a str,
    detail: &'static str,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAiPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: OpenAiImageUrl<'a> },
}

#[derive(Serialize)]
#[serde(untagged)]
enum OpenAiContent<'a> {
    Text(&'a str),
    Parts(Vec<OpenAiPart<'a>>),
}

#[derive(Serialize)]
struct OpenAiMessage<'a> {
    role: &'static str,
    content: OpenAiContent<'a>,
}

#[derive(Serialize)]
struct OpenAiResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'static str,
    messages: Vec<OpenAiMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<OpenAiResponseFormat>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessageContent,
}

#[derive(Deserialize)]
struct OpenAiMessageContent {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

fn openai_message(message: &ChatMessage) -> OpenAiMessage<'_> {
    let content = match message.content.as_slice() {
        [ContentPart::Text(text)] => OpenAiContent::Text(text),
        parts => OpenAiContent::Parts(
            parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text(text) => OpenAiPart::Text { text },
                    ContentPart::ImageUrl(url) => OpenAiPart::ImageUrl {
                        image_url: OpenAiImageUrl { url, detail: "high" },
                    },
                })
                .collect(),
        ),
    };
    OpenAiMessage {
        role: message.role.as_str(),
        content,
    }
}

fn openai_request_body(request: &CompletionRequest) -> OpenAiChatRequest<'_> {
    OpenAiChatRequest {
        model: request.model.id(),
        messages: request.messages.iter().map(openai_message).collect(),
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        response_format: request.json_mode.then_some(OpenAiResponseFormat {
            format_type: "json_object",
        }),
    }
}

fn parse_openai_response(text: &str) -> Result<Completion, TransportError> {
    let parsed: OpenAiChatResponse = serde_json::from_str(text)
        .map_err(|e| TransportError::InvalidResponse(format!("{}: {}", e, sanitize_api_response(text))))?;
    let choice = parsed.choices.into_iter().next();
    if let Some(refusal) = choice.as_ref().and_then(|c| c.message.refusal.clone()) {
        return Err(TransportError::Refused(truncate(&refusal, MAX_ERROR_CONTENT_LEN)));
    }
    let usage = parsed.usage.map_or_else(Usage::default, |u| Usage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
    });
    Ok(Completion {
        content: choice.and_then(|c| c.message.content).unwrap_or_default(),
        usage,
    })
}

/// Any `/chat/completions` endpoint: OpenAI itself or a routing gateway
/// fronting other providers.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiCompatibleTransport {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl LlmTransport for OpenAiCompatibleTransport {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, TransportError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&openai_request_body(request))
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let text = read_response(response).await?;
        parse_openai_response(&text)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  ANTHROPIC MESSAGES
// ═══════════════════════════════════════════════════════════════════════════

/// Assistant prefill that forces a bare JSON object in JSON mode.
const JSON_PREFILL: &str = "{";

#[derive(Serialize)]
struct AnthropicImageSource<'a> {
    #[serde(rename = "type")]
    source_type: &'static str,
    url: &'a str,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicPart<'a> {
    Text { text: &'a str },
    Image { source: AnthropicImageSource<'a> },
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: Vec<AnthropicPart<'a>>,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'static str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "String::is_empty")]
    system: String,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    usage: Option<AnthropicUsage>,
}

fn anthropic_request_body(request: &CompletionRequest) -> AnthropicRequest<'_> {
    let system = request
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(ChatMessage::flattened)
        .collect::<Vec<_>>()
        .join("\n\n");

    // Consecutive same-role messages are merged; the API expects alternation.
    let mut messages: Vec<AnthropicMessage<'_>> = Vec::new();
    for message in request.messages.iter().filter(|m| m.role != Role::System) {
        let parts = message.content.iter().map(|part| match part {
            ContentPart::Text(text) => AnthropicPart::Text { text },
            ContentPart::ImageUrl(url) => AnthropicPart::Image {
                source: AnthropicImageSource {
                    source_type: "url",
                    url,
                },
            },
        });
        match messages.last_mut() {
            Some(last) if last.role == message.role.as_str() => last.content.extend(parts),
            _ => messages.push(AnthropicMessage {
                role: message.role.as_str(),
                content: parts.collect(),
            }),
        }
    }
    if request.json_mode {
        messages.push(AnthropicMessage {
            role: Role::Assistant.as_str(),
            content: vec![AnthropicPart::Text { text: JSON_PREFILL }],
        });
    }

    AnthropicRequest {
        model: request.model.id(),
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        system,
        messages,
    }
}

fn parse_anthropic_response(text: &str, json_mode: bool) -> Result<Completion, TransportError> {
    let parsed: AnthropicResponse = serde_json::from_str(text)
        .map_err(|e| TransportError::InvalidResponse(format!("{}: {}", e, sanitize_api_response(text))))?;
    let mut content: String = parsed
        .content
        .iter()
        .filter(|b| b.block_type == "text")
        .filter_map(|b| b.text.as_deref())
        .collect();
    if json_mode && !content.is_empty() {
        content.insert_str(0, JSON_PREFILL);
    }
    let usage = parsed.usage.map_or_else(Usage::default, |u| Usage {
        input_tokens: u.input_tokens,
        output_tokens: u.output_tokens,
    });
    Ok(Completion { content, usage })
}

#[derive(Debug, Clone)]
pub struct AnthropicTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AnthropicTransport {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl LlmTransport for AnthropicTransport {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, TransportError> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&anthropic_request_body(request))
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let text = read_response(response).await?;
        parse_anthropic_response(&text, request.json_mode)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  ROUTING
// ═══════════════════════════════════════════════════════════════════════════

/// Sends Anthropic models to the native transport when one is configured and
/// everything else through the OpenAI-compatible endpoint.
#[derive(Clone, Default)]
pub struct ProviderRouter {
    compatible: Option<Arc<dyn LlmTransport>>,
    anthropic: Option<Arc<dyn LlmTransport>>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compatible(mut self, transport: Arc<dyn LlmTransport>) -> Self {
        self.compatible = Some(transport);
        self
    }

    pub fn with_anthropic(mut self, transport: Arc<dyn LlmTransport>) -> Self {
        self.anthropic = Some(transport);
        self
    }

    fn route(&self, model: Model) -> Result<&Arc<dyn LlmTransport>, TransportError> {
        let native = match model.provider() {
            Provider::Anthropic => self.anthropic.as_ref(),
            _ => None,
        };
        native
            .or(self.compatible.as_ref())
            .ok_or(TransportError::Unconfigured(model.provider()))
    }
}

#[async_trait]
impl LlmTransport for ProviderRouter {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, TransportError> {
        self.route(request.model)?.complete(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json_mode: bool, messages: Vec<ChatMessage>) -> CompletionRequest {
        CompletionRequest {
            model: Model::Claude35Sonnet,
            messages,
            temperature: 0.2,
            max_tokens: 4096,
            json_mode,
        }
    }

    #[test]
    fn test_openai_body_uses_parts_only_for_images() {
        let req = request(
            true,
            vec![
                ChatMessage::text(Role::System, "sys"),
                ChatMessage {
                    role: Role::User,
                    content: vec![
                        ContentPart::ImageUrl("https://img/x.png".to_string()),
                        ContentPart::Text("look".to_string()),
                    ],
                },
            ],
        );
        let value = serde_json::to_value(openai_request_body(&req)).unwrap();
        assert_eq!(value["messages"][0]["content"], "sys");
        assert_eq!(value["messages"][1]["content"][0]["type"], "image_url");
        assert_eq!(
            value["messages"][1]["content"][0]["image_url"]["url"],
            "https://img/x.png"
        );
        assert_eq!(value["response_format"]["type"], "json_object");
        assert_eq!(value["model"], "claude-3-5-sonnet-20240620");
    }

    #[test]
    fn test_openai_response_parsing() {
        let json = r#"{"choices":[{"message":{"content":"hi"}}],"usage":{"prompt_tokens":12,"completion_tokens":3}}"#;
        let completion = parse_openai_response(json).unwrap();
        assert_eq!(completion.content, "hi");
        assert_eq!(completion.usage.input_tokens, 12);
        assert_eq!(completion.usage.output_tokens, 3);

        let refused = r#"{"choices":[{"message":{"content":null,"refusal":"no"}}]}"#;
        assert!(matches!(
            parse_openai_response(refused),
            Err(TransportError::Refused(_))
        ));
    }

    #[test]
    fn test_anthropic_body_splits_system_and_merges_users() {
        let req = request(
            true,
            vec![
                ChatMessage::text(Role::System, "sys"),
                ChatMessage::text(Role::User, "a"),
                ChatMessage::text(Role::User, "b"),
            ],
        );
        let value = serde_json::to_value(anthropic_request_body(&req)).unwrap();
        assert_eq!(value["system"], "sys");
        let messages = value["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["content"].as_array().unwrap().len(), 2);
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["content"][0]["text"], "{");
    }

    #[test]
    fn test_anthropic_json_mode_restores_prefill() {
        let json = r#"{"content":[{"type":"text","text":"\"a\": 1}"}],"usage":{"input_tokens":5,"output_tokens":2}}"#;
        let completion = parse_anthropic_response(json, true).unwrap();
        assert_eq!(completion.content, "{\"a\": 1}");
        assert_eq!(completion.usage.input_tokens, 5);
    }

    #[tokio::test]
    async fn test_router_without_transport_is_unconfigured() {
        let router = ProviderRouter::new();
        let err = router
            .complete(&request(false, vec![ChatMessage::text(Role::User, "x")]))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Unconfigured(Provider::Anthropic)));
    }

    #[test]
    fn test_sanitize_api_response_redacts_keys() {
        assert_eq!(
            sanitize_api_response("invalid key sk-abc"),
            "(response details redacted - may contain sensitive data)"
        );
    }
}
