//! Single entry point for model calls: output sizing, rate-limit backoff,
//! structured-output retries, vision fallback and prompt accounting.

use super::models::{Model, Usage};
use super::parse::{parse_structured, StructuredOutcome};
use super::prompts::VISION_PROMPT;
use super::transport::{ChatMessage, CompletionRequest, ContentPart, LlmTransport, Role, TransportError};
use crate::events::Events;
use jacob_core::events::{PromptEvent, PromptMessage};
use jacob_core::util::prefix_chars;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Prompt prefix kept in the error raised when structured retries run out.
const FAILED_PROMPT_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("rate limited after {retries} retries: {message}")]
    RateLimited { retries: u32, message: String },
    #[error("prompt is too large for the {model} context window")]
    ContextOverflow { model: Model },
    #[error("empty response from {model}")]
    EmptyResponse { model: Model },
    #[error("{model} does not accept image input")]
    VisionUnsupported { model: Model },
    #[error("Max retries exceeded after {attempts} attempts for request: {prompt} ({last_error})")]
    StructuredRetriesExhausted {
        attempts: u32,
        prompt: String,
        last_error: String,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Rate-limit retries after the first call.
    pub rate_limit_retries: u32,
    /// First backoff delay; doubled after every rate-limited attempt.
    pub rate_limit_base_delay: Duration,
    /// Structured-output retries after the first call.
    pub structured_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rate_limit_retries: 10,
            rate_limit_base_delay: Duration::from_secs(60),
            structured_retries: 3,
        }
    }
}

/// Per-call overrides. Unset fields use the gateway defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RequestOptions {
    pub model: Option<Model>,
    pub temperature: Option<f32>,
}

#[derive(Clone)]
pub struct Gateway {
    transport: Arc<dyn LlmTransport>,
    events: Events,
    model: Model,
    vision_model: Model,
    temperature: f32,
    policy: RetryPolicy,
}

impl Gateway {
    pub fn new(transport: Arc<dyn LlmTransport>, events: Events) -> Self {
        Self {
            transport,
            events,
            model: Model::Claude35Sonnet,
            vision_model: Model::Gpt4o,
            temperature: DEFAULT_TEMPERATURE,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_models(mut self, model: Model, vision_model: Model) -> Self {
        self.model = model;
        self.vision_model = vision_model;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn events(&self) -> &Events {
        &self.events
    }

    pub fn model(&self) -> Model {
        self.model
    }

    /// Plain text completion, retried with exponential backoff while the
    /// provider reports rate limiting.
    pub async fn send_request(
        &self,
        user_prompt: &str,
        system_prompt: &str,
        options: RequestOptions,
    ) -> Result<String, GatewayError> {
        let messages = text_messages(user_prompt, system_prompt);
        self.complete_with_backoff(messages, options, false).await
    }

    /// Completion parsed into `T` and checked by `validate`. Parse, schema
    /// and transport failures all retry the same request with an
    /// `Attempt #n - ` prefix on the system prompt, up to the structured
    /// retry budget.
    pub async fn send_structured_request<T, V>(
        &self,
        user_prompt: &str,
        system_prompt: &str,
        options: RequestOptions,
        validate: V,
    ) -> Result<T, GatewayError>
    where
        T: DeserializeOwned,
        V: Fn(&T) -> Result<(), String>,
    {
        let attempts = self.policy.structured_retries.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let system = if attempt > 1 {
                format!("Attempt #{} - {}", attempt, system_prompt)
            } else {
                system_prompt.to_string()
            };
            let messages = text_messages(user_prompt, &system);
            let outcome = match self.complete_once(&messages, options, true).await {
                Ok(text) => parse_structured::<T, _>(&text, &validate),
                Err(err) => StructuredOutcome::ParseError(err.to_string()),
            };
            match outcome {
                StructuredOutcome::Ok(value) => return Ok(value),
                StructuredOutcome::ParseError(err) | StructuredOutcome::SchemaError(err) => {
                    tracing::warn!(
                        attempt,
                        attempts,
                        error = %prefix_chars(&err, FAILED_PROMPT_PREVIEW_CHARS),
                        "structured request failed"
                    );
                    last_error = err;
                }
            }
        }

        Err(GatewayError::StructuredRetriesExhausted {
            attempts,
            prompt: prefix_chars(user_prompt, FAILED_PROMPT_PREVIEW_CHARS),
            last_error: prefix_chars(&last_error, FAILED_PROMPT_PREVIEW_CHARS),
        })
    }

    /// Completion with a design snapshot attached ahead of the prompt. With
    /// no snapshot this is a plain [`Gateway::send_request`].
    pub async fn send_vision_request(
        &self,
        user_prompt: &str,
        system_prompt: &str,
        snapshot_url: Option<&str>,
        options: RequestOptions,
    ) -> Result<String, GatewayError> {
        let Some(url) = snapshot_url.map(str::trim).filter(|u| !u.is_empty()) else {
            return self.send_request(user_prompt, system_prompt, options).await;
        };
        let options = RequestOptions {
            model: Some(self.image_model(options.model)?),
            ..options
        };
        let messages = vec![
            ChatMessage::text(Role::System, system_prompt),
            ChatMessage {
                role: Role::User,
                content: vec![
                    ContentPart::ImageUrl(url.to_string()),
                    ContentPart::Text(VISION_PROMPT.to_string()),
                    ContentPart::Text(user_prompt.to_string()),
                ],
            },
        ];
        self.complete_with_backoff(messages, options, false).await
    }

    /// Model for a request carrying an image. A requested model without
    /// vision support gives way to the configured vision model.
    fn image_model(&self, requested: Option<Model>) -> Result<Model, GatewayError> {
        match requested {
            Some(model) if model.supports_vision() => Ok(model),
            Some(model) if self.vision_model.supports_vision() => {
                tracing::warn!(%model, vision_model = %self.vision_model, "model cannot read images, using vision model");
                Ok(self.vision_model)
            }
            None if self.vision_model.supports_vision() => Ok(self.vision_model),
            Some(model) => Err(GatewayError::VisionUnsupported { model }),
            None => Err(GatewayError::VisionUnsupported {
                model: self.vision_model,
            }),
        }
    }

    async fn complete_with_backoff(
        &self,
        messages: Vec<ChatMessage>,
        options: RequestOptions,
        json_mode: bool,
    ) -> Result<String, GatewayError> {
        let mut delay = self.policy.rate_limit_base_delay;
        let mut retries = 0u32;
        loop {
            match self.complete_once(&messages, options, json_mode).await {
                Err(GatewayError::Transport(TransportError::RateLimited(message))) => {
                    if retries >= self.policy.rate_limit_retries {
                        return Err(GatewayError::RateLimited { retries, message });
                    }
                    retries += 1;
                    tracing::info!(
                        retries_remaining = self.policy.rate_limit_retries - retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        "received 429, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                other => return other,
            }
        }
    }

    async fn complete_once(
        &self,
        messages: &[ChatMessage],
        options: RequestOptions,
        json_mode: bool,
    ) -> Result<String, GatewayError> {
        let model = options.model.unwrap_or(self.model);
        let prompt_chars: usize = messages
            .iter()
            .map(|m| m.flattened().chars().count())
            .sum();
        let max_tokens = model
            .max_tokens_for_prompt(prompt_chars)
            .ok_or(GatewayError::ContextOverflow { model })?;
        let request = CompletionRequest {
            model,
            messages: messages.to_vec(),
            temperature: options.temperature.unwrap_or(self.temperature),
            max_tokens,
            json_mode,
        };

        tracing::debug!(model = %model, max_tokens, "calling model");
        let started = Instant::now();
        let completion = self.transport.complete(&request).await?;
        let duration = started.elapsed();
        tracing::info!(model = %model, duration_ms = duration.as_millis() as u64, "model responded");

        self.record_prompt(&request, &completion.content, completion.usage, duration)
            .await;

        if completion.content.trim().is_empty() {
            return Err(GatewayError::EmptyResponse { model });
        }
        Ok(completion.content)
    }

    async fn record_prompt(
        &self,
        request: &CompletionRequest,
        response: &str,
        usage: Usage,
        duration: Duration,
    ) {
        let request_prompts = request
            .messages
            .iter()
            .map(|m| PromptMessage {
                prompt_type: prompt_type(m.role).to_string(),
                prompt: m.flattened(),
            })
            .collect();
        self.events
            .prompt(PromptEvent {
                model: request.model.id().to_string(),
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                cost: request.model.cost(&usage),
                duration_ms: duration.as_millis() as u64,
                request_prompts,
                response_prompt: response.to_string(),
            })
            .await;
    }
}

fn prompt_type(role: Role) -> &'static str {
    match role {
        Role::System => "System",
        Role::User => "User",
        Role::Assistant => "Assistant",
    }
}

fn text_messages(user_prompt: &str, system_prompt: &str) -> Vec<ChatMessage> {
    let system = if system_prompt.trim().is_empty() {
        DEFAULT_SYSTEM_PROMPT
    } else {
        system_prompt
    };
    vec![
        ChatMessage::text(Role::System, system),
        ChatMessage::text(Role::User, user_prompt),
    ]
}
