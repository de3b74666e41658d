use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const ONE_MILLION: f64 = 1_000_000.0;

/// Rough prompt size estimate used when sizing `max_tokens`.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    OpenAi,
    Google,
    Anthropic,
    Perplexity,
}

/// Models the gateway can call. Each has a fixed context window, output cap
/// and per-token pricing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Model {
    Gpt4Turbo,
    Gpt4Preview,
    Gpt4o,
    Gemini15Pro,
    Gemini15Flash,
    Claude3Opus,
    Claude3Haiku,
    Claude35Sonnet,
    SonarLargeOnline,
    SonarSmallOnline,
}

impl Model {
    pub const ALL: [Model; 10] = [
        Model::Gpt4Turbo,
        Model::Gpt4Preview,
        Model::Gpt4o,
        Model::Gemini15Pro,
        Model::Gemini15Flash,
        Model::Claude3Opus,
        Model::Claude3Haiku,
        Model::Claude35Sonnet,
        Model::SonarLargeOnline,
        Model::SonarSmallOnline,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Model::Gpt4Turbo => "gpt-4-turbo-2024-04-09",
            Model::Gpt4Preview => "gpt-4-0125-preview",
            Model::Gpt4o => "gpt-4o-2024-05-13",
            Model::Gemini15Pro => "gemini-1.5-pro-latest",
            Model::Gemini15Flash => "gemini-1.5-flash-latest",
            Model::Claude3Opus => "claude-3-opus-20240229",
            Model::Claude3Haiku => "claude-3-haiku-20240307",
            Model::Claude35Sonnet => "claude-3-5-sonnet-20240620",
            Model::SonarLargeOnline => "llama-3-sonar-large-32k-online",
            Model::SonarSmallOnline => "llama-3-sonar-small-32k-online",
        }
    }

    pub fn provider(&self) -> Provider {
        match self {
            Model::Gpt4Turbo | Model::Gpt4Preview | Model::Gpt4o => Provider::OpenAi,
            Model::Gemini15Pro | Model::Gemini15Flash => Provider::Google,
            Model::Claude3Opus | Model::Claude3Haiku | Model::Claude35Sonnet => {
                Provider::Anthropic
            }
            Model::SonarLargeOnline | Model::SonarSmallOnline => Provider::Perplexity,
        }
    }

    pub fn context_window(&self) -> u32 {
        match self {
            Model::Gpt4Turbo | Model::Gpt4Preview | Model::Gpt4o => 128_000,
            Model::Gemini15Pro | Model::Gemini15Flash => 1_048_576,
            Model::Claude3Opus | Model::Claude3Haiku | Model::Claude35Sonnet => 200_000,
            Model::SonarLargeOnline | Model::SonarSmallOnline => 32_768,
        }
    }

    /// Hard cap on output tokens, independent of the context window.
    pub fn max_output_tokens(&self) -> u32 {
        match self {
            Model::Gemini15Pro | Model::Gemini15Flash => 8192,
            _ => 4096,
        }
    }

    /// (input, output) USD per million tokens.
    pub fn pricing(&self) -> (f64, f64) {
        match self {
            Model::Gpt4Turbo | Model::Gpt4Preview | Model::Gpt4o => (10.0, 30.0),
            Model::Gemini15Pro => (3.5, 10.5),
            Model::Gemini15Flash => (0.35, 1.05),
            Model::Claude3Opus => (15.0, 75.0),
            Model::Claude3Haiku => (0.25, 1.25),
            Model::Claude35Sonnet => (3.0, 15.0),
            Model::SonarLargeOnline | Model::SonarSmallOnline => (1.0, 1.0),
        }
    }

    pub fn supports_vision(&self) -> bool {
        matches!(
            self,
            Model::Gpt4Turbo
                | Model::Gpt4o
                | Model::Gemini15Pro
                | Model::Gemini15Flash
                | Model::Claude3Opus
                | Model::Claude3Haiku
                | Model::Claude35Sonnet
        )
    }

    pub fn cost(&self, usage: &Usage) -> f64 {
        let (input, output) = self.pricing();
        usage.input_tokens as f64 * input / ONE_MILLION
            + usage.output_tokens as f64 * output / ONE_MILLION
    }

    /// Output budget for a prompt of `prompt_chars` characters: the output cap,
    /// reduced when the prompt plus a 1% padding margin leaves less room.
    /// `None` when the prompt alone does not fit.
    pub fn max_tokens_for_prompt(&self, prompt_chars: usize) -> Option<u32> {
        let window = u64::from(self.context_window());
        let padding = window.div_ceil(100);
        let estimated_input = prompt_chars.div_ceil(CHARS_PER_TOKEN) as u64;
        let available = window.checked_sub(estimated_input + padding)?;
        if available == 0 {
            return None;
        }
        Some(available.min(u64::from(self.max_output_tokens())) as u32)
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownModel(pub String);

impl fmt::Display for UnknownModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown model '{}'", self.0)
    }
}

impl std::error::Error for UnknownModel {}

impl FromStr for Model {
    type Err = UnknownModel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Model::ALL
            .into_iter()
            .find(|m| m.id() == wanted)
            .ok_or_else(|| UnknownModel(wanted.to_string()))
    }
}

impl TryFrom<String> for Model {
    type Error = UnknownModel;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Model> for String {
    fn from(model: Model) -> Self {
        model.id().to_string()
    }
}

/// Token usage reported by the provider for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}
