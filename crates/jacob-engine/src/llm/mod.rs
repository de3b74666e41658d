//! Model access: provider transports, lenient parsing, prompts and the
//! gateway every flow goes through.

pub mod gateway;
pub mod models;
pub mod parse;
pub mod prompts;
pub mod transport;

pub use gateway::{Gateway, GatewayError, RequestOptions, RetryPolicy};
pub use models::{Model, Provider, Usage};
pub use transport::{
    AnthropicTransport, LlmTransport, OpenAiCompatibleTransport, ProviderRouter, TransportError,
};
