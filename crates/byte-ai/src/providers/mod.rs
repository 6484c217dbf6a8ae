//! Model provider implementations

pub mod openai;

use crate::{Context, Error, Message, MessageEventStream, Model, RequestOptions, Result};
use async_trait::async_trait;

/// Trait for model providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Request a complete response in one round trip
    async fn complete(
        &self,
        model: &Model,
        context: &Context,
        options: &RequestOptions,
    ) -> Result<Message>;

    /// Stream a response from the model
    async fn stream(
        &self,
        model: &Model,
        context: &Context,
        options: &RequestOptions,
    ) -> Result<MessageEventStream>;
}

/// Get an API key from a provided value or the environment
pub fn get_api_key(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = provided.filter(|k| !k.trim().is_empty()) {
        return Ok(key.to_string());
    }

    std::env::var(env_var).map_err(|_| Error::InvalidApiKey)
}
