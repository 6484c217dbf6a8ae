//! Transport abstraction between the agents and a model provider

use std::{future::Future, sync::Arc, sync::LazyLock, time::Duration};

use async_trait::async_trait;
use byte_ai::{Context, LlmProvider, Message, MessageEventStream, Model, RequestOptions};
use regex::Regex;

use crate::error::{Error, Result};
use crate::tool::schema_violations;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No retries at all
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// How agents reach the model
#[async_trait]
pub trait Transport: Send + Sync {
    /// One complete response
    async fn complete(
        &self,
        context: &Context,
        options: &RequestOptions,
    ) -> byte_ai::Result<Message>;

    /// A streamed response
    async fn stream(
        &self,
        context: &Context,
        options: &RequestOptions,
    ) -> byte_ai::Result<MessageEventStream>;
}

/// Direct provider transport with retry on transient errors
pub struct ProviderTransport {
    provider: Arc<dyn LlmProvider>,
    model: Model,
    retry_config: RetryConfig,
}

impl ProviderTransport {
    pub fn new(provider: Arc<dyn LlmProvider>, model: Model) -> Self {
        Self {
            provider,
            model,
            retry_config: RetryConfig::default(),
        }
    }

    /// Set retry configuration
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    async fn with_retry<T, F, Fut>(&self, op: F) -> byte_ai::Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = byte_ai::Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.retry_config.max_retries => {
                    let delay = self.retry_config.delay_for_attempt(attempt);
                    tracing::warn!(
                        "Request failed (attempt {}/{}): {}. Retrying in {:?}...",
                        attempt + 1,
                        self.retry_config.max_retries + 1,
                        e,
                        delay
                    );
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl Transport for ProviderTransport {
    async fn complete(
        &self,
        context: &Context,
        options: &RequestOptions,
    ) -> byte_ai::Result<Message> {
        self.with_retry(|| self.provider.complete(&self.model, context, options))
            .await
    }

    async fn stream(
        &self,
        context: &Context,
        options: &RequestOptions,
    ) -> byte_ai::Result<MessageEventStream> {
        self.with_retry(|| self.provider.stream(&self.model, context, options))
            .await
    }
}

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\s*```[a-zA-Z]*\s*(.*?)\s*```\s*$").unwrap());

/// Strip a single markdown code fence some models wrap JSON in
fn strip_code_fence(text: &str) -> &str {
    CODE_FENCE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text)
}

/// Ask for JSON matching `schema` and validate the answer at the boundary.
///
/// Provider errors come back as [`Error::Ai`]; empty, malformed or
/// non-conforming output as [`Error::StructuredOutput`].
pub async fn complete_structured(
    transport: &dyn Transport,
    context: &Context,
    options: &RequestOptions,
    name: &str,
    schema: &serde_json::Value,
) -> Result<serde_json::Value> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| Error::Other(format!("invalid {} schema: {}", name, e)))?;

    let options = options.clone().with_json_schema(name, schema.clone());
    let message = transport.complete(context, &options).await?;
    let text = message.text();
    let body = strip_code_fence(&text);
    if body.trim().is_empty() {
        return Err(Error::StructuredOutput(format!("{}: empty response", name)));
    }

    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| Error::StructuredOutput(format!("{}: invalid JSON: {}", name, e)))?;

    match schema_violations(&value, &validator) {
        None => Ok(value),
        Some(reason) => Err(Error::StructuredOutput(format!("{}: {}", name, reason))),
    }
}
