//! byte-ai: model provider layer
//!
//! Message and tool types, request options (structured output, tool choice),
//! streaming events, and an OpenAI-compatible Chat Completions provider.

pub mod error;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use providers::LlmProvider;
pub use stream::{MessageEvent, MessageEventStream};
pub use types::*;
