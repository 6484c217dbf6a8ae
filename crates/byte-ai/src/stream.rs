//! Streaming events and the builder that folds them into a message

use crate::error::{Error, Result};
use crate::types::{AssistantMetadata, Content, Message, StopReason, Usage};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// Events emitted during message streaming
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEvent {
    /// Initial message structure
    Start { message: Message },
    /// Text content delta
    TextDelta { content_index: usize, delta: String },
    /// Tool call started
    ToolCallStart {
        content_index: usize,
        id: String,
        name: String,
    },
    /// Tool call arguments delta (partial JSON)
    ToolCallDelta { content_index: usize, delta: String },
    /// Message completed successfully
    Done {
        message: Message,
        stop_reason: StopReason,
        usage: Usage,
    },
    /// Error occurred. `status` carries the HTTP status when the provider rejected the request.
    Error {
        message: String,
        #[serde(default)]
        status: Option<u16>,
    },
}

/// A stream of message events
pub type MessageEventStream = Pin<Box<dyn Stream<Item = MessageEvent> + Send>>;

/// Drain a stream into its final message, turning an `Error` event into a typed error.
///
/// If the stream ends without a `Done` event the message is rebuilt from the deltas seen.
pub async fn collect_message(mut stream: MessageEventStream) -> Result<Message> {
    let mut builder = MessageBuilder::new();
    while let Some(event) = stream.next().await {
        builder.process_event(&event);
        match event {
            MessageEvent::Done { message, .. } => return Ok(message),
            MessageEvent::Error { message, status } => {
                return Err(Error::from_stream_failure(&message, status));
            }
            _ => {}
        }
    }
    Ok(builder.build())
}

/// Accumulates stream events into the final assistant message
#[derive(Debug, Default)]
pub struct MessageBuilder {
    content_buffers: Vec<ContentBuffer>,
    usage: Usage,
    stop_reason: Option<StopReason>,
}

#[derive(Debug)]
enum ContentBuffer {
    Text(String),
    ToolCall {
        id: String,
        name: String,
        arguments_json: String,
    },
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a streaming event and update the message state
    pub fn process_event(&mut self, event: &MessageEvent) {
        match event {
            MessageEvent::TextDelta {
                content_index,
                delta,
            } => {
                if !matches!(
                    self.content_buffers.get(*content_index),
                    Some(ContentBuffer::Text(_))
                ) {
                    self.ensure_buffer(*content_index, ContentBuffer::Text(String::new()));
                }
                if let Some(ContentBuffer::Text(text)) =
                    self.content_buffers.get_mut(*content_index)
                {
                    text.push_str(delta);
                }
            }
            MessageEvent::ToolCallStart {
                content_index,
                id,
                name,
            } => {
                self.ensure_buffer(
                    *content_index,
                    ContentBuffer::ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        arguments_json: String::new(),
                    },
                );
            }
            MessageEvent::ToolCallDelta {
                content_index,
                delta,
            } => {
                if let Some(ContentBuffer::ToolCall { arguments_json, .. }) =
                    self.content_buffers.get_mut(*content_index)
                {
                    arguments_json.push_str(delta);
                }
            }
            MessageEvent::Done {
                stop_reason, usage, ..
            } => {
                self.stop_reason = Some(*stop_reason);
                self.usage = usage.clone();
            }
            _ => {}
        }
    }

    /// Build the final message
    pub fn build(self) -> Message {
        let content: Vec<Content> = self
            .content_buffers
            .into_iter()
            .filter_map(|buf| match buf {
                ContentBuffer::Text(text) if text.is_empty() => None,
                ContentBuffer::Text(text) => Some(Content::Text { text }),
                ContentBuffer::ToolCall {
                    id,
                    name,
                    arguments_json,
                } => {
                    let arguments = decode_arguments(&arguments_json);
                    Some(Content::ToolCall {
                        id,
                        name,
                        arguments,
                    })
                }
            })
            .collect();

        Message::Assistant {
            content,
            metadata: AssistantMetadata {
                usage: self.usage,
                stop_reason: self.stop_reason,
                timestamp: chrono::Utc::now().timestamp_millis(),
                ..Default::default()
            },
        }
    }

    fn ensure_buffer(&mut self, index: usize, default: ContentBuffer) {
        while self.content_buffers.len() <= index {
            self.content_buffers.push(ContentBuffer::Text(String::new()));
        }
        self.content_buffers[index] = default;
    }
}

/// Decode a raw tool-call arguments string.
///
/// Unparseable input is kept as a JSON string so schema validation rejects it downstream.
pub fn decode_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}
