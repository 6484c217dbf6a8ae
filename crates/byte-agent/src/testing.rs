//! Test doubles shared by the unit tests

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use byte_ai::{
    Content, Context, Message, MessageEvent, MessageEventStream, RequestOptions, StopReason,
    Usage,
};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::events::EventSink;
use crate::tool::{Tool, ToolResult};
use crate::transport::Transport;
use crate::turn::TurnContext;

/// One scripted model answer
pub(crate) enum Reply {
    Text(String),
    Json(serde_json::Value),
    ToolCall {
        name: String,
        arguments: serde_json::Value,
    },
    Fail(byte_ai::Error),
}

impl Reply {
    pub(crate) fn json(value: serde_json::Value) -> Self {
        Reply::Json(value)
    }

    pub(crate) fn tool_call(name: &str, arguments: serde_json::Value) -> Self {
        Reply::ToolCall {
            name: name.to_string(),
            arguments,
        }
    }
}

#[derive(Clone)]
pub(crate) struct RecordedRequest {
    pub context: Context,
    pub options: RequestOptions,
    pub streamed: bool,
}

/// A transport that answers from a queue, in call order, and records every request.
pub(crate) struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub(crate) fn remaining(&self) -> usize {
        self.replies.lock().len()
    }

    fn next(&self, context: &Context, options: &RequestOptions, streamed: bool) -> Reply {
        self.requests.lock().push(RecordedRequest {
            context: context.clone(),
            options: options.clone(),
            streamed,
        });
        self.replies.lock().pop_front().unwrap_or_else(|| {
            Reply::Fail(byte_ai::Error::UnexpectedResponse(
                "no scripted reply left".into(),
            ))
        })
    }
}

fn reply_message(reply: Reply) -> byte_ai::Result<Message> {
    match reply {
        Reply::Text(text) => Ok(Message::assistant(text)),
        Reply::Json(value) => Ok(Message::assistant(value.to_string())),
        Reply::ToolCall { name, arguments } => Ok(Message::assistant_with_content(vec![
            Content::tool_call("call_1", name, arguments),
        ])),
        Reply::Fail(e) => Err(e),
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn complete(
        &self,
        context: &Context,
        options: &RequestOptions,
    ) -> byte_ai::Result<Message> {
        reply_message(self.next(context, options, false))
    }

    async fn stream(
        &self,
        context: &Context,
        options: &RequestOptions,
    ) -> byte_ai::Result<MessageEventStream> {
        let message = reply_message(self.next(context, options, true))?;
        let words: Vec<String> = message
            .text()
            .split_inclusive(' ')
            .map(str::to_string)
            .collect();
        Ok(Box::pin(async_stream::stream! {
            for word in words {
                yield MessageEvent::TextDelta { content_index: 0, delta: word };
            }
            yield MessageEvent::Done {
                message,
                stop_reason: StopReason::Stop,
                usage: Usage::default(),
            };
        }))
    }
}

/// A tool with a canned answer that records the arguments it was called with
pub(crate) struct CannedTool {
    name: &'static str,
    result: ToolResult,
    pub calls: Mutex<Vec<serde_json::Value>>,
}

impl CannedTool {
    pub(crate) fn ok(name: &'static str, text: &str) -> Arc<Self> {
        Arc::new(Self {
            name,
            result: ToolResult::text(text),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn failing(name: &'static str, text: &str) -> Arc<Self> {
        Arc::new(Self {
            name,
            result: ToolResult::error(text),
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Tool for CannedTool {
    fn name(&self) -> &str {
        self.name
    }

    fn label(&self) -> &str {
        match self.name {
            "weather" => "Weather",
            "search" => "News",
            other => other,
        }
    }

    fn description(&self) -> &str {
        "canned test tool"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "query": { "type": "string", "minLength": 1 } },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        _cancel: CancellationToken,
    ) -> ToolResult {
        self.calls.lock().push(arguments);
        self.result.clone()
    }
}

pub(crate) fn turn_context(transport: Arc<ScriptedTransport>, events: EventSink) -> TurnContext {
    TurnContext::new(transport).with_events(events)
}
