//! Turn event types

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::state::AgentKind;

/// Events emitted while a turn runs.
///
/// Serialized as `{"kind": ..., "payload": {...}}` so stream consumers can
/// dispatch on `kind` alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum TurnEvent {
    /// A graph node started
    NodeStart { node: String },

    /// A piece of the assistant reply
    Token { text: String },

    /// A worker started a tool call
    ToolStart {
        tool_call_id: String,
        tool_name: String,
        /// Display name of the tool, e.g. "Weather"
        label: String,
        arguments: serde_json::Value,
    },

    /// A tool call finished
    ToolEnd {
        tool_call_id: String,
        tool_name: String,
        result: String,
        is_error: bool,
    },

    /// The turn completed and was persisted
    Done {
        content: String,
        agents: Vec<AgentKind>,
    },

    /// The turn failed
    Error { message: String },
}

impl TurnEvent {
    /// The `kind` tag as a string
    pub fn kind(&self) -> &'static str {
        match self {
            TurnEvent::NodeStart { .. } => "node_start",
            TurnEvent::Token { .. } => "token",
            TurnEvent::ToolStart { .. } => "tool_start",
            TurnEvent::ToolEnd { .. } => "tool_end",
            TurnEvent::Done { .. } => "done",
            TurnEvent::Error { .. } => "error",
        }
    }
}

/// Where a turn sends its events. Sending never blocks and never fails the turn.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<TurnEvent>>,
}

impl EventSink {
    /// A sink paired with its receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TurnEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: TurnEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    /// Emit `text` as word-sized token events, keeping whitespace attached
    pub fn emit_words(&self, text: &str) {
        if self.tx.is_none() {
            return;
        }
        let mut start = 0;
        for (idx, ch) in text.char_indices() {
            if ch.is_whitespace() && idx > start {
                let end = idx + ch.len_utf8();
                self.emit(TurnEvent::Token {
                    text: text[start..end].to_string(),
                });
                start = end;
            }
        }
        if start < text.len() {
            self.emit(TurnEvent::Token {
                text: text[start..].to_string(),
            });
        }
    }
}
