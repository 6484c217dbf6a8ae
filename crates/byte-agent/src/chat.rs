//! The chat agent: composes the user-visible reply in the Captain Byte persona

use byte_ai::{Context, Message, MessageEvent};
use futures::StreamExt;

use crate::error::{Error, Result};
use crate::events::TurnEvent;
use crate::state::{AgentKind, ChatMessage, ConversationState, Role};
use crate::transport::complete_structured;
use crate::turn::TurnContext;

pub const CAPTAIN_BYTE_PERSONA: &str = "\
You are Captain Byte, a witty pirate assistant. Stay in character, be helpful, \
and use nautical flair. You are the final agent: if weather/news context is \
provided, use it to answer accurately.";

const LOST_BEARINGS: &str =
    "Arr matey! I seem to have lost me bearings. Could ye repeat that question?";

fn reply_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "response": { "type": "string", "minLength": 1 }
        },
        "required": ["response"]
    })
}

/// User and assistant turns with text, as model messages. System notes and
/// empty messages are left out.
pub(crate) fn conversation_history(messages: &[ChatMessage]) -> Vec<Message> {
    messages
        .iter()
        .filter(|m| m.has_content())
        .filter_map(|m| match m.role {
            Role::User => Some(Message::user(m.content.clone())),
            Role::Assistant => Some(Message::assistant(m.content.clone())),
            Role::System => None,
        })
        .collect()
}

/// Deterministic reply used when the model produced nothing
pub fn fallback_reply(state: &ConversationState) -> String {
    let present = |slot: &Option<String>| {
        slot.as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    if let Some(news) = present(&state.news_data) {
        format!("Ahoy! Fresh tidings be fetched: {}", news)
    } else if let Some(weather) = present(&state.weather_data) {
        format!("Shiver me timbers! The skies report: {}", weather)
    } else {
        LOST_BEARINGS.to_string()
    }
}

pub struct ChatAgent {
    persona: String,
}

impl Default for ChatAgent {
    fn default() -> Self {
        Self::new(CAPTAIN_BYTE_PERSONA)
    }
}

impl ChatAgent {
    pub fn new(persona: impl Into<String>) -> Self {
        Self {
            persona: persona.into(),
        }
    }

    /// Persona, then summary, weather and news context, then system notes, then the turns
    pub fn build_context(&self, state: &ConversationState) -> Context {
        let mut system = self.persona.clone();

        let sections = [
            ("CONVERSATION CONTEXT", state.summary.as_deref()),
            ("WEATHER DATA", state.weather_data.as_deref()),
            ("NEWS DATA", state.news_data.as_deref()),
        ];
        for (label, text) in sections {
            if let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) {
                system.push_str(&format!("\n\n{}:\n{}", label, text));
            }
        }

        for note in state
            .messages
            .iter()
            .filter(|m| m.role == Role::System && m.has_content())
        {
            system.push_str("\n\n");
            system.push_str(note.content.trim());
        }

        let mut context = Context::with_system(system);
        context.messages = conversation_history(&state.messages);
        context
    }

    /// Append exactly one assistant message and count the call
    pub async fn run(&self, state: &mut ConversationState, ctx: &TurnContext) -> Result<()> {
        ctx.check_cancelled()?;
        let context = self.build_context(state);

        let structured = complete_structured(
            ctx.transport.as_ref(),
            &context,
            &ctx.options,
            "chat_reply",
            &reply_schema(),
        )
        .await;

        let mut reply = match structured {
            Ok(value) => {
                let text = value
                    .get("response")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                ctx.events.emit_words(&text);
                text
            }
            Err(Error::StructuredOutput(reason)) => {
                tracing::warn!("structured reply rejected, retrying unstructured: {}", reason);
                self.stream_reply(&context, ctx).await?.trim().to_string()
            }
            Err(e) => return Err(e),
        };

        if reply.is_empty() {
            tracing::warn!("model produced an empty reply, using fallback");
            reply = fallback_reply(state);
            ctx.events.emit_words(&reply);
        }

        state
            .messages
            .push(ChatMessage::assistant(reply, AgentKind::Chat));
        state.record_call(AgentKind::Chat);
        Ok(())
    }

    /// Unstructured streamed reply, forwarding text deltas as tokens
    async fn stream_reply(&self, context: &Context, ctx: &TurnContext) -> Result<String> {
        let mut stream = ctx.transport.stream(context, &ctx.options).await?;
        let mut text = String::new();

        loop {
            let event = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
                event = stream.next() => event,
            };
            match event {
                Some(MessageEvent::TextDelta { delta, .. }) => {
                    ctx.events.emit(TurnEvent::Token {
                        text: delta.clone(),
                    });
                    text.push_str(&delta);
                }
                Some(MessageEvent::Done { message, .. }) => {
                    if text.is_empty() {
                        text = message.text();
                        ctx.events.emit_words(&text);
                    }
                    break;
                }
                Some(MessageEvent::Error { message, status }) => {
                    return Err(byte_ai::Error::from_stream_failure(&message, status).into());
                }
                Some(_) => {}
                None => break,
            }
        }
        Ok(text)
    }
}
