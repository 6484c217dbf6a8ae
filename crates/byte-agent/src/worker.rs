//! Worker agents: one bound tool each, result stored in a state slot

use byte_ai::{Context, ToolChoice};

use crate::chat::conversation_history;
use crate::error::Result;
use crate::events::TurnEvent;
use crate::state::{AgentKind, ConversationState};
use crate::tool::{BoxedTool, compile_schema, schema_violations, to_api_tool};
use crate::turn::TurnContext;

pub const WEATHER_PROMPT: &str = "\
You are a weather specialist working for Captain Byte. When the user asks about \
the weather, call the `weather` tool with the city or country they mention as \
`query`. If they name no place, do not call the tool.";

pub const NEWS_PROMPT: &str = "\
You are a news specialist working for Captain Byte. When the user asks about \
news or recent events, call the `search` tool with a few focused keywords as \
`query`. If there is nothing to search for, do not call the tool.";

/// A specialised agent that may call its one tool before handing off to chat
pub struct WorkerAgent {
    kind: AgentKind,
    system_prompt: String,
    tool: BoxedTool,
    validator: Option<jsonschema::Validator>,
}

impl WorkerAgent {
    pub fn new(kind: AgentKind, system_prompt: impl Into<String>, tool: BoxedTool) -> Self {
        let validator = compile_schema(tool.as_ref());
        Self {
            kind,
            system_prompt: system_prompt.into(),
            tool,
            validator,
        }
    }

    pub fn weather(tool: BoxedTool) -> Self {
        Self::new(AgentKind::Weather, WEATHER_PROMPT, tool)
    }

    pub fn news(tool: BoxedTool) -> Self {
        Self::new(AgentKind::News, NEWS_PROMPT, tool)
    }

    /// Fill this worker's slot and count the call. Only cancellation fails the turn.
    pub async fn run(&self, state: &mut ConversationState, ctx: &TurnContext) -> Result<()> {
        ctx.check_cancelled()?;
        let data = self.gather(state, ctx).await;
        ctx.check_cancelled()?;

        tracing::debug!(agent = self.kind.name(), "worker data: {}", data);
        if let Some(slot) = state.slot_mut(self.kind) {
            *slot = Some(data);
        }
        state.record_call(self.kind);
        Ok(())
    }

    async fn gather(&self, state: &ConversationState, ctx: &TurnContext) -> String {
        let topic = self.kind.name();

        let mut context = Context::with_system(self.system_prompt.clone());
        context.messages = conversation_history(&state.messages);
        context.add_tool(to_api_tool(self.tool.as_ref()));
        let options = ctx.options.clone().with_tool_choice(ToolChoice::Auto);

        let response = match ctx.transport.complete(&context, &options).await {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(agent = topic, "worker model call failed: {}", e);
                return format!(
                    "The {} agent could not reach the model, so no {} data is available.",
                    topic, topic
                );
            }
        };

        let calls = response.tool_calls();
        let Some(&(call_id, name, arguments)) = calls.first() else {
            return format!("No {} lookup was needed for this message.", topic);
        };

        if name != self.tool.name() {
            tracing::warn!(agent = topic, tool = name, "model asked for an unknown tool");
            return format!(
                "The {} agent asked for an unknown tool, so no {} data is available.",
                topic, topic
            );
        }

        ctx.events.emit(TurnEvent::ToolStart {
            tool_call_id: call_id.to_string(),
            tool_name: name.to_string(),
            label: self.tool.label().to_string(),
            arguments: arguments.clone(),
        });

        let invalid = self
            .validator
            .as_ref()
            .and_then(|v| schema_violations(arguments, v));
        let (text, is_error) = match invalid {
            Some(reason) => {
                tracing::warn!(agent = topic, "invalid tool arguments: {}", reason);
                (
                    format!(
                        "The {} lookup was skipped because the request was invalid.",
                        topic
                    ),
                    true,
                )
            }
            None => {
                let result = self
                    .tool
                    .execute(call_id, arguments.clone(), ctx.cancel.clone())
                    .await;
                let text = result.text_content();
                tracing::debug!(
                    agent = topic,
                    tool = self.tool.label(),
                    is_error = result.is_error,
                    "lookup finished"
                );
                if text.trim().is_empty() {
                    (format!("The {} lookup returned no data.", topic), true)
                } else {
                    (text, result.is_error)
                }
            }
        };

        ctx.events.emit(TurnEvent::ToolEnd {
            tool_call_id: call_id.to_string(),
            tool_name: name.to_string(),
            result: text.clone(),
            is_error,
        });
        text
    }
}
