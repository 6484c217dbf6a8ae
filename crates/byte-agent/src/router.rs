//! Classifies the latest user message into the agent that should handle it

use byte_ai::{Context, Message};

use crate::error::{Error, Result};
use crate::state::{AgentKind, ConversationState};
use crate::turn::TurnContext;

pub const ROUTER_PROMPT: &str = "\
You are the router for Captain Byte, a pirate chat assistant. Classify the \
user's latest message and pick the agent that should handle it.

- weather_agent: the user asks about current weather, temperature or \
conditions somewhere.
- news_agent: the user asks about news, headlines or recent events.
- chat_agent: anything else, including greetings and small talk.

Respond with JSON only: {\"goto\": \"chat_agent\" | \"weather_agent\" | \"news_agent\"}";

/// Routing decision schema: exactly one of the three node names
pub fn route_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "goto": {
                "type": "string",
                "enum": ["chat_agent", "weather_agent", "news_agent"]
            }
        },
        "required": ["goto"],
        "additionalProperties": false
    })
}

#[derive(Debug, Clone, Default)]
pub struct Router;

impl Router {
    pub fn new() -> Self {
        Self
    }

    /// Pick the next agent and record it in `state.goto`.
    ///
    /// Output outside the enum is never accepted: it falls back to the chat
    /// agent. Provider errors propagate.
    pub async fn route(&self, state: &mut ConversationState, ctx: &TurnContext) -> Result<AgentKind> {
        let Some(latest) = state.latest_user_message() else {
            tracing::debug!("no user message, routing to chat");
            state.goto = Some(AgentKind::Chat);
            return Ok(AgentKind::Chat);
        };

        let mut context = Context::with_system(ROUTER_PROMPT);
        context.push(Message::user(latest.content.clone()));

        let decision = match crate::transport::complete_structured(
            ctx.transport.as_ref(),
            &context,
            &ctx.options,
            "route",
            &route_schema(),
        )
        .await
        {
            Ok(value) => value
                .get("goto")
                .and_then(|v| v.as_str())
                .and_then(AgentKind::from_node_name)
                .unwrap_or(AgentKind::Chat),
            Err(Error::StructuredOutput(reason)) => {
                tracing::warn!("router output rejected, falling back to chat: {}", reason);
                AgentKind::Chat
            }
            Err(e) => return Err(e),
        };

        tracing::debug!(goto = decision.node_name(), "routed");
        state.goto = Some(decision);
        Ok(decision)
    }
}
