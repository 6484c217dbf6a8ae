//! Conversation state carried through one turn

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Stable message identifier
pub type MessageId = String;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// The agents a turn can be routed to.
///
/// Declaration order is the order agents are reported in: workers first, chat last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Weather,
    News,
    Chat,
}

impl AgentKind {
    /// Short name used in `agent_calls` and on the wire
    pub fn name(&self) -> &'static str {
        match self {
            AgentKind::Chat => "chat",
            AgentKind::Weather => "weather",
            AgentKind::News => "news",
        }
    }

    /// Graph node name, as used by the router's structured output
    pub fn node_name(&self) -> &'static str {
        match self {
            AgentKind::Chat => "chat_agent",
            AgentKind::Weather => "weather_agent",
            AgentKind::News => "news_agent",
        }
    }

    pub fn from_node_name(name: &str) -> Option<Self> {
        match name {
            "chat_agent" => Some(AgentKind::Chat),
            "weather_agent" => Some(AgentKind::Weather),
            "news_agent" => Some(AgentKind::News),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "chat" => Some(AgentKind::Chat),
            "weather" => Some(AgentKind::Weather),
            "news" => Some(AgentKind::News),
            _ => None,
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A message in the conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    /// Originating agent for assistant messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentKind>,
    pub created_at: i64,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            agent: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>, agent: AgentKind) -> Self {
        Self {
            agent: Some(agent),
            ..Self::new(Role::Assistant, content)
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn with_id(mut self, id: impl Into<MessageId>) -> Self {
        self.id = id.into();
        self
    }

    /// True when the message carries user-facing text
    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }
}

/// A change to the message list
#[derive(Debug, Clone, PartialEq)]
pub enum MessageUpdate {
    /// Drop the message with this id
    Remove(MessageId),
    /// Append a message, or replace the message with the same id in place
    Append(ChatMessage),
}

/// Per-thread state for one turn
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    pub messages: Vec<ChatMessage>,
    pub summary: Option<String>,
    pub weather_data: Option<String>,
    pub news_data: Option<String>,
    pub agent_calls: BTreeMap<AgentKind, u32>,
    pub turn: u64,
    pub goto: Option<AgentKind>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the per-turn scratch fields and advance the turn counter
    pub fn begin_turn(&mut self) {
        self.weather_data = None;
        self.news_data = None;
        self.agent_calls.clear();
        self.goto = None;
        self.turn += 1;
    }

    /// The most recent message authored by the user
    pub fn latest_user_message(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }

    /// Add-reducer for `agent_calls`
    pub fn record_call(&mut self, agent: AgentKind) {
        *self.agent_calls.entry(agent).or_insert(0) += 1;
    }

    /// Agents that ran this turn, workers before chat
    pub fn agents_called(&self) -> Vec<AgentKind> {
        self.agent_calls.keys().copied().collect()
    }

    /// Scratch slot written by a worker agent
    pub fn slot_mut(&mut self, agent: AgentKind) -> Option<&mut Option<String>> {
        match agent {
            AgentKind::Weather => Some(&mut self.weather_data),
            AgentKind::News => Some(&mut self.news_data),
            AgentKind::Chat => None,
        }
    }

    /// Apply message updates in order
    pub fn apply(&mut self, updates: Vec<MessageUpdate>) {
        for update in updates {
            match update {
                MessageUpdate::Remove(id) => self.messages.retain(|m| m.id != id),
                MessageUpdate::Append(message) => {
                    match self.messages.iter_mut().find(|m| m.id == message.id) {
                        Some(existing) => *existing = message,
                        None => self.messages.push(message),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msgs(n: usize) -> Vec<ChatMessage> {
        (0..n)
            .map(|i| ChatMessage::user(format!("m{}", i)).with_id(format!("id{}", i)))
            .collect()
    }

    #[test]
    fn test_apply_removes_and_upserts() {
        let mut state = ConversationState {
            messages: msgs(4),
            ..Default::default()
        };
        let kept = state.messages[3].clone();
        state.apply(vec![
            MessageUpdate::Remove("id0".into()),
            MessageUpdate::Remove("id1".into()),
            MessageUpdate::Append(kept.clone()),
            MessageUpdate::Append(ChatMessage::user("new").with_id("id9")),
        ]);

        let ids: Vec<&str> = state.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["id2", "id3", "id9"]);
        assert_eq!(state.messages[1], kept);
    }

    #[test]
    fn test_remove_unknown_id_is_noop() {
        let mut state = ConversationState {
            messages: msgs(2),
            ..Default::default()
        };
        state.apply(vec![MessageUpdate::Remove("missing".into())]);
        assert_eq!(state.messages.len(), 2);
    }

    #[test]
    fn test_record_call_adds_and_orders_workers_first() {
        let mut state = ConversationState::new();
        state.record_call(AgentKind::Chat);
        state.record_call(AgentKind::Weather);
        state.record_call(AgentKind::Chat);
        assert_eq!(state.agent_calls[&AgentKind::Chat], 2);
        assert_eq!(
            state.agents_called(),
            vec![AgentKind::Weather, AgentKind::Chat]
        );
    }

    #[test]
    fn test_begin_turn_clears_scratch() {
        let mut state = ConversationState {
            weather_data: Some("sunny".into()),
            goto: Some(AgentKind::Weather),
            turn: 4,
            ..Default::default()
        };
        state.record_call(AgentKind::Weather);
        state.begin_turn();
        assert_eq!(state.turn, 5);
        assert!(state.weather_data.is_none());
        assert!(state.goto.is_none());
        assert!(state.agent_calls.is_empty());
    }

    #[test]
    fn test_latest_user_message_skips_assistant() {
        let mut state = ConversationState::new();
        state.messages.push(ChatMessage::user("first"));
        state.messages.push(ChatMessage::user("second"));
        state
            .messages
            .push(ChatMessage::assistant("reply", AgentKind::Chat));
        assert_eq!(state.latest_user_message().unwrap().content, "second");
    }

    #[test]
    fn test_agent_names_round_trip() {
        for kind in [AgentKind::Chat, AgentKind::Weather, AgentKind::News] {
            assert_eq!(AgentKind::from_name(kind.name()), Some(kind));
            assert_eq!(AgentKind::from_node_name(kind.node_name()), Some(kind));
        }
        assert_eq!(AgentKind::from_node_name("captain"), None);
        assert_eq!("system".parse::<Role>(), Ok(Role::System));
        assert!("tool".parse::<Role>().is_err());
    }
}
