//! Running conversation summary
//!
//! Once the history passes the configured trigger, older messages are folded
//! into `ConversationState::summary` and removed, keeping the most recent
//! `keep_recent` messages verbatim.

use byte_ai::{Context, Message};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::state::{ChatMessage, ConversationState, MessageUpdate, Role};
use crate::transport::complete_structured;
use crate::turn::TurnContext;

pub const SUMMARIZER_PROMPT: &str = "\
You keep a running summary of a conversation between a user and Captain Byte, \
a pirate chat assistant. Keep the facts, names, places and preferences the \
user mentioned. Do not continue the conversation.";

/// Smallest tail a summary may leave; the turn's reply must survive it
pub const MIN_KEEP_RECENT: usize = 1;

/// When the summarizer runs. Exactly one rule is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum SummaryTrigger {
    /// Message count meets or exceeds `threshold`
    MessageCount { threshold: usize },
    /// Turn is at least `min_turn` and a multiple of `every`
    TurnPeriodic { min_turn: u64, every: u64 },
}

impl Default for SummaryTrigger {
    fn default() -> Self {
        SummaryTrigger::MessageCount { threshold: 8 }
    }
}

impl SummaryTrigger {
    fn fires(&self, state: &ConversationState) -> bool {
        match *self {
            SummaryTrigger::MessageCount { threshold } => state.messages.len() >= threshold,
            SummaryTrigger::TurnPeriodic { min_turn, every } => {
                every > 0 && state.turn >= min_turn && state.turn % every == 0
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub enabled: bool,
    pub trigger: SummaryTrigger,
    /// Messages kept verbatim after summarizing
    pub keep_recent: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger: SummaryTrigger::default(),
            keep_recent: 5,
        }
    }
}

/// New summary plus the message delta that drops everything but the tail
#[derive(Debug, Clone)]
pub struct SummaryOutcome {
    pub summary: String,
    pub updates: Vec<MessageUpdate>,
}

fn summary_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "summary": { "type": "string", "minLength": 1 }
        },
        "required": ["summary"]
    })
}

/// Plain-text transcript so the model summarizes instead of replying
fn serialize_messages_for_summary(messages: &[ChatMessage]) -> String {
    let mut out = String::new();
    for msg in messages.iter().filter(|m| m.has_content()) {
        let label = match msg.role {
            Role::User => "[User]: ",
            Role::Assistant => "[Assistant]: ",
            Role::System => "[System]: ",
        };
        out.push_str(label);
        out.push_str(msg.content.trim());
        out.push('\n');
    }
    out
}

fn summary_instruction(existing: Option<&str>) -> String {
    match existing.map(str::trim).filter(|s| !s.is_empty()) {
        Some(summary) => format!(
            "This is summary of the conversation to date: {}\n\n\
             Extend the summary by taking into account the new messages above:",
            summary
        ),
        None => "Create a summary of the conversation above:".to_string(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct Summarizer {
    config: SummaryConfig,
}

impl Summarizer {
    /// `keep_recent` is raised to [`MIN_KEEP_RECENT`] if set lower
    pub fn new(mut config: SummaryConfig) -> Self {
        config.keep_recent = config.keep_recent.max(MIN_KEEP_RECENT);
        Self { config }
    }

    pub fn should_summarize(&self, state: &ConversationState) -> bool {
        self.config.enabled
            && state.messages.len() > self.config.keep_recent
            && self.config.trigger.fires(state)
    }

    /// Ask the model for a new or extended summary.
    ///
    /// A missing or empty summary fails the turn with [`Error::Summarization`];
    /// provider errors keep their own variant.
    pub async fn summarize(
        &self,
        state: &ConversationState,
        ctx: &TurnContext,
    ) -> Result<SummaryOutcome> {
        let transcript = serialize_messages_for_summary(&state.messages);
        let prompt = format!(
            "{}\n{}",
            transcript,
            summary_instruction(state.summary.as_deref())
        );

        let mut context = Context::with_system(SUMMARIZER_PROMPT);
        context.push(Message::user(prompt));

        let value = complete_structured(
            ctx.transport.as_ref(),
            &context,
            &ctx.options,
            "summary",
            &summary_schema(),
        )
        .await
        .map_err(|e| match e {
            Error::Ai(_) | Error::Cancelled => e,
            other => Error::Summarization(other.to_string()),
        })?;

        let summary = value
            .get("summary")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Summarization("model returned an empty summary".into()))?
            .to_string();

        let cut = state.messages.len().saturating_sub(self.config.keep_recent);
        let (removed, kept) = state.messages.split_at(cut);
        let updates = removed
            .iter()
            .map(|m| MessageUpdate::Remove(m.id.clone()))
            .chain(kept.iter().cloned().map(MessageUpdate::Append))
            .collect();

        tracing::info!(
            removed = removed.len(),
            kept = kept.len(),
            "conversation summarized"
        );
        Ok(SummaryOutcome { summary, updates })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventSink;
    use crate::state::AgentKind;
    use crate::testing::{Reply, ScriptedTransport, turn_context};

    fn conversation(n: usize) -> ConversationState {
        let mut state = ConversationState::new();
        for i in 0..n {
            let msg = if i % 2 == 0 {
                ChatMessage::user(format!("question {}", i))
            } else {
                ChatMessage::assistant(format!("answer {}", i), AgentKind::Chat)
            };
            state.messages.push(msg.with_id(format!("m{}", i)));
        }
        state
    }

    #[test]
    fn test_message_count_trigger() {
        let summarizer = Summarizer::default();
        assert!(!summarizer.should_summarize(&conversation(7)));
        assert!(summarizer.should_summarize(&conversation(8)));

        let disabled = Summarizer::new(SummaryConfig {
            enabled: false,
            ..Default::default()
        });
        assert!(!disabled.should_summarize(&conversation(20)));
    }

    #[test]
    fn test_never_fires_at_or_below_keep_recent() {
        let summarizer = Summarizer::new(SummaryConfig {
            trigger: SummaryTrigger::MessageCount { threshold: 1 },
            ..Default::default()
        });
        assert!(!summarizer.should_summarize(&conversation(5)));
        assert!(summarizer.should_summarize(&conversation(6)));
    }

    #[test]
    fn test_turn_periodic_trigger() {
        let summarizer = Summarizer::new(SummaryConfig {
            trigger: SummaryTrigger::TurnPeriodic {
                min_turn: 10,
                every: 5,
            },
            ..Default::default()
        });
        let mut state = conversation(12);
        for (turn, expected) in [(5, false), (10, true), (12, false), (15, true)] {
            state.turn = turn;
            assert_eq!(summarizer.should_summarize(&state), expected, "turn {}", turn);
        }
    }

    #[test]
    fn test_trigger_config_shape() {
        let config: SummaryConfig = serde_json::from_value(serde_json::json!({
            "trigger": { "rule": "turn_periodic", "min_turn": 10, "every": 5 }
        }))
        .unwrap();
        assert!(config.enabled);
        assert_eq!(config.keep_recent, 5);
        assert_eq!(
            config.trigger,
            SummaryTrigger::TurnPeriodic {
                min_turn: 10,
                every: 5
            }
        );
    }

    #[tokio::test]
    async fn test_removes_prefix_and_keeps_tail() {
        let transport = ScriptedTransport::new(vec![Reply::json(
            serde_json::json!({"summary": "The user asked eight questions."}),
        )]);
        let ctx = turn_context(transport.clone(), EventSink::disabled());
        let mut state = conversation(8);

        let outcome = Summarizer::default()
            .summarize(&state, &ctx)
            .await
            .unwrap();
        assert_eq!(outcome.summary, "The user asked eight questions.");

        let removed: Vec<&str> = outcome
            .updates
            .iter()
            .filter_map(|u| match u {
                MessageUpdate::Remove(id) => Some(id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(removed, vec!["m0", "m1", "m2"]);

        let tail = state.messages[3..].to_vec();
        state.apply(outcome.updates);
        assert_eq!(state.messages, tail);

        let prompt = transport.requests()[0].context.messages[0].text();
        assert!(prompt.starts_with("[User]: question 0\n[Assistant]: answer 1\n"));
        assert!(prompt.ends_with("Create a summary of the conversation above:"));
    }

    #[tokio::test]
    async fn test_zero_keep_recent_still_keeps_the_reply() {
        let transport = ScriptedTransport::new(vec![Reply::json(
            serde_json::json!({"summary": "One question, one answer."}),
        )]);
        let ctx = turn_context(transport, EventSink::disabled());
        let mut state = conversation(2);
        let summarizer = Summarizer::new(SummaryConfig {
            trigger: SummaryTrigger::MessageCount { threshold: 1 },
            keep_recent: 0,
            ..Default::default()
        });
        assert!(summarizer.should_summarize(&state));

        let outcome = summarizer.summarize(&state, &ctx).await.unwrap();
        state.apply(outcome.updates);
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].id, "m1");
        assert_eq!(state.messages[0].role, Role::Assistant);
        assert!(!summarizer.should_summarize(&state));
    }

    #[tokio::test]
    async fn test_extends_existing_summary() {
        let transport = ScriptedTransport::new(vec![Reply::json(
            serde_json::json!({"summary": "Longer summary."}),
        )]);
        let ctx = turn_context(transport.clone(), EventSink::disabled());
        let mut state = conversation(8);
        state.summary = Some("Earlier talk about ships.".into());

        Summarizer::default().summarize(&state, &ctx).await.unwrap();
        let prompt = transport.requests()[0].context.messages[0].text();
        assert!(prompt.contains("This is summary of the conversation to date: Earlier talk about ships."));
        assert!(prompt.ends_with("Extend the summary by taking into account the new messages above:"));
    }

    #[tokio::test]
    async fn test_missing_summary_is_hard_error() {
        for reply in [
            Reply::json(serde_json::json!({"summary": 42})),
            Reply::json(serde_json::json!({"summary": "   "})),
            Reply::Text("I refuse".into()),
        ] {
            let transport = ScriptedTransport::new(vec![reply]);
            let ctx = turn_context(transport, EventSink::disabled());
            let err = Summarizer::default()
                .summarize(&conversation(8), &ctx)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Summarization(_)), "got: {:?}", err);
        }
    }
}
