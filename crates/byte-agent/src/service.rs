//! Turn runner: load, run the graph, persist, report

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use byte_ai::RequestOptions;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::events::{EventSink, TurnEvent};
use crate::graph::ChatGraph;
use crate::memory::{ClearOutcome, MemoryManager, TurnRecord};
use crate::state::{AgentKind, ChatMessage, ConversationState, MessageId, Role};
use crate::transport::Transport;
use crate::turn::TurnContext;

/// The authenticated caller. Its id is also the thread id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// Upper bound on one graph run. Nothing is persisted when it is exceeded.
    pub turn_timeout: Option<Duration>,
}

/// What the caller gets back from a turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutcome {
    pub content: String,
    pub agents: Vec<AgentKind>,
    pub agent_calls: BTreeMap<AgentKind, u32>,
    pub weather_data: Option<String>,
    pub news_data: Option<String>,
}

pub struct ChatService {
    graph: ChatGraph,
    memory: MemoryManager,
    transport: Arc<dyn Transport>,
    options: RequestOptions,
    config: ServiceConfig,
}

impl ChatService {
    pub fn new(
        graph: ChatGraph,
        memory: MemoryManager,
        transport: Arc<dyn Transport>,
        options: RequestOptions,
        config: ServiceConfig,
    ) -> Self {
        Self {
            graph,
            memory,
            transport,
            options,
            config,
        }
    }

    /// Run one turn for `user` and persist it. Ends with a `done` or `error` event.
    pub async fn run_turn(
        &self,
        user: &User,
        content: String,
        events: EventSink,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome> {
        let started = Instant::now();
        let result = self.execute(user, content, &events, cancel).await;

        match &result {
            Ok(outcome) => {
                tracing::info!(
                    user = %user.id,
                    agents = ?outcome.agents,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "turn complete"
                );
                events.emit(TurnEvent::Done {
                    content: outcome.content.clone(),
                    agents: outcome.agents.clone(),
                });
            }
            Err(e) => {
                tracing::warn!(user = %user.id, "turn failed: {}", e);
                events.emit(TurnEvent::Error {
                    message: e.to_string(),
                });
            }
        }
        result
    }

    async fn execute(
        &self,
        user: &User,
        content: String,
        events: &EventSink,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome> {
        let mut state = self.memory.load_state(&user.id).await?;
        let loaded: Vec<MessageId> = state.messages.iter().map(|m| m.id.clone()).collect();
        let previous_summary = state.summary.clone();

        state.begin_turn();
        state.messages.push(ChatMessage::user(content));

        let ctx = TurnContext::new(self.transport.clone())
            .with_options(self.options.clone())
            .with_events(events.clone())
            .with_cancel(cancel);

        match self.config.turn_timeout {
            Some(limit) => tokio::time::timeout(limit, self.graph.run(&mut state, &ctx))
                .await
                .map_err(|_| Error::Timeout(limit))??,
            None => self.graph.run(&mut state, &ctx).await?,
        }

        let reply = state
            .messages
            .last()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.content.clone())
            .ok_or_else(|| Error::Other("turn ended without an assistant reply".into()))?;

        let record = turn_record(&state, &loaded, previous_summary.as_deref());
        self.memory.persist_state(&user.id, &record).await?;

        Ok(TurnOutcome {
            content: reply,
            agents: state.agents_called(),
            agent_calls: state.agent_calls,
            weather_data: state.weather_data,
            news_data: state.news_data,
        })
    }

    pub async fn clear(&self, user: &User) -> ClearOutcome {
        self.memory.clear_state(&user.id).await
    }
}

/// Diff the final state against the ids loaded at the start of the turn
fn turn_record(
    state: &ConversationState,
    loaded: &[MessageId],
    previous_summary: Option<&str>,
) -> TurnRecord {
    let current: HashSet<&str> = state.messages.iter().map(|m| m.id.as_str()).collect();
    let before: HashSet<&str> = loaded.iter().map(String::as_str).collect();

    TurnRecord {
        new_messages: state
            .messages
            .iter()
            .filter(|m| !before.contains(m.id.as_str()))
            .cloned()
            .collect(),
        removed: loaded
            .iter()
            .filter(|id| !current.contains(id.as_str()))
            .cloned()
            .collect(),
        summary: state
            .summary
            .clone()
            .filter(|s| Some(s.as_str()) != previous_summary),
        agents: state
            .agents_called()
            .iter()
            .map(|a| a.name().to_string())
            .collect(),
        turn: state.turn,
    }
}
