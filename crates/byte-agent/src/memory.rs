//! State store contract and the memory manager that loads and persists turns

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Result;
use crate::state::{AgentKind, ChatMessage, ConversationState, MessageId, Role};

pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend rejected a read or write
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A background storage task did not complete
    #[error("storage task failed: {0}")]
    Task(String),

    /// A stored row could not be decoded
    #[error("invalid stored data: {0}")]
    Corrupt(String),
}

/// A persisted message row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    /// Agents that answered, set on the last assistant message of a turn
    #[serde(default)]
    pub agents: Vec<String>,
    pub created_at: i64,
}

impl StoredMessage {
    pub fn from_message(message: &ChatMessage) -> Self {
        Self {
            id: message.id.clone(),
            role: message.role,
            content: message.content.clone(),
            agents: Vec::new(),
            created_at: message.created_at,
        }
    }

    pub fn into_message(self) -> ChatMessage {
        let agent = match self.role {
            Role::Assistant => self
                .agents
                .iter()
                .rev()
                .find_map(|a| AgentKind::from_name(a))
                .or(Some(AgentKind::Chat)),
            _ => None,
        };
        ChatMessage {
            id: self.id,
            role: self.role,
            content: self.content,
            agent,
            created_at: self.created_at,
        }
    }
}

/// Everything loaded for a thread at the start of a turn
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredState {
    pub messages: Vec<StoredMessage>,
    pub summary: Option<String>,
    pub turn: u64,
}

/// Result of clearing a thread's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClearOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Persistence collaborator. Threads are keyed by user id.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_state(&self, thread_id: &str) -> std::result::Result<StoredState, StoreError>;

    /// Create the thread row if missing
    async fn save_session(&self, thread_id: &str, title: &str)
    -> std::result::Result<(), StoreError>;

    /// Insert messages, skipping blank content and any content already stored
    /// for the thread or earlier in the batch. `agents` is attached to the
    /// last assistant message of the batch. Returns the number of rows inserted.
    async fn save_messages(
        &self,
        thread_id: &str,
        messages: &[ChatMessage],
        agents: Option<&[String]>,
    ) -> std::result::Result<usize, StoreError>;

    async fn delete_messages(
        &self,
        thread_id: &str,
        ids: &[MessageId],
    ) -> std::result::Result<(), StoreError>;

    async fn save_summary(&self, thread_id: &str, summary: &str)
    -> std::result::Result<(), StoreError>;

    async fn save_turn(&self, thread_id: &str, turn: u64) -> std::result::Result<(), StoreError>;

    async fn clear_chat(&self, thread_id: &str) -> ClearOutcome;
}

/// Rows from `messages` that pass the blank/duplicate filter, with `agents`
/// attached to the last assistant row. Shared by store implementations.
pub fn rows_to_insert(
    existing: &HashSet<String>,
    messages: &[ChatMessage],
    agents: Option<&[String]>,
) -> Vec<StoredMessage> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut rows: Vec<StoredMessage> = messages
        .iter()
        .filter(|m| m.has_content())
        .filter(|m| !existing.contains(&m.content) && seen.insert(m.content.as_str()))
        .map(StoredMessage::from_message)
        .collect();

    if let Some(agents) = agents {
        if let Some(last) = rows.iter_mut().rev().find(|r| r.role == Role::Assistant) {
            last.agents = agents.to_vec();
        }
    }
    rows
}

#[derive(Debug, Default)]
struct ThreadRecord {
    title: String,
    messages: Vec<StoredMessage>,
    summary: Option<String>,
    turn: u64,
}

/// Process-local store for tests and ephemeral runs
#[derive(Debug, Default)]
pub struct InMemoryStore {
    threads: Mutex<HashMap<String, ThreadRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(&self, thread_id: &str) -> Option<String> {
        self.threads.lock().get(thread_id).map(|t| t.title.clone())
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn load_state(&self, thread_id: &str) -> std::result::Result<StoredState, StoreError> {
        Ok(self
            .threads
            .lock()
            .get(thread_id)
            .map(|t| StoredState {
                messages: t.messages.clone(),
                summary: t.summary.clone(),
                turn: t.turn,
            })
            .unwrap_or_default())
    }

    async fn save_session(
        &self,
        thread_id: &str,
        title: &str,
    ) -> std::result::Result<(), StoreError> {
        self.threads
            .lock()
            .entry(thread_id.to_string())
            .or_insert_with(|| ThreadRecord {
                title: title.to_string(),
                ..Default::default()
            });
        Ok(())
    }

    async fn save_messages(
        &self,
        thread_id: &str,
        messages: &[ChatMessage],
        agents: Option<&[String]>,
    ) -> std::result::Result<usize, StoreError> {
        let mut threads = self.threads.lock();
        let thread = threads.entry(thread_id.to_string()).or_default();
        let existing: HashSet<String> = thread.messages.iter().map(|m| m.content.clone()).collect();
        let rows = rows_to_insert(&existing, messages, agents);
        let inserted = rows.len();
        thread.messages.extend(rows);
        Ok(inserted)
    }

    async fn delete_messages(
        &self,
        thread_id: &str,
        ids: &[MessageId],
    ) -> std::result::Result<(), StoreError> {
        if let Some(thread) = self.threads.lock().get_mut(thread_id) {
            thread.messages.retain(|m| !ids.contains(&m.id));
        }
        Ok(())
    }

    async fn save_summary(
        &self,
        thread_id: &str,
        summary: &str,
    ) -> std::result::Result<(), StoreError> {
        self.threads
            .lock()
            .entry(thread_id.to_string())
            .or_default()
            .summary = Some(summary.to_string());
        Ok(())
    }

    async fn save_turn(&self, thread_id: &str, turn: u64) -> std::result::Result<(), StoreError> {
        self.threads
            .lock()
            .entry(thread_id.to_string())
            .or_default()
            .turn = turn;
        Ok(())
    }

    async fn clear_chat(&self, thread_id: &str) -> ClearOutcome {
        self.threads.lock().remove(thread_id);
        ClearOutcome::ok()
    }
}

/// What a finished turn changed
#[derive(Debug, Clone, Default)]
pub struct TurnRecord {
    /// Messages added this turn, in order
    pub new_messages: Vec<ChatMessage>,
    /// Ids dropped by the summarizer
    pub removed: Vec<MessageId>,
    /// Set only when the summary changed
    pub summary: Option<String>,
    /// Agents that ran, workers before chat
    pub agents: Vec<String>,
    pub turn: u64,
}

/// Loads state before a turn and writes the turn's changes after it
#[derive(Clone)]
pub struct MemoryManager {
    store: Arc<dyn StateStore>,
    session_title: String,
}

impl MemoryManager {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            session_title: DEFAULT_SESSION_TITLE.to_string(),
        }
    }

    pub fn with_session_title(mut self, title: impl Into<String>) -> Self {
        self.session_title = title.into();
        self
    }

    pub async fn load_state(&self, thread_id: &str) -> Result<ConversationState> {
        let stored = self.store.load_state(thread_id).await.map_err(|e| {
            tracing::error!(thread = thread_id, "failed to load state: {}", e);
            e
        })?;

        tracing::debug!(
            thread = thread_id,
            messages = stored.messages.len(),
            turn = stored.turn,
            "state loaded"
        );
        Ok(ConversationState {
            messages: stored
                .messages
                .into_iter()
                .map(StoredMessage::into_message)
                .collect(),
            summary: stored.summary.filter(|s| !s.trim().is_empty()),
            turn: stored.turn,
            ..Default::default()
        })
    }

    /// Session, deletions, inserts, summary, turn. Not transactional: a
    /// failure stops at that write and is returned.
    pub async fn persist_state(&self, thread_id: &str, record: &TurnRecord) -> Result<()> {
        let result = self.write(thread_id, record).await;
        if let Err(e) = &result {
            tracing::error!(thread = thread_id, "failed to persist turn: {}", e);
        }
        result.map_err(Into::into)
    }

    async fn write(
        &self,
        thread_id: &str,
        record: &TurnRecord,
    ) -> std::result::Result<(), StoreError> {
        self.store
            .save_session(thread_id, &self.session_title)
            .await?;
        if !record.removed.is_empty() {
            self.store
                .delete_messages(thread_id, &record.removed)
                .await?;
        }
        let agents = (!record.agents.is_empty()).then_some(record.agents.as_slice());
        let inserted = self
            .store
            .save_messages(thread_id, &record.new_messages, agents)
            .await?;
        if let Some(summary) = &record.summary {
            self.store.save_summary(thread_id, summary).await?;
        }
        self.store.save_turn(thread_id, record.turn).await?;

        tracing::debug!(
            thread = thread_id,
            inserted,
            removed = record.removed.len(),
            "turn persisted"
        );
        Ok(())
    }

    pub async fn clear_state(&self, thread_id: &str) -> ClearOutcome {
        let outcome = self.store.clear_chat(thread_id).await;
        if let Some(error) = &outcome.error {
            tracing::warn!(thread = thread_id, "failed to clear chat: {}", error);
        }
        outcome
    }
}
