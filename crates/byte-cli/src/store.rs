//! SQLite-backed state store

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use byte_agent::memory::{StoredMessage, StoredState, rows_to_insert};
use byte_agent::state::MessageId;
use byte_agent::{ChatMessage, ClearOutcome, Role, StateStore, StoreError};
use rusqlite::{Connection, OptionalExtension, params};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS chats (
    thread_id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    turn INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS messages (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    thread_id TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    agents TEXT NOT NULL DEFAULT '[]',
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_thread_id ON messages(thread_id);
CREATE TABLE IF NOT EXISTS summaries (
    thread_id TEXT PRIMARY KEY,
    summary TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;

/// Tables `chats`, `messages` and `summaries`. Each call opens its own
/// connection on the blocking pool.
pub struct SqliteStore {
    db_path: PathBuf,
}

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A message row before its role and agents are decoded
struct RawRow {
    id: String,
    role: String,
    content: String,
    agents: String,
    created_at: i64,
}

impl RawRow {
    fn decode(self) -> Result<StoredMessage, StoreError> {
        let role: Role = self.role.parse().map_err(StoreError::Corrupt)?;
        let agents: Vec<String> = serde_json::from_str(&self.agents)
            .map_err(|e| StoreError::Corrupt(format!("agents of {}: {}", self.id, e)))?;
        Ok(StoredMessage {
            id: self.id,
            role,
            content: self.content,
            agents,
            created_at: self.created_at,
        })
    }
}

impl SqliteStore {
    /// Creates the store and ensures the tables exist. `path` is the SQLite file path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(backend)?;
        }
        let conn = Connection::open(&db_path).map_err(backend)?;
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self { db_path })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&db_path)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
        .map_err(backend)
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn load_state(&self, thread_id: &str) -> Result<StoredState, StoreError> {
        let thread_id = thread_id.to_string();
        let (rows, summary, turn) = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, role, content, agents, created_at FROM messages \
                     WHERE thread_id = ?1 ORDER BY seq ASC",
                )?;
                let rows = stmt
                    .query_map(params![thread_id], |row| {
                        Ok(RawRow {
                            id: row.get(0)?,
                            role: row.get(1)?,
                            content: row.get(2)?,
                            agents: row.get(3)?,
                            created_at: row.get(4)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                let summary: Option<String> = conn
                    .query_row(
                        "SELECT summary FROM summaries WHERE thread_id = ?1",
                        params![thread_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                let turn: Option<i64> = conn
                    .query_row(
                        "SELECT turn FROM chats WHERE thread_id = ?1",
                        params![thread_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok((rows, summary, turn))
            })
            .await?;

        Ok(StoredState {
            messages: rows
                .into_iter()
                .map(RawRow::decode)
                .collect::<Result<_, _>>()?,
            summary,
            turn: turn.unwrap_or(0).max(0) as u64,
        })
    }

    async fn save_session(&self, thread_id: &str, title: &str) -> Result<(), StoreError> {
        let (thread_id, title) = (thread_id.to_string(), title.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO chats (thread_id, title, created_at) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(thread_id) DO NOTHING",
                params![thread_id, title, now_millis()],
            )?;
            Ok(())
        })
        .await
    }

    async fn save_messages(
        &self,
        thread_id: &str,
        messages: &[ChatMessage],
        agents: Option<&[String]>,
    ) -> Result<usize, StoreError> {
        let thread_id = thread_id.to_string();
        let messages = messages.to_vec();
        let agents = agents.map(<[String]>::to_vec);
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let existing: HashSet<String> = {
                let mut stmt = tx.prepare("SELECT content FROM messages WHERE thread_id = ?1")?;
                stmt.query_map(params![thread_id], |row| row.get(0))?
                    .collect::<rusqlite::Result<_>>()?
            };

            let mut inserted = 0;
            for row in rows_to_insert(&existing, &messages, agents.as_deref()) {
                let agents = serde_json::to_string(&row.agents).unwrap_or_else(|_| "[]".into());
                inserted += tx.execute(
                    "INSERT OR IGNORE INTO messages (id, thread_id, role, content, agents, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        row.id,
                        thread_id,
                        row.role.as_str(),
                        row.content,
                        agents,
                        row.created_at
                    ],
                )?;
            }
            tx.commit()?;
            Ok(inserted)
        })
        .await
    }

    async fn delete_messages(&self, thread_id: &str, ids: &[MessageId]) -> Result<(), StoreError> {
        let thread_id = thread_id.to_string();
        let ids = ids.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt =
                    tx.prepare("DELETE FROM messages WHERE thread_id = ?1 AND id = ?2")?;
                for id in &ids {
                    stmt.execute(params![thread_id, id])?;
                }
            }
            tx.commit()
        })
        .await
    }

    async fn save_summary(&self, thread_id: &str, summary: &str) -> Result<(), StoreError> {
        let (thread_id, summary) = (thread_id.to_string(), summary.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO summaries (thread_id, summary, updated_at) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(thread_id) DO UPDATE SET summary = excluded.summary, \
                 updated_at = excluded.updated_at",
                params![thread_id, summary, now_millis()],
            )?;
            Ok(())
        })
        .await
    }

    async fn save_turn(&self, thread_id: &str, turn: u64) -> Result<(), StoreError> {
        let thread_id = thread_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO chats (thread_id, title, turn, created_at) VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(thread_id) DO UPDATE SET turn = excluded.turn",
                params![
                    thread_id,
                    byte_agent::memory::DEFAULT_SESSION_TITLE,
                    turn as i64,
                    now_millis()
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn clear_chat(&self, thread_id: &str) -> ClearOutcome {
        let thread_id = thread_id.to_string();
        let result = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                for table in ["messages", "summaries", "chats"] {
                    tx.execute(
                        &format!("DELETE FROM {} WHERE thread_id = ?1", table),
                        params![thread_id],
                    )?;
                }
                tx.commit()
            })
            .await;
        match result {
            Ok(()) => ClearOutcome::ok(),
            Err(e) => ClearOutcome::failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byte_agent::memory::TurnRecord;
    use byte_agent::{AgentKind, MemoryManager};
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn store() -> (NamedTempFile, SqliteStore) {
        let file = NamedTempFile::new().unwrap();
        let store = SqliteStore::new(file.path()).unwrap();
        (file, store)
    }

    fn exchange() -> Vec<ChatMessage> {
        vec![
            ChatMessage::user("What's the weather in Paris?"),
            ChatMessage::assistant("Arr, drizzly skies!", AgentKind::Chat),
        ]
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let (_file, store) = store();
        let messages = exchange();
        let agents = vec!["weather".to_string(), "chat".to_string()];

        store.save_session("u1", "New Chat").await.unwrap();
        assert_eq!(
            store
                .save_messages("u1", &messages, Some(&agents))
                .await
                .unwrap(),
            2
        );
        store.save_summary("u1", "Talked about Paris.").await.unwrap();
        store.save_turn("u1", 3).await.unwrap();

        let state = store.load_state("u1").await.unwrap();
        assert_eq!(state.turn, 3);
        assert_eq!(state.summary.as_deref(), Some("Talked about Paris."));
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[0].id, messages[0].id);
        assert_eq!(state.messages[0].role, Role::User);
        assert!(state.messages[0].agents.is_empty());
        assert_eq!(state.messages[1].agents, agents);
        assert_eq!(state.messages[1].created_at, messages[1].created_at);
    }

    #[tokio::test]
    async fn test_save_messages_is_idempotent() {
        let (_file, store) = store();
        let messages = exchange();
        store.save_messages("u1", &messages, None).await.unwrap();
        assert_eq!(store.save_messages("u1", &messages, None).await.unwrap(), 0);

        let blank = vec![ChatMessage::user("  ")];
        assert_eq!(store.save_messages("u1", &blank, None).await.unwrap(), 0);
        assert_eq!(store.load_state("u1").await.unwrap().messages.len(), 2);

        // same content in another thread is a different conversation
        assert_eq!(store.save_messages("u2", &exchange(), None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete_and_summary_upsert() {
        let (_file, store) = store();
        let messages = exchange();
        store.save_messages("u1", &messages, None).await.unwrap();
        store
            .delete_messages("u1", &[messages[0].id.clone()])
            .await
            .unwrap();
        store.save_summary("u1", "first").await.unwrap();
        store.save_summary("u1", "second").await.unwrap();

        let state = store.load_state("u1").await.unwrap();
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].id, messages[1].id);
        assert_eq!(state.summary.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_clear_chat() {
        let (_file, store) = store();
        store.save_session("u1", "New Chat").await.unwrap();
        store.save_messages("u1", &exchange(), None).await.unwrap();
        store.save_summary("u1", "s").await.unwrap();

        assert_eq!(store.clear_chat("u1").await, ClearOutcome::ok());
        assert_eq!(store.load_state("u1").await.unwrap(), StoredState::default());
    }

    #[tokio::test]
    async fn test_memory_manager_over_sqlite() {
        let (_file, store) = store();
        let memory = MemoryManager::new(Arc::new(store));
        let messages = exchange();
        memory
            .persist_state(
                "u1",
                &TurnRecord {
                    new_messages: messages.clone(),
                    summary: Some("Paris.".into()),
                    agents: vec!["chat".into()],
                    turn: 1,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let state = memory.load_state("u1").await.unwrap();
        assert_eq!(state.messages, messages);
        assert_eq!(state.summary.as_deref(), Some("Paris."));
        assert_eq!(state.turn, 1);
    }
}
