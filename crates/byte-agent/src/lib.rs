//! byte-agent: the Captain Byte conversation engine
//!
//! A router classifies each user message and hands it to the chat agent or to
//! a weather/news worker, which fetches data through a tool before handing
//! control to the chat agent. Long histories are folded into a running
//! summary. State is loaded from and persisted to a [`StateStore`] around
//! every turn.

pub mod chat;
pub mod error;
pub mod events;
pub mod graph;
pub mod memory;
pub mod router;
pub mod service;
pub mod state;
pub mod summarizer;
pub mod tool;
pub mod tools;
pub mod transport;
pub mod turn;
pub mod worker;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use events::{EventSink, TurnEvent};
pub use graph::{ChatGraph, GraphConfig, MIN_RECURSION_LIMIT, NodeId};
pub use memory::{ClearOutcome, InMemoryStore, MemoryManager, StateStore, StoreError};
pub use service::{ChatService, ServiceConfig, TurnOutcome, User};
pub use state::{AgentKind, ChatMessage, ConversationState, MessageUpdate, Role};
pub use summarizer::{MIN_KEEP_RECENT, SummaryConfig, SummaryTrigger};
pub use tool::{BoxedTool, Tool, ToolResult};
pub use transport::{ProviderTransport, RetryConfig, Transport};
pub use turn::TurnContext;
