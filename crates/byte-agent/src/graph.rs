//! The orchestration graph
//!
//! ```text
//! router ──► chat_agent ──► (summarize_conversation) ──► end
//!    │            ▲
//!    ├─► weather_agent
//!    └─► news_agent
//! ```
//!
//! Edges are resolved by exhaustive matches on [`NodeId`] and [`AgentKind`];
//! there is no string-keyed dispatch.

use crate::chat::{CAPTAIN_BYTE_PERSONA, ChatAgent};
use crate::error::{Error, Result};
use crate::events::TurnEvent;
use crate::router::Router;
use crate::state::{AgentKind, ConversationState};
use crate::summarizer::{Summarizer, SummaryConfig};
use crate::tool::BoxedTool;
use crate::turn::TurnContext;
use crate::worker::WorkerAgent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeId {
    Router,
    ChatAgent,
    WeatherAgent,
    NewsAgent,
    Summarize,
    End,
}

impl NodeId {
    pub fn name(&self) -> &'static str {
        match self {
            NodeId::Router => "router",
            NodeId::ChatAgent => "chat_agent",
            NodeId::WeatherAgent => "weather_agent",
            NodeId::NewsAgent => "news_agent",
            NodeId::Summarize => "summarize_conversation",
            NodeId::End => "end",
        }
    }

    fn for_agent(agent: AgentKind) -> Self {
        match agent {
            AgentKind::Chat => NodeId::ChatAgent,
            AgentKind::Weather => NodeId::WeatherAgent,
            AgentKind::News => NodeId::NewsAgent,
        }
    }
}

/// Steps in the longest path: router, worker, chat agent, summarizer
pub const MIN_RECURSION_LIMIT: usize = 4;

/// Graph construction options
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// System persona for the chat agent
    pub persona: String,
    /// Maximum node executions per turn
    pub recursion_limit: usize,
    pub summary: SummaryConfig,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            persona: CAPTAIN_BYTE_PERSONA.to_string(),
            recursion_limit: 10,
            summary: SummaryConfig::default(),
        }
    }
}

pub struct ChatGraph {
    router: Router,
    weather: WorkerAgent,
    news: WorkerAgent,
    chat: ChatAgent,
    summarizer: Summarizer,
    recursion_limit: usize,
}

impl ChatGraph {
    pub fn new(config: GraphConfig, weather_tool: BoxedTool, news_tool: BoxedTool) -> Self {
        Self {
            router: Router::new(),
            weather: WorkerAgent::weather(weather_tool),
            news: WorkerAgent::news(news_tool),
            chat: ChatAgent::new(config.persona),
            summarizer: Summarizer::new(config.summary),
            recursion_limit: config.recursion_limit,
        }
    }

    /// Run one pass from the router to the end node
    pub async fn run(&self, state: &mut ConversationState, ctx: &TurnContext) -> Result<()> {
        let mut node = NodeId::Router;
        let mut steps = 0;

        while node != NodeId::End {
            if steps >= self.recursion_limit {
                return Err(Error::RecursionLimit(self.recursion_limit));
            }
            steps += 1;
            ctx.check_cancelled()?;

            ctx.events.emit(TurnEvent::NodeStart {
                node: node.name().to_string(),
            });
            node = self.step(node, state, ctx).await?;
        }
        Ok(())
    }

    /// Execute `node` and return the next one
    async fn step(
        &self,
        node: NodeId,
        state: &mut ConversationState,
        ctx: &TurnContext,
    ) -> Result<NodeId> {
        let next = match node {
            NodeId::Router => NodeId::for_agent(self.router.route(state, ctx).await?),
            NodeId::WeatherAgent => {
                self.weather.run(state, ctx).await?;
                NodeId::ChatAgent
            }
            NodeId::NewsAgent => {
                self.news.run(state, ctx).await?;
                NodeId::ChatAgent
            }
            NodeId::ChatAgent => {
                self.chat.run(state, ctx).await?;
                if self.summarizer.should_summarize(state) {
                    NodeId::Summarize
                } else {
                    NodeId::End
                }
            }
            NodeId::Summarize => {
                let outcome = self.summarizer.summarize(state, ctx).await?;
                state.summary = Some(outcome.summary);
                state.apply(outcome.updates);
                NodeId::End
            }
            NodeId::End => NodeId::End,
        };
        Ok(next)
    }
}
