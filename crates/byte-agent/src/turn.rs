//! Per-turn execution context shared by every node

use std::sync::Arc;

use byte_ai::RequestOptions;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::events::EventSink;
use crate::transport::Transport;

/// Everything a node needs besides the state itself
#[derive(Clone)]
pub struct TurnContext {
    pub transport: Arc<dyn Transport>,
    /// Base options (temperature, max tokens) for every model call in the turn
    pub options: RequestOptions,
    pub events: EventSink,
    pub cancel: CancellationToken,
}

impl TurnContext {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            options: RequestOptions::default(),
            events: EventSink::disabled(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
