//! Error types for byte-agent

use std::time::Duration;

use thiserror::Error;

use crate::memory::StoreError;

/// Result type alias using byte-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can end a turn
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the provider layer
    #[error(transparent)]
    Ai(#[from] byte_ai::Error),

    /// The model answered but the answer did not match the requested schema
    #[error("Structured output rejected: {0}")]
    StructuredOutput(String),

    /// The summarizer could not produce a summary
    #[error("Summarization failed: {0}")]
    Summarization(String),

    /// The state store failed to load or persist
    #[error("Persistence failed: {0}")]
    Store(#[from] StoreError),

    /// The graph ran more steps than allowed
    #[error("Recursion limit of {0} steps reached")]
    RecursionLimit(usize),

    /// The turn exceeded its time budget
    #[error("Turn timed out after {0:?}")]
    Timeout(Duration),

    /// The turn was cancelled
    #[error("Turn cancelled")]
    Cancelled,

    /// A generic agent error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Provider rejected the credentials
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Ai(e) if e.is_auth())
    }

    /// Provider asked us to slow down
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::Ai(byte_ai::Error::RateLimited { .. }))
    }

    /// Provider or turn budget unavailable
    pub fn is_unavailable(&self) -> bool {
        match self {
            Error::Ai(e) => e.is_server_error(),
            Error::Timeout(_) => true,
            _ => false,
        }
    }
}
