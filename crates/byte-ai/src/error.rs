//! Error types for byte-ai

use serde::Deserialize;
use thiserror::Error;

/// Result type alias using byte-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to a model provider
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API returned an error response
    #[error("API error: {message} (type: {error_type})")]
    Api { error_type: String, message: String },

    /// Rate limit exceeded
    #[error("Rate limited: retry after {retry_after:?} seconds")]
    RateLimited { retry_after: Option<u64> },

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Invalid API key
    #[error("Invalid or missing API key")]
    InvalidApiKey,

    /// Stream was aborted
    #[error("Request aborted")]
    Aborted,

    /// Server-sent events error
    #[error("SSE error: {0}")]
    Sse(String),

    /// Unexpected response format
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

impl Error {
    /// Create an API error from type and message
    pub fn api(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Map a non-success HTTP status and its body to a typed error.
    ///
    /// The body is read as an OpenAI-style `{"error": {"message", "type"}}`
    /// envelope when possible and used verbatim otherwise.
    pub fn from_status(status: u16, body: &str) -> Self {
        let (error_type, message) = match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(envelope) => (
                envelope.error.error_type,
                envelope.error.message.unwrap_or_else(|| body.to_string()),
            ),
            Err(_) => (None, body.trim().to_string()),
        };

        match status {
            401 | 403 => Error::Auth(message),
            429 => Error::RateLimited { retry_after: None },
            500..=599 => Error::api("server_error", format!("HTTP {}: {}", status, message)),
            _ => Error::api(
                error_type.unwrap_or_else(|| format!("http_{}", status)),
                message,
            ),
        }
    }

    /// Build an error from a failed stream, keeping the HTTP status when one was seen
    pub fn from_stream_failure(message: &str, status: Option<u16>) -> Self {
        match status {
            Some(status) => Self::from_status(status, message),
            None => Error::Sse(message.to_string()),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) | Error::RateLimited { .. } | Error::Sse(_) => true,
            Error::Api {
                error_type,
                message,
            } => {
                let et = error_type.to_lowercase();
                let msg = message.to_lowercase();
                et.contains("rate_limit")
                    || et.contains("overloaded")
                    || et == "server_error"
                    || msg.contains("rate limit")
                    || msg.contains("overloaded")
                    || msg.contains("too many requests")
            }
            _ => false,
        }
    }

    /// Check if the provider rejected the credentials
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth(_) | Error::InvalidApiKey)
    }

    /// Check if the provider itself failed (5xx)
    pub fn is_server_error(&self) -> bool {
        matches!(self, Error::Api { error_type, .. } if error_type == "server_error")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_typed_variants() {
        assert!(Error::RateLimited { retry_after: Some(5) }.is_retryable());
        assert!(Error::Sse("connection reset".into()).is_retryable());
    }

    #[test]
    fn test_retryable_api_rate_limit_error_type() {
        let e = Error::api("rate_limit_error", "You have exceeded the rate limit");
        assert!(e.is_retryable());
    }

    #[test]
    fn test_retryable_server_error() {
        let e = Error::from_status(502, "Bad Gateway");
        assert!(e.is_retryable());
        assert!(e.is_server_error());
    }

    #[test]
    fn test_not_retryable_api_auth() {
        let e = Error::api("authentication_error", "Invalid API key");
        assert!(!e.is_retryable());
    }

    #[test]
    fn test_not_retryable_non_api() {
        assert!(!Error::InvalidApiKey.is_retryable());
        assert!(!Error::Aborted.is_retryable());
        assert!(!Error::Auth("nope".into()).is_retryable());
    }

    #[test]
    fn test_from_status_reads_openai_envelope() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#;
        match Error::from_status(401, body) {
            Error::Auth(msg) => assert_eq!(msg, "Incorrect API key provided"),
            other => panic!("expected Auth, got {:?}", other),
        }
    }

    #[test]
    fn test_from_status_rate_limit() {
        let e = Error::from_status(429, "slow down");
        assert!(matches!(e, Error::RateLimited { .. }));
    }

    #[test]
    fn test_from_status_client_error_keeps_type() {
        let body = r#"{"error":{"message":"bad schema","type":"invalid_request_error"}}"#;
        match Error::from_status(400, body) {
            Error::Api {
                error_type,
                message,
            } => {
                assert_eq!(error_type, "invalid_request_error");
                assert_eq!(message, "bad schema");
            }
            other => panic!("expected Api, got {:?}", other),
        }
    }

    #[test]
    fn test_from_status_plain_body() {
        match Error::from_status(418, "  teapot  ") {
            Error::Api {
                error_type,
                message,
            } => {
                assert_eq!(error_type, "http_418");
                assert_eq!(message, "teapot");
            }
            other => panic!("expected Api, got {:?}", other),
        }
    }

    #[test]
    fn test_from_stream_failure_without_status_is_sse() {
        let e = Error::from_stream_failure("stream closed", None);
        assert!(matches!(e, Error::Sse(_)));
        let e = Error::from_stream_failure("denied", Some(403));
        assert!(e.is_auth());
    }
}
