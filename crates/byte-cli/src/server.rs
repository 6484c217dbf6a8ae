//! HTTP chat surface: `GET`, `POST` and `DELETE /chat`

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use byte_agent::{AgentKind, ChatService, EventSink, TurnEvent, User};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::auth::{Authenticator, bearer_token};

pub const MAX_MESSAGES: usize = 50;

/// Shared state for the HTTP server
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ChatService>,
    pub auth: Arc<dyn Authenticator>,
    pub max_message_chars: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat", get(health).post(chat).delete(clear))
        .with_state(state)
}

/// Serve until the listener fails. Tests bind `127.0.0.1:0` and pass the listener in.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!("chat server listening on http://{}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    messages: Vec<IncomingMessage>,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    role: String,
    content: String,
    #[serde(default)]
    #[allow(dead_code)]
    agent_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    content: String,
    agents: Vec<AgentKind>,
    weather_data: Option<String>,
    news_data: Option<String>,
}

/// Failures surfaced to HTTP clients as `{"error": ...}`
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Turn(#[from] byte_agent::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Turn(e) if e.is_auth() => StatusCode::UNAUTHORIZED,
            ApiError::Turn(e) if e.is_rate_limited() => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Turn(e) if e.is_unavailable() => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Turn(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Turn(e) if e.is_auth() => "The model provider rejected our credentials".into(),
            ApiError::Turn(e) if e.is_rate_limited() => {
                "The model provider is rate limiting requests; try again shortly".into()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "request failed: {}", self.message());
        }
        (status, Json(serde_json::json!({ "error": self.message() }))).into_response()
    }
}

/// Check the payload and return the content of the final user message
fn validate(request: &ChatRequest, max_chars: usize) -> Result<String, ApiError> {
    let messages = &request.messages;
    if messages.is_empty() {
        return Err(ApiError::BadRequest("messages must not be empty".into()));
    }
    if messages.len() > MAX_MESSAGES {
        return Err(ApiError::BadRequest(format!(
            "messages must contain at most {} entries",
            MAX_MESSAGES
        )));
    }
    for (i, message) in messages.iter().enumerate() {
        if !matches!(message.role.as_str(), "user" | "assistant" | "system") {
            return Err(ApiError::BadRequest(format!(
                "messages[{}].role must be one of user, assistant, system",
                i
            )));
        }
        if message.content.trim().is_empty() {
            return Err(ApiError::BadRequest(format!(
                "messages[{}].content must not be empty",
                i
            )));
        }
        if message.content.chars().count() > max_chars {
            return Err(ApiError::BadRequest(format!(
                "messages[{}].content exceeds {} characters",
                i, max_chars
            )));
        }
    }

    match messages.last() {
        Some(last) if last.role == "user" => Ok(last.content.trim().to_string()),
        _ => Err(ApiError::BadRequest(
            "the last message must come from the user".into(),
        )),
    }
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<User, ApiError> {
    state
        .auth
        .current_user(bearer_token(headers))
        .await
        .ok_or(ApiError::Unauthorized)
}

fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/event-stream"))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let user = authenticate(&state, &headers).await?;

    let request: ChatRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid request body: {}", e)))?;
    let content = validate(&request, state.max_message_chars)?;

    if wants_event_stream(&headers) {
        return Ok(stream_turn(state.service.clone(), user, content).into_response());
    }

    let outcome = state
        .service
        .run_turn(&user, content, EventSink::disabled(), CancellationToken::new())
        .await?;
    Ok(Json(ChatResponse {
        content: outcome.content,
        agents: outcome.agents,
        weather_data: outcome.weather_data,
        news_data: outcome.news_data,
    })
    .into_response())
}

/// Run the turn on its own task and forward its events as SSE. The turn
/// completes and persists even if the client goes away.
fn stream_turn(
    service: Arc<ChatService>,
    user: User,
    content: String,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let (sink, rx) = EventSink::channel();
    tokio::spawn(async move {
        // Failures already reached the client as an `error` event
        if let Err(e) = service
            .run_turn(&user, content, sink, CancellationToken::new())
            .await
        {
            tracing::debug!(user = %user.id, "streamed turn ended with error: {}", e);
        }
    });

    let events = UnboundedReceiverStream::new(rx).map(|event: TurnEvent| {
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().event(event.kind()).data(data))
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn clear(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    let user = authenticate(&state, &headers).await?;
    let outcome = state.service.clear(&user).await;
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok((status, Json(outcome)).into_response())
}
