//! Request authentication

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::{HeaderMap, header};
use byte_agent::User;

/// Resolves the caller of a request. `None` means unauthenticated.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn current_user(&self, bearer: Option<&str>) -> Option<User>;
}

/// Static bearer tokens from the config file
#[derive(Debug, Clone, Default)]
pub struct TokenAuthenticator {
    tokens: HashMap<String, String>,
}

impl TokenAuthenticator {
    pub fn new(tokens: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn current_user(&self, bearer: Option<&str>) -> Option<User> {
        self.tokens.get(bearer?).map(|id| User::new(id.clone()))
    }
}

/// The token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
