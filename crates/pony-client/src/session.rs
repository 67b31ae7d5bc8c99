use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use pony_types::api::{Credentials, TokenResponse};

use crate::cache::QueryCache;
use crate::error::{ClientError, Result};
use crate::gateway::ApiGateway;
use crate::query::{CacheKey, Query};
use crate::storage::{TokenStore, token_expired};

/// Immutable snapshot of the authentication state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    token: Option<String>,
}

impl Session {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_logged_in(&self) -> bool {
        self.token.is_some()
    }

    /// Cache key for `query` under this session.
    pub fn key(&self, query: Query) -> Result<CacheKey> {
        self.token
            .as_deref()
            .map(|token| CacheKey::new(query, token))
            .ok_or_else(ClientError::not_authenticated)
    }
}

/// Owns the session. `login`, `logout` and `expire` are the only ways it
/// changes; each change is published to every subscriber.
pub struct SessionStore {
    state: watch::Sender<Session>,
    storage: Arc<dyn TokenStore>,
    cache: QueryCache,
}

impl SessionStore {
    /// Start from whatever token `storage` holds. A missing or expired
    /// token means logged out.
    pub fn restore(storage: Arc<dyn TokenStore>, cache: QueryCache) -> Self {
        let token = match storage.load() {
            Ok(Some(token)) if token_expired(&token) => {
                info!("Persisted session has expired");
                if let Err(e) = storage.clear() {
                    warn!("Failed to clear expired session: {}", e);
                }
                None
            }
            Ok(token) => token,
            Err(e) => {
                warn!("Could not read persisted session: {}", e);
                None
            }
        };

        if token.is_some() {
            info!("Restored persisted session");
        }
        cache.rotate_session(token.as_deref());

        let (state, _) = watch::channel(Session { token });
        Self {
            state,
            storage,
            cache,
        }
    }

    pub fn current_session(&self) -> Session {
        self.state.borrow().clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.state.borrow().is_logged_in()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Exchange credentials for a token. Any previous session ends first, so
    /// a failed login leaves the client logged out.
    pub async fn login(&self, gateway: &ApiGateway, credentials: &Credentials) -> Result<Session> {
        self.logout();

        if credentials.username.trim().is_empty() || credentials.password.is_empty() {
            return Err(ClientError::Validation(
                "username and password are required".into(),
            ));
        }

        let response: TokenResponse = gateway.post_form(&["auth", "token"], credentials).await?;
        let token = response.access_token;
        if token.is_empty() {
            return Err(ClientError::Decode("server issued an empty token".into()));
        }

        self.storage.save(&token)?;
        self.cache.rotate_session(Some(&token));

        let session = Session::with_token(token);
        self.state.send_replace(session.clone());
        info!("Logged in as {}", credentials.username);
        Ok(session)
    }

    /// End the session: forget the token, evict the cache, notify. Safe to
    /// call when already logged out.
    pub fn logout(&self) {
        if !self.is_logged_in() {
            return;
        }

        if let Err(e) = self.storage.clear() {
            warn!("Failed to clear persisted session: {}", e);
        }
        self.cache.rotate_session(None);
        self.state.send_replace(Session::default());
        info!("Logged out");
    }

    /// Forced logout after the server rejected `token`. Does nothing if the
    /// session has already moved on to another token.
    pub fn expire(&self, token: &str) {
        if self.current_session().token() != Some(token) {
            return;
        }
        warn!("Session rejected by server, logging out");
        self.logout();
    }
}
