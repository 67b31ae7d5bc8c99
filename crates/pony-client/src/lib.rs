//! Session and data-synchronization layer for the Pony Express chat client.

pub mod cache;
pub mod chats;
pub mod config;
pub mod error;
pub mod gateway;
pub mod mutation;
pub mod query;
pub mod route;
pub mod session;
pub mod storage;
pub mod user;

use std::sync::Arc;

use pony_types::api::Credentials;

pub use cache::{QueryCache, Snapshot, Subscription};
pub use chats::{ChatQueries, ChatSlot, chat_slots, filter_chats};
pub use config::ClientConfig;
pub use error::{ClientError, ConfigError, Result};
pub use gateway::ApiGateway;
pub use mutation::MutationExecutor;
pub use query::{CacheKey, CacheStatus, MessageList, Query, QueryData};
pub use route::{AuthState, Navigation, Route, RouteGuard};
pub use session::{Session, SessionStore};
pub use storage::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use user::UserContext;

/// Everything wired together once: one session, one cache, one gateway.
#[derive(Clone)]
pub struct PonyClient {
    session: Arc<SessionStore>,
    gateway: ApiGateway,
    cache: QueryCache,
    mutations: MutationExecutor,
    users: UserContext,
    chats: ChatQueries,
}

impl PonyClient {
    pub fn new(config: &ClientConfig, storage: Arc<dyn TokenStore>) -> Result<Self> {
        let cache = QueryCache::new(config.stale_after);
        let session = Arc::new(SessionStore::restore(storage, cache.clone()));
        let gateway = ApiGateway::new(config, session.clone())?;

        Ok(Self {
            mutations: MutationExecutor::new(
                gateway.clone(),
                cache.clone(),
                config.optimistic_messages,
            ),
            users: UserContext::new(gateway.clone(), cache.clone()),
            chats: ChatQueries::new(gateway.clone(), cache.clone()),
            session,
            gateway,
            cache,
        })
    }

    /// Client persisting its token to `config.token_path`.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let storage = Arc::new(FileTokenStore::new(config.token_path.clone()));
        Self::new(config, storage)
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn gateway(&self) -> &ApiGateway {
        &self.gateway
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn mutations(&self) -> &MutationExecutor {
        &self.mutations
    }

    pub fn users(&self) -> &UserContext {
        &self.users
    }

    pub fn chats(&self) -> &ChatQueries {
        &self.chats
    }

    pub fn route_guard(&self) -> RouteGuard {
        RouteGuard::new(self.session.subscribe())
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.is_logged_in()
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Session> {
        let credentials = Credentials::new(username, password);
        self.session.login(&self.gateway, &credentials).await
    }

    pub fn logout(&self) {
        self.session.logout();
    }
}
