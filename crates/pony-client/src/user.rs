use pony_types::User;
use pony_types::api::UserEnvelope;

use crate::cache::{QueryCache, fetcher};
use crate::error::{ClientError, Result};
use crate::gateway::ApiGateway;
use crate::query::{Query, QueryData};

/// The logged-in user's profile, fetched on first use and cached for the
/// rest of the session.
#[derive(Clone)]
pub struct UserContext {
    gateway: ApiGateway,
    cache: QueryCache,
}

impl UserContext {
    pub fn new(gateway: ApiGateway, cache: QueryCache) -> Self {
        Self { gateway, cache }
    }

    pub async fn current_user(&self) -> Result<User> {
        let key = self
            .gateway
            .session()
            .current_session()
            .key(Query::CurrentUser)?;
        let gateway = self.gateway.clone();
        let fetch = fetcher(move || {
            let gateway = gateway.clone();
            async move {
                let envelope: UserEnvelope = gateway.get(&["users", "me"]).await?;
                Ok(QueryData::CurrentUser(envelope.into_inner()))
            }
        });

        match self.cache.read(key, fetch).await? {
            (QueryData::CurrentUser(user), _) => Ok(user),
            (other, _) => Err(ClientError::Decode(format!(
                "cache held {:?} where the current user was expected",
                other
            ))),
        }
    }
}
