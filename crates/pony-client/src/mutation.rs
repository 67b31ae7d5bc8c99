use serde::de::IgnoredAny;
use tracing::{debug, info};

use pony_types::api::{MessageEnvelope, MessageText};
use pony_types::{Message, PendingMessage};

use crate::cache::QueryCache;
use crate::chats::{message_path, messages_path};
use crate::error::{ClientError, Result};
use crate::gateway::ApiGateway;
use crate::query::{CacheKey, Query, QueryData};

/// Message writes. Each one resyncs the affected cached lists afterwards;
/// authorship is the server's business.
#[derive(Clone)]
pub struct MutationExecutor {
    gateway: ApiGateway,
    cache: QueryCache,
    optimistic: bool,
}

impl MutationExecutor {
    pub fn new(gateway: ApiGateway, cache: QueryCache, optimistic: bool) -> Self {
        Self {
            gateway,
            cache,
            optimistic,
        }
    }

    /// Post a message. Returns the server's copy, or `None` if it confirmed
    /// without a body.
    pub async fn create_message(&self, chat_id: &str, text: &str) -> Result<Option<Message>> {
        let text = require_text(text)?;
        let key = self
            .gateway
            .session()
            .current_session()
            .key(Query::messages(chat_id))?;

        let pending = if self.optimistic {
            self.insert_pending(&key, chat_id, &text)
        } else {
            None
        };

        let result = self
            .gateway
            .post::<_, Option<MessageEnvelope>>(&messages_path(chat_id), &MessageText { text })
            .await
            .map(|envelope| {
                envelope.map(|e| {
                    let mut message = e.into_inner();
                    if message.chat_id.is_empty() {
                        message.chat_id = chat_id.to_string();
                    }
                    message
                })
            });

        let confirmed = result.as_ref().ok().cloned().flatten();

        if let Some(temp_id) = pending {
            let confirmed = confirmed.clone();
            self.cache.update(&key, |data| {
                if let QueryData::Messages(list) = data {
                    list.reconcile(temp_id, confirmed);
                }
            });
        }

        match result {
            Ok(_) => {
                info!("Message sent to chat {}", chat_id);
                self.resync(chat_id, true);
                Ok(confirmed)
            }
            Err(e) => Err(self.failed(chat_id, e)),
        }
    }

    pub async fn edit_message(&self, chat_id: &str, message_id: &str, text: &str) -> Result<()> {
        let text = require_text(text)?;
        let result: Result<IgnoredAny> = self
            .gateway
            .put(&message_path(chat_id, message_id), &MessageText { text })
            .await;

        match result {
            Ok(_) => {
                debug!("Message {} edited in chat {}", message_id, chat_id);
                self.resync(chat_id, false);
                Ok(())
            }
            Err(e) => Err(self.failed(chat_id, e)),
        }
    }

    pub async fn delete_message(&self, chat_id: &str, message_id: &str) -> Result<()> {
        match self.gateway.delete(&message_path(chat_id, message_id)).await {
            Ok(()) => {
                debug!("Message {} deleted from chat {}", message_id, chat_id);
                self.resync(chat_id, false);
                Ok(())
            }
            Err(e) => Err(self.failed(chat_id, e)),
        }
    }

    /// Show the message locally before the server confirms it. Only
    /// possible when the chat's list is already cached.
    fn insert_pending(&self, key: &CacheKey, chat_id: &str, text: &str) -> Option<uuid::Uuid> {
        let pending = PendingMessage::new(chat_id, text);
        let temp_id = pending.temp_id;
        let inserted = self.cache.update(key, move |data| {
            if let QueryData::Messages(list) = data {
                list.pending.push(pending);
            }
        });
        inserted.then_some(temp_id)
    }

    fn resync(&self, chat_id: &str, chat_list_too: bool) {
        self.cache.invalidate(|q| q.is_messages_for(chat_id));
        if chat_list_too {
            self.cache.invalidate(|q| *q == Query::Chats);
        }
    }

    /// A vanished target still means the cached list is out of date.
    fn failed(&self, chat_id: &str, error: ClientError) -> ClientError {
        if error.is_not_found() {
            debug!("Chat {} target gone, resyncing its messages", chat_id);
            self.resync(chat_id, false);
        }
        error
    }
}

fn require_text(text: &str) -> Result<String> {
    if text.trim().is_empty() {
        return Err(ClientError::Validation("message text must not be empty".into()));
    }
    Ok(text.to_string())
}
