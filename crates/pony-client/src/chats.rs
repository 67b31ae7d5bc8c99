use regex::Regex;
use tracing::warn;

use pony_types::Chat;
use pony_types::api::{ChatCollection, MessageCollection};

use crate::cache::{QueryCache, fetcher};
use crate::error::{ClientError, Result};
use crate::gateway::ApiGateway;
use crate::query::{CacheStatus, MessageList, Query, QueryData};

/// Slots shown in the chat list before anything has loaded.
pub const LOADING_SLOTS: usize = 3;

pub fn messages_path(chat_id: &str) -> [&str; 3] {
    ["chats", chat_id, "messages"]
}

pub fn message_path<'a>(chat_id: &'a str, message_id: &'a str) -> [&'a str; 4] {
    ["chats", chat_id, "messages", message_id]
}

/// Cache-backed reads of the chat list and message lists.
#[derive(Clone)]
pub struct ChatQueries {
    gateway: ApiGateway,
    cache: QueryCache,
}

impl ChatQueries {
    pub fn new(gateway: ApiGateway, cache: QueryCache) -> Self {
        Self { gateway, cache }
    }

    pub async fn chats(&self) -> Result<(Vec<Chat>, CacheStatus)> {
        let key = self.gateway.session().current_session().key(Query::Chats)?;
        let gateway = self.gateway.clone();
        let fetch = fetcher(move || {
            let gateway = gateway.clone();
            async move {
                let collection: ChatCollection = gateway.get(&["chats"]).await?;
                Ok(QueryData::Chats(collection.chats))
            }
        });

        match self.cache.read(key, fetch).await? {
            (QueryData::Chats(chats), status) => Ok((chats, status)),
            (other, _) => Err(unexpected("chats", &other)),
        }
    }

    pub async fn messages(&self, chat_id: &str) -> Result<(MessageList, CacheStatus)> {
        let key = self
            .gateway
            .session()
            .current_session()
            .key(Query::messages(chat_id))?;
        let gateway = self.gateway.clone();
        let chat_id = chat_id.to_string();
        let fetch = fetcher(move || {
            let gateway = gateway.clone();
            let chat_id = chat_id.clone();
            async move {
                let collection: MessageCollection = gateway.get(&messages_path(&chat_id)).await?;
                let messages = collection
                    .messages
                    .into_iter()
                    .map(|mut m| {
                        if m.chat_id.is_empty() {
                            m.chat_id = chat_id.clone();
                        }
                        m
                    })
                    .collect();
                Ok(QueryData::Messages(MessageList::new(messages)))
            }
        });

        match self.cache.read(key, fetch).await? {
            (QueryData::Messages(list), status) => Ok((list, status)),
            (other, _) => Err(unexpected("messages", &other)),
        }
    }
}

fn unexpected(expected: &str, got: &QueryData) -> ClientError {
    ClientError::Decode(format!("cache held {:?} where {} were expected", got, expected))
}

// -- View helpers --

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatSlot {
    Loading,
    Loaded(Chat),
}

/// Chat list slots for rendering: placeholders until the list is cached.
pub fn chat_slots(cached: Option<&[Chat]>) -> Vec<ChatSlot> {
    match cached {
        Some(chats) => chats.iter().cloned().map(ChatSlot::Loaded).collect(),
        None => vec![ChatSlot::Loading; LOADING_SLOTS],
    }
}

/// Fuzzy chat search: a chat matches when the query's characters appear in
/// its name in order, with anything in between. Case-sensitive.
pub fn filter_chats<'a>(chats: &'a [Chat], query: &str) -> Vec<&'a Chat> {
    if query.is_empty() {
        return chats.iter().collect();
    }

    let pattern = query
        .chars()
        .map(|c| regex::escape(c.encode_utf8(&mut [0u8; 4])))
        .collect::<Vec<_>>()
        .join(".*");

    match Regex::new(&pattern) {
        Ok(re) => chats.iter().filter(|chat| re.is_match(&chat.name)).collect(),
        Err(e) => {
            warn!("Search pattern rejected: {}", e);
            Vec::new()
        }
    }
}
