use std::fmt;

use pony_types::{Chat, Message, PendingMessage, User};

/// Which server collection a cache entry holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Query {
    Chats,
    Messages { chat_id: String },
    CurrentUser,
}

impl Query {
    pub fn messages(chat_id: &str) -> Self {
        Self::Messages {
            chat_id: chat_id.to_string(),
        }
    }

    pub fn collection(&self) -> &'static str {
        match self {
            Self::Chats => "chats",
            Self::Messages { .. } => "messages",
            Self::CurrentUser => "current_user",
        }
    }

    pub fn is_messages_for(&self, chat: &str) -> bool {
        matches!(self, Self::Messages { chat_id } if chat_id == chat)
    }
}

/// Composite cache key: the query plus the session token it was made under.
///
/// A new token never matches an old key, so rotating the session orphans
/// every entry; the cache evicts them explicitly on rotation.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub query: Query,
    pub token: String,
}

impl CacheKey {
    pub fn new(query: Query, token: impl Into<String>) -> Self {
        Self {
            query,
            token: token.into(),
        }
    }
}

// Keeps tokens out of logs.
impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({:?})", self.query)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Pending,
    Fresh,
    Stale,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryData {
    Chats(Vec<Chat>),
    Messages(MessageList),
    CurrentUser(User),
}

impl QueryData {
    /// Fold a freshly fetched value over what was cached before. Pending
    /// messages always carry over. Messages confirmed locally carry over only
    /// when the response `predates` those writes; otherwise the server's list
    /// replaces everything.
    pub(crate) fn merged_over(self, previous: Option<&QueryData>, predates: bool) -> QueryData {
        match (self, previous) {
            (QueryData::Messages(mut fetched), Some(QueryData::Messages(old))) => {
                fetched.pending = old.pending.clone();
                if predates {
                    for message in &old.messages {
                        if old.unfetched.contains(&message.id) && !fetched.contains(&message.id) {
                            fetched.messages.push(message.clone());
                            fetched.unfetched.push(message.id.clone());
                        }
                    }
                }
                QueryData::Messages(fetched)
            }
            (data, _) => data,
        }
    }
}

/// A chat's messages as the server last reported them, plus local sends the
/// server has not confirmed yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageList {
    pub messages: Vec<Message>,
    pub pending: Vec<PendingMessage>,
    /// Ids in `messages` the server confirmed on write but no fetch has
    /// returned yet.
    pub unfetched: Vec<String>,
}

impl MessageList {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            pending: Vec::new(),
            unfetched: Vec::new(),
        }
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.messages.iter().any(|m| m.id == message_id)
    }

    /// Drop the pending entry `temp_id` and, if given, put the confirmed
    /// message in its place unless a refetch already brought it in.
    pub fn reconcile(&mut self, temp_id: uuid::Uuid, confirmed: Option<Message>) {
        self.pending.retain(|p| p.temp_id != temp_id);
        if let Some(message) = confirmed {
            if !self.contains(&message.id) {
                self.unfetched.push(message.id.clone());
                self.messages.push(message);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len() + self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(id: &str) -> Message {
        Message {
            id: id.into(),
            chat_id: "7".into(),
            user_id: "alice".into(),
            text: "hi".into(),
            created_at: Utc::now(),
            edited: false,
        }
    }

    #[test]
    fn message_predicate_is_chat_scoped() {
        let q = Query::messages("7");
        assert!(q.is_messages_for("7"));
        assert!(!q.is_messages_for("8"));
        assert!(!Query::Chats.is_messages_for("7"));
    }

    #[test]
    fn keys_differ_by_token() {
        assert_ne!(CacheKey::new(Query::Chats, "a"), CacheKey::new(Query::Chats, "b"));
    }

    #[test]
    fn debug_hides_token() {
        let key = CacheKey::new(Query::Chats, "secret-token");
        assert!(!format!("{:?}", key).contains("secret-token"));
    }

    #[test]
    fn reconcile_replaces_pending_without_duplicating() {
        let pending = PendingMessage::new("7", "hi");
        let mut list = MessageList {
            messages: vec![message("1")],
            pending: vec![pending.clone()],
            unfetched: Vec::new(),
        };

        list.reconcile(pending.temp_id, Some(message("2")));
        assert!(list.pending.is_empty());
        assert_eq!(list.messages.len(), 2);

        // The refetch already delivered message 2: nothing to add.
        let again = PendingMessage::new("7", "hi");
        list.pending.push(again.clone());
        list.reconcile(again.temp_id, Some(message("2")));
        assert_eq!(list.messages.len(), 2);
        assert!(list.pending.is_empty());
    }

    #[test]
    fn refetch_keeps_unresolved_pending() {
        let pending = PendingMessage::new("7", "hi");
        let old = QueryData::Messages(MessageList {
            messages: vec![message("1")],
            pending: vec![pending.clone()],
            unfetched: Vec::new(),
        });
        let fetched = QueryData::Messages(MessageList::new(vec![message("1"), message("3")]));

        match fetched.merged_over(Some(&old), false) {
            QueryData::Messages(list) => {
                assert_eq!(list.messages.len(), 2);
                assert_eq!(list.pending, vec![pending]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn response_older_than_a_write_keeps_the_confirmed_message() {
        let pending = PendingMessage::new("7", "hi");
        let mut old = MessageList::new(vec![message("1")]);
        old.pending.push(pending.clone());
        old.reconcile(pending.temp_id, Some(message("2")));
        assert_eq!(old.unfetched, vec!["2".to_string()]);
        let old = QueryData::Messages(old);

        let outdated = QueryData::Messages(MessageList::new(vec![message("1")]));
        match outdated.merged_over(Some(&old), true) {
            QueryData::Messages(list) => {
                assert!(list.contains("2"));
                assert_eq!(list.unfetched, vec!["2".to_string()]);
            }
            other => panic!("unexpected {:?}", other),
        }

        // A response issued after the write is authoritative.
        let current = QueryData::Messages(MessageList::new(vec![message("1")]));
        match current.merged_over(Some(&old), false) {
            QueryData::Messages(list) => {
                assert!(!list.contains("2"));
                assert!(list.unfetched.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
