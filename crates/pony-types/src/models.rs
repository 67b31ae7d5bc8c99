use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(with = "crate::timestamp")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub user_ids: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(with = "crate::timestamp")]
    pub created_at: DateTime<Utc>,
}

/// A message as confirmed by the server.
///
/// Message listings are scoped to a chat and may omit `chat_id`; the client
/// fills it in from the request path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub chat_id: String,
    pub user_id: String,
    pub text: String,
    #[serde(with = "crate::timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub edited: bool,
}

/// A message sent locally whose POST has not resolved yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub temp_id: Uuid,
    pub chat_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl PendingMessage {
    pub fn new(chat_id: &str, text: &str) -> Self {
        Self {
            temp_id: Uuid::new_v4(),
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            created_at: Utc::now(),
        }
    }
}
