use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{Chat, Message, User};

// -- Token Claims --

/// The subset of the server's JWT claims the client looks at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: Option<String>,
    pub exp: usize,
}

// -- Auth --

/// Form body for `POST /auth/token`.
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

// Keeps passwords out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

// -- Collections --

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCollection {
    #[serde(default)]
    pub meta: Metadata,
    pub chats: Vec<Chat>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageCollection {
    #[serde(default)]
    pub meta: Metadata,
    pub messages: Vec<Message>,
}

// -- Messages --

/// JSON body for creating or editing a message.
#[derive(Debug, Clone, Serialize)]
pub struct MessageText {
    pub text: String,
}

/// Single-message responses come either bare or as `{"message": {...}}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageEnvelope {
    Wrapped { message: Message },
    Bare(Message),
}

impl MessageEnvelope {
    pub fn into_inner(self) -> Message {
        match self {
            Self::Wrapped { message } | Self::Bare(message) => message,
        }
    }
}

// -- Users --

/// `GET /users/me` answers either bare or as `{"user": {...}}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UserEnvelope {
    Wrapped { user: User },
    Bare(User),
}

impl UserEnvelope {
    pub fn into_inner(self) -> User {
        match self {
            Self::Wrapped { user } | Self::Bare(user) => user,
        }
    }
}

// -- Errors --

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub detail: ErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ErrorDetail {
    Text(String),
    Structured {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        error_description: Option<String>,
        #[serde(default, rename = "type")]
        kind: Option<String>,
        #[serde(default)]
        entity_name: Option<String>,
        #[serde(default)]
        entity_id: Option<String>,
    },
    Other(serde_json::Value),
}

impl ErrorDetail {
    /// Human-readable description, preferring the server's own wording.
    pub fn description(&self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text.clone()),
            Self::Structured {
                error,
                error_description,
                entity_name,
                entity_id,
                ..
            } => {
                if let Some(desc) = error_description {
                    return Some(desc.clone());
                }
                if let (Some(name), Some(id)) = (entity_name, entity_id) {
                    return Some(format!("{} with id {} not found", name, id));
                }
                error.clone()
            }
            Self::Other(_) => None,
        }
    }
}

impl ErrorBody {
    /// Extract the description from a raw response body, if it has the
    /// server's `{"detail": ...}` shape.
    pub fn describe(raw: &str) -> Option<String> {
        serde_json::from_str::<ErrorBody>(raw)
            .ok()
            .and_then(|body| body.detail.description())
    }
}
