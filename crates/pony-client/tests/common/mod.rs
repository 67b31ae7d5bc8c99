#![allow(dead_code)]

use std::sync::Arc;

use pony_client::{ClientConfig, MemoryTokenStore, PonyClient};
use url::Url;
use wiremock::MockServer;

pub fn client_for(server: &MockServer, storage: MemoryTokenStore) -> PonyClient {
    let config = ClientConfig::new(Url::parse(&server.uri()).unwrap());
    PonyClient::new(&config, Arc::new(storage)).unwrap()
}

pub fn logged_in(server: &MockServer) -> PonyClient {
    client_for(server, MemoryTokenStore::with_token("tok-1"))
}

pub fn logged_out(server: &MockServer) -> PonyClient {
    client_for(server, MemoryTokenStore::default())
}

pub fn chat_json(id: &str, name: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "name": name,
        "user_ids": ["alice", "bob"],
        "owner_id": "alice",
        "created_at": "2024-05-01T12:00:00"
    })
}

pub fn message_json(id: &str, text: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "user_id": "alice",
        "text": text,
        "created_at": "2024-05-01T12:00:00"
    })
}

pub fn messages_body(messages: Vec<serde_json::Value>) -> serde_json::Value {
    serde_json::json!({
        "meta": { "count": messages.len() },
        "messages": messages
    })
}

pub fn chats_body(chats: Vec<serde_json::Value>) -> serde_json::Value {
    serde_json::json!({
        "meta": { "count": chats.len() },
        "chats": chats
    })
}
