pub mod api;
pub mod models;
pub mod timestamp;

pub use models::{Chat, Message, PendingMessage, User};
