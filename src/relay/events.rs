use serde::{Deserialize, Serialize};

use crate::{
    conversations::Message,
    presence::{UserId, UserIdentity, UserSummary},
};

/// Events a client sends, framed as `{"event": "...", "data": {...}}`.
///
/// Missing string fields decode as empty and are rejected by the stores, so a client
/// gets an `error` event naming the field instead of a bare parse failure.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    Register {
        #[serde(default)]
        user_id: String,
        #[serde(default)]
        username: String,
    },
    GetUsers,
    SendMessage {
        #[serde(default)]
        from: String,
        #[serde(default)]
        to: String,
        #[serde(default)]
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    GetMessages {
        #[serde(default)]
        user_id: String,
        #[serde(default)]
        other_user_id: String,
    },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        use ClientEvent::*;
        match self {
            Register { .. } => "register",
            GetUsers => "getUsers",
            SendMessage { .. } => "sendMessage",
            GetMessages { .. } => "getMessages",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    Registered { user_id: UserId, username: String },
    /// Sent to a connection whose identity was claimed by a newer connection.
    #[serde(rename_all = "camelCase")]
    Superseded { user_id: UserId },
    UserUpdate(Vec<UserIdentity>),
    UserList(Vec<UserSummary>),
    NewMessage(Message),
    MessageSent(Message),
    MessageHistory(Vec<Message>),
    Error {
        event: String,
        kind: String,
        message: String,
    },
}
