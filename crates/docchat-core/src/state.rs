//! UI-agnostic chat state types
//!
//! These types are shared between the chat session, the terminal UI and the
//! CLI, and don't depend on any UI framework.

use serde::{Deserialize, Serialize};

/// A chat message in the document conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// Reachability of the RAG service, as last observed by a health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Checking,
    Online,
    Offline,
}

impl ConnectionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionStatus::Checking => "Connecting...",
            ConnectionStatus::Online => "Connected",
            ConnectionStatus::Offline => "Offline",
        }
    }
}

/// A page of the indexed document that an answer drew on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub page: u32,
    pub preview: String,
}

/// Everything a presentation layer needs to draw the chat
#[derive(Debug, Clone, Default)]
pub struct ChatState {
    pub messages: Vec<ChatMessage>,
    pub is_loading: bool,
    pub is_uploading: bool,
    /// Human-readable upload phase; empty when there is nothing to show.
    pub upload_status: String,
    pub uploaded_filename: Option<String>,
    pub connection_status: ConnectionStatus,
    pub server_version: Option<String>,
    /// Sources reported for the most recent answer.
    pub sources: Vec<SourceInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_use_lowercase_wire_names() {
        let json = serde_json::to_string(&ChatMessage::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);

        let msg: ChatMessage = serde_json::from_str(r#"{"role":"user","content":"q"}"#).unwrap();
        assert_eq!(msg, ChatMessage::user("q"));
    }

    #[test]
    fn unknown_role_is_rejected() {
        let parsed = serde_json::from_str::<ChatMessage>(r#"{"role":"system","content":"x"}"#);
        assert!(parsed.is_err());
    }
}
