//! Conversation transcript shared by the text loop, the live session and the
//! tool executor.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Who produced a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
    Tool,
}

/// One turn in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_args: Option<serde_json::Value>,
    #[serde(default)]
    pub is_error: bool,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: Some(text.into()),
            tool_name: None,
            tool_args: None,
            is_error: false,
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: Some(text.into()),
            tool_name: None,
            tool_args: None,
            is_error: false,
        }
    }

    /// Model-attributed entry flagged as an error
    pub fn model_error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::model(text)
        }
    }

    pub fn tool(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            role: Role::Tool,
            text: None,
            tool_name: Some(name.into()),
            tool_args: Some(args),
            is_error: false,
        }
    }
}

/// Append-only message list behind a cheap cloneable handle.
///
/// Every clone sees the same entries. Only [`Transcript::clear`] removes them,
/// which the UI calls on reset; disconnecting a session leaves it intact.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    inner: Arc<Mutex<Vec<Message>>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: Message) {
        if let Ok(mut messages) = self.inner.lock() {
            messages.push(message);
        }
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.inner
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }

    pub fn last(&self) -> Option<Message> {
        self.inner.lock().ok().and_then(|m| m.last().cloned())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut messages) = self.inner.lock() {
            messages.clear();
        }
    }
}
