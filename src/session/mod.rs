//! Conversation sessions with the assistant
//!
//! [`live::ConversationSession`] runs a duplex audio session against the live
//! backend. [`text::TextConversation`] runs the turn-based text loop. Both
//! share the transcript and the tool executor.

pub mod live;
pub mod text;

use crate::audio::AudioError;
use crate::gemini::GeminiError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use live::{ConversationSession, LiveSessionConfig};
pub use text::TextConversation;

/// Persona prompt; the current location is appended to it.
pub const SYSTEM_PROMPT: &str = "You are Lexia Copilot, the CRM assistant of SAPRO. \
ALWAYS ANSWER IN FRENCH.

YOUR ROLE: you are an agent able to carry out EVERY CRM action on the user's behalf.

CRITICAL CONVERSATION RULE (CONTACT CREATION):
To avoid duplicates or incomplete records, collect the contact details ONE AT A TIME, in this order:
1. First ask for the full NAME.
2. Once you have the name, ask for the EMAIL ADDRESS.
3. Finally, ask for the ROLE.

Current page: ";

/// System instruction for a session opened while the user is on `location`
pub fn system_instruction(location: &str) -> String {
    format!("{}{}", SYSTEM_PROMPT, location)
}

/// Lifecycle of the streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Connected and model audio is playing
    Speaking,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Speaking => "speaking",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session already active ({0})")]
    AlreadyActive(SessionState),

    #[error("audio device error: {0}")]
    Audio(#[from] AudioError),

    #[error("backend error: {0}")]
    Backend(#[from] GeminiError),
}
