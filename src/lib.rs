//! Lexia Copilot - voice and text assistant core for the Lexia CRM
//!
//! Lets a Gemini model act on the CRM through a small set of tools, either in
//! a duplex audio session over the Live API or in a turn-based text loop.

#![forbid(unsafe_code)]

/// Audio transcoding, playback scheduling and device seams
pub mod audio;
pub mod briefing;
pub mod config;
pub mod crm;
pub mod events;
/// Gemini API clients and wire types
pub mod gemini;
pub mod navigation;
pub mod retry;
pub mod session;
pub mod tools;
pub mod transcript;

pub use config::CopilotConfig;
pub use events::{AppEvent, EventHub, Topic};
pub use session::{ConversationSession, SessionState, TextConversation};
pub use tools::{ToolExecutor, ToolRegistry, ToolResult};
pub use transcript::{Message, Role, Transcript};
