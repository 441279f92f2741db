//! Turn-based text conversation with bounded tool rounds.

use super::system_instruction;
use crate::gemini::{Content, FunctionCall, GenerateRequest, GenerativeModel};
use crate::tools::ToolExecutor;
use crate::transcript::Message;

use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const DEFAULT_TEXT_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 5;

/// Shown in the transcript when the backend cannot be reached
pub const COMMUNICATION_ERROR: &str = "Error communicating with the AI.";

pub struct TextConversation {
    model: Arc<dyn GenerativeModel>,
    model_name: String,
    executor: ToolExecutor,
    history: Vec<Content>,
    max_tool_rounds: usize,
}

impl TextConversation {
    pub fn new(model: Arc<dyn GenerativeModel>, executor: ToolExecutor) -> Self {
        Self {
            model,
            model_name: DEFAULT_TEXT_MODEL.to_string(),
            executor,
            history: Vec::new(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = name.into();
        self
    }

    /// At least one backend call is always made per message.
    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds.max(1);
        self
    }

    pub fn history(&self) -> &[Content] {
        &self.history
    }

    /// Send one user message and run the model until it answers in text, the
    /// round limit is hit, or no candidate comes back. Failures end up in the
    /// transcript, never in the return value.
    pub async fn send(&mut self, user_text: &str) {
        if user_text.trim().is_empty() {
            return;
        }

        self.executor.transcript().push(Message::user(user_text));
        self.history.push(Content::user_text(user_text));

        if let Err(e) = self.run_rounds().await {
            error!("Text conversation failed: {}", e);
            self.executor
                .transcript()
                .push(Message::model_error(COMMUNICATION_ERROR));
        }
    }

    async fn run_rounds(&mut self) -> crate::gemini::Result<()> {
        for round in 1..=self.max_tool_rounds {
            let request = GenerateRequest {
                model: self.model_name.clone(),
                contents: self.history.clone(),
                system_instruction: Some(system_instruction(
                    &self.executor.navigator().current_path(),
                )),
                tools: Some(self.executor.registry().tools_json()),
                generation_config: None,
            };

            let response = self.model.generate(request).await?;
            let Some(content) = response.first_content().cloned() else {
                debug!("No candidate in round {}", round);
                return Ok(());
            };
            self.history.push(content.clone());

            if !content.has_function_calls() {
                if let Some(text) = content.text() {
                    self.executor.transcript().push(Message::model(text));
                }
                return Ok(());
            }

            let calls: Vec<FunctionCall> = content.function_calls().cloned().collect();
            info!("Round {}: {} tool call(s)", round, calls.len());
            let responses = self.executor.execute_batch(&calls).await;
            self.history.push(Content::function_responses(responses));
        }

        warn!(
            "Stopped after {} rounds without a text answer",
            self.max_tool_rounds
        );
        Ok(())
    }

    /// Forget the conversation, transcript included.
    pub fn reset(&mut self) {
        self.history.clear();
        self.executor.transcript().clear();
    }
}
