//! direct_answer：无需工具，结合历史与记忆直接回答

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::graph::prompts;
use crate::graph::stage::{Stage, StageId, StageOutput};
use crate::graph::state::{ConversationState, StateUpdate};
use crate::llm::{CompletionOptions, LlmClient};
use crate::memory::{history_window, Message};

pub struct DirectAnswerNode {
    llm: Arc<dyn LlmClient>,
    temperature: f32,
    history_turns: usize,
}

impl DirectAnswerNode {
    pub fn new(llm: Arc<dyn LlmClient>, temperature: f32, history_turns: usize) -> Self {
        Self {
            llm,
            temperature,
            history_turns,
        }
    }
}

#[async_trait]
impl Stage for DirectAnswerNode {
    fn id(&self) -> StageId {
        StageId::DirectAnswer
    }

    async fn run(&self, state: &ConversationState) -> StageOutput {
        let messages = prompts::direct_answer_messages(
            &state.question,
            history_window(&state.messages, self.history_turns),
            &state.memories,
        );
        let options = CompletionOptions::default().with_temperature(self.temperature);

        match self.llm.complete(&messages, &options).await {
            Ok(text) if !text.trim().is_empty() => {
                let update = StateUpdate::new()
                    .response(text.clone())
                    .message(Message::user(state.question.clone()))
                    .message(Message::assistant(text.clone()));
                StageOutput::new(update, json!({ "response": text }))
            }
            Ok(_) => {
                tracing::warn!("direct answer was empty");
                StageOutput::new(StateUpdate::new().response(""), json!({ "response": "" })).degraded(true)
            }
            Err(e) => {
                tracing::warn!("direct answer failed: {}", e);
                StageOutput::new(
                    StateUpdate::new().response(""),
                    json!({ "response": "", "error": e.to_string() }),
                )
                .degraded(true)
            }
        }
    }
}
