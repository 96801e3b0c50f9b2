use crate::llm::{Message, ModelProvider};
use crate::types::{AgentError, Conversation};
use log::{debug, warn};

use super::Agent;

impl<P: ModelProvider + 'static> Agent<P> {
    /// Answer the conversation, running tools as the model requests them.
    ///
    /// Tool calls and their results are appended to `conversation`; the final
    /// answer is returned, not appended. Returns an empty string when the
    /// iteration limit is reached first.
    ///
    /// # Errors
    /// [`AgentError::Provider`] when a generation request fails and
    /// [`AgentError::Cancelled`] when the session is cancelled. Tool failures
    /// are not errors; they are recorded as tool results.
    pub async fn respond(&self, conversation: &mut Conversation) -> Result<String, AgentError> {
        self.respond_with_limit(conversation, self.config.max_iterations)
            .await
    }

    /// [`respond`](Self::respond) with an explicit iteration limit.
    ///
    /// # Errors
    /// See [`respond`](Self::respond).
    pub async fn respond_with_limit(
        &self,
        conversation: &mut Conversation,
        max_iterations: usize,
    ) -> Result<String, AgentError> {
        let tools = self.tool_catalog();

        for iteration in 0..max_iterations {
            self.check_session()?;
            self.compact_if_needed(conversation).await?;

            let response = self.generate(conversation, tools.clone()).await?;
            if self.should_execute_tools(&response.tool_calls) {
                debug!("Iteration {iteration}: {} tool calls", response.tool_calls.len());
                self.run_tool_calls(conversation, response.tool_calls, None)
                    .await?;
                continue;
            }

            if let Some(content) = response.non_empty_content() {
                return Ok(content.to_string());
            }

            // Some providers return an empty final turn while tools are on offer.
            debug!("Empty response, retrying without tools");
            let retry = self.generate(conversation, None).await?;
            return Ok(retry.content.unwrap_or_default());
        }

        warn!("Max iterations reached ({max_iterations}) without a final answer");
        Ok(String::new())
    }

    /// One-shot question in a fresh conversation.
    ///
    /// # Errors
    /// See [`respond`](Self::respond).
    pub async fn chat(&self, prompt: &str, system: Option<&str>) -> Result<String, AgentError> {
        let mut conversation = fresh_conversation(prompt, system);
        self.respond(&mut conversation).await
    }
}

pub(super) fn fresh_conversation(prompt: &str, system: Option<&str>) -> Conversation {
    let mut conversation = Vec::with_capacity(2);
    if let Some(system) = system.filter(|s| !s.is_empty()) {
        conversation.push(Message::system(system));
    }
    conversation.push(Message::user(prompt));
    conversation
}
