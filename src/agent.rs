//! The turn orchestrator.
//!
//! An [`Agent`] answers a conversation by alternating between the model and
//! the tool dispatcher: it requests a completion, runs any tool calls the
//! model asked for (one at a time, in the order requested), appends their
//! results and asks again, until the model answers in plain text or the
//! iteration limit is reached.
//!
//! # Example
//!
//! ```ignore
//! let agent = Agent::builder()
//!     .provider(my_provider)
//!     .dispatcher(dispatcher)
//!     .config(AgentConfig::default())
//!     .build();
//!
//! let mut conversation = vec![Message::user("List my projects")];
//! let answer = agent.respond(&mut conversation).await?;
//! ```

mod builder;
mod cancel;
mod respond;
mod stream;

#[cfg(test)]
mod test_utils;

pub use builder::AgentBuilder;
pub use cancel::CancelHandle;
pub use stream::ResponseStream;

use crate::context::ContextCompactor;
use crate::dispatcher::{CANCELLED_OUTPUT, ToolDispatcher, ToolStatus, parse_arguments};
use crate::events::StreamEvent;
use crate::llm::{GenerateRequest, GenerateResponse, Message, ModelProvider, ToolCall, ToolSpec};
use crate::types::{AgentConfig, AgentError, Conversation};
use log::{debug, error, info};
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct Agent<P> {
    provider: Arc<P>,
    dispatcher: Arc<ToolDispatcher>,
    compactor: Option<Arc<dyn ContextCompactor>>,
    config: AgentConfig,
    cancel: CancelHandle,
}

impl<P: ModelProvider> Clone for Agent<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            dispatcher: Arc::clone(&self.dispatcher),
            compactor: self.compactor.clone(),
            config: self.config.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl Agent<()> {
    /// Create a new builder for constructing an `Agent`.
    #[must_use]
    pub fn builder() -> AgentBuilder<()> {
        AgentBuilder::new()
    }
}

impl<P: ModelProvider + 'static> Agent<P> {
    /// Create an agent from its parts; no compaction unless `config` asks
    /// for it through the builder.
    #[must_use]
    pub fn new(provider: P, dispatcher: ToolDispatcher, config: AgentConfig) -> Self {
        Self {
            provider: Arc::new(provider),
            dispatcher: Arc::new(dispatcher),
            compactor: None,
            config,
            cancel: CancelHandle::new(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    #[must_use]
    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Handle for cancelling this agent's current step or session.
    ///
    /// Clones of an `Agent` share the handle; use
    /// [`with_cancel_handle`](Self::with_cancel_handle) to give concurrent
    /// sessions their own.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    #[must_use]
    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    /// Tools offered to the model, or `None` when the provider cannot call
    /// tools or nothing is registered.
    #[must_use]
    pub fn tool_catalog(&self) -> Option<Vec<ToolSpec>> {
        if !self.provider.supports_tool_calling() || self.dispatcher.is_empty() {
            return None;
        }
        Some(self.dispatcher.specs())
    }

    fn should_execute_tools(&self, tool_calls: &[ToolCall]) -> bool {
        !tool_calls.is_empty() && self.provider.supports_tool_calling()
    }

    fn check_session(&self) -> Result<(), AgentError> {
        if self.cancel.is_session_cancelled() {
            return Err(AgentError::Cancelled);
        }
        Ok(())
    }

    fn request(&self, conversation: &[Message], tools: Option<Vec<ToolSpec>>) -> GenerateRequest {
        GenerateRequest::new(conversation.to_vec())
            .with_tools(tools)
            .with_max_tokens(self.config.max_tokens)
    }

    /// Compact the conversation in place when the compactor says it is due.
    async fn compact_if_needed(&self, conversation: &mut Conversation) -> Result<(), AgentError> {
        let Some(compactor) = &self.compactor else {
            return Ok(());
        };
        if !compactor.needs_compaction(conversation) {
            return Ok(());
        }

        let result = tokio::select! {
            biased;
            () = self.cancel.session_token().cancelled() => return Err(AgentError::Cancelled),
            result = compactor.compact(conversation.clone()) => result,
        };
        info!(
            "Compacted conversation: {} -> {} messages ({:?})",
            result.original_count, result.new_count, result.path
        );
        *conversation = result.messages;
        Ok(())
    }

    async fn generate(
        &self,
        conversation: &[Message],
        tools: Option<Vec<ToolSpec>>,
    ) -> Result<GenerateResponse, AgentError> {
        let request = self.request(conversation, tools);
        tokio::select! {
            biased;
            () = self.cancel.session_token().cancelled() => Err(AgentError::Cancelled),
            response = self.provider.generate(request) => response.map_err(|err| {
                error!("Model request failed: {err:#}");
                AgentError::provider(&err)
            }),
        }
    }

    /// Record the model's tool calls and run them one by one.
    ///
    /// Each call gets exactly one tool-result message, in request order. When
    /// the session is cancelled mid-way the remaining calls are answered with
    /// the cancellation text before returning [`AgentError::Cancelled`].
    async fn run_tool_calls(
        &self,
        conversation: &mut Conversation,
        tool_calls: Vec<ToolCall>,
        events: Option<&mpsc::Sender<StreamEvent>>,
    ) -> Result<(), AgentError> {
        debug!("Processing {} tool calls", tool_calls.len());
        conversation.push(Message::assistant_tool_calls(tool_calls.clone()));

        let mut pending = tool_calls.into_iter();
        while let Some(call) = pending.next() {
            if let Some(tx) = events {
                let args = parse_arguments(&call.arguments).unwrap_or_default();
                stream::send_event(tx, StreamEvent::tool_call_start(&call.name, args)).await;
            }

            let step = self.cancel.begin_step();
            let outcome = self.dispatcher.run(&call, &step).await;
            conversation.push(Message::tool_result(&call.id, &call.name, outcome.output));

            if self.cancel.is_session_cancelled() {
                for skipped in pending {
                    conversation.push(Message::tool_result(
                        skipped.id,
                        skipped.name,
                        CANCELLED_OUTPUT,
                    ));
                }
                return Err(AgentError::Cancelled);
            }

            if let Some(tx) = events {
                let event = match outcome.status {
                    ToolStatus::Failed(error) => StreamEvent::tool_call_error(&call.name, error),
                    _ => StreamEvent::tool_call_end(&call.name),
                };
                stream::send_event(tx, event).await;
            }
        }
        Ok(())
    }
}
