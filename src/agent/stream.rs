use crate::events::StreamEvent;
use crate::llm::{ChunkStream, ModelProvider, StreamError, ToolSpec};
use crate::types::{AgentError, Conversation};
use futures::{Stream, StreamExt};
use log::{debug, error, warn};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::respond::fresh_conversation;
use super::{Agent, CancelHandle};

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// A streamed agent invocation.
///
/// Yields [`StreamEvent`]s while the agent runs on its own task. Once the
/// events are drained, [`finish`](Self::finish) returns the conversation with
/// all tool calls and results appended.
pub struct ResponseStream {
    events: mpsc::Receiver<StreamEvent>,
    handle: JoinHandle<Result<Conversation, AgentError>>,
    cancel: CancelHandle,
}

impl ResponseStream {
    /// Next event, or `None` once the agent is done.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    #[must_use]
    pub const fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }

    /// Wait for the agent task and take back the conversation.
    ///
    /// Events not yet received are discarded.
    ///
    /// # Errors
    /// The invocation's [`AgentError`], or [`AgentError::TaskFailed`] when
    /// the task panicked or was aborted.
    pub async fn finish(self) -> Result<Conversation, AgentError> {
        drop(self.events);
        match self.handle.await {
            Ok(result) => result,
            Err(err) => Err(AgentError::TaskFailed(err.to_string())),
        }
    }

    /// Drain every event, then [`finish`](Self::finish).
    ///
    /// # Errors
    /// See [`finish`](Self::finish).
    pub async fn collect_events(mut self) -> Result<(Vec<StreamEvent>, Conversation), AgentError> {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        let conversation = self.finish().await?;
        Ok((events, conversation))
    }
}

impl Stream for ResponseStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

/// Send an event without blocking the agent forever on a stalled consumer.
///
/// A disconnected consumer is not an error; the agent keeps working so the
/// conversation can still be collected.
pub(super) async fn send_event(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            debug!("Event channel full, waiting for consumer...");
            match tokio::time::timeout(SEND_TIMEOUT, tx.send(event)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    warn!("Event channel closed while sending - consumer disconnected");
                }
                Err(_) => {
                    error!("Timeout waiting to send event - consumer may be deadlocked");
                }
            }
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("Event channel closed - consumer disconnected");
        }
    }
}

/// How one provider stream ended.
enum StreamPass {
    /// Tool calls were executed; ask the model again.
    ToolCalls,
    /// Plain answer streamed; the turn is complete.
    Done,
    /// The provider could not stream; use `generate` for this iteration.
    Unavailable,
}

impl<P: ModelProvider + 'static> Agent<P> {
    /// Streaming counterpart of [`respond`](Self::respond).
    ///
    /// Runs on a spawned task that owns `conversation`; text deltas and tool
    /// progress arrive as [`StreamEvent`]s.
    #[must_use]
    pub fn respond_stream(&self, conversation: Conversation) -> ResponseStream {
        self.respond_stream_with_limit(conversation, self.config.max_iterations)
    }

    #[must_use]
    pub fn respond_stream_with_limit(
        &self,
        conversation: Conversation,
        max_iterations: usize,
    ) -> ResponseStream {
        let (tx, rx) = mpsc::channel(self.config.event_buffer.max(1));
        let agent = self.clone();

        let handle = tokio::spawn(async move {
            let mut conversation = conversation;
            agent
                .stream_loop(&mut conversation, &tx, max_iterations)
                .await?;
            Ok(conversation)
        });

        ResponseStream {
            events: rx,
            handle,
            cancel: self.cancel.clone(),
        }
    }

    /// Streamed one-shot question in a fresh conversation.
    #[must_use]
    pub fn chat_stream(&self, prompt: &str, system: Option<&str>) -> ResponseStream {
        self.respond_stream(fresh_conversation(prompt, system))
    }

    async fn stream_loop(
        &self,
        conversation: &mut Conversation,
        events: &mpsc::Sender<StreamEvent>,
        max_iterations: usize,
    ) -> Result<(), AgentError> {
        let tools = self.tool_catalog();

        for _ in 0..max_iterations {
            self.check_session()?;
            self.compact_if_needed(conversation).await?;

            let request = self.request(conversation, tools.clone());
            let pass = match self.provider.generate_stream(request) {
                Some(stream) => self.consume_stream(stream, conversation, events).await?,
                None => {
                    debug!("Provider returned no stream, falling back to generate");
                    StreamPass::Unavailable
                }
            };

            let pass = match pass {
                StreamPass::Unavailable => {
                    self.generate_fallback(conversation, tools.clone(), events)
                        .await?
                }
                other => other,
            };
            if matches!(pass, StreamPass::Done) {
                return Ok(());
            }
        }

        warn!("Max iterations reached ({max_iterations}) while streaming");
        Ok(())
    }

    async fn consume_stream(
        &self,
        mut stream: ChunkStream<'_>,
        conversation: &mut Conversation,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<StreamPass, AgentError> {
        let mut chunk_count = 0usize;
        let mut saw_finish_reason = false;
        let mut saw_tool_calls = false;
        let mut streamed_content = false;

        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.session_token().cancelled() => return Err(AgentError::Cancelled),
                next = stream.next() => next,
            };
            let Some(item) = next else {
                break;
            };

            let chunk = match item {
                Ok(chunk) => chunk,
                Err(StreamError::Unavailable(reason)) if chunk_count == 0 => {
                    debug!("Streaming unavailable ({reason}), falling back to generate");
                    return Ok(StreamPass::Unavailable);
                }
                Err(err) => {
                    error!("Stream failed after {chunk_count} chunks: {err}");
                    return Err(AgentError::Provider(err.to_string()));
                }
            };
            chunk_count += 1;
            saw_finish_reason |= chunk.finish_reason.is_some();

            if let Some(delta) = chunk.delta() {
                streamed_content = true;
                send_event(events, StreamEvent::content(delta)).await;
            }
            if self.should_execute_tools(&chunk.tool_calls) {
                saw_tool_calls = true;
                self.run_tool_calls(conversation, chunk.tool_calls, Some(events))
                    .await?;
            }
        }

        debug!("Stream ended: chunks={chunk_count}, saw_finish_reason={saw_finish_reason}");
        if saw_tool_calls {
            return Ok(StreamPass::ToolCalls);
        }
        if !saw_finish_reason && streamed_content {
            warn!("Stream ended without finish_reason");
        }
        Ok(StreamPass::Done)
    }

    /// One non-streamed iteration, reported through the same events.
    async fn generate_fallback(
        &self,
        conversation: &mut Conversation,
        tools: Option<Vec<ToolSpec>>,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<StreamPass, AgentError> {
        let response = self.generate(conversation, tools).await?;
        if self.should_execute_tools(&response.tool_calls) {
            self.run_tool_calls(conversation, response.tool_calls, Some(events))
                .await?;
            return Ok(StreamPass::ToolCalls);
        }
        if let Some(content) = response.non_empty_content() {
            send_event(events, StreamEvent::content(content)).await;
        }
        Ok(StreamPass::Done)
    }
}
