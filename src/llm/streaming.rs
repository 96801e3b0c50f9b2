//! Streaming types for model responses.
//!
//! A streamed generation is a sequence of [`StreamChunk`]s. Each chunk may
//! carry a text delta, a batch of complete tool calls, and a finish reason.
//! Providers that reject streaming mid-flight yield
//! [`StreamError::Unavailable`] so the caller can retry without streaming.

use crate::llm::{FinishReason, ToolCall};
use futures::Stream;
use std::pin::Pin;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamChunk {
    /// Text fragment to append to the visible answer.
    pub content: Option<String>,
    /// Tool calls completed in this chunk.
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<FinishReason>,
}

impl StreamChunk {
    #[must_use]
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            content: Some(delta.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            finish_reason: Some(FinishReason::ToolCalls),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn finished(reason: FinishReason) -> Self {
        Self {
            finish_reason: Some(reason),
            ..Self::default()
        }
    }

    /// Non-empty text delta, if any.
    #[must_use]
    pub fn delta(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.is_empty())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The backend cannot stream this request; retry with `generate`.
    #[error("streaming unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Type alias for a boxed stream of chunks.
pub type ChunkStream<'a> = Pin<Box<dyn Stream<Item = Result<StreamChunk, StreamError>> + Send + 'a>>;
