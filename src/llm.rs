pub mod streaming;
pub mod types;

pub use streaming::{ChunkStream, StreamChunk, StreamError};
pub use types::*;

use anyhow::Result;
use async_trait::async_trait;

/// A language-model backend the agent talks to.
///
/// Only [`generate`](ModelProvider::generate) is required. Providers that can
/// stream override [`generate_stream`](ModelProvider::generate_stream); the
/// default reports that streaming is unavailable and callers fall back to the
/// non-streaming path.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// # Errors
    /// Returns an error when the backend request fails.
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse>;

    /// Start a streamed generation. `None` means this provider cannot stream.
    fn generate_stream(&self, request: GenerateRequest) -> Option<ChunkStream<'_>> {
        let _ = request;
        None
    }

    /// Whether tool calls in responses should be acted upon.
    fn supports_tool_calling(&self) -> bool {
        true
    }

    fn model(&self) -> &str;
}
