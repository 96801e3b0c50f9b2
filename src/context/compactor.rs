//! Tiered context compaction.

use crate::llm::{GenerateRequest, Message, ModelProvider};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;

use super::config::CompactionConfig;
use super::estimator::TokenEstimator;
use super::segment::{compress_turns, recent_turns, shrink_tool_results, split_system};
use super::truncate::EmergencyTruncator;

pub const HISTORY_SUMMARY_PROMPT: &str = "Summarize this conversation concisely.\n\
Preserve ALL key information: file paths, project names, configurations, decisions, errors.\n\
Format as bullet points. Be brief but complete.";

pub const FALLBACK_TRUNCATION_NOTICE: &str = "[CONVERSATION HISTORY TRUNCATED]\n\
Previous conversation context was too large to summarize. \
Key context may have been lost. \
The most recent interaction is preserved below.\n\
[END TRUNCATION NOTICE]";

pub const SUMMARY_OPEN: &str = "[CONVERSATION HISTORY SUMMARY]";
pub const SUMMARY_CLOSE: &str = "[END SUMMARY]";

/// Trait for context compaction strategies.
///
/// Compaction never fails: when a strategy cannot summarize it degrades to a
/// lossier rewrite and reports what it did through [`CompactionResult`].
#[async_trait]
pub trait ContextCompactor: Send + Sync {
    /// Estimate tokens for a message list.
    fn estimate_tokens(&self, messages: &[Message]) -> usize;

    /// Whether the agent should compact before its next generation.
    fn needs_compaction(&self, messages: &[Message]) -> bool;

    /// Rewrite the history so that it fits the configured budget.
    async fn compact(&self, messages: Vec<Message>) -> CompactionResult;
}

/// Which rewrite produced the compacted history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionPath {
    /// Under threshold; history returned untouched.
    Unchanged,
    /// Only the kept turns were compressed; nothing older existed.
    IntraTurn,
    /// Older turns were replaced by a model-written summary.
    Summarized,
    /// Summarization failed; older turns were replaced by a fixed notice.
    TruncationNotice,
}

/// Result of a compaction operation.
#[derive(Debug, Clone)]
pub struct CompactionResult {
    /// The new compacted message history.
    pub messages: Vec<Message>,
    pub path: CompactionPath,
    /// Number of messages before compaction.
    pub original_count: usize,
    /// Number of messages after compaction.
    pub new_count: usize,
    /// Estimated tokens before compaction.
    pub original_tokens: usize,
    /// Estimated tokens after compaction.
    pub new_tokens: usize,
    /// Per-message truncation was needed on top of compaction.
    pub emergency_truncated: bool,
    /// The result still exceeds the threshold.
    pub over_budget: bool,
}

impl CompactionResult {
    fn unchanged(messages: Vec<Message>, tokens: usize) -> Self {
        let count = messages.len();
        Self {
            messages,
            path: CompactionPath::Unchanged,
            original_count: count,
            new_count: count,
            original_tokens: tokens,
            new_tokens: tokens,
            emergency_truncated: false,
            over_budget: false,
        }
    }
}

/// Compacts history in tiers: summarize older turns with the model, fold old
/// tool pairs of the kept turns into a digest, and finally truncate each
/// message if the result is still too large.
pub struct TieredCompactor<P: ModelProvider> {
    provider: Arc<P>,
    config: CompactionConfig,
    estimator: TokenEstimator,
}

impl<P: ModelProvider> TieredCompactor<P> {
    #[must_use]
    pub const fn new(provider: Arc<P>, config: CompactionConfig, estimator: TokenEstimator) -> Self {
        Self {
            provider,
            config,
            estimator,
        }
    }

    /// Create with default configuration and the shared tokenizer.
    #[must_use]
    pub fn with_defaults(provider: Arc<P>) -> Self {
        Self::new(provider, CompactionConfig::default(), TokenEstimator::default())
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Summarize older history into a single assistant message.
    async fn summarize(&self, older: &[Message]) -> (Message, CompactionPath) {
        let mut messages = shrink_tool_results(older, self.config.tool_result_summary_chars);
        messages.push(Message::user(HISTORY_SUMMARY_PROMPT));

        match self.provider.generate(GenerateRequest::new(messages)).await {
            Ok(response) => {
                let summary = response.content.unwrap_or_default();
                debug!("Summarized {} messages into {} chars", older.len(), summary.len());
                (
                    Message::assistant(format!("{SUMMARY_OPEN}\n{summary}\n{SUMMARY_CLOSE}")),
                    CompactionPath::Summarized,
                )
            }
            Err(e) => {
                warn!("History summarization failed, dropping older turns: {e:#}");
                (
                    Message::assistant(FALLBACK_TRUNCATION_NOTICE),
                    CompactionPath::TruncationNotice,
                )
            }
        }
    }
}

fn assemble(system: &[Message], summary: Option<&Message>, kept: &[Message]) -> Vec<Message> {
    let mut out = Vec::with_capacity(system.len() + 1 + kept.len());
    out.extend_from_slice(system);
    out.extend(summary.cloned());
    out.extend_from_slice(kept);
    out
}

#[async_trait]
impl<P: ModelProvider> ContextCompactor for TieredCompactor<P> {
    fn estimate_tokens(&self, messages: &[Message]) -> usize {
        self.estimator.estimate(messages)
    }

    fn needs_compaction(&self, messages: &[Message]) -> bool {
        if !self.config.auto_compact {
            return false;
        }
        self.estimate_tokens(messages) > self.config.threshold_tokens
    }

    async fn compact(&self, messages: Vec<Message>) -> CompactionResult {
        let threshold = self.config.threshold_tokens;
        let original_count = messages.len();
        let original_tokens = self.estimate_tokens(&messages);

        if original_tokens <= threshold {
            return CompactionResult::unchanged(messages, original_tokens);
        }

        let (system, rest) = split_system(&messages);
        let kept = recent_turns(&rest, self.config.effective_keep_recent_turns());
        let older = &rest[..rest.len() - kept.len()];

        let (mut summary, path) = if older.is_empty() {
            (None, CompactionPath::IntraTurn)
        } else {
            let (message, path) = self.summarize(older).await;
            (Some(message), path)
        };

        let mut kept = compress_turns(
            kept,
            self.config.keep_recent_tool_pairs,
            self.config.digest_preview_chars,
        );
        let mut compacted = assemble(&system, summary.as_ref(), &kept);

        let emergency_truncated = self.estimate_tokens(&compacted) > threshold;
        if emergency_truncated {
            let truncator = EmergencyTruncator::new(self.config.emergency_max_chars);
            kept = truncator.apply(kept);
            summary = summary.map(|m| truncator.truncate_message(m));
            compacted = assemble(&system, summary.as_ref(), &kept);
        }

        let new_tokens = self.estimate_tokens(&compacted);
        let over_budget = new_tokens > threshold;
        if over_budget {
            warn!(
                "History still over budget after compaction: {new_tokens} > {threshold} tokens"
            );
        }

        info!(
            "Compacted history ({path:?}): {original_count} -> {} messages, {original_tokens} -> {new_tokens} tokens",
            compacted.len()
        );

        CompactionResult {
            new_count: compacted.len(),
            messages: compacted,
            path,
            original_count,
            original_tokens,
            new_tokens,
            emergency_truncated,
            over_budget,
        }
    }
}
