//! Token estimation for context size calculation.

use crate::llm::{Content, Message};
use log::warn;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tiktoken_rs::CoreBPE;

/// Counts tokens in a piece of text.
///
/// Uses the `cl100k_base` encoding when it can be loaded and falls back to a
/// four-characters-per-token heuristic otherwise. Loading the encoding is
/// expensive, so share one instance through [`TokenCounter::shared`].
pub enum TokenCounter {
    Bpe(CoreBPE),
    CharHeuristic,
}

impl TokenCounter {
    /// Characters per token for the heuristic fallback.
    const CHARS_PER_TOKEN: usize = 4;

    /// Load the BPE encoding, falling back to the heuristic on failure.
    #[must_use]
    pub fn load() -> Self {
        match tiktoken_rs::cl100k_base() {
            Ok(bpe) => Self::Bpe(bpe),
            Err(e) => {
                warn!("Tokenizer unavailable, using character heuristic: {e}");
                Self::CharHeuristic
            }
        }
    }

    /// Process-wide counter, loaded on first use.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        static SHARED: OnceLock<Arc<TokenCounter>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(Self::load())))
    }

    #[must_use]
    pub fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        match self {
            Self::Bpe(bpe) => bpe.encode_with_special_tokens(text).len(),
            Self::CharHeuristic => text.chars().count() / Self::CHARS_PER_TOKEN,
        }
    }
}

impl fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bpe(_) => f.write_str("TokenCounter::Bpe(cl100k_base)"),
            Self::CharHeuristic => f.write_str("TokenCounter::CharHeuristic"),
        }
    }
}

/// Estimates token count for messages.
///
/// Each message costs a fixed overhead plus the tokens of its text, of each
/// tool call's name and arguments, and of its tool call id.
#[derive(Clone, Debug)]
pub struct TokenEstimator {
    counter: Arc<TokenCounter>,
}

impl TokenEstimator {
    /// Overhead tokens per message (role, formatting).
    const MESSAGE_OVERHEAD: usize = 4;

    #[must_use]
    pub const fn new(counter: Arc<TokenCounter>) -> Self {
        Self { counter }
    }

    /// Estimator that never touches the BPE encoding.
    #[must_use]
    pub fn heuristic() -> Self {
        Self::new(Arc::new(TokenCounter::CharHeuristic))
    }

    #[must_use]
    pub fn estimate_text(&self, text: &str) -> usize {
        self.counter.count(text)
    }

    /// Estimate tokens for a single message.
    #[must_use]
    pub fn estimate_message(&self, message: &Message) -> usize {
        let mut tokens = Self::MESSAGE_OVERHEAD;

        match &message.content {
            Some(Content::Text(text)) => tokens += self.estimate_text(text),
            Some(Content::Parts(parts)) => {
                tokens += parts
                    .iter()
                    .filter_map(|p| p.text())
                    .map(|t| self.estimate_text(t))
                    .sum::<usize>();
            }
            None => {}
        }

        for call in &message.tool_calls {
            tokens += self.estimate_text(&call.name);
            tokens += self.estimate_text(&call.arguments_text());
        }

        if let Some(id) = &message.tool_call_id {
            tokens += self.estimate_text(id);
        }

        tokens
    }

    /// Estimate total tokens for a message history.
    #[must_use]
    pub fn estimate(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.estimate_message(m)).sum()
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new(TokenCounter::shared())
    }
}
