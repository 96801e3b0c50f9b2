//! Configuration for context compaction.

use serde::{Deserialize, Serialize};

/// Configuration for context compaction.
///
/// Controls when compaction triggers and how much of the recent history is
/// kept verbatim.
///
/// # Example
///
/// ```
/// use ragops_agent::context::CompactionConfig;
///
/// let config = CompactionConfig::default()
///     .with_threshold_tokens(100_000)
///     .with_keep_recent_tool_pairs(5);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Estimated token count above which history is compacted.
    /// Default: 150,000
    pub threshold_tokens: usize,

    /// Number of most recent user turns kept out of the summary.
    /// Values below 1 are treated as 1.
    /// Default: 1
    pub keep_recent_turns: usize,

    /// Number of tool call/result pairs kept verbatim inside the kept turns.
    /// Older pairs are folded into a digest.
    /// Default: 3
    pub keep_recent_tool_pairs: usize,

    /// Per-message character cap applied when compaction alone is not enough.
    /// Default: 4,000
    pub emergency_max_chars: usize,

    /// Tool results longer than this are shortened before summarization.
    /// Default: 500
    pub tool_result_summary_chars: usize,

    /// Length of each tool result preview in the compressed tool digest.
    /// Default: 200
    pub digest_preview_chars: usize,

    /// Whether the agent compacts on its own before each generation.
    /// Default: true
    pub auto_compact: bool,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            threshold_tokens: 150_000,
            keep_recent_turns: 1,
            keep_recent_tool_pairs: 3,
            emergency_max_chars: 4_000,
            tool_result_summary_chars: 500,
            digest_preview_chars: 200,
            auto_compact: true,
        }
    }
}

impl CompactionConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_threshold_tokens(mut self, threshold: usize) -> Self {
        self.threshold_tokens = threshold;
        self
    }

    #[must_use]
    pub const fn with_keep_recent_turns(mut self, turns: usize) -> Self {
        self.keep_recent_turns = turns;
        self
    }

    #[must_use]
    pub const fn with_keep_recent_tool_pairs(mut self, pairs: usize) -> Self {
        self.keep_recent_tool_pairs = pairs;
        self
    }

    #[must_use]
    pub const fn with_emergency_max_chars(mut self, chars: usize) -> Self {
        self.emergency_max_chars = chars;
        self
    }

    #[must_use]
    pub const fn with_tool_result_summary_chars(mut self, chars: usize) -> Self {
        self.tool_result_summary_chars = chars;
        self
    }

    #[must_use]
    pub const fn with_digest_preview_chars(mut self, chars: usize) -> Self {
        self.digest_preview_chars = chars;
        self
    }

    /// Set whether to auto-compact.
    #[must_use]
    pub const fn with_auto_compact(mut self, auto: bool) -> Self {
        self.auto_compact = auto;
        self
    }

    /// Kept turn count, never below one.
    #[must_use]
    pub const fn effective_keep_recent_turns(&self) -> usize {
        if self.keep_recent_turns == 0 {
            1
        } else {
            self.keep_recent_turns
        }
    }
}
