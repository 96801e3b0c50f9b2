//! Context compaction for long-running conversations.
//!
//! Tool-heavy sessions grow quickly: a single user request can trigger dozens
//! of tool calls with large results. Before each generation the agent checks
//! the estimated size of the history and, above the threshold, rewrites it.
//!
//! # Overview
//!
//! Compaction works in tiers:
//! 1. System messages are set aside and always kept, in order
//! 2. The most recent user turn(s) are kept; anything older is summarized
//!    by the model (or replaced by a fixed notice if that fails)
//! 3. Inside the kept turns, all but the last few tool call/result pairs are
//!    folded into a compact digest
//! 4. If the result is still too large, each message is truncated to a fixed
//!    character budget, keeping its head and tail
//!
//! # Example
//!
//! ```ignore
//! use ragops_agent::{Agent, AgentConfig, context::CompactionConfig};
//!
//! let agent = Agent::builder()
//!     .provider(my_provider)
//!     .config(AgentConfig::default().with_compaction(CompactionConfig::default()))
//!     .build();
//! ```

mod compactor;
mod config;
mod estimator;
pub mod segment;
mod truncate;

pub use compactor::{
    CompactionPath, CompactionResult, ContextCompactor, FALLBACK_TRUNCATION_NOTICE,
    HISTORY_SUMMARY_PROMPT, SUMMARY_CLOSE, SUMMARY_OPEN, TieredCompactor,
};
pub use config::CompactionConfig;
pub use estimator::{TokenCounter, TokenEstimator};
pub use truncate::EmergencyTruncator;
