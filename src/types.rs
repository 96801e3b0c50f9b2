//! Core types for the agent.
//!
//! - [`AgentConfig`]: Configuration for the turn orchestrator
//! - [`AgentError`]: Errors that end an orchestrator invocation
//! - [`Conversation`]: The message sequence one invocation owns

use crate::context::CompactionConfig;
use crate::llm::Message;
use std::env;
use std::str::FromStr;

/// An ordered, append-mostly message sequence owned by one invocation.
pub type Conversation = Vec<Message>;

const ENV_MAX_ITERATIONS: &str = "RAGOPS_MAX_ITERATIONS";
const ENV_HISTORY_TOKEN_THRESHOLD: &str = "RAGOPS_HISTORY_TOKEN_THRESHOLD";
const ENV_KEEP_RECENT_TURNS: &str = "RAGOPS_KEEP_RECENT_TURNS";
const ENV_KEEP_RECENT_TOOL_PAIRS: &str = "RAGOPS_KEEP_RECENT_TOOL_PAIRS";

/// Configuration for the turn orchestrator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentConfig {
    /// Maximum number of generation requests per invocation
    pub max_iterations: usize,
    /// Maximum tokens per response
    pub max_tokens: u32,
    /// Capacity of the streaming event channel
    pub event_buffer: usize,
    /// Compact the conversation before every generation request when set
    pub compaction: Option<CompactionConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            max_tokens: 4096,
            event_buffer: 100,
            compaction: None,
        }
    }
}

impl AgentConfig {
    #[must_use]
    pub const fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    #[must_use]
    pub const fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer;
        self
    }

    #[must_use]
    pub fn with_compaction(mut self, compaction: CompactionConfig) -> Self {
        self.compaction = Some(compaction);
        self
    }

    /// Defaults overridden by `RAGOPS_*` environment variables.
    ///
    /// Setting any of the history variables turns compaction on.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] when a variable is set but does not
    /// parse as a number.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(max_iterations) = parse_var(&lookup, ENV_MAX_ITERATIONS)? {
            config.max_iterations = max_iterations;
        }

        let threshold = parse_var(&lookup, ENV_HISTORY_TOKEN_THRESHOLD)?;
        let keep_turns = parse_var(&lookup, ENV_KEEP_RECENT_TURNS)?;
        let keep_pairs = parse_var(&lookup, ENV_KEEP_RECENT_TOOL_PAIRS)?;
        if threshold.is_some() || keep_turns.is_some() || keep_pairs.is_some() {
            let mut compaction = CompactionConfig::default();
            if let Some(threshold) = threshold {
                compaction = compaction.with_threshold_tokens(threshold);
            }
            if let Some(turns) = keep_turns {
                compaction = compaction.with_keep_recent_turns(turns);
            }
            if let Some(pairs) = keep_pairs {
                compaction = compaction.with_keep_recent_tool_pairs(pairs);
            }
            config.compaction = Some(compaction);
        }
        Ok(config)
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse().map(Some).map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_string(),
    })
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Why an orchestrator invocation ended without an answer.
///
/// Tool failures never show up here; they are recorded in the conversation
/// as tool results.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// The session was cancelled.
    #[error("session cancelled")]
    Cancelled,
    /// The model provider failed to produce a response.
    #[error("model provider failed: {0}")]
    Provider(String),
    /// The streaming task panicked or was aborted.
    #[error("agent task failed: {0}")]
    TaskFailed(String),
}

impl AgentError {
    pub(crate) fn provider(err: &anyhow::Error) -> Self {
        Self::Provider(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() -> anyhow::Result<()> {
        let config = AgentConfig::from_lookup(lookup(&[]))?;
        assert_eq!(config, AgentConfig::default());
        assert_eq!(config.max_iterations, 500);
        assert!(config.compaction.is_none());
        Ok(())
    }

    #[test]
    fn test_env_overrides() -> anyhow::Result<()> {
        let config = AgentConfig::from_lookup(lookup(&[
            (ENV_MAX_ITERATIONS, "12"),
            (ENV_HISTORY_TOKEN_THRESHOLD, "80000"),
            (ENV_KEEP_RECENT_TOOL_PAIRS, " 5 "),
        ]))?;
        assert_eq!(config.max_iterations, 12);
        let compaction = config.compaction.expect("compaction enabled");
        assert_eq!(compaction.threshold_tokens, 80_000);
        assert_eq!(compaction.keep_recent_tool_pairs, 5);
        assert_eq!(compaction.keep_recent_turns, 1);
        Ok(())
    }

    #[test]
    fn test_invalid_env_value() {
        let err = AgentConfig::from_lookup(lookup(&[(ENV_KEEP_RECENT_TURNS, "two")]))
            .expect_err("should fail");
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: ENV_KEEP_RECENT_TURNS,
                value: "two".to_string()
            }
        );
        assert_eq!(
            err.to_string(),
            "invalid value for RAGOPS_KEEP_RECENT_TURNS: \"two\""
        );
    }

    #[test]
    fn test_blank_env_value_is_ignored() -> anyhow::Result<()> {
        let config = AgentConfig::from_lookup(lookup(&[(ENV_MAX_ITERATIONS, "")]))?;
        assert_eq!(config.max_iterations, 500);
        Ok(())
    }
}
