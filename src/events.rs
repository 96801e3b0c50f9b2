//! Events emitted while a streamed response is being produced.
//!
//! A streamed turn yields, in order:
//! 1. `Content` for each non-empty text delta from the model
//! 2. `ToolCallStart` before each tool call is dispatched
//! 3. `ToolCallEnd` after it completes, or `ToolCallError` if it failed
//!
//! The stream ends when the model answers without tool calls, the iteration
//! budget runs out, or the session is cancelled.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A text delta from the model.
    Content { text: String },

    /// A tool is about to run with the decoded arguments.
    ToolCallStart {
        name: String,
        args: Map<String, Value>,
    },

    /// Tool finished; its result is now in the conversation.
    ToolCallEnd { name: String },

    /// Tool failed; the conversation holds the error text as its result.
    ToolCallError { name: String, error: String },
}

impl StreamEvent {
    #[must_use]
    pub fn content(text: impl Into<String>) -> Self {
        Self::Content { text: text.into() }
    }

    #[must_use]
    pub fn tool_call_start(name: impl Into<String>, args: Map<String, Value>) -> Self {
        Self::ToolCallStart {
            name: name.into(),
            args,
        }
    }

    #[must_use]
    pub fn tool_call_end(name: impl Into<String>) -> Self {
        Self::ToolCallEnd { name: name.into() }
    }

    #[must_use]
    pub fn tool_call_error(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self::ToolCallError {
            name: name.into(),
            error: error.into(),
        }
    }

    /// Name of the tool this event refers to, if any.
    #[must_use]
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            Self::Content { .. } => None,
            Self::ToolCallStart { name, .. }
            | Self::ToolCallEnd { name }
            | Self::ToolCallError { name, .. } => Some(name),
        }
    }
}
