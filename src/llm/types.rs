use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;

/// Who produced a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Content {
    /// All text carried by this content, parts joined with newlines.
    #[must_use]
    pub fn joined_text(&self) -> Cow<'_, str> {
        match self {
            Self::Text(text) => Cow::Borrowed(text),
            Self::Parts(parts) => Cow::Owned(
                parts
                    .iter()
                    .filter_map(ContentPart::text)
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Parts(parts) => parts.iter().all(|p| p.text().is_none_or(str::is_empty)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { url: String },
}

impl ContentPart {
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::ImageUrl { .. } => None,
        }
    }
}

/// A tool invocation requested by the model.
///
/// `arguments` is kept as the model sent it: usually a string holding JSON,
/// sometimes an already-decoded object, sometimes nothing at all. Decoding
/// happens once, at the dispatcher boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// The arguments in their wire (text) form.
    #[must_use]
    pub fn arguments_text(&self) -> Cow<'_, str> {
        match &self.arguments {
            Value::Null => Cow::Borrowed(""),
            Value::String(raw) => Cow::Borrowed(raw),
            other => Cow::Owned(other.to_string()),
        }
    }
}

/// One entry of a conversation.
///
/// `tool_calls` is only non-empty on assistant messages that request tool
/// execution; `tool_call_id` and `tool_name` are only set on tool-role
/// messages and point back at the call they answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl Message {
    fn with_role(role: Role, text: String) -> Self {
        Self {
            role,
            content: Some(Content::Text(text)),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }

    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::with_role(Role::System, text.into())
    }

    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role(Role::User, text.into())
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, text.into())
    }

    /// The synthetic assistant turn that carries tool calls and no text.
    #[must_use]
    pub const fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            tool_calls,
            tool_call_id: None,
            tool_name: None,
        }
    }

    #[must_use]
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: Some(Content::Text(content.into())),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
            tool_name: Some(tool_name.into()),
        }
    }

    /// Plain-text content, if the message carries a single text body.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            Some(Content::Text(text)) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Copy of this message with its text body replaced; linkage fields are kept.
    #[must_use]
    pub fn with_text(&self, text: String) -> Self {
        Self {
            content: Some(Content::Text(text)),
            ..self.clone()
        }
    }
}

/// Tool definition offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub messages: Vec<Message>,
    /// `None` when tools must not be offered.
    pub tools: Option<Vec<ToolSpec>>,
    pub max_tokens: Option<u32>,
}

impl GenerateRequest {
    #[must_use]
    pub const fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            tools: None,
            max_tokens: None,
        }
    }

    #[must_use]
    pub fn with_tools(mut self, tools: Option<Vec<ToolSpec>>) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<FinishReason>,
}

impl GenerateResponse {
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            finish_reason: Some(FinishReason::Stop),
        }
    }

    #[must_use]
    pub const fn tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls,
            finish_reason: Some(FinishReason::ToolCalls),
        }
    }

    /// Text content, treating an empty string the same as no content.
    #[must_use]
    pub fn non_empty_content(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.is_empty())
    }
}
