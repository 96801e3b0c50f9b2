//! Local tool definition and registry.
//!
//! Local tools run in-process. This module provides:
//!
//! - [`Tool`] trait - Define custom tools the model can call
//! - [`FnTool`] - A tool backed by a plain function or closure
//! - [`ToolOutput`] - Text or structured value returned by a tool
//! - [`Interrupted`] - Error a tool returns when it was stopped by the user
//! - [`ToolRegistry`] - Collection of available local tools
//!
//! # Implementing a Tool
//!
//! ```ignore
//! use ragops_agent::tools::{Tool, ToolOutput};
//!
//! struct ListProjects;
//!
//! // No #[async_trait] needed - Rust 1.75+ supports native async traits
//! impl Tool for ListProjects {
//!     fn name(&self) -> &str { "list_projects" }
//!     fn description(&self) -> &str { "List known RAG projects" }
//!     fn parameters(&self) -> Value { json!({ "type": "object" }) }
//!
//!     async fn execute(&self, args: Map<String, Value>) -> Result<ToolOutput> {
//!         Ok(json!(["docs", "support"]).into())
//!     }
//! }
//! ```

use crate::llm::ToolSpec;
use anyhow::Result;
use async_trait::async_trait;
use log::warn;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// What a tool hands back: plain text, or a value to be serialized as JSON.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolOutput {
    Text(String),
    Json(Value),
}

impl ToolOutput {
    /// Render the output as the text placed in the conversation.
    #[must_use]
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Json(Value::String(text)) => text,
            Self::Json(value) => serde_json::to_string(&value).unwrap_or_else(|e| {
                warn!("Failed to serialize tool output, using display form: {e}");
                value.to_string()
            }),
        }
    }
}

impl From<String> for ToolOutput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for ToolOutput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// Returned by a tool whose work was interrupted by the user.
///
/// The dispatcher reports it as a cancellation rather than a failure.
#[derive(Debug, Clone, Copy, Default, thiserror::Error)]
#[error("tool execution interrupted")]
pub struct Interrupted;

/// Definition of a local tool the model can call.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Human-readable description of what the tool does.
    fn description(&self) -> &str;

    /// JSON schema for the tool's arguments.
    fn parameters(&self) -> Value;

    /// Execute the tool with already-decoded arguments.
    ///
    /// # Errors
    /// Returns an error if tool execution fails. Return [`Interrupted`] when
    /// the work was stopped on user request.
    fn execute(&self, args: Map<String, Value>) -> impl Future<Output = Result<ToolOutput>> + Send;
}

/// Type-erased tool trait for registry storage.
#[async_trait]
pub trait ErasedTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value;
    async fn execute(&self, args: Map<String, Value>) -> Result<ToolOutput>;
}

struct ToolWrapper<T: Tool> {
    inner: T,
}

#[async_trait]
impl<T: Tool + 'static> ErasedTool for ToolWrapper<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn parameters(&self) -> Value {
        self.inner.parameters()
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<ToolOutput> {
        self.inner.execute(args).await
    }
}

type Handler = dyn Fn(Map<String, Value>) -> Result<ToolOutput> + Send + Sync;

/// A tool backed by a synchronous function.
///
/// The handler runs on the blocking thread pool.
///
/// ```ignore
/// let tool = FnTool::new("echo", "Echo the input back", json!({"type": "object"}), |args| {
///     Ok(Value::Object(args).into())
/// });
/// ```
#[derive(Clone)]
pub struct FnTool {
    name: String,
    description: String,
    parameters: Value,
    handler: Arc<Handler>,
}

impl FnTool {
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Map<String, Value>) -> Result<ToolOutput> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(handler),
        }
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<ToolOutput> {
        let handler = Arc::clone(&self.handler);
        tokio::task::spawn_blocking(move || handler(args)).await?
    }
}

/// Registry of local tools, keyed by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ErasedTool>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; a tool with the same name is replaced.
    pub fn register<T>(&mut self, tool: T) -> &mut Self
    where
        T: Tool + 'static,
    {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(ToolWrapper { inner: tool }));
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ErasedTool>> {
        self.tools.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn ErasedTool>> {
        self.tools.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Removes tools for which the predicate returns false.
    pub fn filter<F>(&mut self, predicate: F)
    where
        F: Fn(&str) -> bool,
    {
        self.tools.retain(|name, _| predicate(name));
    }

    /// Tool definitions for the model, sorted by name.
    #[must_use]
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<_> = self
            .tools
            .values()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.tools.keys().collect();
        names.sort();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct MockTool;

    impl Tool for MockTool {
        fn name(&self) -> &'static str {
            "mock_tool"
        }

        fn description(&self) -> &'static str {
            "A mock tool for testing"
        }

        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string" }
                }
            })
        }

        async fn execute(&self, args: Map<String, Value>) -> Result<ToolOutput> {
            let message = args
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("no message");
            Ok(format!("Received: {message}").into())
        }
    }

    fn another_tool() -> FnTool {
        FnTool::new("another_tool", "Another tool", json!({"type": "object"}), |_| {
            Ok("Done".into())
        })
    }

    #[test]
    fn test_tool_registry() {
        let mut registry = ToolRegistry::new();
        registry.register(MockTool);

        assert_eq!(registry.len(), 1);
        assert!(registry.get("mock_tool").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn test_specs_sorted_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(MockTool).register(another_tool());

        let specs = registry.specs();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "another_tool");
        assert_eq!(specs[1].name, "mock_tool");
        assert_eq!(specs[1].parameters["properties"]["message"]["type"], "string");
    }

    #[test]
    fn test_filter_tools() {
        let mut registry = ToolRegistry::new();
        registry.register(MockTool).register(another_tool());

        registry.filter(|name| name != "mock_tool");

        assert_eq!(registry.len(), 1);
        assert!(!registry.contains("mock_tool"));
        assert!(registry.contains("another_tool"));
    }

    #[tokio::test]
    async fn test_execute_through_registry() -> Result<()> {
        let mut registry = ToolRegistry::new();
        registry.register(MockTool);

        let mut args = Map::new();
        args.insert("message".to_string(), json!("hi"));
        let tool = registry.get("mock_tool").expect("registered");
        let output = tool.execute(args).await?;
        assert_eq!(output, ToolOutput::Text("Received: hi".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_fn_tool_receives_args() -> Result<()> {
        let tool = FnTool::new("echo", "Echo", json!({"type": "object"}), |args| {
            Ok(Value::Object(args).into())
        });
        let mut args = Map::new();
        args.insert("a".to_string(), json!(1));
        let output = tool.execute(args).await?;
        assert_eq!(output.into_text(), r#"{"a":1}"#);
        Ok(())
    }

    #[test]
    fn test_output_rendering() {
        assert_eq!(ToolOutput::from("plain").into_text(), "plain");
        assert_eq!(ToolOutput::from(json!("quoted")).into_text(), "quoted");
        assert_eq!(
            ToolOutput::from(json!({"status": "ok", "count": 2})).into_text(),
            r#"{"count":2,"status":"ok"}"#
        );
        assert_eq!(ToolOutput::from(json!(null)).into_text(), "null");
    }

    #[test]
    fn test_interrupted_downcasts() {
        let err: anyhow::Error = Interrupted.into();
        assert!(err.is::<Interrupted>());
    }
}
