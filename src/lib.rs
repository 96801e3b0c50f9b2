//! RAG ops agent core - a tool-calling turn orchestrator with context compaction.
//!
//! This crate provides the pieces needed to run long, tool-heavy LLM sessions:
//! - A bounded generate/dispatch loop, with a streaming variant
//! - A tool dispatcher over local tools and MCP servers
//! - Tiered context compaction that keeps the conversation under a token budget
//! - Provider-agnostic LLM interface
//!
//! # Example
//!
//! ```ignore
//! use ragops_agent::{Agent, AgentConfig, McpClient, McpServerConfig, Message, ToolDispatcher};
//! use std::sync::Arc;
//!
//! let mut dispatcher = ToolDispatcher::new();
//! let planner = Arc::new(McpClient::new(McpServerConfig::new("ragops-planner-server")));
//! dispatcher.register_provider(planner, None).await;
//!
//! let agent = Agent::builder()
//!     .provider(my_provider)
//!     .dispatcher(dispatcher)
//!     .config(AgentConfig::from_env()?)
//!     .build();
//!
//! let mut stream = agent.respond_stream(vec![Message::user("Build a RAG pipeline")]);
//! while let Some(event) = stream.recv().await {
//!     println!("{event:?}");
//! }
//! let conversation = stream.finish().await?;
//! ```

#![forbid(unsafe_code)]

mod agent;
pub mod context;
pub mod dispatcher;
mod events;
pub mod llm;
pub mod mcp;
pub mod provider;
pub mod tools;
mod types;

pub use agent::{Agent, AgentBuilder, CancelHandle, ResponseStream};
pub use context::{CompactionConfig, ContextCompactor, TieredCompactor, TokenEstimator};
pub use dispatcher::{ToolDispatcher, ToolOutcome, ToolStatus};
pub use events::StreamEvent;
pub use llm::{Message, ModelProvider, Role, ToolCall, ToolSpec};
pub use mcp::{McpClient, McpServerConfig};
pub use provider::{Capability, ToolProvider, empty_object_schema};
pub use tools::{FnTool, Interrupted, Tool, ToolOutput, ToolRegistry};
pub use types::{AgentConfig, AgentError, ConfigError, Conversation};
