//! Model Context Protocol (MCP) client support.
//!
//! Remote capabilities are served by MCP servers launched as subprocesses
//! and spoken to over stdio. This module provides:
//!
//! - [`McpClient`] - A [`ToolProvider`](crate::provider::ToolProvider) backed
//!   by one MCP server, with persistent and one-shot connection modes
//! - [`McpServerConfig`] - How to launch a server, and its environment
//! - [`McpTransport`] / [`McpConnector`] - Transport seam, with
//!   [`StdioTransport`] as the subprocess implementation
//!
//! # Example
//!
//! ```ignore
//! use ragops_agent::mcp::{McpClient, McpServerConfig};
//! use ragops_agent::ToolDispatcher;
//! use std::sync::Arc;
//!
//! let client = Arc::new(McpClient::new(
//!     McpServerConfig::new("uvx").with_args(["donkit-ragops-mcp"]),
//! ));
//! client.connect().await?;
//!
//! let mut dispatcher = ToolDispatcher::new();
//! dispatcher.register_provider(client, None).await;
//! ```
//!
//! # MCP Protocol
//!
//! Supports protocol version 2024-11-05: JSON-RPC 2.0 framing, the
//! initialization handshake, `tools/list` and `tools/call`.

pub mod client;
pub mod config;
pub mod protocol;
pub mod transport;

pub use client::{McpClient, extract_text, normalize_schema};
pub use config::McpServerConfig;
pub use protocol::{McpContent, McpToolCallResult, McpToolDefinition};
pub use transport::{McpConnector, McpTransport, StdioConnector, StdioTransport, TransportClosed};
