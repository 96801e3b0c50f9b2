//! Remote tool providers.
//!
//! A [`ToolProvider`] exposes named capabilities that live outside the
//! process, typically behind an MCP server. The dispatcher lists them once at
//! registration and invokes them by name afterwards.

use crate::llm::ToolSpec;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::future::Future;
use std::time::Duration;

/// A remotely hosted tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema for the arguments; always an object schema.
    pub parameters: Value,
}

impl Capability {
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    #[must_use]
    pub fn to_spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// Schema used when a capability declares none.
#[must_use]
pub fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}, "required": []})
}

#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Stable identifier used in logs.
    fn identifier(&self) -> &str;

    /// # Errors
    /// Returns an error if the provider cannot be reached.
    async fn list_capabilities(&self) -> Result<Vec<Capability>>;

    /// Invoke a capability and return its result as text.
    ///
    /// # Errors
    /// Returns an error if the call fails or the capability reports an error.
    async fn invoke(&self, name: &str, arguments: Map<String, Value>) -> Result<String>;

    /// Open a long-lived session. Providers without sessions do nothing.
    ///
    /// # Errors
    /// Returns an error if the session cannot be established.
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    /// Close the long-lived session, if any.
    ///
    /// # Errors
    /// Returns an error if the session could not be shut down cleanly.
    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    /// Upper bound for blocking calls.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// [`list_capabilities`](ToolProvider::list_capabilities) for callers
    /// outside any async runtime.
    ///
    /// # Errors
    /// Returns an error if called from within a runtime, on timeout, or if
    /// the underlying call fails.
    fn list_capabilities_blocking(&self) -> Result<Vec<Capability>> {
        block_on(self.timeout(), self.list_capabilities())
    }

    /// [`invoke`](ToolProvider::invoke) for callers outside any async runtime.
    ///
    /// # Errors
    /// Returns an error if called from within a runtime, on timeout, or if
    /// the underlying call fails.
    fn invoke_blocking(&self, name: &str, arguments: Map<String, Value>) -> Result<String> {
        block_on(self.timeout(), self.invoke(name, arguments))
    }
}

fn block_on<T>(timeout: Option<Duration>, fut: impl Future<Output = Result<T>>) -> Result<T> {
    if tokio::runtime::Handle::try_current().is_ok() {
        bail!("blocking provider call made from inside an async runtime; use the async method");
    }
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime for blocking provider call")?;

    runtime.block_on(async move {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .with_context(|| format!("Provider call timed out after {limit:?}"))?,
            None => fut.await,
        }
    })
}
