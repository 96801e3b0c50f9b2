//! Routes model tool calls to local tools and remote tool providers.
//!
//! The dispatcher owns the tool catalog shown to the model. Executing a call
//! never fails from the caller's point of view: unknown tools, bad arguments
//! and handler errors all come back as text the model can read.

mod args;
mod middleware;

pub use args::{ArgumentParseError, parse_arguments};
pub use middleware::{
    DispatchCall, EnsureServiceRunning, MiddlewareAction, RerouteTool, ToolMiddleware,
};

use crate::llm::{ToolCall, ToolSpec};
use crate::provider::{Capability, ToolProvider};
use crate::tools::{Interrupted, Tool, ToolOutput, ToolRegistry};
use anyhow::Result;
use log::{debug, error, info, warn};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Output recorded when a tool call is cancelled mid-flight.
pub const CANCELLED_OUTPUT: &str = "Tool execution cancelled by user";

const LOG_PREVIEW_CHARS: usize = 200;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolStatus {
    Completed,
    NotFound,
    Failed(String),
    Cancelled,
}

/// The text recorded for a tool call plus how it ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolOutcome {
    pub output: String,
    pub status: ToolStatus,
}

impl ToolOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Completed
    }
}

struct RemoteCapability {
    capability: Capability,
    provider: Arc<dyn ToolProvider>,
}

#[derive(Default)]
pub struct ToolDispatcher {
    local: ToolRegistry,
    remote: HashMap<String, RemoteCapability>,
    remote_order: Vec<String>,
    middleware: HashMap<String, Vec<Arc<dyn ToolMiddleware>>>,
}

impl ToolDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_tools(local: ToolRegistry) -> Self {
        Self {
            local,
            ..Self::default()
        }
    }

    pub fn register_tool<T>(&mut self, tool: T) -> &mut Self
    where
        T: Tool + 'static,
    {
        self.local.register(tool);
        self
    }

    /// List a provider's capabilities and add them to the catalog.
    ///
    /// At most `max_tools` capabilities are taken. A provider that fails to
    /// list is logged and skipped. Returns the number of capabilities added.
    pub async fn register_provider(
        &mut self,
        provider: Arc<dyn ToolProvider>,
        max_tools: Option<usize>,
    ) -> usize {
        let identifier = provider.identifier().to_string();
        let mut capabilities = match provider.list_capabilities().await {
            Ok(capabilities) => capabilities,
            Err(err) => {
                error!("Failed to list tools from {identifier}: {err:#}");
                return 0;
            }
        };
        if let Some(limit) = max_tools {
            if capabilities.len() > limit {
                warn!(
                    "{identifier} offers {} tools, keeping the first {limit}",
                    capabilities.len()
                );
                capabilities.truncate(limit);
            }
        }

        let mut added = 0;
        let mut schema_bytes = 0;
        for capability in capabilities {
            if self.local.contains(&capability.name) {
                warn!(
                    "Remote tool {} from {identifier} is shadowed by a local tool",
                    capability.name
                );
                continue;
            }
            schema_bytes += serde_json::to_string(&capability.parameters).map_or(0, |s| s.len());
            let name = capability.name.clone();
            let previous = self.remote.insert(
                name.clone(),
                RemoteCapability {
                    capability,
                    provider: Arc::clone(&provider),
                },
            );
            if previous.is_some() {
                warn!("Remote tool {name} re-registered by {identifier}");
            } else {
                self.remote_order.push(name);
            }
            added += 1;
        }

        info!("Registered {added} tools from {identifier} ({schema_bytes} bytes of schema)");
        added
    }

    /// Attach a middleware that runs before every call to `tool_name`.
    /// Middleware for the same tool run in the order they were added.
    pub fn add_middleware<M>(&mut self, tool_name: impl Into<String>, middleware: M) -> &mut Self
    where
        M: ToolMiddleware + 'static,
    {
        self.middleware
            .entry(tool_name.into())
            .or_default()
            .push(Arc::new(middleware));
        self
    }

    #[must_use]
    pub fn has_tool(&self, name: &str) -> bool {
        self.local.contains(name) || self.remote.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.local.len() + self.remote.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.remote.is_empty()
    }

    /// The catalog offered to the model: local tools by name, then remote
    /// tools in registration order.
    #[must_use]
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs = self.local.specs();
        specs.extend(
            self.remote_order
                .iter()
                .filter_map(|name| self.remote.get(name))
                .map(|remote| remote.capability.to_spec()),
        );
        specs
    }

    /// Run a tool directly, skipping middleware. `Ok(None)` means no tool
    /// with that name is registered.
    ///
    /// # Errors
    /// Returns the handler's error unchanged.
    pub async fn invoke(&self, name: &str, args: Map<String, Value>) -> Result<Option<ToolOutput>> {
        if let Some(tool) = self.local.get(name) {
            return tool.execute(args).await.map(Some);
        }
        if let Some(remote) = self.remote.get(name) {
            return remote
                .provider
                .invoke(name, args)
                .await
                .map(|text| Some(ToolOutput::Text(text)));
        }
        Ok(None)
    }

    /// Execute a call and return the text to record as its result.
    pub async fn execute(&self, name: &str, raw_args: &Value) -> String {
        self.dispatch(name, raw_args, &CancellationToken::new())
            .await
            .output
    }

    /// Execute a model tool call, giving up when `cancel` fires.
    pub async fn run(&self, call: &ToolCall, cancel: &CancellationToken) -> ToolOutcome {
        self.dispatch(&call.name, &call.arguments, cancel).await
    }

    async fn dispatch(&self, name: &str, raw_args: &Value, cancel: &CancellationToken) -> ToolOutcome {
        let args = parse_arguments(raw_args).unwrap_or_else(|err| {
            error!("Failed to parse arguments for {name}: {err}");
            Map::new()
        });
        debug!(
            "Executing {name} with {}",
            preview(&Value::Object(args.clone()).to_string())
        );

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Interrupted.into()),
            result = self.run_with_middleware(name, args) => result,
        };

        match result {
            Ok(Some(output)) => {
                let output = output.into_text();
                debug!("{name} returned {}", preview(&output));
                ToolOutcome {
                    output,
                    status: ToolStatus::Completed,
                }
            }
            Ok(None) => {
                warn!("Unknown tool requested: {name}");
                ToolOutcome {
                    output: String::new(),
                    status: ToolStatus::NotFound,
                }
            }
            Err(err) if err.is::<Interrupted>() || cancel.is_cancelled() => {
                warn!("Tool {name} cancelled");
                ToolOutcome {
                    output: CANCELLED_OUTPUT.to_string(),
                    status: ToolStatus::Cancelled,
                }
            }
            Err(err) => {
                error!("Tool {name} failed: {err:#}");
                let message = format!("{err:#}");
                ToolOutcome {
                    output: format!("Error: {message}"),
                    status: ToolStatus::Failed(message),
                }
            }
        }
    }

    async fn run_with_middleware(
        &self,
        name: &str,
        args: Map<String, Value>,
    ) -> Result<Option<ToolOutput>> {
        let mut call = DispatchCall {
            name: name.to_string(),
            args,
        };
        if let Some(chain) = self.middleware.get(name) {
            for middleware in chain {
                match middleware.before(self, call).await? {
                    MiddlewareAction::Continue(next) => call = next,
                    MiddlewareAction::Respond(output) => return Ok(Some(output)),
                }
            }
        }
        self.invoke(&call.name, call.args).await
    }
}

impl fmt::Debug for ToolDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDispatcher")
            .field("local", &self.local)
            .field("remote", &self.remote_order)
            .field("middleware", &self.middleware.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() <= LOG_PREVIEW_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(LOG_PREVIEW_CHARS).collect();
    format!("{head}...")
}
