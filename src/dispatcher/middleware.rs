//! Pre-dispatch hooks keyed by tool name.
//!
//! A middleware runs before the tool it is registered for. It can start
//! something the tool depends on, send the call to a different tool, or
//! answer on the tool's behalf.

use super::ToolDispatcher;
use crate::tools::ToolOutput;
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// The call as it will be resolved after middleware ran.
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchCall {
    pub name: String,
    pub args: Map<String, Value>,
}

#[derive(Debug)]
pub enum MiddlewareAction {
    /// Keep going with this (possibly rewritten) call.
    Continue(DispatchCall),
    /// Skip the tool and use this output.
    Respond(ToolOutput),
}

#[async_trait]
pub trait ToolMiddleware: Send + Sync {
    /// # Errors
    /// An error fails the tool call; it is reported like a handler error.
    async fn before(&self, dispatcher: &ToolDispatcher, call: DispatchCall)
    -> Result<MiddlewareAction>;
}

type ContextFn = dyn Fn() -> Option<Map<String, Value>> + Send + Sync;
type EnabledFn = dyn Fn() -> bool + Send + Sync;

/// Make sure a backing service is up before a tool that needs it runs.
///
/// Queries `status_tool` with the context arguments plus `service`; when the
/// reply does not list the service as `running`, invokes `start_tool` with
/// `detach: true`. Does nothing when disabled, when there is no context, or
/// when either tool is not registered.
#[derive(Clone)]
pub struct EnsureServiceRunning {
    service: String,
    status_tool: String,
    start_tool: String,
    context: Arc<ContextFn>,
    enabled: Arc<EnabledFn>,
}

impl EnsureServiceRunning {
    #[must_use]
    pub fn new(
        service: impl Into<String>,
        status_tool: impl Into<String>,
        start_tool: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            status_tool: status_tool.into(),
            start_tool: start_tool.into(),
            context: Arc::new(|| Some(Map::new())),
            enabled: Arc::new(|| true),
        }
    }

    /// Arguments shared by the status and start calls, such as the active
    /// project id. Returning `None` skips the check.
    #[must_use]
    pub fn with_context<F>(mut self, context: F) -> Self
    where
        F: Fn() -> Option<Map<String, Value>> + Send + Sync + 'static,
    {
        self.context = Arc::new(context);
        self
    }

    /// Only run the check while `enabled` returns true.
    #[must_use]
    pub fn when<F>(mut self, enabled: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.enabled = Arc::new(enabled);
        self
    }

    async fn ensure(&self, dispatcher: &ToolDispatcher, base: Map<String, Value>) -> Result<()> {
        let mut status_args = base.clone();
        status_args.insert("service".to_string(), Value::String(self.service.clone()));
        let status = dispatcher
            .invoke(&self.status_tool, status_args)
            .await?
            .map(ToolOutput::into_text)
            .unwrap_or_default();

        if service_is_running(&status, &self.service) {
            debug!("Service {} already running", self.service);
            return Ok(());
        }

        info!("Starting service {} before tool call", self.service);
        let mut start_args = base;
        start_args.insert("service".to_string(), Value::String(self.service.clone()));
        start_args.insert("detach".to_string(), Value::Bool(true));
        dispatcher.invoke(&self.start_tool, start_args).await?;
        Ok(())
    }
}

impl fmt::Debug for EnsureServiceRunning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnsureServiceRunning")
            .field("service", &self.service)
            .field("status_tool", &self.status_tool)
            .field("start_tool", &self.start_tool)
            .finish_non_exhaustive()
    }
}

fn service_is_running(status: &str, service: &str) -> bool {
    let Ok(payload) = serde_json::from_str::<Value>(status) else {
        return false;
    };
    payload
        .get("services")
        .and_then(Value::as_array)
        .is_some_and(|entries| {
            entries.iter().any(|entry| {
                entry.get("service").and_then(Value::as_str) == Some(service)
                    && entry.get("status").and_then(Value::as_str) == Some("running")
            })
        })
}

#[async_trait]
impl ToolMiddleware for EnsureServiceRunning {
    async fn before(
        &self,
        dispatcher: &ToolDispatcher,
        call: DispatchCall,
    ) -> Result<MiddlewareAction> {
        if !(self.enabled)() {
            return Ok(MiddlewareAction::Continue(call));
        }
        let Some(base) = (self.context)() else {
            return Ok(MiddlewareAction::Continue(call));
        };
        if !dispatcher.has_tool(&self.status_tool) || !dispatcher.has_tool(&self.start_tool) {
            return Ok(MiddlewareAction::Continue(call));
        }

        self.ensure(dispatcher, base).await?;
        Ok(MiddlewareAction::Continue(call))
    }
}

type ConditionFn = dyn Fn(&Map<String, Value>) -> bool + Send + Sync;
type MapArgsFn = dyn Fn(Map<String, Value>) -> Map<String, Value> + Send + Sync;

/// Send a call to a specialized tool when a condition holds.
///
/// The rewrite only happens if the target tool is registered.
#[derive(Clone)]
pub struct RerouteTool {
    target: String,
    condition: Arc<ConditionFn>,
    map_args: Arc<MapArgsFn>,
}

impl RerouteTool {
    #[must_use]
    pub fn new<F>(target: impl Into<String>, condition: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> bool + Send + Sync + 'static,
    {
        Self {
            target: target.into(),
            condition: Arc::new(condition),
            map_args: Arc::new(|args| args),
        }
    }

    /// Translate the original arguments for the target tool.
    #[must_use]
    pub fn with_arguments<F>(mut self, map_args: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Map<String, Value> + Send + Sync + 'static,
    {
        self.map_args = Arc::new(map_args);
        self
    }
}

impl fmt::Debug for RerouteTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RerouteTool")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ToolMiddleware for RerouteTool {
    async fn before(
        &self,
        dispatcher: &ToolDispatcher,
        call: DispatchCall,
    ) -> Result<MiddlewareAction> {
        if !(self.condition)(&call.args) || !dispatcher.has_tool(&self.target) {
            return Ok(MiddlewareAction::Continue(call));
        }
        info!("Rerouting {} to {}", call.name, self.target);
        Ok(MiddlewareAction::Continue(DispatchCall {
            name: self.target.clone(),
            args: (self.map_args)(call.args),
        }))
    }
}
