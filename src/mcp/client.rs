//! MCP client implementation.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::config::McpServerConfig;
use super::protocol::{
    ClientInfo, InitializeParams, InitializeResult, JsonRpcNotification, JsonRpcRequest,
    McpToolCallResult, McpToolDefinition, ToolCallParams, ToolsListResult,
};
use super::transport::{McpConnector, McpTransport, StdioConnector, TransportClosed};
use crate::provider::{Capability, ToolProvider};

/// MCP protocol version.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// An initialized connection to a server.
struct Session {
    transport: Arc<dyn McpTransport>,
    info: InitializeResult,
}

/// MCP client for one server, usable as a [`ToolProvider`].
///
/// Without [`connect`](ToolProvider::connect) every call opens its own
/// connection, performs the handshake, runs and closes it. After `connect`
/// the session is reused; if it turns out to be dead the client drops it and
/// retries the call once over a fresh one-shot connection.
///
/// # Example
///
/// ```ignore
/// use ragops_agent::mcp::{McpClient, McpServerConfig};
///
/// let client = McpClient::new(McpServerConfig::new("uvx").with_args(["ragops-mcp"]));
/// client.connect().await?;
/// let capabilities = client.list_capabilities().await?;
/// ```
pub struct McpClient {
    config: McpServerConfig,
    connector: Arc<dyn McpConnector>,
    session: Mutex<Option<Session>>,
}

impl McpClient {
    /// Client that launches `config.command` over stdio.
    #[must_use]
    pub fn new(config: McpServerConfig) -> Self {
        let env = config.resolve_env();
        let connector = Arc::new(StdioConnector::new(config.clone(), env));
        Self::with_connector(config, connector)
    }

    /// Client that opens transports through a custom connector.
    #[must_use]
    pub fn with_connector(config: McpServerConfig, connector: Arc<dyn McpConnector>) -> Self {
        Self {
            config,
            connector,
            session: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &McpServerConfig {
        &self.config
    }

    pub async fn is_connected(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Server info from the persistent session, if connected.
    pub async fn server_info(&self) -> Option<InitializeResult> {
        self.session.lock().await.as_ref().map(|s| s.info.clone())
    }

    async fn open_session(&self) -> Result<Session> {
        let transport = self.connector.open().await?;
        match handshake(transport.as_ref()).await {
            Ok(info) => Ok(Session { transport, info }),
            Err(e) => {
                let _ = transport.close().await;
                Err(e)
            }
        }
    }

    /// Run `op` on the persistent session if there is one, otherwise (or if
    /// it died) on a one-shot connection.
    async fn with_transport<T, F>(&self, what: &str, op: F) -> Result<T>
    where
        F: for<'a> Fn(&'a dyn McpTransport) -> futures::future::BoxFuture<'a, Result<T>>,
    {
        {
            let mut guard = self.session.lock().await;
            if let Some(session) = guard.as_ref() {
                match op(session.transport.as_ref()).await {
                    Err(e) if e.is::<TransportClosed>() => {
                        warn!(
                            "Persistent MCP connection to {} failed during {what}, reconnecting: {e}",
                            self.identifier()
                        );
                        if let Some(dead) = guard.take() {
                            let _ = dead.transport.close().await;
                        }
                    }
                    result => return result,
                }
            }
        }

        let session = self.open_session().await?;
        let result = op(session.transport.as_ref()).await;
        if let Err(e) = session.transport.close().await {
            debug!("Error closing one-shot MCP connection: {e}");
        }
        result
    }

    fn call_arguments(&self, arguments: Map<String, Value>) -> Option<Value> {
        if arguments.is_empty() {
            None
        } else if self.config.wrap_arguments {
            Some(json!({ "args": arguments }))
        } else {
            Some(Value::Object(arguments))
        }
    }
}

async fn handshake(transport: &dyn McpTransport) -> Result<InitializeResult> {
    let params = InitializeParams {
        protocol_version: MCP_PROTOCOL_VERSION.to_string(),
        capabilities: json!({}),
        client_info: ClientInfo {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    };
    let request = JsonRpcRequest::new("initialize", Some(serde_json::to_value(&params)?));
    let info: InitializeResult = request_result(transport, request).await?;
    transport
        .notify(JsonRpcNotification::new("notifications/initialized"))
        .await?;
    Ok(info)
}

async fn request_result<T: DeserializeOwned>(
    transport: &dyn McpTransport,
    request: JsonRpcRequest,
) -> Result<T> {
    let method = request.method.clone();
    let response = transport.send(request).await?;
    let value = response
        .result
        .with_context(|| format!("{method} response missing result"))?;
    serde_json::from_value(value).with_context(|| format!("Failed to parse {method} response"))
}

/// Object schema accepting anything, used when a tool declares no usable one.
fn permissive_schema() -> Value {
    json!({"type": "object", "properties": {}, "additionalProperties": true})
}

/// Normalize a tool's declared input schema.
///
/// A schema whose only job is to wrap a model as `properties.args` pointing
/// at `#/$defs/<Model>` is replaced by that model's schema, keeping `$defs`
/// so nested references still resolve.
#[must_use]
pub fn normalize_schema(raw: Option<&Value>, tool_name: &str) -> Value {
    let Some(Value::Object(schema)) = raw else {
        return permissive_schema();
    };
    if schema.is_empty() {
        return permissive_schema();
    }
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        debug!("Tool {tool_name} has no properties in its schema");
        return permissive_schema();
    };

    let defs = schema.get("$defs").and_then(Value::as_object);
    let args_ref = properties
        .get("args")
        .and_then(|a| a.get("$ref"))
        .and_then(Value::as_str);

    if let (Some(defs), Some(reference)) = (defs, args_ref) {
        if let Some(name) = reference.strip_prefix("#/$defs/") {
            if let Some(Value::Object(model)) = defs.get(name) {
                let mut unwrapped = model.clone();
                unwrapped.insert("$defs".to_string(), Value::Object(defs.clone()));
                return Value::Object(unwrapped);
            }
        }
        warn!("Tool {tool_name} references missing schema definition {reference}");
        return permissive_schema();
    }

    Value::Object(schema.clone())
}

/// Flatten a call result into text.
///
/// # Errors
/// Returns an error carrying the text when the server flags the result as
/// an error.
pub fn extract_text(result: &McpToolCallResult) -> Result<String> {
    let texts: Vec<&str> = result.content.iter().filter_map(|c| c.text()).collect();
    let text = if !texts.is_empty() {
        texts.join("\n")
    } else if let Some(structured) = &result.structured_content {
        match structured {
            Value::String(s) => s.clone(),
            other => serde_json::to_string(other)?,
        }
    } else {
        serde_json::to_string(result)?
    };

    if result.is_error {
        bail!("{text}");
    }
    Ok(text)
}

fn to_capability(tool: McpToolDefinition) -> Capability {
    let parameters = normalize_schema(tool.input_schema.as_ref(), &tool.name);
    Capability {
        description: tool.description.unwrap_or_default(),
        name: tool.name,
        parameters,
    }
}

#[async_trait]
impl ToolProvider for McpClient {
    fn identifier(&self) -> &str {
        &self.config.command
    }

    async fn list_capabilities(&self) -> Result<Vec<Capability>> {
        let tools: ToolsListResult = self
            .with_transport("tools/list", |transport| {
                Box::pin(request_result(transport, JsonRpcRequest::new("tools/list", None)))
            })
            .await?;
        Ok(tools.tools.into_iter().map(to_capability).collect())
    }

    async fn invoke(&self, name: &str, arguments: Map<String, Value>) -> Result<String> {
        let params = ToolCallParams {
            name: name.to_string(),
            arguments: self.call_arguments(arguments),
        };
        debug!("Calling MCP tool {name} with {:?}", params.arguments);
        let params = serde_json::to_value(&params)?;

        let result: McpToolCallResult = self
            .with_transport(name, |transport| {
                let request = JsonRpcRequest::new("tools/call", Some(params.clone()));
                Box::pin(request_result(transport, request))
            })
            .await?;
        extract_text(&result)
    }

    async fn connect(&self) -> Result<()> {
        let mut guard = self.session.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let session = self.open_session().await?;
        debug!(
            "Persistent MCP connection opened: {} ({})",
            self.identifier(),
            session.info.server_info.name
        );
        *guard = Some(session);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            session.transport.close().await?;
            debug!("Persistent MCP connection closed: {}", self.identifier());
        }
        Ok(())
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.config.timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::{JsonRpcResponse, McpContent};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// In-memory server answering the handful of methods the client uses.
    struct FakeServer {
        dead: AtomicBool,
        closed: AtomicBool,
        calls: Arc<StdMutex<Vec<Value>>>,
    }

    #[async_trait]
    impl McpTransport for FakeServer {
        async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
            if self.dead.load(Ordering::SeqCst) {
                return Err(TransportClosed("broken pipe".to_string()).into());
            }
            let result = match request.method.as_str() {
                "initialize" => json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": {},
                    "serverInfo": {"name": "fake"}
                }),
                "tools/list" => json!({"tools": [
                    {"name": "list_projects", "description": "List projects"},
                    {"name": "create_project", "inputSchema": {
                        "type": "object",
                        "properties": {"args": {"$ref": "#/$defs/CreateArgs"}},
                        "$defs": {"CreateArgs": {
                            "type": "object",
                            "properties": {"name": {"type": "string"}},
                            "required": ["name"]
                        }}
                    }}
                ]}),
                "tools/call" => {
                    let params = request.params.clone().unwrap_or(Value::Null);
                    self.calls.lock().expect("lock").push(params.clone());
                    json!({"content": [
                        {"type": "text", "text": format!("called {}", params["name"])}
                    ]})
                }
                other => bail!("unexpected method {other}"),
            };
            Ok(JsonRpcResponse::success(request.id, result))
        }

        async fn notify(&self, _notification: JsonRpcNotification) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        opened: AtomicUsize,
        servers: StdMutex<Vec<Arc<FakeServer>>>,
        calls: Arc<StdMutex<Vec<Value>>>,
    }

    impl FakeConnector {
        fn server(&self, index: usize) -> Arc<FakeServer> {
            Arc::clone(&self.servers.lock().expect("lock")[index])
        }
    }

    #[async_trait]
    impl McpConnector for FakeConnector {
        async fn open(&self) -> Result<Arc<dyn McpTransport>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let server = Arc::new(FakeServer {
                dead: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                calls: Arc::clone(&self.calls),
            });
            self.servers.lock().expect("lock").push(Arc::clone(&server));
            Ok(server)
        }
    }

    fn client(wrap: bool) -> (McpClient, Arc<FakeConnector>) {
        let connector = Arc::new(FakeConnector::default());
        let config = McpServerConfig::new("fake-server").with_wrap_arguments(wrap);
        let client = McpClient::with_connector(config, connector.clone());
        (client, connector)
    }

    fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_one_shot_mode_opens_and_closes_per_call() -> Result<()> {
        let (client, connector) = client(true);

        let capabilities = client.list_capabilities().await?;
        assert_eq!(capabilities.len(), 2);
        client.invoke("list_projects", Map::new()).await?;

        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
        assert!(connector.server(0).closed.load(Ordering::SeqCst));
        assert!(connector.server(1).closed.load(Ordering::SeqCst));
        assert!(!client.is_connected().await);
        Ok(())
    }

    #[tokio::test]
    async fn test_persistent_mode_reuses_session() -> Result<()> {
        let (client, connector) = client(true);
        client.connect().await?;
        client.connect().await?;

        client.list_capabilities().await?;
        let text = client.invoke("list_projects", Map::new()).await?;
        assert_eq!(text, "called \"list_projects\"");

        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
        assert_eq!(
            client.server_info().await.map(|i| i.server_info.name),
            Some("fake".to_string())
        );

        client.disconnect().await?;
        assert!(connector.server(0).closed.load(Ordering::SeqCst));
        assert!(!client.is_connected().await);
        Ok(())
    }

    #[tokio::test]
    async fn test_dead_session_falls_back_to_one_shot() -> Result<()> {
        let (client, connector) = client(true);
        client.connect().await?;
        connector.server(0).dead.store(true, Ordering::SeqCst);

        let text = client.invoke("list_projects", Map::new()).await?;
        assert_eq!(text, "called \"list_projects\"");
        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
        assert!(!client.is_connected().await);
        Ok(())
    }

    #[tokio::test]
    async fn test_arguments_wrapped_when_configured() -> Result<()> {
        let (client, connector) = client(true);
        client
            .invoke("create_project", args(&[("name", json!("docs"))]))
            .await?;
        client.invoke("list_projects", Map::new()).await?;

        let calls = connector.calls.lock().expect("lock");
        assert_eq!(calls[0]["arguments"], json!({"args": {"name": "docs"}}));
        // empty arguments are omitted entirely
        assert!(calls[1].get("arguments").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_arguments_sent_plain_when_unwrapped() -> Result<()> {
        let (client, connector) = client(false);
        client
            .invoke("create_project", args(&[("name", json!("docs"))]))
            .await?;
        let calls = connector.calls.lock().expect("lock");
        assert_eq!(calls[0]["arguments"], json!({"name": "docs"}));
        Ok(())
    }

    #[tokio::test]
    async fn test_capabilities_are_normalized() -> Result<()> {
        let (client, _) = client(true);
        let capabilities = client.list_capabilities().await?;

        let list = capabilities
            .iter()
            .find(|c| c.name == "list_projects")
            .expect("list_projects");
        assert_eq!(list.parameters, permissive_schema());

        let create = capabilities
            .iter()
            .find(|c| c.name == "create_project")
            .expect("create_project");
        assert_eq!(create.description, "");
        assert_eq!(create.parameters["required"], json!(["name"]));
        assert!(create.parameters["$defs"]["CreateArgs"].is_object());
        Ok(())
    }

    #[test]
    fn test_normalize_schema_passthrough() {
        let schema = json!({"type": "object", "properties": {"q": {"type": "string"}}});
        assert_eq!(normalize_schema(Some(&schema), "search"), schema);
        assert_eq!(normalize_schema(None, "x"), permissive_schema());
        assert_eq!(normalize_schema(Some(&json!("bogus")), "x"), permissive_schema());
        assert_eq!(normalize_schema(Some(&json!({})), "x"), permissive_schema());
    }

    #[test]
    fn test_normalize_schema_dangling_ref() {
        let schema = json!({
            "type": "object",
            "properties": {"args": {"$ref": "#/$defs/Missing"}},
            "$defs": {}
        });
        assert_eq!(normalize_schema(Some(&schema), "x"), permissive_schema());
    }

    #[test]
    fn test_extract_text_prefers_text_items() -> Result<()> {
        let result = McpToolCallResult {
            content: vec![
                McpContent::Text {
                    text: "line one".to_string(),
                },
                McpContent::Image {
                    data: String::new(),
                    mime_type: "image/png".to_string(),
                },
                McpContent::Text {
                    text: "line two".to_string(),
                },
            ],
            structured_content: Some(json!({"ignored": true})),
            is_error: false,
        };
        assert_eq!(extract_text(&result)?, "line one\nline two");
        Ok(())
    }

    #[test]
    fn test_extract_text_falls_back_to_structured() -> Result<()> {
        let result = McpToolCallResult {
            structured_content: Some(json!({"count": 2})),
            ..McpToolCallResult::default()
        };
        assert_eq!(extract_text(&result)?, r#"{"count":2}"#);

        let string_result = McpToolCallResult {
            structured_content: Some(json!("plain")),
            ..McpToolCallResult::default()
        };
        assert_eq!(extract_text(&string_result)?, "plain");
        Ok(())
    }

    #[test]
    fn test_extract_text_last_resort_serializes_result() -> Result<()> {
        let text = extract_text(&McpToolCallResult::default())?;
        assert_eq!(text, r#"{"content":[],"isError":false}"#);
        Ok(())
    }

    #[test]
    fn test_error_result_becomes_error() {
        let result = McpToolCallResult {
            content: vec![McpContent::Text {
                text: "project not found".to_string(),
            }],
            structured_content: None,
            is_error: true,
        };
        let err = extract_text(&result).expect_err("should fail");
        assert_eq!(err.to_string(), "project not found");
    }
}
