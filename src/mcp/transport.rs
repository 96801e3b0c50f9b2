//! MCP transport implementations.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, oneshot};

use super::config::McpServerConfig;
use super::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};

/// The server process or pipe is gone; the session cannot be reused.
#[derive(Debug, Clone, thiserror::Error)]
#[error("MCP transport closed: {0}")]
pub struct TransportClosed(pub String);

/// Trait for MCP transports.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and wait for its response.
    ///
    /// # Errors
    ///
    /// Returns [`TransportClosed`] if the connection is gone, or an error if
    /// the server answers with a JSON-RPC error.
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Send a notification; no response is expected.
    ///
    /// # Errors
    ///
    /// Returns an error if the notification cannot be written.
    async fn notify(&self, notification: JsonRpcNotification) -> Result<()>;

    /// Close the transport connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails to close cleanly.
    async fn close(&self) -> Result<()>;
}

/// Opens new transports to one server.
#[async_trait]
pub trait McpConnector: Send + Sync {
    /// # Errors
    /// Returns an error if the server cannot be started or reached.
    async fn open(&self) -> Result<Arc<dyn McpTransport>>;
}

/// Spawns the configured server command for each new transport.
pub struct StdioConnector {
    config: McpServerConfig,
    env: HashMap<String, String>,
}

impl StdioConnector {
    #[must_use]
    pub const fn new(config: McpServerConfig, env: HashMap<String, String>) -> Self {
        Self { config, env }
    }
}

#[async_trait]
impl McpConnector for StdioConnector {
    async fn open(&self) -> Result<Arc<dyn McpTransport>> {
        let transport: Arc<dyn McpTransport> = StdioTransport::spawn(&self.config, &self.env)?;
        Ok(transport)
    }
}

type PendingMap = HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>;

/// Stdio transport for MCP servers.
///
/// Spawns a subprocess and speaks newline-delimited JSON-RPC over its
/// stdin/stdout.
pub struct StdioTransport {
    next_id: AtomicU64,
    pending: Arc<Mutex<PendingMap>>,
    closed: Arc<AtomicBool>,
    writer: Mutex<BufWriter<ChildStdin>>,
    child: Mutex<Child>,
}

impl StdioTransport {
    /// Grace period between asking the server to stop and killing it.
    const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

    /// Spawn the server process with exactly the given environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the process fails to spawn.
    pub fn spawn(config: &McpServerConfig, env: &HashMap<String, String>) -> Result<Arc<Self>> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .env_clear()
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn MCP server: {}", config.command))?;

        let stdin = child.stdin.take().context("Failed to get stdin")?;
        let stdout = child.stdout.take().context("Failed to get stdout")?;

        let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let reader_pending = Arc::clone(&pending);
        let reader_closed = Arc::clone(&closed);
        let command = config.command.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        // Server-initiated notifications and log lines are ignored
                        if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(&line) {
                            let sender = reader_pending.lock().await.remove(&response.id);
                            if let Some(sender) = sender {
                                let _ = sender.send(response);
                            }
                        }
                    }
                }
            }

            reader_closed.store(true, Ordering::SeqCst);
            // Dropping the senders wakes every waiting request
            reader_pending.lock().await.clear();
            debug!("MCP server output closed: {command}");
        });

        Ok(Arc::new(Self {
            next_id: AtomicU64::new(1),
            pending,
            closed,
            writer: Mutex::new(BufWriter::new(stdin)),
            child: Mutex::new(child),
        }))
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn write_line(&self, json: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let written = async {
            writer.write_all(json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;
        written.map_err(|e| TransportClosed(e.to_string()).into())
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send(&self, mut request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportClosed("server exited".to_string()).into());
        }

        request.id = RequestId::Number(self.next_request_id());

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request.id.clone(), tx);
        // The reader may have drained `pending` between the check above and the insert
        if self.closed.load(Ordering::SeqCst) {
            self.pending.lock().await.remove(&request.id);
            return Err(TransportClosed("server exited".to_string()).into());
        }

        let json = serde_json::to_string(&request)?;
        if let Err(e) = self.write_line(&json).await {
            self.pending.lock().await.remove(&request.id);
            return Err(e);
        }

        let response = rx
            .await
            .map_err(|_| TransportClosed(format!("no response to {}", request.method)))?;

        if let Some(ref error) = response.error {
            bail!("JSON-RPC error {}: {}", error.code, error.message);
        }

        Ok(response)
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<()> {
        let json = serde_json::to_string(&notification)?;
        self.write_line(&json).await
    }

    async fn close(&self) -> Result<()> {
        let _ = self.writer.lock().await.shutdown().await;

        let mut child = self.child.lock().await;
        if tokio::time::timeout(Self::SHUTDOWN_GRACE, child.wait())
            .await
            .is_err()
        {
            child
                .kill()
                .await
                .context("Failed to kill MCP server process")?;
        }
        Ok(())
    }
}
