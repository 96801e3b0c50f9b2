use crate::llm::{
    ChunkStream, GenerateRequest, GenerateResponse, ModelProvider, StreamChunk, StreamError,
    ToolCall,
};
use crate::tools::{Tool, ToolOutput};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ===================
// Mock Model Provider
// ===================

/// What the mock does for one `generate_stream` call.
pub enum StreamScript {
    /// Report that this call cannot stream (`None`).
    NoStream,
    Chunks(Vec<Result<StreamChunk, StreamError>>),
    /// Yield the chunks, then never finish.
    Stalled(Vec<StreamChunk>),
}

pub struct MockProvider {
    responses: Mutex<VecDeque<Result<GenerateResponse, String>>>,
    streams: Mutex<VecDeque<StreamScript>>,
    /// Returned once the scripted responses run out.
    repeat: Option<GenerateResponse>,
    requests: Mutex<Vec<GenerateRequest>>,
    stream_requests: Mutex<Vec<GenerateRequest>>,
    tool_calling: bool,
}

impl MockProvider {
    pub fn new(responses: Vec<GenerateResponse>) -> Self {
        Self::scripted(responses.into_iter().map(Ok).collect())
    }

    /// Responses where `Err` makes `generate` fail with that message.
    pub fn scripted(responses: Vec<Result<GenerateResponse, String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            streams: Mutex::new(VecDeque::new()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
            stream_requests: Mutex::new(Vec::new()),
            tool_calling: true,
        }
    }

    /// Answers every request with the same response.
    pub fn repeating(response: GenerateResponse) -> Self {
        Self {
            repeat: Some(response),
            ..Self::new(vec![])
        }
    }

    pub fn with_streams(self, streams: Vec<StreamScript>) -> Self {
        Self {
            streams: Mutex::new(streams.into()),
            ..self
        }
    }

    pub fn without_tool_calling(self) -> Self {
        Self {
            tool_calling: false,
            ..self
        }
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().expect("lock").clone()
    }

    pub fn stream_requests(&self) -> Vec<GenerateRequest> {
        self.stream_requests.lock().expect("lock").clone()
    }

    pub fn text_response(text: &str) -> GenerateResponse {
        GenerateResponse::text(text)
    }

    pub fn tool_call_response(id: &str, name: &str, arguments: Value) -> GenerateResponse {
        GenerateResponse::tool_calls(vec![ToolCall::new(id, name, arguments)])
    }

    pub fn tool_calls_response(calls: Vec<(&str, &str, Value)>) -> GenerateResponse {
        GenerateResponse::tool_calls(
            calls
                .into_iter()
                .map(|(id, name, arguments)| ToolCall::new(id, name, arguments))
                .collect(),
        )
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
        self.requests.lock().expect("lock").push(request);
        let next = self.responses.lock().expect("lock").pop_front();
        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => self
                .repeat
                .clone()
                .ok_or_else(|| anyhow::anyhow!("no scripted response left")),
        }
    }

    fn generate_stream(&self, request: GenerateRequest) -> Option<ChunkStream<'_>> {
        self.stream_requests.lock().expect("lock").push(request);
        let script = self.streams.lock().expect("lock").pop_front();
        match script {
            Some(StreamScript::Chunks(chunks)) => Some(Box::pin(futures::stream::iter(chunks))),
            Some(StreamScript::Stalled(chunks)) => Some(Box::pin(async_stream::stream! {
                for chunk in chunks {
                    yield Ok::<_, StreamError>(chunk);
                }
                futures::future::pending::<()>().await;
            })),
            Some(StreamScript::NoStream) | None => None,
        }
    }

    fn supports_tool_calling(&self) -> bool {
        self.tool_calling
    }

    fn model(&self) -> &'static str {
        "mock-model"
    }
}

// ===================
// Mock Tools
// ===================

fn message_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "message": { "type": "string" }
        }
    })
}

pub struct EchoTool;

impl Tool for EchoTool {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn description(&self) -> &'static str {
        "Echo the input message"
    }

    fn parameters(&self) -> Value {
        message_schema()
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<ToolOutput> {
        let message = args
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("no message");
        Ok(format!("Echo: {message}").into())
    }
}

pub struct FailingTool;

impl Tool for FailingTool {
    fn name(&self) -> &'static str {
        "fail"
    }

    fn description(&self) -> &'static str {
        "Always fails"
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn execute(&self, _args: Map<String, Value>) -> Result<ToolOutput> {
        anyhow::bail!("boom")
    }
}

/// Signals `started` and then sleeps, so tests can cancel it mid-flight.
pub struct SlowTool {
    pub started: Arc<Notify>,
    pub delay: Duration,
}

impl SlowTool {
    pub fn new(delay: Duration) -> Self {
        Self {
            started: Arc::new(Notify::new()),
            delay,
        }
    }
}

impl Tool for SlowTool {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn description(&self) -> &'static str {
        "Takes a while"
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn execute(&self, _args: Map<String, Value>) -> Result<ToolOutput> {
        self.started.notify_one();
        tokio::time::sleep(self.delay).await;
        Ok("slow done".into())
    }
}
