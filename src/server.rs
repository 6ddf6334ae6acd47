//! MCP server for Tarnhelm.
//!
//! [`TarnhelmHandler`] answers JSON-RPC requests and runs the `search` and
//! `fetch_content` tools. [`TarnhelmServer`] drives a handler over STDIO or
//! HTTP. A failing tool is reported inside its result with `isError: true`;
//! JSON-RPC errors are reserved for malformed calls.

use crate::cache::ResolutionCache;
use crate::limiter::{RateLimitConfig, RateLimiter};
use crate::tools::{fetch::FetchClient, search, search::SearchClient};
use crate::transport::{TransportConfig, build_client};
use crate::types::{
    FetchArgs, SearchArgs, TarnhelmError, TarnhelmResult, fetch_args_schema, search_args_schema,
};
use crate::{SERVER_NAME, VERSION};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// MCP Protocol version
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC parse error code
pub const PARSE_ERROR: i32 = -32700;

/// JSON-RPC method not found code
pub const METHOD_NOT_FOUND: i32 = -32601;

/// JSON-RPC invalid params code
pub const INVALID_PARAMS: i32 = -32602;

/// JSON-RPC internal error code
pub const INTERNAL_ERROR: i32 = -32603;

/// Default time budget for one tool call
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Transport type for the MCP server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportType {
    /// Standard input/output transport
    #[default]
    Stdio,
    /// Server-Sent Events over HTTP
    Sse {
        /// Port to listen on
        port: u16,
        /// Host to bind to
        host: [u8; 4],
    },
}

/// Configuration for the Tarnhelm server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Resolution and connection settings
    pub transport: TransportConfig,

    /// Rate limits for search and fetch
    pub rate_limits: RateLimitConfig,

    /// DuckDuckGo HTML endpoint
    pub search_endpoint: String,

    /// Deadline applied to each tool call
    pub tool_timeout: Duration,

    /// Whether to enable verbose logging
    pub verbose: bool,

    /// Maximum concurrent tool executions
    pub max_concurrent_tools: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            rate_limits: RateLimitConfig::default(),
            search_endpoint: search::DDG_HTML_URL.to_string(),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            verbose: false,
            max_concurrent_tools: 10,
        }
    }
}

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Request ID (None for notifications)
    pub id: Option<Value>,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// A notification expects no reply of any kind
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
            && (self.method == "initialized" || self.method.starts_with("notifications/"))
    }
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Request ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Success result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Additional error data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Error without extra data
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl JsonRpcResponse {
    /// Response carrying either a result or an error
    pub fn reply(id: Option<Value>, outcome: Result<Value, JsonRpcError>) -> Self {
        let (result, error) = match outcome {
            Ok(value) => (Some(value), None),
            Err(err) => (None, Some(err)),
        };
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result,
            error,
        }
    }

    /// Error response
    pub fn failure(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self::reply(id, Err(JsonRpcError::new(code, message)))
    }
}

/// MCP Tool definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTool {
    /// Tool name
    pub name: String,
    /// Tool description
    pub description: Option<String>,
    /// JSON Schema for input
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// `tools/call` parameters
#[derive(Debug, Deserialize)]
struct ToolCall {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// The tools this server exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tool {
    Search,
    FetchContent,
}

impl Tool {
    const ALL: [Tool; 2] = [Tool::Search, Tool::FetchContent];

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    fn name(self) -> &'static str {
        match self {
            Tool::Search => "search",
            Tool::FetchContent => "fetch_content",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Tool::Search => {
                "Search DuckDuckGo and return formatted results. Ideal for general queries, news, articles, and online content."
            },
            Tool::FetchContent => "Fetch and parse content from a webpage URL",
        }
    }

    fn input_schema(self) -> Value {
        match self {
            Tool::Search => search_args_schema(),
            Tool::FetchContent => fetch_args_schema(),
        }
    }

    /// Gerund used in the failure text
    fn activity(self) -> &'static str {
        match self {
            Tool::Search => "searching",
            Tool::FetchContent => "fetching content",
        }
    }

    fn definition(self) -> McpTool {
        McpTool {
            name: self.name().to_string(),
            description: Some(self.description().to_string()),
            input_schema: self.input_schema(),
        }
    }
}

/// Decode tool arguments, reporting a mismatch as invalid params
fn decode_arguments<T: DeserializeOwned>(tool: Tool, arguments: Value) -> Result<T, JsonRpcError> {
    serde_json::from_value(arguments).map_err(|e| {
        JsonRpcError::new(
            INVALID_PARAMS,
            format!("Invalid {} arguments: {}", tool.name(), e),
        )
    })
}

/// MCP tool result holding one text block
fn tool_result(tool: Tool, outcome: TarnhelmResult<String>) -> Value {
    let (text, is_error) = match outcome {
        Ok(text) => (text, false),
        Err(e) => {
            error!(tool = tool.name(), error = %e, "Tool failed");
            (format!("An error occurred while {}: {}", tool.activity(), e), true)
        },
    };

    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": is_error
    })
}

/// Answers JSON-RPC requests against one pair of search and fetch clients
#[derive(Clone, Debug)]
pub struct TarnhelmHandler {
    resolution_cache: ResolutionCache,
    search_client: SearchClient,
    fetch_client: FetchClient,
    tool_timeout: Duration,
}

impl TarnhelmHandler {
    /// Build both clients over one shared resolution cache
    pub fn new(config: ServerConfig) -> TarnhelmResult<Self> {
        let resolution_cache = ResolutionCache::new();
        let limits = &config.rate_limits;

        let search_client = SearchClient::with_client(
            build_client(&config.transport, resolution_cache.clone())?,
            RateLimiter::new("search", limits.search_period, limits.burst),
            config.search_endpoint.clone(),
        );
        let fetch_client = FetchClient::with_client(
            build_client(&config.transport, resolution_cache.clone())?,
            RateLimiter::new("fetch", limits.fetch_period, limits.burst),
        );

        Ok(Self {
            resolution_cache,
            search_client,
            fetch_client,
            tool_timeout: config.tool_timeout,
        })
    }

    /// `initialize` result
    pub fn server_info(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": { "name": SERVER_NAME, "version": VERSION }
        })
    }

    /// Definitions returned by `tools/list`
    pub fn list_tools(&self) -> Vec<McpTool> {
        Tool::ALL.into_iter().map(Tool::definition).collect()
    }

    fn deadline(&self) -> Option<Instant> {
        Some(Instant::now() + self.tool_timeout)
    }

    /// Run a search and render the results as Markdown
    #[instrument(skip(self))]
    pub async fn execute_search(&self, args: SearchArgs) -> TarnhelmResult<String> {
        let results = self.search_client.search(&args, self.deadline()).await?;
        Ok(search::format_results(&args.query, &results))
    }

    /// Fetch a page's cleaned text
    #[instrument(skip(self))]
    pub async fn execute_fetch(&self, args: FetchArgs) -> TarnhelmResult<String> {
        self.fetch_client.fetch(&args, self.deadline()).await
    }

    /// Handle one request. Notifications produce no response.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            debug!(method = %request.method, "Notification received");
            return None;
        }

        let JsonRpcRequest {
            id, method, params, ..
        } = request;
        debug!(method = %method, "Handling request");

        let outcome = match method.as_str() {
            "initialize" => Ok(self.server_info()),
            "initialized" | "notifications/initialized" | "notifications/cancelled" | "ping" => {
                Ok(json!({}))
            },
            "tools/list" => Ok(json!({ "tools": self.list_tools() })),
            "tools/call" => self.call_tool(params).await,
            _ => Err(JsonRpcError::new(
                METHOD_NOT_FOUND,
                format!("Method not found: {}", method),
            )),
        };

        Some(JsonRpcResponse::reply(id, outcome))
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params =
            params.ok_or_else(|| JsonRpcError::new(INVALID_PARAMS, "Missing parameters"))?;
        let call: ToolCall = serde_json::from_value(params)
            .map_err(|e| JsonRpcError::new(INVALID_PARAMS, format!("Invalid tool call: {}", e)))?;
        let tool = Tool::from_name(&call.name).ok_or_else(|| {
            JsonRpcError::new(METHOD_NOT_FOUND, format!("Unknown tool: {}", call.name))
        })?;
        let arguments = call.arguments.unwrap_or_else(|| json!({}));

        info!(tool = tool.name(), "Executing tool");

        let outcome = match tool {
            Tool::Search => self.execute_search(decode_arguments(tool, arguments)?).await,
            Tool::FetchContent => self.execute_fetch(decode_arguments(tool, arguments)?).await,
        };

        Ok(tool_result(tool, outcome))
    }

    /// Get the shared resolution cache
    pub fn resolution_cache(&self) -> &ResolutionCache {
        &self.resolution_cache
    }
}

/// Key identifying the request a `notifications/cancelled` refers to
fn cancelled_request_key(params: Option<&Value>) -> Option<String> {
    params
        .and_then(|p| p.get("requestId"))
        .map(|id| id.to_string())
}

/// Runs STDIO requests as concurrent tasks and tracks them for cancellation
struct StdioDispatcher {
    handler: Arc<TarnhelmHandler>,
    permits: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashMap<String, AbortHandle>>>,
    responses: mpsc::UnboundedSender<JsonRpcResponse>,
}

impl StdioDispatcher {
    fn send(&self, response: JsonRpcResponse) {
        if self.responses.send(response).is_err() {
            warn!("Response writer has stopped");
        }
    }

    async fn accept(&self, line: &str) {
        debug!(request = %line, "Received request");

        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                self.send(JsonRpcResponse::failure(
                    None,
                    PARSE_ERROR,
                    format!("Parse error: {}", e),
                ));
                return;
            },
        };

        if request.method == "notifications/cancelled" {
            self.cancel(request.params.as_ref()).await;
        } else {
            self.spawn(request).await;
        }
    }

    async fn cancel(&self, params: Option<&Value>) {
        let Some(key) = cancelled_request_key(params) else {
            return;
        };
        if let Some(task) = self.in_flight.lock().await.remove(&key) {
            info!(request_id = %key, "Cancelling in-flight request");
            task.abort();
        }
    }

    async fn spawn(&self, request: JsonRpcRequest) {
        let key = request.id.as_ref().map(Value::to_string);
        let handler = Arc::clone(&self.handler);
        let permits = Arc::clone(&self.permits);
        let in_flight = Arc::clone(&self.in_flight);
        let responses = self.responses.clone();
        let task_key = key.clone();

        // The registry stays locked until the handle is stored, so the task
        // cannot deregister before it is registered.
        let mut registry = self.in_flight.lock().await;
        let task = tokio::spawn(async move {
            let response = match permits.acquire_owned().await {
                Ok(_permit) => handler.handle_request(request).await,
                Err(e) => Some(JsonRpcResponse::failure(
                    request.id,
                    INTERNAL_ERROR,
                    e.to_string(),
                )),
            };
            if let Some(key) = task_key {
                in_flight.lock().await.remove(&key);
            }
            if let Some(response) = response {
                let _ = responses.send(response);
            }
        });
        if let Some(key) = key {
            registry.insert(key, task.abort_handle());
        }
    }
}

/// Serialize responses to stdout, one line each, in arrival order
async fn write_responses(mut rx: mpsc::UnboundedReceiver<JsonRpcResponse>) -> TarnhelmResult<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(response) = rx.recv().await {
        let mut line = serde_json::to_vec(&response)?;
        line.push(b'\n');
        stdout.write_all(&line).await?;
        stdout.flush().await?;
    }
    Ok(())
}

mod http {
    use super::{JsonRpcRequest, TarnhelmHandler};
    use axum::{
        Json, Router,
        extract::State,
        http::StatusCode,
        response::{
            IntoResponse, Response,
            sse::{Event, Sse},
        },
        routing::{get, post},
    };
    use futures::stream::{self, Stream};
    use std::convert::Infallible;
    use std::sync::Arc;
    use tower_http::cors::CorsLayer;
    use tower_http::trace::TraceLayer;

    async fn health() -> &'static str {
        "OK"
    }

    async fn events() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
        Sse::new(stream::once(async {
            Ok(Event::default().data("connected"))
        }))
    }

    async fn rpc(
        State(handler): State<Arc<TarnhelmHandler>>,
        Json(request): Json<JsonRpcRequest>,
    ) -> Response {
        match handler.handle_request(request).await {
            Some(response) => Json(response).into_response(),
            None => StatusCode::ACCEPTED.into_response(),
        }
    }

    /// `/health`, `/sse` and `/rpc` routes over one handler
    pub(super) fn router(handler: Arc<TarnhelmHandler>) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/sse", get(events))
            .route("/rpc", post(rpc))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(handler)
    }
}

/// Main Tarnhelm MCP server
pub struct TarnhelmServer {
    handler: TarnhelmHandler,
    config: ServerConfig,
}

impl TarnhelmServer {
    /// Create a new Tarnhelm server with the given configuration
    pub fn new(config: ServerConfig) -> TarnhelmResult<Self> {
        let handler = TarnhelmHandler::new(config.clone())?;
        Ok(Self { handler, config })
    }

    /// Create a new server with default configuration
    pub fn with_defaults() -> TarnhelmResult<Self> {
        Self::new(ServerConfig::default())
    }

    /// Serve until the transport closes
    #[instrument(skip(self))]
    pub async fn run(self, transport: TransportType) -> TarnhelmResult<()> {
        info!(
            server = SERVER_NAME,
            version = VERSION,
            "Starting Tarnhelm MCP server"
        );

        match transport {
            TransportType::Stdio => self.run_stdio().await,
            TransportType::Sse { port, host } => self.run_sse(host, port).await,
        }
    }

    /// Read newline-delimited requests from stdin until EOF.
    ///
    /// Requests run concurrently, bounded by `max_concurrent_tools`, and
    /// responses are written in completion order.
    async fn run_stdio(self) -> TarnhelmResult<()> {
        info!("Starting STDIO transport");

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_responses(rx));
        let dispatcher = StdioDispatcher {
            handler: Arc::new(self.handler),
            permits: Arc::new(Semaphore::new(self.config.max_concurrent_tools.max(1))),
            in_flight: Arc::default(),
            responses: tx,
        };

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if !line.trim().is_empty() {
                dispatcher.accept(&line).await;
            }
        }

        // The writer finishes once every running task has dropped its sender.
        drop(dispatcher);
        writer
            .await
            .map_err(|e| TarnhelmError::ServerError(format!("Response writer failed: {}", e)))??;

        info!("STDIO server stopped");
        Ok(())
    }

    async fn run_sse(self, host: [u8; 4], port: u16) -> TarnhelmResult<()> {
        let addr = std::net::SocketAddr::from((host, port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| TarnhelmError::ServerError(format!("Failed to bind to {}: {}", addr, e)))?;

        info!("SSE server listening on http://{}", addr);

        axum::serve(listener, http::router(Arc::new(self.handler)))
            .await
            .map_err(|e| TarnhelmError::ServerError(format!("Server error: {}", e)))
    }

    /// Get the server's shared resolution cache
    pub fn resolution_cache(&self) -> &ResolutionCache {
        self.handler.resolution_cache()
    }
}
