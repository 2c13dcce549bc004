//! MCP (Model Context Protocol) server surface: hand-rolled JSON-RPC 2.0
//! over stdio or HTTP+SSE, exposing this crate's research pipeline as tools
//! and resources for agent clients.
//!
//! JSON-RPC framing is hand-rolled over [`serde_json::Value`] rather than
//! routed through [`rmcp`]'s client types: `rmcp` in this crate is wired for
//! *client* use (dialing external MCP servers from a node), while this
//! module is the *server* side, matching
//! `original_source/src/research_agent/mcp/server.py`'s split between
//! `MCPServer`/`MCPToolRegistry`/`MCPResourceProvider`.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{instrument, warn};

use crate::runtimes::{SessionManager, SessionManagerError};

const PROTOCOL_VERSION: &str = "2024-11-05";
const PARSE_ERROR: i64 = -32600;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32000;
const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Deserialize)]
pub struct MCPRequest {
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct MCPResponse {
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<MCPErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct MCPErrorBody {
    pub code: i64,
    pub message: String,
}

impl MCPResponse {
    fn ok(id: Option<Value>, result: Value) -> Self {
        Self { id, result: Some(result), error: None }
    }

    fn err(id: Option<Value>, code: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(MCPErrorBody { code, message: message.into() }),
        }
    }
}

/// Advertised MCP tool, with JSON Schemas for its input and output shapes.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
}

/// Advertised MCP resource namespace.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceInfo {
    pub uri: String,
    pub name: String,
    pub description: String,
    pub mime_type: String,
}

fn advertised_tools() -> Vec<ToolInfo> {
    vec![
        ToolInfo {
            name: "research".to_string(),
            description: "Run a full research session and return report output.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "minLength": 1},
                    "budget": {"type": "number", "exclusiveMinimum": 0}
                },
                "required": ["query"]
            }),
            output_schema: json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "status": {"type": "string"}
                },
                "required": ["session_id", "status"]
            }),
        },
        ToolInfo {
            name: "recall".to_string(),
            description: "Query cross-session memory for relevant findings.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "minLength": 1},
                    "max_results": {"type": "integer", "minimum": 1, "maximum": 20, "default": 5}
                },
                "required": ["query"]
            }),
            output_schema: json!({
                "type": "object",
                "properties": {"entries": {"type": "array"}}
            }),
        },
        ToolInfo {
            name: "evaluate".to_string(),
            description: "Evaluate an existing report and produce a quality score.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "report": {"type": "string", "minLength": 1},
                    "query": {"type": "string", "default": ""}
                },
                "required": ["report"]
            }),
            output_schema: json!({
                "type": "object",
                "properties": {
                    "score": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                    "rationale": {"type": "string"}
                }
            }),
        },
        ToolInfo {
            name: "status".to_string(),
            description: "Check status/progress/cost for a research session.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"session_id": {"type": "string", "minLength": 1}},
                "required": ["session_id"]
            }),
            output_schema: json!({
                "type": "object",
                "properties": {
                    "status": {"type": "string"},
                    "progress": {"type": "number"},
                    "cost_usd": {"type": "number"}
                }
            }),
        },
    ]
}

fn advertised_resources() -> Vec<ResourceInfo> {
    vec![
        ResourceInfo {
            uri: "reports://".to_string(),
            name: "Reports".to_string(),
            description: "Completed markdown reports from CLI/API/MCP sessions.".to_string(),
            mime_type: "text/markdown".to_string(),
        },
        ResourceInfo {
            uri: "sessions://".to_string(),
            name: "Sessions".to_string(),
            description: "Session status and metadata exposed as JSON.".to_string(),
            mime_type: "application/json".to_string(),
        },
        ResourceInfo {
            uri: "memory://".to_string(),
            name: "Memory".to_string(),
            description: "Cross-session knowledge entries and findings.".to_string(),
            mime_type: "application/json".to_string(),
        },
    ]
}

/// Hand-rolled MCP JSON-RPC server, wired against this process's
/// [`SessionManager`] for `research`/`status`, and the report/memory
/// directories on disk for `recall`/`resources/read`.
pub struct MCPServer {
    sessions: Arc<SessionManager>,
    report_dir: PathBuf,
    memory_path: PathBuf,
}

impl MCPServer {
    pub fn new(sessions: Arc<SessionManager>, report_dir: PathBuf, memory_path: PathBuf) -> Self {
        Self { sessions, report_dir, memory_path }
    }

    fn capabilities(&self) -> Value {
        json!({
            "tools": {"listChanged": true},
            "resources": {"listChanged": true},
            "transports": ["stdio", "sse"],
        })
    }

    /// Parse and dispatch one JSON-RPC request, never panicking: parse
    /// failures and unknown methods become JSON-RPC error responses rather
    /// than propagated errors.
    #[instrument(skip(self, payload))]
    pub async fn handle_request(&self, payload: &Value) -> MCPResponse {
        let request: MCPRequest = match serde_json::from_value(payload.clone()) {
            Ok(req) => req,
            Err(err) => {
                warn!(%err, "mcp_request_parse_failed");
                return MCPResponse::err(None, PARSE_ERROR, format!("invalid request: {err}"));
            }
        };
        let id = request.id.clone();
        match self.dispatch(request).await {
            Ok(result) => MCPResponse::ok(id, result),
            Err(DispatchError::InvalidParams(msg)) => MCPResponse::err(id, INVALID_PARAMS, msg),
            Err(DispatchError::MethodNotFound(method)) => {
                MCPResponse::err(id, METHOD_NOT_FOUND, format!("unknown method: {method}"))
            }
            Err(DispatchError::Internal(msg)) => MCPResponse::err(id, INTERNAL_ERROR, msg),
        }
    }

    async fn dispatch(&self, request: MCPRequest) -> Result<Value, DispatchError> {
        match request.method.as_str() {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": {
                    "name": "research-agent",
                    "version": env!("CARGO_PKG_VERSION"),
                    "capabilities": self.capabilities(),
                },
            })),
            "tools/list" => Ok(json!({ "tools": advertised_tools() })),
            "tools/call" => self.call_tool(request.params).await,
            "resources/list" => Ok(self.list_resources(&request.params)),
            "resources/read" => self.read_resource(&request.params).await,
            other => Err(DispatchError::MethodNotFound(other.to_string())),
        }
    }

    async fn call_tool(&self, params: Value) -> Result<Value, DispatchError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| DispatchError::InvalidParams("missing tool name".to_string()))?;
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        match name {
            "research" => self.tool_research(arguments).await,
            "recall" => self.tool_recall(arguments),
            "evaluate" => self.tool_evaluate(arguments),
            "status" => self.tool_status(arguments),
            other => Err(DispatchError::InvalidParams(format!("unknown tool: {other}"))),
        }
    }

    async fn tool_research(&self, arguments: Value) -> Result<Value, DispatchError> {
        let query = arguments
            .get("query")
            .and_then(Value::as_str)
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| DispatchError::InvalidParams("query must not be empty".to_string()))?;
        let budget = arguments.get("budget").and_then(Value::as_f64).unwrap_or(2.0);

        let record = self
            .sessions
            .submit(query.to_string(), budget)
            .await
            .map_err(|err: SessionManagerError| DispatchError::Internal(err.to_string()))?;

        Ok(json!({
            "session_id": record.session_id,
            "status": format!("{:?}", record.status).to_uppercase(),
        }))
    }

    fn tool_recall(&self, arguments: Value) -> Result<Value, DispatchError> {
        let query = arguments
            .get("query")
            .and_then(Value::as_str)
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| DispatchError::InvalidParams("query must not be empty".to_string()))?;
        let max_results = arguments
            .get("max_results")
            .and_then(Value::as_u64)
            .unwrap_or(5) as usize;

        let entries = self.search_memory_lines(query, max_results);
        Ok(json!({ "entries": entries }))
    }

    fn search_memory_lines(&self, query: &str, max_results: usize) -> Vec<Value> {
        let Ok(raw) = std::fs::read_to_string(&self.memory_path) else {
            return Vec::new();
        };
        let needle = query.to_lowercase();
        raw.lines()
            .filter(|line| line.to_lowercase().contains(&needle))
            .take(max_results)
            .map(|line| json!({ "match": line.trim() }))
            .collect()
    }

    fn tool_evaluate(&self, arguments: Value) -> Result<Value, DispatchError> {
        let report = arguments
            .get("report")
            .and_then(Value::as_str)
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| DispatchError::InvalidParams("report must not be empty".to_string()))?;

        let words = report.split_whitespace().count() as f64;
        let citation_count = report.matches('[').count() as f64;
        let base = (words / 1500.0).min(1.0);
        let citation_bonus = (citation_count / 20.0).min(0.2);
        let score = (base + citation_bonus).min(1.0);

        Ok(json!({
            "score": (score * 1000.0).round() / 1000.0,
            "rationale": "Heuristic evaluation based on report length and citation density.",
        }))
    }

    fn tool_status(&self, arguments: Value) -> Result<Value, DispatchError> {
        let session_id = arguments
            .get("session_id")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| DispatchError::InvalidParams("missing session_id".to_string()))?;

        match self.sessions.get(session_id) {
            Some(record) => Ok(json!({
                "status": format!("{:?}", record.status).to_uppercase(),
                "progress": record.progress,
                "cost_usd": record.cost_usd,
            })),
            None => Ok(json!({ "status": "UNKNOWN", "progress": 0.0, "cost_usd": 0.0 })),
        }
    }

    fn list_resources(&self, params: &Value) -> Value {
        let prefix = params.get("uri_prefix").and_then(Value::as_str);
        let page = params.get("page").and_then(Value::as_u64).unwrap_or(1).max(1) as usize;
        let page_size = params.get("page_size").and_then(Value::as_u64).unwrap_or(20).max(1) as usize;

        let resources: Vec<_> = advertised_resources()
            .into_iter()
            .filter(|r| prefix.is_none_or(|p| r.uri.starts_with(p)))
            .collect();

        let start = (page - 1) * page_size;
        let end = (start + page_size).min(resources.len());
        let slice = if start < resources.len() { &resources[start..end] } else { &[] };
        let next_page = if end < resources.len() { Some(page + 1) } else { None };

        json!({ "items": slice, "page": page, "page_size": page_size, "next_page": next_page })
    }

    async fn read_resource(&self, params: &Value) -> Result<Value, DispatchError> {
        let uri = params
            .get("uri")
            .and_then(Value::as_str)
            .ok_or_else(|| DispatchError::InvalidParams("missing uri".to_string()))?;
        let page = params.get("page").and_then(Value::as_u64).unwrap_or(1).max(1) as usize;
        let page_size = params.get("page_size").and_then(Value::as_u64).unwrap_or(20).max(1) as usize;

        if uri == "reports://" {
            return Ok(self.list_reports(page, page_size));
        }
        if let Some(filename) = uri.strip_prefix("reports://") {
            return self.read_report_file(filename);
        }
        if uri.starts_with("sessions://") {
            return Ok(self.list_sessions_resource(page, page_size));
        }
        if uri.starts_with("memory://") {
            return Ok(self.list_memory_resource(page, page_size));
        }
        Err(DispatchError::InvalidParams(format!("unknown resource uri: {uri}")))
    }

    fn list_reports(&self, page: usize, page_size: usize) -> Value {
        let mut files: Vec<_> = std::fs::read_dir(&self.report_dir)
            .into_iter()
            .flatten()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "md"))
            .collect();
        files.sort_by_key(|entry| {
            std::cmp::Reverse(
                entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH),
            )
        });

        let names: Vec<String> = files
            .iter()
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        let start = (page - 1) * page_size;
        let end = (start + page_size).min(names.len());
        let slice = if start < names.len() { names[start..end].to_vec() } else { Vec::new() };
        let next_page = if end < names.len() { Some(page + 1) } else { None };

        json!({ "uri": "reports://", "mime_type": "application/json", "content": slice, "page": page, "next_page": next_page })
    }

    fn read_report_file(&self, filename: &str) -> Result<Value, DispatchError> {
        let target = self.report_dir.join(filename);
        let content = std::fs::read_to_string(&target)
            .map_err(|_| DispatchError::InvalidParams(format!("report not found: {filename}")))?;
        Ok(json!({ "uri": format!("reports://{filename}"), "mime_type": "text/markdown", "content": content }))
    }

    fn list_sessions_resource(&self, page: usize, page_size: usize) -> Value {
        let items: Vec<_> = self
            .sessions
            .list()
            .into_iter()
            .map(|record| {
                json!({
                    "session_id": record.session_id,
                    "status": format!("{:?}", record.status).to_uppercase(),
                    "progress": record.progress,
                    "cost_usd": record.cost_usd,
                })
            })
            .collect();
        let start = (page - 1) * page_size;
        let end = (start + page_size).min(items.len());
        let slice = if start < items.len() { items[start..end].to_vec() } else { Vec::new() };
        let next_page = if end < items.len() { Some(page + 1) } else { None };

        json!({ "uri": "sessions://", "mime_type": "application/json", "content": slice, "page": page, "next_page": next_page })
    }

    fn list_memory_resource(&self, page: usize, page_size: usize) -> Value {
        let items: Vec<Value> = std::fs::read_to_string(&self.memory_path)
            .ok()
            .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
            .and_then(|payload| payload.get("entries").cloned())
            .and_then(|entries| entries.as_array().cloned())
            .unwrap_or_default();

        let start = (page - 1) * page_size;
        let end = (start + page_size).min(items.len());
        let slice = if start < items.len() { items[start..end].to_vec() } else { Vec::new() };
        let next_page = if end < items.len() { Some(page + 1) } else { None };

        json!({ "uri": "memory://", "mime_type": "application/json", "content": slice, "page": page, "next_page": next_page })
    }
}

enum DispatchError {
    InvalidParams(String),
    MethodNotFound(String),
    Internal(String),
}

/// Process a single stdio JSON-RPC request line, returning the serialized
/// response line (mirrors `original_source/mcp/transport.py`'s
/// `run_stdio_once`).
pub async fn run_stdio_once(server: &MCPServer, line: &str) -> Result<String, serde_json::Error> {
    let payload: Value = serde_json::from_str(line)?;
    let response = server.handle_request(&payload).await;
    serde_json::to_string(&response)
}
