//! MCP client — JSON-RPC 2.0 over streamable HTTP/SSE or a stdio child process.

use crate::auth::Authentication;
use crate::endpoint::Endpoint;
use crate::McpError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

const PROTOCOL_VERSION: &str = "2024-11-05";
const SESSION_HEADER: &str = "mcp-session-id";

/// A connected, initialized MCP client.
pub struct McpClient {
    name: String,
    request_id: AtomicI64,
    timeout: Duration,
    conn: Connection,
    server: ServerInfo,
}

enum Connection {
    Http(HttpConnection),
    Stdio(Mutex<StdioProcess>),
}

struct HttpConnection {
    client: HttpClient,
    url: url::Url,
    session_id: Mutex<Option<String>>,
}

struct StdioProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl McpClient {
    /// Open the transport and run the `initialize` handshake.
    pub async fn connect(
        name: impl Into<String>,
        endpoint: &Endpoint,
        auth: Option<&Authentication>,
        timeout: Duration,
    ) -> Result<Self, McpError> {
        let name = name.into();
        let conn = match endpoint {
            Endpoint::Http { url } | Endpoint::Sse { url } => {
                let client = HttpClient::builder()
                    .timeout(timeout)
                    .default_headers(auth_headers(auth)?)
                    .build()
                    .map_err(|e| McpError::Client(format!("failed to create HTTP client: {e}")))?;
                Connection::Http(HttpConnection {
                    client,
                    url: url.clone(),
                    session_id: Mutex::new(None),
                })
            }
            Endpoint::Stdio { command, args } => {
                let mut child = Command::new(command)
                    .args(args)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::inherit())
                    .kill_on_drop(true)
                    .spawn()
                    .map_err(|e| McpError::Client(format!("failed to spawn `{command}`: {e}")))?;
                let stdin = child
                    .stdin
                    .take()
                    .ok_or_else(|| McpError::Client("failed to get stdin".into()))?;
                let stdout = child
                    .stdout
                    .take()
                    .ok_or_else(|| McpError::Client("failed to get stdout".into()))?;
                Connection::Stdio(Mutex::new(StdioProcess {
                    child,
                    stdin,
                    stdout: BufReader::new(stdout),
                }))
            }
        };

        let mut client = Self {
            name,
            request_id: AtomicI64::new(1),
            timeout,
            conn,
            server: ServerInfo::default(),
        };

        let result = client
            .request(
                "initialize",
                serde_json::json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {"name": "waypoint", "version": env!("CARGO_PKG_VERSION")}
                }),
            )
            .await?;
        client.server = ServerInfo {
            name: result
                .pointer("/serverInfo/name")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string(),
            version: result
                .pointer("/serverInfo/version")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string(),
        };
        client.notify("notifications/initialized").await?;

        tracing::info!(mcp = %client.name, server = %client.server.name, "MCP connected");
        Ok(client)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server(&self) -> &ServerInfo {
        &self.server
    }

    fn next_id(&self) -> i64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: self.next_id(),
            method: method.into(),
            params,
        };
        tracing::debug!(mcp = %self.name, method, id = request.id, "MCP request");
        match &self.conn {
            Connection::Http(http) => http.request(&request).await,
            Connection::Stdio(process) => {
                let mut process = process.lock().await;
                tokio::time::timeout(self.timeout, process.request(&request))
                    .await
                    .map_err(|_| McpError::Client(format!("{method} timed out")))?
            }
        }
    }

    async fn notify(&self, method: &str) -> Result<(), McpError> {
        let notification = serde_json::json!({"jsonrpc": "2.0", "method": method});
        match &self.conn {
            Connection::Http(http) => http.notify(&notification).await,
            Connection::Stdio(process) => process.lock().await.write_line(&notification).await,
        }
    }

    /// List tools available on the remote server.
    pub async fn list_tools(&self) -> Result<Vec<RemoteTool>, McpError> {
        let response = self.request("tools/list", serde_json::json!({})).await?;
        let tools = response
            .get("tools")
            .and_then(|t| t.as_array())
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|t| {
                Some(RemoteTool {
                    name: t.get("name")?.as_str()?.to_string(),
                    description: t
                        .get("description")
                        .and_then(|d| d.as_str())
                        .unwrap_or("")
                        .to_string(),
                    input_schema: t.get("inputSchema").cloned().unwrap_or(serde_json::json!({})),
                })
            })
            .collect();
        Ok(tools)
    }

    /// Call a tool on the remote server.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        let response = self
            .request(
                "tools/call",
                serde_json::json!({"name": name, "arguments": arguments}),
            )
            .await?;
        tool_call_output(response)
    }

    pub async fn shutdown(self) {
        if let Connection::Stdio(process) = self.conn {
            let mut process = process.into_inner();
            if let Err(e) = process.child.kill().await {
                tracing::debug!(error = %e, "MCP child already exited");
            }
        }
    }
}

fn auth_headers(auth: Option<&Authentication>) -> Result<HeaderMap, McpError> {
    let mut headers = HeaderMap::new();
    for (name, value) in auth.map(|a| a.headers()).unwrap_or_default() {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| McpError::Auth(format!("invalid header name `{name}`: {e}")))?;
        let mut value = HeaderValue::from_str(&value)
            .map_err(|e| McpError::Auth(format!("invalid header value for `{name}`: {e}")))?;
        value.set_sensitive(true);
        headers.insert(name, value);
    }
    Ok(headers)
}

impl HttpConnection {
    async fn request(&self, request: &JsonRpcRequest) -> Result<serde_json::Value, McpError> {
        let mut builder = self
            .client
            .post(self.url.clone())
            .header("Accept", "application/json, text/event-stream")
            .json(request);
        if let Some(session) = self.session_id.lock().await.as_ref() {
            builder = builder.header(SESSION_HEADER, session);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| McpError::Client(format!("HTTP request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(McpError::Client(format!(
                "HTTP request failed with status: {}",
                response.status()
            )));
        }
        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock().await = Some(session.to_string());
        }

        let body = response
            .text()
            .await
            .map_err(|e| McpError::Client(format!("failed to read response: {e}")))?;
        parse_rpc_body(&body, request.id)
    }

    async fn notify(&self, notification: &serde_json::Value) -> Result<(), McpError> {
        let mut builder = self.client.post(self.url.clone()).json(notification);
        if let Some(session) = self.session_id.lock().await.as_ref() {
            builder = builder.header(SESSION_HEADER, session);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| McpError::Client(format!("notification failed: {e}")))?;
        if !response.status().is_success() {
            return Err(McpError::Client(format!(
                "notification failed with status: {}",
                response.status()
            )));
        }
        Ok(())
    }
}

impl StdioProcess {
    async fn write_line(&mut self, message: &impl Serialize) -> Result<(), McpError> {
        let mut line = serde_json::to_string(message)
            .map_err(|e| McpError::Client(format!("JSON serialization error: {e}")))?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::Client(format!("failed to write to stdin: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| McpError::Client(format!("failed to flush stdin: {e}")))
    }

    /// Skips server notifications and log lines until the matching response.
    async fn request(&mut self, request: &JsonRpcRequest) -> Result<serde_json::Value, McpError> {
        self.write_line(request).await?;
        loop {
            let mut line = String::new();
            let read = self
                .stdout
                .read_line(&mut line)
                .await
                .map_err(|e| McpError::Client(format!("failed to read from stdout: {e}")))?;
            if read == 0 {
                return Err(McpError::Client("MCP server closed stdout".into()));
            }
            if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(line.trim()) {
                if response.id == Some(request.id) {
                    return response.into_result();
                }
            }
        }
    }
}

/// Extract the JSON-RPC result for `id` from a plain JSON or SSE body.
pub fn parse_rpc_body(body: &str, id: i64) -> Result<serde_json::Value, McpError> {
    for line in body.lines() {
        if let Some(data) = line.strip_prefix("data:") {
            if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(data.trim()) {
                if response.id == Some(id) {
                    return response.into_result();
                }
            }
        }
    }

    let response: JsonRpcResponse = serde_json::from_str(body.trim())
        .map_err(|e| McpError::Client(format!("invalid JSON-RPC response: {e}")))?;
    response.into_result()
}

/// `tools/call` returns `{content: [...], isError?}`; text parts are joined,
/// and a lone JSON text part is decoded.
pub fn tool_call_output(response: serde_json::Value) -> Result<serde_json::Value, McpError> {
    let texts: Vec<&str> = response
        .get("content")
        .and_then(|c| c.as_array())
        .map(|items| {
            items
                .iter()
                .filter(|i| i.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|i| i.get("text").and_then(|t| t.as_str()))
                .collect()
        })
        .unwrap_or_default();

    if response.get("isError").and_then(|v| v.as_bool()) == Some(true) {
        return Err(McpError::ToolFailed(texts.join("\n")));
    }
    if let Some(structured) = response.get("structuredContent") {
        return Ok(structured.clone());
    }
    match texts.as_slice() {
        [] => Ok(response),
        [single] => Ok(serde_json::from_str(single)
            .unwrap_or_else(|_| serde_json::Value::String(single.to_string()))),
        many => Ok(serde_json::Value::String(many.join("\n"))),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    id: i64,
    method: String,
    params: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    fn into_result(self) -> Result<serde_json::Value, McpError> {
        if let Some(error) = self.error {
            return Err(McpError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        self.result
            .ok_or_else(|| McpError::Client("no result in response".into()))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteTool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}
