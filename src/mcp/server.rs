//! MCP Server Implementation
//!
//! Line-delimited JSON-RPC over any async reader/writer pair, with tool
//! registration and request routing.

use crate::mcp::protocol::{
    CallToolParams, CallToolResult, Implementation, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcErrorResponse, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, JSONRPC_VERSION, ListToolsResult, MCP_VERSION, RequestId,
    SUPPORTED_PROTOCOL_VERSIONS, ServerCapabilities, Tool, ToolsCapability,
};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// MCP Server state and configuration
pub struct McpServer {
    /// Server implementation information
    pub server_info: Implementation,
    /// Server capabilities
    pub capabilities: ServerCapabilities,
    instructions: Option<String>,
    tools: RwLock<HashMap<String, RegisteredTool>>,
    connection_state: RwLock<ConnectionState>,
}

struct RegisteredTool {
    definition: Tool,
    handler: Box<dyn ToolHandler>,
}

/// Connection state tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

/// Tool handler trait for implementing tool execution
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult>;
}

impl McpServer {
    /// Create a new MCP server
    #[inline]
    pub fn new(name: String, version: String) -> Self {
        Self {
            server_info: Implementation { name, version },
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
            },
            instructions: None,
            tools: RwLock::new(HashMap::new()),
            connection_state: RwLock::new(ConnectionState::Uninitialized),
        }
    }

    /// Text sent to clients in the initialize result
    #[inline]
    pub fn with_instructions(mut self, instructions: &str) -> Self {
        self.instructions = Some(instructions.to_string());
        self
    }

    /// Register a tool with the server
    #[inline]
    pub async fn register_tool<H>(&self, tool: Tool, handler: H)
    where
        H: ToolHandler + 'static,
    {
        let tool_name = tool.name.clone();
        self.tools.write().await.insert(
            tool_name.clone(),
            RegisteredTool {
                definition: tool,
                handler: Box::new(handler),
            },
        );
        debug!("Registered tool: {}", tool_name);
    }

    /// Start the server using stdio transport
    #[inline]
    pub async fn serve_stdio(&self) -> Result<()> {
        info!("Starting MCP server with stdio transport");
        self.serve(BufReader::new(io::stdin()), io::stdout()).await
    }

    /// Answer every line read from `reader` until EOF
    #[inline]
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let mut lines = reader.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if let Some(reply) = self.handle_line(line).await {
                        send_message(&mut writer, &reply).await?;
                    }
                }
                Ok(None) => {
                    info!("EOF reached, closing connection");
                    break;
                }
                Err(e) => {
                    error!("Error reading from input: {}", e);
                    break;
                }
            }
        }

        *self.connection_state.write().await = ConnectionState::Closed;
        info!("MCP server stopped");
        Ok(())
    }

    /// Process one raw message; requests produce a reply, notifications do not
    #[inline]
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcMessage> {
        let raw_value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                error!("Failed to parse JSON: {}", e);
                return Some(error_message(JsonRpcError::parse_error(), None));
            }
        };

        let id = raw_value
            .get("id")
            .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());

        if raw_value.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            warn!("Rejected message without jsonrpc 2.0 marker");
            return Some(error_message(JsonRpcError::invalid_request(), id));
        }

        match serde_json::from_value::<JsonRpcMessage>(raw_value) {
            Ok(JsonRpcMessage::Request(request)) => Some(self.handle_request(request).await),
            Ok(JsonRpcMessage::Notification(notification)) => {
                self.handle_notification(&notification).await;
                None
            }
            Ok(JsonRpcMessage::Response(_) | JsonRpcMessage::ErrorResponse(_)) => {
                warn!("Received unexpected response message from client");
                None
            }
            Err(e) => {
                error!("Message validation failed: {}", e);
                Some(error_message(JsonRpcError::invalid_request(), id))
            }
        }
    }

    /// Get current connection state
    #[inline]
    pub async fn connection_state(&self) -> ConnectionState {
        *self.connection_state.read().await
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcMessage {
        debug!("Handling request: {}", request.method);

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params).await,
            "ping" => Ok(serde_json::json!({})),
            "tools/list" => self.handle_list_tools().await,
            "tools/call" => self.handle_call_tool(request.params).await,
            _ => Err(JsonRpcError::method_not_found()),
        };

        match result {
            Ok(result) => JsonRpcMessage::Response(JsonRpcResponse::new(result, request.id)),
            Err(e) => {
                warn!("Request {} failed: {}", request.method, e.message);
                error_message(e, Some(request.id))
            }
        }
    }

    async fn handle_notification(&self, notification: &JsonRpcNotification) {
        match notification.method.as_str() {
            "notifications/initialized" | "initialized" => {
                *self.connection_state.write().await = ConnectionState::Ready;
                info!("Server ready to handle requests");
            }
            "notifications/cancelled" => debug!("Received cancellation notification"),
            _ => warn!("Unknown notification method: {}", notification.method),
        }
    }

    async fn handle_initialize(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: InitializeParams = parse_params(params)?;

        let protocol_version = if SUPPORTED_PROTOCOL_VERSIONS.contains(&params.protocol_version.as_str())
        {
            params.protocol_version
        } else {
            warn!(
                "Client requested unsupported protocol version {}, offering {}",
                params.protocol_version, MCP_VERSION
            );
            MCP_VERSION.to_string()
        };

        *self.connection_state.write().await = ConnectionState::Initializing;

        let result = InitializeResult {
            protocol_version,
            capabilities: self.capabilities.clone(),
            server_info: self.server_info.clone(),
            instructions: self.instructions.clone(),
        };

        info!("Client initialized: {}", params.client_info.name);
        to_value(&result)
    }

    async fn handle_list_tools(&self) -> Result<Value, JsonRpcError> {
        let tools = self.tools.read().await;
        let mut definitions: Vec<Tool> = tools
            .values()
            .map(|registered| registered.definition.clone())
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));

        to_value(&ListToolsResult { tools: definitions })
    }

    async fn handle_call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: CallToolParams = parse_params(params)?;

        let tools = self.tools.read().await;
        let registered = tools.get(&params.name).ok_or_else(|| {
            JsonRpcError::invalid_params(format!("Unknown tool: {}", params.name))
        })?;

        debug!("Calling tool: {}", params.name);
        let result = registered.handler.handle(params).await.map_err(|e| {
            error!("Tool execution failed: {:#}", e);
            JsonRpcError::internal_error(e.to_string())
        })?;

        to_value(&result)
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> Result<T, JsonRpcError> {
    let params = params
        .ok_or_else(|| JsonRpcError::invalid_params("Missing parameters"))?;
    serde_json::from_value(params).map_err(|e| JsonRpcError::invalid_params(e.to_string()))
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal_error(e.to_string()))
}

fn error_message(error: JsonRpcError, id: Option<RequestId>) -> JsonRpcMessage {
    JsonRpcMessage::ErrorResponse(JsonRpcErrorResponse::new(error, id))
}

/// Send a message to the client
async fn send_message<W>(writer: &mut W, message: &JsonRpcMessage) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let json = serde_json::to_string(message)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
