//! MCP Tools Implementation
//!
//! Tool definitions and handlers exposing ingestion, retrieval and question
//! answering over the engine's collections.

use crate::RagError;
use crate::engine::RagEngine;
use crate::mcp::protocol::{CallToolParams, CallToolResult, Tool};
use crate::mcp::server::{McpServer, ToolHandler};
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error};

/// Largest `k` a client may request
pub const MAX_K: u64 = 100;

/// List collections tool handler
pub struct ListCollectionsHandler {
    engine: Arc<RagEngine>,
}

/// Ingest document tool handler
pub struct IngestDocumentHandler {
    engine: Arc<RagEngine>,
}

/// Query collection tool handler
pub struct QueryCollectionHandler {
    engine: Arc<RagEngine>,
}

/// Answer question tool handler
pub struct AnswerQuestionHandler {
    engine: Arc<RagEngine>,
}

#[derive(Debug, Serialize)]
struct CollectionSummary {
    name: String,
    records: usize,
}

/// Register all retrieval tools on a server
#[inline]
pub async fn register_tools(server: &McpServer, engine: &Arc<RagEngine>) {
    server
        .register_tool(
            ListCollectionsHandler::tool_definition(),
            ListCollectionsHandler::new(Arc::clone(engine)),
        )
        .await;
    server
        .register_tool(
            IngestDocumentHandler::tool_definition(),
            IngestDocumentHandler::new(Arc::clone(engine)),
        )
        .await;
    server
        .register_tool(
            QueryCollectionHandler::tool_definition(),
            QueryCollectionHandler::new(Arc::clone(engine)),
        )
        .await;
    server
        .register_tool(
            AnswerQuestionHandler::tool_definition(),
            AnswerQuestionHandler::new(Arc::clone(engine)),
        )
        .await;
}

impl ListCollectionsHandler {
    #[inline]
    pub fn new(engine: Arc<RagEngine>) -> Self {
        Self { engine }
    }

    /// Create the list_collections tool definition
    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "list_collections".to_string(),
            description: Some("List document collections and their record counts".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for ListCollectionsHandler {
    #[inline]
    async fn handle(&self, _params: CallToolParams) -> Result<CallToolResult> {
        let store = self.engine.store();
        let names = match store.list_collections().await {
            Ok(names) => names,
            Err(e) => return Ok(failure("list collections", &e)),
        };

        let mut collections = Vec::with_capacity(names.len());
        for name in names {
            match store.count(&name).await {
                Ok(records) => collections.push(CollectionSummary { name, records }),
                Err(e) => return Ok(failure("count collection", &e)),
            }
        }

        json_result(&json!({ "collections": collections }))
    }
}

impl IngestDocumentHandler {
    #[inline]
    pub fn new(engine: Arc<RagEngine>) -> Self {
        Self { engine }
    }

    /// Create the ingest_document tool definition
    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "ingest_document".to_string(),
            description: Some(
                "Chunk, embed and store a text document; re-ingesting replaces its passages"
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "collection": {
                        "type": "string",
                        "description": "Target collection (default: configured collection)"
                    },
                    "path": {
                        "type": "string",
                        "description": "Path of the document on the server's filesystem"
                    }
                },
                "required": ["path"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for IngestDocumentHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult> {
        let args = params.arguments.unwrap_or_default();

        let path = match required_str(&args, "path") {
            Ok(path) => path,
            Err(message) => return Ok(CallToolResult::error(message)),
        };
        let collection = match optional_str(&args, "collection") {
            Ok(collection) => collection.unwrap_or_else(|| self.engine.default_collection()),
            Err(message) => return Ok(CallToolResult::error(message)),
        };

        debug!("Ingesting '{}' into '{}'", path, collection);
        match self
            .engine
            .indexer()
            .ingest_path(collection, Path::new(path))
            .await
        {
            Ok(stats) => json_result(&json!({ "collection": collection, "ingested": stats })),
            Err(e) => Ok(failure("ingest document", &e)),
        }
    }
}

impl QueryCollectionHandler {
    #[inline]
    pub fn new(engine: Arc<RagEngine>) -> Self {
        Self { engine }
    }

    /// Create the query_collection tool definition
    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "query_collection".to_string(),
            description: Some("Find the passages most similar to a query".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "collection": {
                        "type": "string",
                        "description": "Collection to search (default: configured collection)"
                    },
                    "query": {
                        "type": "string",
                        "description": "Search query"
                    },
                    "k": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": MAX_K,
                        "description": "Maximum number of passages (default: configured top_k)"
                    }
                },
                "required": ["query"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for QueryCollectionHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult> {
        let args = params.arguments.unwrap_or_default();

        let parsed = required_str(&args, "query").and_then(|query| {
            let collection = optional_str(&args, "collection")?;
            let k = optional_k(&args)?;
            Ok((query, collection, k))
        });
        let (query, collection, k) = match parsed {
            Ok(parsed) => parsed,
            Err(message) => return Ok(CallToolResult::error(message)),
        };
        let collection = collection.unwrap_or_else(|| self.engine.default_collection());

        debug!(
            "Querying '{}': query='{}', k={:?}",
            collection, query, k
        );
        match self.engine.retriever(collection).retrieve(query, k).await {
            Ok(results) => json_result(&json!({ "collection": collection, "results": results })),
            Err(e) => Ok(failure("query collection", &e)),
        }
    }
}

impl AnswerQuestionHandler {
    #[inline]
    pub fn new(engine: Arc<RagEngine>) -> Self {
        Self { engine }
    }

    /// Create the answer_question tool definition
    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "answer_question".to_string(),
            description: Some(
                "Answer a question using only passages retrieved from a collection".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "question": {
                        "type": "string",
                        "description": "Question to answer"
                    },
                    "collection": {
                        "type": "string",
                        "description": "Collection to ground the answer on (default: configured collection)"
                    },
                    "k": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": MAX_K,
                        "description": "Number of passages to retrieve (default: configured top_k)"
                    }
                },
                "required": ["question"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for AnswerQuestionHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult> {
        let args = params.arguments.unwrap_or_default();

        let parsed = required_str(&args, "question").and_then(|question| {
            let collection = optional_str(&args, "collection")?;
            let k = optional_k(&args)?;
            Ok((question, collection, k))
        });
        let (question, collection, k) = match parsed {
            Ok(parsed) => parsed,
            Err(message) => return Ok(CallToolResult::error(message)),
        };
        let collection = collection.unwrap_or_else(|| self.engine.default_collection());

        let orchestrator = match self.engine.orchestrator(collection) {
            Ok(orchestrator) => orchestrator,
            Err(e) => return Ok(failure("build answer pipeline", &e)),
        };
        let k = k.unwrap_or_else(|| orchestrator.top_k());

        match orchestrator.answer_with_k(question, k).await {
            Ok(answer) => json_result(&answer),
            Err(e) => Ok(failure("answer question", &e)),
        }
    }
}

fn required_str<'a>(args: &'a HashMap<String, Value>, name: &str) -> Result<&'a str, String> {
    match args.get(name) {
        Some(Value::String(value)) if !value.trim().is_empty() => Ok(value),
        Some(Value::String(_)) => Err(format!("Parameter '{}' cannot be empty", name)),
        Some(_) => Err(format!("Parameter '{}' must be a string", name)),
        None => Err(format!("Missing required parameter: {}", name)),
    }
}

fn optional_str<'a>(args: &'a HashMap<String, Value>, name: &str) -> Result<Option<&'a str>, String> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => required_str(args, name).map(Some),
    }
}

/// `k` must be a positive integer no larger than `MAX_K`
fn optional_k(args: &HashMap<String, Value>) -> Result<Option<usize>, String> {
    match args.get("k") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .filter(|k| (1..=MAX_K).contains(k))
            .and_then(|k| usize::try_from(k).ok())
            .map(Some)
            .ok_or_else(|| format!("Parameter 'k' must be an integer between 1 and {}", MAX_K)),
    }
}

fn json_result<T: Serialize + ?Sized>(value: &T) -> Result<CallToolResult> {
    Ok(CallToolResult::text(serde_json::to_string_pretty(value)?))
}

fn failure(action: &str, err: &RagError) -> CallToolResult {
    error!("Failed to {}: {}", action, err);
    CallToolResult::error(format!("Failed to {}: {}", action, err))
}
