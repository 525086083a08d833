//! MCP server and tool tests
//!
//! Protocol handling is exercised through `handle_line` and `serve`; tool
//! calls run against a temporary vector store with deterministic adapters.

#[cfg(test)]
mod protocol_tests {
    use crate::mcp::protocol::{JsonRpcMessage, MCP_VERSION, error_codes};
    use crate::mcp::server::{ConnectionState, McpServer};
    use serde_json::{Value, json};

    fn server() -> McpServer {
        McpServer::new("docs-rag".to_string(), "0.1.0".to_string())
            .with_instructions("Answer questions from ingested documents")
    }

    async fn call(server: &McpServer, message: &Value) -> Value {
        let reply = server
            .handle_line(&message.to_string())
            .await
            .expect("request should produce a reply");
        serde_json::to_value(reply).expect("reply should serialize")
    }

    #[tokio::test]
    async fn initialize_negotiates_version() {
        let server = server();

        let reply = call(
            &server,
            &json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": { "name": "test-client", "version": "1.0" }
                }
            }),
        )
        .await;

        assert_eq!(reply["id"], 1);
        assert_eq!(reply["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(reply["result"]["serverInfo"]["name"], "docs-rag");
        assert_eq!(
            reply["result"]["instructions"],
            "Answer questions from ingested documents"
        );
        assert!(reply["result"]["capabilities"]["tools"].is_object());
        assert_eq!(server.connection_state().await, ConnectionState::Initializing);
    }

    #[tokio::test]
    async fn initialize_offers_latest_for_unknown_version() {
        let server = server();

        let reply = call(
            &server,
            &json!({
                "jsonrpc": "2.0",
                "id": "init",
                "method": "initialize",
                "params": {
                    "protocolVersion": "1999-01-01",
                    "clientInfo": { "name": "old-client", "version": "0.1" }
                }
            }),
        )
        .await;

        assert_eq!(reply["id"], "init");
        assert_eq!(reply["result"]["protocolVersion"], MCP_VERSION);
    }

    #[tokio::test]
    async fn initialized_notification_has_no_reply() {
        let server = server();

        let reply = server
            .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;

        assert!(reply.is_none());
        assert_eq!(server.connection_state().await, ConnectionState::Ready);
    }

    #[tokio::test]
    async fn ping_returns_empty_result() {
        let server = server();

        let reply = call(&server, &json!({"jsonrpc": "2.0", "id": 7, "method": "ping"})).await;

        assert_eq!(reply["result"], json!({}));
    }

    #[tokio::test]
    async fn unknown_method_not_found() {
        let server = server();

        let reply = call(
            &server,
            &json!({"jsonrpc": "2.0", "id": 2, "method": "resources/list"}),
        )
        .await;

        assert_eq!(reply["error"]["code"], error_codes::METHOD_NOT_FOUND);
        assert_eq!(reply["id"], 2);
    }

    #[tokio::test]
    async fn malformed_json_is_parse_error() {
        let server = server();

        let reply = server
            .handle_line("{not json")
            .await
            .expect("parse errors are reported");

        match reply {
            JsonRpcMessage::ErrorResponse(response) => {
                assert_eq!(response.error.code, error_codes::PARSE_ERROR);
                assert!(response.id.is_none());
            }
            other => panic!("expected error response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_jsonrpc_marker_rejected() {
        let server = server();

        let reply = call(&server, &json!({"id": 3, "method": "ping"})).await;

        assert_eq!(reply["error"]["code"], error_codes::INVALID_REQUEST);
        assert_eq!(reply["id"], 3);
    }

    #[tokio::test]
    async fn unknown_tool_is_invalid_params() {
        let server = server();

        let reply = call(
            &server,
            &json!({
                "jsonrpc": "2.0",
                "id": 4,
                "method": "tools/call",
                "params": { "name": "search_web", "arguments": {} }
            }),
        )
        .await;

        assert_eq!(reply["error"]["code"], error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn serve_answers_each_request_line() {
        let server = server();
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            "\n"
        );
        let mut output = Vec::new();

        server
            .serve(input.as_bytes(), &mut output)
            .await
            .expect("should serve until EOF");

        let replies: Vec<Value> = String::from_utf8(output)
            .expect("output should be utf-8")
            .lines()
            .map(|line| serde_json::from_str(line).expect("each line is JSON"))
            .collect();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["id"], 1);
        assert_eq!(replies[1]["id"], 2);
        assert_eq!(replies[1]["result"]["tools"], json!([]));
        assert_eq!(server.connection_state().await, ConnectionState::Closed);
    }
}

#[cfg(test)]
mod tool_definition_tests {
    use crate::mcp::tools::{
        AnswerQuestionHandler, IngestDocumentHandler, ListCollectionsHandler,
        QueryCollectionHandler,
    };

    #[test]
    fn list_collections_tool_definition() {
        let tool = ListCollectionsHandler::tool_definition();

        assert_eq!(tool.name, "list_collections");
        assert!(
            tool.input_schema["properties"]
                .as_object()
                .expect("has properties")
                .is_empty()
        );
    }

    #[test]
    fn ingest_document_tool_definition() {
        let tool = IngestDocumentHandler::tool_definition();
        let schema = tool.input_schema;

        assert_eq!(tool.name, "ingest_document");
        assert_eq!(schema["properties"]["path"]["type"], "string");
        assert_eq!(schema["properties"]["collection"]["type"], "string");
        let required = schema["required"].as_array().expect("has required array");
        assert_eq!(required.len(), 1);
        assert_eq!(required[0], "path");
    }

    #[test]
    fn query_collection_tool_definition() {
        let tool = QueryCollectionHandler::tool_definition();
        let schema = tool.input_schema;

        assert_eq!(tool.name, "query_collection");
        assert_eq!(schema["properties"]["k"]["type"], "integer");
        assert_eq!(schema["properties"]["k"]["minimum"], 1);
        assert_eq!(schema["required"][0], "query");
    }

    #[test]
    fn answer_question_tool_definition() {
        let tool = AnswerQuestionHandler::tool_definition();
        let schema = tool.input_schema;

        assert_eq!(tool.name, "answer_question");
        assert_eq!(schema["properties"]["question"]["type"], "string");
        assert_eq!(schema["required"][0], "question");
    }
}

#[cfg(test)]
mod tool_call_tests {
    use crate::config::Config;
    use crate::database::VectorStore;
    use crate::engine::RagEngine;
    use crate::mcp::protocol::{CallToolParams, CallToolResult, ToolContent};
    use crate::mcp::server::{McpServer, ToolHandler};
    use crate::mcp::tools::{
        AnswerQuestionHandler, IngestDocumentHandler, ListCollectionsHandler,
        QueryCollectionHandler, register_tools,
    };
    use crate::testing::{KeywordEmbedder, RecordingGenerator};
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    const VOCABULARY: &[&str] = &["paris", "france", "berlin", "germany", "capital"];

    struct Fixture {
        engine: Arc<RagEngine>,
        generator: Arc<RecordingGenerator>,
        temp_dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let config = Config::with_base_dir(temp_dir.path());
        let store = VectorStore::new(&config)
            .await
            .expect("should open vector store");
        let generator = Arc::new(RecordingGenerator::new("Paris."));
        let engine = RagEngine::from_parts(
            config,
            Arc::new(store),
            Arc::new(KeywordEmbedder::new(VOCABULARY)),
            Arc::clone(&generator) as Arc<dyn crate::rag::Generate>,
        );
        Fixture {
            engine: Arc::new(engine),
            generator,
            temp_dir,
        }
    }

    fn params(name: &str, arguments: Value) -> CallToolParams {
        let arguments: HashMap<String, Value> =
            serde_json::from_value(arguments).expect("arguments should be an object");
        CallToolParams {
            name: name.to_string(),
            arguments: Some(arguments),
        }
    }

    fn text(result: &CallToolResult) -> &str {
        match &result.content[0] {
            ToolContent::Text { text } => text,
        }
    }

    fn payload(result: &CallToolResult) -> Value {
        assert_eq!(result.is_error, Some(false), "tool failed: {}", text(result));
        serde_json::from_str(text(result)).expect("tool output should be JSON")
    }

    async fn ingest(fixture: &Fixture, collection: &str) {
        let path = fixture.temp_dir.path().join("capitals.txt");
        fs::write(
            &path,
            "Paris is the capital of France.\x0cBerlin is the capital of Germany.",
        )
        .expect("should write document");

        let result = IngestDocumentHandler::new(Arc::clone(&fixture.engine))
            .handle(params(
                "ingest_document",
                json!({ "collection": collection, "path": path.to_string_lossy() }),
            ))
            .await
            .expect("handler should not fail");
        let ingested = payload(&result);
        assert_eq!(ingested["collection"], collection);
        assert_eq!(ingested["ingested"]["pages"], 2);
    }

    #[tokio::test]
    async fn list_collections_reports_counts() {
        let fixture = fixture().await;
        ingest(&fixture, "capitals").await;

        let result = ListCollectionsHandler::new(Arc::clone(&fixture.engine))
            .handle(params("list_collections", json!({})))
            .await
            .expect("handler should not fail");

        let listed = payload(&result);
        assert_eq!(listed["collections"][0]["name"], "capitals");
        assert_eq!(listed["collections"][0]["records"], 2);
    }

    #[tokio::test]
    async fn list_collections_empty_store() {
        let fixture = fixture().await;

        let result = ListCollectionsHandler::new(Arc::clone(&fixture.engine))
            .handle(CallToolParams {
                name: "list_collections".to_string(),
                arguments: None,
            })
            .await
            .expect("handler should not fail");

        assert_eq!(payload(&result)["collections"], json!([]));
    }

    #[tokio::test]
    async fn query_returns_ranked_passages() {
        let fixture = fixture().await;
        ingest(&fixture, "capitals").await;

        let result = QueryCollectionHandler::new(Arc::clone(&fixture.engine))
            .handle(params(
                "query_collection",
                json!({ "collection": "capitals", "query": "Berlin, Germany", "k": 1 }),
            ))
            .await
            .expect("handler should not fail");

        let found = payload(&result);
        let results = found["results"].as_array().expect("results array");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["text"], "Berlin is the capital of Germany.");
        assert_eq!(results[0]["metadata"]["page_index"], 1);
    }

    #[tokio::test]
    async fn query_defaults_to_configured_collection() {
        let fixture = fixture().await;
        let default = fixture.engine.default_collection().to_string();
        ingest(&fixture, &default).await;

        let result = QueryCollectionHandler::new(Arc::clone(&fixture.engine))
            .handle(params("query_collection", json!({ "query": "Paris" })))
            .await
            .expect("handler should not fail");

        assert_eq!(payload(&result)["collection"], default);
    }

    #[tokio::test]
    async fn query_rejects_invalid_k() {
        let fixture = fixture().await;
        let handler = QueryCollectionHandler::new(Arc::clone(&fixture.engine));

        for k in [json!(0), json!(-2), json!("three"), json!(1000)] {
            let result = handler
                .handle(params("query_collection", json!({ "query": "Paris", "k": k })))
                .await
                .expect("handler should not fail");

            assert_eq!(result.is_error, Some(true));
            assert!(text(&result).contains("'k'"));
        }
    }

    #[tokio::test]
    async fn query_missing_collection_is_tool_error() {
        let fixture = fixture().await;

        let result = QueryCollectionHandler::new(Arc::clone(&fixture.engine))
            .handle(params(
                "query_collection",
                json!({ "collection": "nowhere", "query": "Paris" }),
            ))
            .await
            .expect("handler should not fail");

        assert_eq!(result.is_error, Some(true));
        assert!(text(&result).contains("nowhere"));
    }

    #[tokio::test]
    async fn ingest_requires_path() {
        let fixture = fixture().await;

        let result = IngestDocumentHandler::new(Arc::clone(&fixture.engine))
            .handle(params("ingest_document", json!({ "collection": "capitals" })))
            .await
            .expect("handler should not fail");

        assert_eq!(result.is_error, Some(true));
        assert_eq!(text(&result), "Missing required parameter: path");
    }

    #[tokio::test]
    async fn answer_question_grounds_prompt() {
        let fixture = fixture().await;
        ingest(&fixture, "capitals").await;

        let result = AnswerQuestionHandler::new(Arc::clone(&fixture.engine))
            .handle(params(
                "answer_question",
                json!({
                    "question": "What is the capital of France?",
                    "collection": "capitals",
                    "k": 1
                }),
            ))
            .await
            .expect("handler should not fail");

        let answer = payload(&result);
        assert_eq!(answer["answer_text"], "Paris.");
        assert_eq!(
            answer["retrieved_context"][0]["text"],
            "Paris is the capital of France."
        );
        let prompts = fixture.generator.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Paris is the capital of France."));
        assert!(!prompts[0].contains("Berlin"));
    }

    #[tokio::test]
    async fn answer_question_empty_question_rejected() {
        let fixture = fixture().await;

        let result = AnswerQuestionHandler::new(Arc::clone(&fixture.engine))
            .handle(params("answer_question", json!({ "question": "   " })))
            .await
            .expect("handler should not fail");

        assert_eq!(result.is_error, Some(true));
        assert!(fixture.generator.prompts().is_empty());
    }

    #[tokio::test]
    async fn registered_tools_listed_in_order() {
        let fixture = fixture().await;
        let server = McpServer::new("docs-rag".to_string(), "0.1.0".to_string());
        register_tools(&server, &fixture.engine).await;

        let reply = server
            .handle_line(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#)
            .await
            .expect("request should produce a reply");
        let reply = serde_json::to_value(reply).expect("reply should serialize");

        let names: Vec<&str> = reply["result"]["tools"]
            .as_array()
            .expect("tools array")
            .iter()
            .filter_map(|tool| tool["name"].as_str())
            .collect();
        assert_eq!(
            names,
            vec![
                "answer_question",
                "ingest_document",
                "list_collections",
                "query_collection"
            ]
        );
    }

    #[tokio::test]
    async fn tool_error_reported_through_server() {
        let fixture = fixture().await;
        let server = McpServer::new("docs-rag".to_string(), "0.1.0".to_string());
        register_tools(&server, &fixture.engine).await;

        let reply = server
            .handle_line(
                &json!({
                    "jsonrpc": "2.0",
                    "id": 9,
                    "method": "tools/call",
                    "params": { "name": "query_collection", "arguments": { "query": "x", "k": 0 } }
                })
                .to_string(),
            )
            .await
            .expect("request should produce a reply");
        let reply = serde_json::to_value(reply).expect("reply should serialize");

        assert!(reply.get("error").is_none());
        assert_eq!(reply["result"]["isError"], true);
    }
}
