//! MCP (Model Context Protocol) Server Implementation
//!
//! Exposes the retrieval engine to MCP clients over stdio, following the
//! JSON-RPC 2.0 specification and MCP protocol version 2025-06-18.

#[cfg(test)]
mod tests;

pub mod protocol;
pub mod server;
pub mod tools;

pub use server::{ConnectionState, McpServer, ToolHandler};
pub use tools::register_tools;
