//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the appropriate implementations.
use std::sync::Arc;

use crate::tools::cache::{clear_impl, stats_impl};
use crate::tools::{ParseUrlParams, parse_impl};

use pagesift_client::Orchestrator;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

/// The main MCP server handler for pagesift.
#[derive(Clone)]
pub struct PagesiftServer {
    tool_router: ToolRouter<Self>,
    orchestrator: Arc<Orchestrator>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl PagesiftServer {
    /// Create a new server handler around a shared pipeline.
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { tool_router: Self::tool_router(), orchestrator }
    }

    /// Render a URL and extract a structured record.
    #[tool(
        description = "Render a web page and extract a structured record (detail article, list of items, or unknown). Optional page_type forces list/detail, schema names the exact fields to extract, force_refresh skips the cache."
    )]
    async fn parse_url(
        &self, params: Parameters<ParseUrlParams>, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        parse_impl(&self.orchestrator, params.0, &context.ct).await
    }

    /// Report result cache statistics.
    #[tool(description = "Get result cache statistics: entry count, TTL in seconds, and whether entries are persisted.")]
    async fn cache_stats(&self) -> Result<CallToolResult, McpError> {
        stats_impl(self.orchestrator.cache())
    }

    /// Drop every cached result.
    #[tool(description = "Clear all cached extraction results, in memory and on disk.")]
    async fn cache_clear(&self) -> Result<CallToolResult, McpError> {
        clear_impl(self.orchestrator.cache()).await
    }
}

impl ServerHandler for PagesiftServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "pagesift".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(
                "Use parse_url to turn a web page into a structured record. Results are cached; use cache_stats and cache_clear to inspect or reset the cache.".into(),
            ),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
