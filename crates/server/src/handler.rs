//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the appropriate implementations.
use crate::tools::{
    cache::{self, CachePurgeParams},
    context::{self, GetContextParams, PutContextParams},
    jobs::{self, RunJobParams},
    records::{self, RecordChangeParams},
    related::{self, RelatedTypesParams},
    share::{self, ResolveShareParams, ShareContextParams},
};

use relctx_core::ContextService;
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

/// The main MCP server handler for relctx.
#[derive(Clone)]
pub struct ContextServer {
    service: ContextService,
    tool_router: ToolRouter<Self>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl ContextServer {
    /// Create a new server handler.
    pub fn new(service: ContextService) -> Self {
        Self { service, tool_router: Self::tool_router() }
    }

    #[tool(
        description = "Get cached context for a business record, or for a whole record type when record_id is omitted. Pass known_version to receive 'unchanged' or a delta instead of the full payload. Returns status 'miss' when nothing is cached."
    )]
    async fn get_context(&self, params: Parameters<GetContextParams>) -> Result<CallToolResult, McpError> {
        context::get_impl(&self.service, params.0).await
    }

    #[tool(description = "Store freshly computed context for a record or record type. Returns the new version and checksum.")]
    async fn put_context(&self, params: Parameters<PutContextParams>) -> Result<CallToolResult, McpError> {
        context::put_impl(&self.service, params.0).await
    }

    #[tool(description = "List record types related to the given type, ranked by learned affinity score, with explanations.")]
    async fn get_related_types(&self, params: Parameters<RelatedTypesParams>) -> Result<CallToolResult, McpError> {
        related::related_impl(&self.service, params.0).await
    }

    #[tool(description = "Share a snapshot of the currently cached context. Returns an expiring token.")]
    async fn share_context(&self, params: Parameters<ShareContextParams>) -> Result<CallToolResult, McpError> {
        share::share_impl(&self.service, params.0).await
    }

    #[tool(description = "Resolve a share token to the context snapshot it captured.")]
    async fn resolve_share(&self, params: Parameters<ResolveShareParams>) -> Result<CallToolResult, McpError> {
        share::resolve_impl(&self.service, params.0).await
    }

    #[tool(description = "Report that a record changed. Purges its cached context and its type's aggregate context.")]
    async fn record_mutated(&self, params: Parameters<RecordChangeParams>) -> Result<CallToolResult, McpError> {
        records::mutated_impl(&self.service, params.0).await
    }

    #[tool(description = "Report that a record was deleted. Purges its cached context and its type's aggregate context.")]
    async fn record_deleted(&self, params: Parameters<RecordChangeParams>) -> Result<CallToolResult, McpError> {
        records::deleted_impl(&self.service, params.0).await
    }

    #[tool(
        description = "Run a maintenance job now: access_prune, pattern_aggregation, affinity_refresh, share_sweep or cache_expiry."
    )]
    async fn run_job(&self, params: Parameters<RunJobParams>) -> Result<CallToolResult, McpError> {
        jobs::run_impl(&self.service, params.0).await
    }

    #[tool(description = "Purge cache entries of a record type and/or entries whose TTL has passed.")]
    async fn cache_purge(&self, params: Parameters<CachePurgeParams>) -> Result<CallToolResult, McpError> {
        cache::purge_impl(&self.service, params.0).await
    }

    #[tool(description = "Report the number of cached entries and their compressed and uncompressed sizes.")]
    async fn cache_stats(&self) -> Result<CallToolResult, McpError> {
        cache::stats_impl(&self.service).await
    }
}

impl ServerHandler for ContextServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "relctx".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(
                "Context cache for business records. Call get_context before computing context; on a miss, compute it and store it with put_context.".into(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::service;

    #[tokio::test]
    async fn test_all_tools_registered() {
        let server = ContextServer::new(service().await);
        let mut names: Vec<String> = server
            .tool_router
            .list_all()
            .into_iter()
            .map(|tool| tool.name.to_string())
            .collect();
        names.sort();

        assert_eq!(
            names,
            [
                "cache_purge",
                "cache_stats",
                "get_context",
                "get_related_types",
                "put_context",
                "record_deleted",
                "record_mutated",
                "resolve_share",
                "run_job",
                "share_context",
            ]
        );
    }

    #[tokio::test]
    async fn test_server_info() {
        let server = ContextServer::new(service().await);
        let info = server.get_info();
        assert_eq!(info.server_info.name, "relctx");
        assert!(info.capabilities.tools.is_some());
    }
}
