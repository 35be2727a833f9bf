//! share_context and resolve_share tool implementations.

use relctx_core::{CacheKey, ContextService};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;

/// Parameters for the share_context tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ShareContextParams {
    /// Id of the user creating the share.
    pub owner: String,

    pub record_type: String,

    /// Record id. Omit to share the aggregate context of the type.
    #[serde(default)]
    pub record_id: Option<String>,

    /// Token lifetime in seconds. Omit for the server default.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

/// Parameters for the resolve_share tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResolveShareParams {
    pub token: String,
}

/// Implementation of the share_context tool.
pub async fn share_impl(service: &ContextService, params: ShareContextParams) -> Result<CallToolResult, McpError> {
    let key = CacheKey::new(params.record_type, params.record_id)?;
    let grant = service.share_context(&params.owner, &key, params.ttl_secs).await?;
    json_result(&grant)
}

/// Implementation of the resolve_share tool.
pub async fn resolve_impl(service: &ContextService, params: ResolveShareParams) -> Result<CallToolResult, McpError> {
    let shared = service.resolve_share(&params.token).await?;
    json_result(&shared)
}
