//! cache_purge tool implementation.
//!
//! Purges cache entries by record type, expiry, or both.

use relctx_core::ContextService;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::tools::json_result;

/// Parameters for the cache_purge tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CachePurgeParams {
    /// Purge every entry of this record type, aggregate included.
    #[serde(default)]
    pub record_type: Option<String>,

    /// Purge entries whose TTL has passed.
    #[serde(default)]
    pub expired: bool,
}

/// Output from the cache_purge tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CachePurgeOutput {
    /// Number of entries deleted.
    pub deleted: u64,
}

/// Implementation of the cache_purge tool.
pub async fn purge_impl(service: &ContextService, params: CachePurgeParams) -> Result<CallToolResult, McpError> {
    let deleted = service
        .cache_purge(params.record_type.as_deref(), params.expired)
        .await?;
    json_result(&CachePurgeOutput { deleted })
}
