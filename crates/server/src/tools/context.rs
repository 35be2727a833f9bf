//! get_context and put_context tool implementations.
//!
//! `get_context` serves cached context for a record and logs the access;
//! on a miss the assistant computes the context and stores it with
//! `put_context`.

use relctx_core::{CacheKey, ContextService};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;

/// Parameters for the get_context tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GetContextParams {
    /// Id of the user viewing the record.
    pub user: String,

    /// Record type, e.g. "finding" or "engagement".
    pub record_type: String,

    /// Record id. Omit for the aggregate context of the whole type.
    #[serde(default)]
    pub record_id: Option<String>,

    /// Version of the context the caller already holds, if any.
    /// Enables "unchanged" and delta answers.
    #[serde(default)]
    pub known_version: Option<u64>,
}

/// Parameters for the put_context tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PutContextParams {
    pub record_type: String,

    /// Record id. Omit to store the aggregate context of the type.
    #[serde(default)]
    pub record_id: Option<String>,

    /// The context text.
    pub payload: String,

    /// Lifetime in seconds. Omit for the server default; 0 keeps the entry
    /// until the record changes.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

/// Implementation of the get_context tool.
pub async fn get_impl(service: &ContextService, params: GetContextParams) -> Result<CallToolResult, McpError> {
    let response = service
        .get_context(
            &params.user,
            &params.record_type,
            params.record_id.as_deref(),
            params.known_version,
        )
        .await?;
    json_result(&response)
}

/// Implementation of the put_context tool.
pub async fn put_impl(service: &ContextService, params: PutContextParams) -> Result<CallToolResult, McpError> {
    let key = CacheKey::new(params.record_type, params.record_id)?;
    let result = service.put_context(&key, &params.payload, params.ttl_secs).await?;
    json_result(&result)
}
