//! record_mutated and record_deleted tool implementations.
//!
//! Called by the record-storage layer after it writes. These tools never
//! fail on cache trouble; the returned report says what was purged.

use relctx_core::ContextService;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;

/// Parameters for the record_mutated and record_deleted tools.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RecordChangeParams {
    pub record_type: String,
    pub record_id: String,
}

/// Implementation of the record_mutated tool.
pub async fn mutated_impl(service: &ContextService, params: RecordChangeParams) -> Result<CallToolResult, McpError> {
    let report = service.record_mutated(&params.record_type, &params.record_id).await;
    json_result(&report)
}

/// Implementation of the record_deleted tool.
pub async fn deleted_impl(service: &ContextService, params: RecordChangeParams) -> Result<CallToolResult, McpError> {
    let report = service.record_deleted(&params.record_type, &params.record_id).await;
    json_result(&report)
}
