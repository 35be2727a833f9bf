//! get_related_types tool implementation.
//!
//! Ranks record types that users tend to look at after the given one.

use relctx_core::{ContextService, RelatedType};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;

/// Parameters for the get_related_types tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RelatedTypesParams {
    pub record_type: String,

    /// Maximum number of suggestions. Defaults to the server setting.
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Output from the get_related_types tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RelatedTypesOutput {
    pub record_type: String,
    /// Highest score first. Empty when nothing has been learned yet.
    pub related: Vec<RelatedType>,
}

/// Implementation of the get_related_types tool.
pub async fn related_impl(service: &ContextService, params: RelatedTypesParams) -> Result<CallToolResult, McpError> {
    let related = service.get_related_types(&params.record_type, params.limit).await;
    json_result(&RelatedTypesOutput { record_type: params.record_type, related })
}
