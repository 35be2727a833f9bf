//! MCP tool implementations.
//!
//! This module contains all tools exposed by the relctx server. Each tool
//! answers with its output serialized as pretty JSON text.

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use relctx_core::Error;
use serde::Serialize;

pub mod cache;
pub mod context;
pub mod jobs;
pub mod records;
pub mod related;
pub mod share;

pub(crate) fn json_result<T: Serialize>(output: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(output)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize output: {e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}
