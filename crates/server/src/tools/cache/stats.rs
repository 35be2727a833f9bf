//! cache_stats tool implementation.
//!
//! Reports how many entries the cache holds and how large they are.

use relctx_core::ContextService;
use rmcp::{ErrorData as McpError, model::CallToolResult};

use crate::tools::json_result;

/// Implementation of the cache_stats tool.
pub async fn stats_impl(service: &ContextService) -> Result<CallToolResult, McpError> {
    let stats = service.cache_stats().await?;
    json_result(&stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{output, service};
    use relctx_core::CacheKey;
    use relctx_core::cache::CacheStats;

    #[tokio::test]
    async fn test_stats_counts_entries() {
        let service = service().await;
        service.put_context(&CacheKey::record("finding", "F-1"), "one", None).await.unwrap();
        service.put_context(&CacheKey::aggregate("finding"), "list", None).await.unwrap();

        let stats: CacheStats = output(&stats_impl(&service).await.unwrap());
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.payload_bytes, 7);
    }
}
