//! run_job tool implementation.
//!
//! Runs one maintenance job on demand, outside the schedule.

use relctx_core::{ContextService, JobKind, JobOutcome};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;

/// Parameters for the run_job tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunJobParams {
    /// One of access_prune, pattern_aggregation, affinity_refresh,
    /// share_sweep, cache_expiry.
    pub job: JobKind,
}

/// Output from the run_job tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunJobOutput {
    pub job: JobKind,
    #[serde(flatten)]
    pub outcome: JobOutcome,
}

/// Implementation of the run_job tool.
pub async fn run_impl(service: &ContextService, params: RunJobParams) -> Result<CallToolResult, McpError> {
    let outcome = service.run_job(params.job).await?;
    json_result(&RunJobOutput { job: params.job, outcome })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{output, service};

    #[tokio::test]
    async fn test_run_job() {
        let service = service().await;
        let result = run_impl(&service, RunJobParams { job: JobKind::ShareSweep }).await.unwrap();
        let out: RunJobOutput = output(&result);
        assert_eq!(out.job, JobKind::ShareSweep);
        assert_eq!(out.outcome, JobOutcome::Completed { affected: 0 });
    }

    #[tokio::test]
    async fn test_run_job_while_running_is_skipped() {
        let service = service().await;
        let _held = service.jobs().guard().try_begin(JobKind::AffinityRefresh).unwrap();

        let result = run_impl(&service, RunJobParams { job: JobKind::AffinityRefresh }).await.unwrap();
        let value: serde_json::Value = output(&result);
        assert_eq!(value["job"], "affinity_refresh");
        assert_eq!(value["status"], "skipped");
    }

    #[test]
    fn test_params_parse_job_name() {
        let params: RunJobParams = serde_json::from_str(r#"{"job":"pattern_aggregation"}"#).unwrap();
        assert_eq!(params.job, JobKind::PatternAggregation);
    }
}
