//! Adapts [`DlqHandler`] to [`WorkflowHandler`] so the two events it
//! consumes (`inngest/function.failed`, `dlq/retry`) flow through the
//! same registry/executor/concurrency pipeline as every other function
//! instead of needing a special case in the worker pool.

use async_trait::async_trait;
use std::sync::Arc;
use tasker_runtime::{DlqHandler, HandlerResult, StepContext, WorkflowHandler};
use tasker_shared::EventPayload;
use tracing::warn;

#[derive(Debug)]
pub struct DlqFunctionFailedHandler {
    dlq: Arc<DlqHandler>,
}

impl DlqFunctionFailedHandler {
    #[must_use]
    pub fn new(dlq: Arc<DlqHandler>) -> Self {
        Self { dlq }
    }
}

#[async_trait]
impl WorkflowHandler for DlqFunctionFailedHandler {
    async fn handle(&self, ctx: &StepContext) -> HandlerResult {
        let payload = match &ctx.event.data {
            EventPayload::FunctionFailed(p) => p.clone(),
            other => {
                warn!(kind = other.kind_name(), "dlq handler received unexpected payload for function.failed");
                return Ok(serde_json::json!({ "skipped": true }));
            }
        };

        ctx.run("record-dlq-entry", || {
            let dlq = self.dlq.clone();
            async move {
                dlq.handle_function_failed(payload).await?;
                Ok::<_, anyhow::Error>(serde_json::json!({ "recorded": true }))
            }
        })
        .await
    }
}

#[derive(Debug)]
pub struct DlqRetryHandler {
    dlq: Arc<DlqHandler>,
}

impl DlqRetryHandler {
    #[must_use]
    pub fn new(dlq: Arc<DlqHandler>) -> Self {
        Self { dlq }
    }
}

#[async_trait]
impl WorkflowHandler for DlqRetryHandler {
    async fn handle(&self, ctx: &StepContext) -> HandlerResult {
        let payload = match &ctx.event.data {
            EventPayload::DlqRetry(p) => p.clone(),
            other => {
                warn!(kind = other.kind_name(), "dlq handler received unexpected payload for dlq/retry");
                return Ok(serde_json::json!({ "skipped": true }));
            }
        };

        ctx.run("replay-original-event", || {
            let dlq = self.dlq.clone();
            async move {
                dlq.handle_retry(payload).await?;
                Ok::<_, anyhow::Error>(serde_json::json!({ "replayed": true }))
            }
        })
        .await
    }
}
