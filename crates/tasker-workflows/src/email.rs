//! `emailWorkflow` (event `email/send`): a single memoized send through
//! the configured [`EmailSender`] adapter. Exactly-once-per-run via the
//! step memo gives idempotent delivery even though retries re-enter the
//! handler; template selection is the adapter's concern, not this
//! handler's.

use async_trait::async_trait;
use std::sync::Arc;
use tasker_runtime::{HandlerResult, StepContext, WorkflowHandler};
use tasker_shared::ports::{EmailMessage, EmailSender};
use tasker_shared::EventPayload;
use tracing::warn;

#[derive(Debug)]
pub struct EmailWorkflowHandler {
    sender: Arc<dyn EmailSender>,
}

impl EmailWorkflowHandler {
    #[must_use]
    pub fn new(sender: Arc<dyn EmailSender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl WorkflowHandler for EmailWorkflowHandler {
    async fn handle(&self, ctx: &StepContext) -> HandlerResult {
        let payload = match &ctx.event.data {
            EventPayload::EmailSend(p) => p.clone(),
            other => {
                warn!(kind = other.kind_name(), "email workflow received unexpected payload");
                return Ok(serde_json::json!({ "skipped": true }));
            }
        };

        let message_id = ctx
            .run("send-email", || {
                let sender = self.sender.clone();
                let message = EmailMessage {
                    to: payload.to.clone(),
                    subject: payload.subject.clone(),
                    template: payload.template.clone(),
                    data: payload.data.clone(),
                };
                async move { Ok::<_, anyhow::Error>(sender.send(message).await?) }
            })
            .await?;

        Ok(serde_json::json!({ "messageId": message_id }))
    }
}
