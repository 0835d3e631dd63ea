//! # DLQ Handler
//!
//! Consumes `inngest/function.failed`, persists a [`DlqRecord`], and
//! decides per function-scoped rules whether to schedule an auto-retry
//! (`dlq/retry`) or mark the record for manual review. Critical
//! functions, or any run that burned three or more attempts, also get a
//! high-priority admin notification.
//!
//! The DLQ handler owns [`DlqRecord`] mutation exclusively; nothing else
//! in the runtime writes to that table.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tasker_shared::error::TaskerResult;
use tasker_shared::events::{
    names,
    payload::{DlqRetryPayload, EmailSendPayload, FunctionFailedPayload},
};
use tasker_shared::ports::{DataPort, DlqRecord, DlqStatus};
use tasker_shared::retry::{classify, ErrorSubclass};
use tasker_shared::{Clock, Event, EventPayload};
use tracing::{info, warn};

use crate::step::Publisher;

#[derive(Debug, Clone)]
pub struct DlqRule {
    pub max_attempts: u32,
    pub retry_delay: chrono::Duration,
    pub recoverable: Vec<ErrorSubclass>,
}

/// Per-function recovery rules, keyed by function id. Functions without
/// an explicit rule fall back to [`fallback_rule`].
#[must_use]
pub fn default_rules() -> HashMap<String, DlqRule> {
    let mut rules = HashMap::new();
    let fx_rule = DlqRule {
        max_attempts: 5,
        retry_delay: chrono::Duration::minutes(5),
        recoverable: vec![ErrorSubclass::Network, ErrorSubclass::Timeout, ErrorSubclass::RateLimit],
    };
    // The ingestion pipeline is registered under two function ids (cron
    // fire vs. manual event) so they get distinct run-id namespaces; both
    // share the same recovery rule.
    rules.insert("fx-rate-ingestion".to_string(), fx_rule.clone());
    rules.insert("fx-rate-ingestion-cron".to_string(), fx_rule);
    rules.insert(
        "pdf-generation".to_string(),
        DlqRule {
            max_attempts: 3,
            retry_delay: chrono::Duration::minutes(1),
            recoverable: vec![ErrorSubclass::Timeout, ErrorSubclass::Memory],
        },
    );
    rules.insert(
        "email-workflow".to_string(),
        DlqRule {
            max_attempts: 3,
            retry_delay: chrono::Duration::minutes(2),
            recoverable: vec![ErrorSubclass::RateLimit, ErrorSubclass::Temporary],
        },
    );
    rules
}

#[must_use]
pub fn fallback_rule() -> DlqRule {
    DlqRule {
        max_attempts: 3,
        retry_delay: chrono::Duration::minutes(2),
        recoverable: vec![ErrorSubclass::Unknown],
    }
}

#[derive(Debug)]
pub struct DlqHandler {
    data: Arc<dyn DataPort>,
    bus_publisher: Arc<dyn Publisher>,
    clock: Arc<dyn Clock>,
    rules: HashMap<String, DlqRule>,
    critical_functions: Vec<String>,
    admin_address: String,
}

impl DlqHandler {
    #[must_use]
    pub fn new(
        data: Arc<dyn DataPort>,
        bus_publisher: Arc<dyn Publisher>,
        clock: Arc<dyn Clock>,
        rules: HashMap<String, DlqRule>,
        critical_functions: Vec<String>,
        admin_address: impl Into<String>,
    ) -> Self {
        Self {
            data,
            bus_publisher,
            clock,
            rules,
            critical_functions,
            admin_address: admin_address.into(),
        }
    }

    fn rule_for(&self, function_id: &str) -> DlqRule {
        self.rules.get(function_id).cloned().unwrap_or_else(fallback_rule)
    }

    pub async fn handle_function_failed(&self, payload: FunctionFailedPayload) -> TaskerResult<()> {
        if self.data.dlq_record_exists_for_run(payload.run_id).await? {
            info!(run_id = %payload.run_id, "DLQ record already exists for run, skipping duplicate failure event");
            return Ok(());
        }

        let now = self.clock.now();
        let classification = classify(&payload.error_message);
        let rule = self.rule_for(&payload.function_id);

        let recoverable = payload.attempt_count < rule.max_attempts
            && classification.is_recoverable_in(&rule.recoverable);

        let mut record = DlqRecord {
            id: self.clock.new_id(),
            function_id: payload.function_id.clone(),
            run_id: payload.run_id,
            original_event: serde_json::to_value(&*payload.original_event)?,
            error_message: payload.error_message.clone(),
            error_stack: payload.error_stack.clone(),
            attempt_count: payload.attempt_count,
            failed_at: now,
            status: DlqStatus::Failed,
            tenant_id: None,
            company_id: None,
            recovery_action: None,
            retry_count: 0,
            last_retry_at: None,
        };

        if recoverable {
            record.recovery_action = Some(format!("dlq/retry scheduled after {}", rule.retry_delay));
            self.data.insert_dlq_record(record.clone()).await?;

            let retry_at = now + rule.retry_delay;
            let retry_event = Event::new(
                self.clock.new_id(),
                names::DLQ_RETRY,
                EventPayload::DlqRetry(DlqRetryPayload {
                    dlq_id: record.id,
                    original_event: payload.original_event.clone(),
                    original_event_name: payload.original_event_name.clone(),
                    retry_delay_ms: rule.retry_delay.num_milliseconds() as u64,
                    error_type: format!("{:?}", classification.subclass),
                }),
                now,
            )
            .with_scheduled_for(retry_at);
            self.bus_publisher.publish(retry_event).await?;
            info!(function_id = %payload.function_id, run_id = %payload.run_id, %retry_at, "scheduled DLQ auto-retry");
        } else {
            record.status = DlqStatus::ManualReview;
            record.recovery_action = Some(format!(
                "manual review: {:?} not recoverable or attempts exhausted ({}/{})",
                classification.subclass, payload.attempt_count, rule.max_attempts
            ));
            self.data.insert_dlq_record(record.clone()).await?;
            warn!(function_id = %payload.function_id, run_id = %payload.run_id, "DLQ record routed to manual review");
        }

        let is_critical = self.critical_functions.contains(&payload.function_id);
        if is_critical || payload.attempt_count >= 3 {
            self.notify_admin(&payload, now).await?;
        }

        Ok(())
    }

    async fn notify_admin(&self, payload: &FunctionFailedPayload, now: DateTime<Utc>) -> TaskerResult<()> {
        let notification = Event::new(
            self.clock.new_id(),
            names::EMAIL_SEND,
            EventPayload::EmailSend(EmailSendPayload {
                to: self.admin_address.clone(),
                subject: format!("[urgent] {} failed: run {}", payload.function_id, payload.run_id),
                template: "dlq-admin-alert".to_string(),
                data: serde_json::json!({
                    "functionId": payload.function_id,
                    "runId": payload.run_id,
                    "errorMessage": payload.error_message,
                    "attemptCount": payload.attempt_count,
                }),
                tenant_id: None,
                priority: Some("high".to_string()),
            }),
            now,
        );
        self.bus_publisher.publish(notification).await?;
        Ok(())
    }

    /// Handle a fired `dlq/retry` event: bump retry bookkeeping, move the
    /// record to `retrying`, and re-publish the original event.
    pub async fn handle_retry(&self, payload: DlqRetryPayload) -> TaskerResult<()> {
        let now = self.clock.now();
        let Some(mut record) = self.data.get_dlq_record(payload.dlq_id).await? else {
            warn!(dlq_id = %payload.dlq_id, "dlq/retry fired for unknown record");
            return Ok(());
        };

        record.status = DlqStatus::Retrying;
        record.retry_count += 1;
        record.last_retry_at = Some(now);
        self.data.update_dlq_record(record).await?;

        let retried = Event::new(
            self.clock.new_id(),
            payload.original_event_name.clone(),
            (*payload.original_event).clone(),
            now,
        );
        self.bus_publisher.publish(retried).await?;
        info!(dlq_id = %payload.dlq_id, "re-published original event after DLQ retry delay");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasker_shared::ports::{
        Attachment, ConditionalUpdateOutcome, FxRateRecord, StepMemo, WorkflowRun, WorkflowRunStatus,
    };
    use tasker_shared::FakeClock;
    use tokio::sync::Mutex;

    #[derive(Debug, Default)]
    struct InMemoryData {
        dlq: Mutex<Vec<DlqRecord>>,
    }

    #[async_trait::async_trait]
    impl DataPort for InMemoryData {
        async fn upsert_workflow_run(&self, _run: WorkflowRun) -> TaskerResult<()> {
            Ok(())
        }
        async fn get_workflow_run(&self, _run_id: uuid::Uuid) -> TaskerResult<Option<WorkflowRun>> {
            Ok(None)
        }
        async fn conditional_update_run_status(
            &self,
            _run_id: uuid::Uuid,
            _expected: WorkflowRunStatus,
            _new: WorkflowRunStatus,
        ) -> TaskerResult<ConditionalUpdateOutcome> {
            Ok(ConditionalUpdateOutcome::Applied)
        }
        async fn upsert_step_memo(&self, _memo: StepMemo) -> TaskerResult<()> {
            Ok(())
        }
        async fn get_step_memo(&self, _run_id: uuid::Uuid, _step_name: &str) -> TaskerResult<Option<StepMemo>> {
            Ok(None)
        }
        async fn list_step_memos(&self, _run_id: uuid::Uuid) -> TaskerResult<Vec<StepMemo>> {
            Ok(vec![])
        }
        async fn insert_dlq_record(&self, record: DlqRecord) -> TaskerResult<()> {
            self.dlq.lock().await.push(record);
            Ok(())
        }
        async fn get_dlq_record(&self, id: uuid::Uuid) -> TaskerResult<Option<DlqRecord>> {
            Ok(self.dlq.lock().await.iter().find(|r| r.id == id).cloned())
        }
        async fn update_dlq_record(&self, record: DlqRecord) -> TaskerResult<()> {
            let mut guard = self.dlq.lock().await;
            if let Some(existing) = guard.iter_mut().find(|r| r.id == record.id) {
                *existing = record;
            }
            Ok(())
        }
        async fn scan_dlq_records(&self, _status: Option<DlqStatus>) -> TaskerResult<Vec<DlqRecord>> {
            Ok(self.dlq.lock().await.clone())
        }
        async fn dlq_record_exists_for_run(&self, run_id: uuid::Uuid) -> TaskerResult<bool> {
            Ok(self.dlq.lock().await.iter().any(|r| r.run_id == run_id))
        }
        async fn get_attachment(&self, _id: uuid::Uuid) -> TaskerResult<Option<Attachment>> {
            Ok(None)
        }
        async fn upsert_attachment(&self, _attachment: Attachment) -> TaskerResult<()> {
            Ok(())
        }
        async fn insert_fx_rates(&self, _rates: Vec<FxRateRecord>) -> TaskerResult<()> {
            Ok(())
        }
        async fn latest_fx_rate_timestamp(&self) -> TaskerResult<Option<DateTime<Utc>>> {
            Ok(None)
        }
        async fn list_fx_rates(&self) -> TaskerResult<Vec<FxRateRecord>> {
            Ok(vec![])
        }
    }

    #[derive(Debug, Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<Event>>,
    }

    #[async_trait::async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, event: Event) -> TaskerResult<uuid::Uuid> {
            let id = event.id;
            self.published.lock().await.push(event);
            Ok(id)
        }
    }

    fn failed_payload(function_id: &str, message: &str, attempt_count: u32) -> FunctionFailedPayload {
        FunctionFailedPayload {
            function_id: function_id.to_string(),
            run_id: uuid::Uuid::new_v4(),
            error_message: message.to_string(),
            error_stack: None,
            original_event: Box::new(EventPayload::FxStalenessCheck),
            original_event_name: "fx/ingest.manual".to_string(),
            attempt_count,
        }
    }

    #[tokio::test]
    async fn recoverable_failure_schedules_retry() {
        let data = Arc::new(InMemoryData::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let handler = DlqHandler::new(
            data.clone(),
            publisher.clone(),
            Arc::new(FakeClock::new(Utc::now())),
            default_rules(),
            vec!["fx-rate-ingestion".to_string()],
            "admin@example.com",
        );

        handler
            .handle_function_failed(failed_payload("fx-rate-ingestion", "connection refused", 1))
            .await
            .unwrap();

        let records = data.dlq.lock().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, DlqStatus::Failed);

        let published = publisher.published.lock().await;
        assert!(published.iter().any(|e| e.name == names::DLQ_RETRY));
        // fx-rate-ingestion is a critical function, so an admin email goes out too.
        assert!(published.iter().any(|e| e.name == names::EMAIL_SEND));
    }

    #[tokio::test]
    async fn non_recoverable_failure_goes_to_manual_review() {
        let data = Arc::new(InMemoryData::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let handler = DlqHandler::new(
            data.clone(),
            publisher,
            Arc::new(FakeClock::new(Utc::now())),
            default_rules(),
            vec![],
            "admin@example.com",
        );

        handler
            .handle_function_failed(failed_payload("pdf-generation", "validation: bad request", 1))
            .await
            .unwrap();

        let records = data.dlq.lock().await;
        assert_eq!(records[0].status, DlqStatus::ManualReview);
    }

    #[tokio::test]
    async fn duplicate_failure_for_same_run_is_ignored() {
        let data = Arc::new(InMemoryData::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let handler = DlqHandler::new(
            data.clone(),
            publisher,
            Arc::new(FakeClock::new(Utc::now())),
            default_rules(),
            vec![],
            "admin@example.com",
        );

        let payload = failed_payload("email-workflow", "rate limit exceeded", 1);
        handler.handle_function_failed(payload.clone()).await.unwrap();
        handler.handle_function_failed(payload).await.unwrap();

        assert_eq!(data.dlq.lock().await.len(), 1);
    }
}
