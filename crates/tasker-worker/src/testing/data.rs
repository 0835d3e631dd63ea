//! In-memory [`DataPort`] good enough to run every included workflow
//! without a real row store. Backed by [`DashMap`] rather than a single
//! mutex so unrelated runs don't serialize on each other, matching the
//! concurrency shape a real backend would have.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tasker_shared::error::TaskerResult;
use tasker_shared::ports::{
    Attachment, ConditionalUpdateOutcome, DataPort, DlqRecord, DlqStatus, FxRateRecord, StepMemo, WorkflowRun,
    WorkflowRunStatus,
};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Reference [`DataPort`]. `fx_rates` and `dlq_records` are plain
/// `Mutex`-guarded `Vec`s since both are scanned in full by their only
/// callers; everything keyed by an id goes in a `DashMap`.
#[derive(Debug, Default)]
pub struct InMemoryData {
    runs: DashMap<Uuid, WorkflowRun>,
    memos: DashMap<(Uuid, String), StepMemo>,
    dlq_records: Mutex<Vec<DlqRecord>>,
    attachments: DashMap<Uuid, Attachment>,
    fx_rates: Mutex<Vec<FxRateRecord>>,
}

impl InMemoryData {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DataPort for InMemoryData {
    async fn upsert_workflow_run(&self, run: WorkflowRun) -> TaskerResult<()> {
        self.runs.insert(run.id, run);
        Ok(())
    }

    async fn get_workflow_run(&self, run_id: Uuid) -> TaskerResult<Option<WorkflowRun>> {
        Ok(self.runs.get(&run_id).map(|r| r.clone()))
    }

    async fn conditional_update_run_status(
        &self,
        run_id: Uuid,
        expected_status: WorkflowRunStatus,
        new_status: WorkflowRunStatus,
    ) -> TaskerResult<ConditionalUpdateOutcome> {
        let Some(mut entry) = self.runs.get_mut(&run_id) else {
            // Nothing to claim yet (first attempt persists before this is
            // ever called); treat as applied so the caller proceeds.
            return Ok(ConditionalUpdateOutcome::Applied);
        };
        if entry.status != expected_status {
            return Ok(ConditionalUpdateOutcome::PredicateNotMatched);
        }
        entry.status = new_status;
        Ok(ConditionalUpdateOutcome::Applied)
    }

    async fn upsert_step_memo(&self, memo: StepMemo) -> TaskerResult<()> {
        self.memos.insert((memo.run_id, memo.step_name.clone()), memo);
        Ok(())
    }

    async fn get_step_memo(&self, run_id: Uuid, step_name: &str) -> TaskerResult<Option<StepMemo>> {
        Ok(self.memos.get(&(run_id, step_name.to_string())).map(|m| m.clone()))
    }

    async fn list_step_memos(&self, run_id: Uuid) -> TaskerResult<Vec<StepMemo>> {
        Ok(self
            .memos
            .iter()
            .filter(|entry| entry.key().0 == run_id)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn insert_dlq_record(&self, record: DlqRecord) -> TaskerResult<()> {
        self.dlq_records.lock().await.push(record);
        Ok(())
    }

    async fn get_dlq_record(&self, id: Uuid) -> TaskerResult<Option<DlqRecord>> {
        Ok(self.dlq_records.lock().await.iter().find(|r| r.id == id).cloned())
    }

    async fn update_dlq_record(&self, record: DlqRecord) -> TaskerResult<()> {
        let mut guard = self.dlq_records.lock().await;
        if let Some(existing) = guard.iter_mut().find(|r| r.id == record.id) {
            *existing = record;
        }
        Ok(())
    }

    async fn scan_dlq_records(&self, status: Option<DlqStatus>) -> TaskerResult<Vec<DlqRecord>> {
        let guard = self.dlq_records.lock().await;
        Ok(match status {
            Some(status) => guard.iter().filter(|r| r.status == status).cloned().collect(),
            None => guard.clone(),
        })
    }

    async fn dlq_record_exists_for_run(&self, run_id: Uuid) -> TaskerResult<bool> {
        Ok(self.dlq_records.lock().await.iter().any(|r| r.run_id == run_id))
    }

    async fn get_attachment(&self, id: Uuid) -> TaskerResult<Option<Attachment>> {
        Ok(self.attachments.get(&id).map(|a| a.clone()))
    }

    async fn upsert_attachment(&self, attachment: Attachment) -> TaskerResult<()> {
        self.attachments.insert(attachment.id, attachment);
        Ok(())
    }

    async fn insert_fx_rates(&self, rates: Vec<FxRateRecord>) -> TaskerResult<()> {
        self.fx_rates.lock().await.extend(rates);
        Ok(())
    }

    async fn latest_fx_rate_timestamp(&self) -> TaskerResult<Option<DateTime<Utc>>> {
        Ok(self.fx_rates.lock().await.iter().map(|r| r.timestamp).max())
    }

    async fn list_fx_rates(&self) -> TaskerResult<Vec<FxRateRecord>> {
        Ok(self.fx_rates.lock().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn conditional_update_rejects_mismatched_expected_status() {
        let data = InMemoryData::new();
        let run = WorkflowRun::new(Uuid::new_v4(), "pdf-generation", Uuid::new_v4(), Utc::now());
        let run_id = run.id;
        data.upsert_workflow_run(run).await.unwrap();

        let outcome = data
            .conditional_update_run_status(run_id, WorkflowRunStatus::Succeeded, WorkflowRunStatus::Failed)
            .await
            .unwrap();
        assert_eq!(outcome, ConditionalUpdateOutcome::PredicateNotMatched);
    }

    #[tokio::test]
    async fn step_memo_round_trips_by_run_and_name() {
        let data = InMemoryData::new();
        let run_id = Uuid::new_v4();
        let memo = StepMemo {
            run_id,
            step_name: "check-staleness".to_string(),
            attempt: 1,
            completed_at: Utc::now(),
            result_json: Some(serde_json::json!({"fresh": true})),
            error_json: None,
            wake_at: None,
        };
        data.upsert_step_memo(memo).await.unwrap();

        let fetched = data.get_step_memo(run_id, "check-staleness").await.unwrap();
        assert!(fetched.is_some());
        assert!(data.get_step_memo(run_id, "other-step").await.unwrap().is_none());
    }
}
