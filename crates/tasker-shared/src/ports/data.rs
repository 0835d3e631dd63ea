//! # Data Port
//!
//! Narrow abstraction over row storage. The runtime owns
//! `WorkflowRun`/`StepMemo` mutation exclusively; the DLQ handler owns
//! `DlqRecord` mutation exclusively; document approval state lives
//! embedded in `Attachment.metadata` and is owned by the document
//! approval handlers.

use crate::error::TaskerResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowRunStatus {
    Running,
    Sleeping,
    Succeeded,
    Failed,
}

impl WorkflowRunStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowRunStatus::Succeeded | WorkflowRunStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub function_id: String,
    pub event_id: Uuid,
    pub status: WorkflowRunStatus,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub final_error: Option<String>,
    pub wake_at: Option<DateTime<Utc>>,
    pub cancelled: bool,
}

impl WorkflowRun {
    #[must_use]
    pub fn new(id: Uuid, function_id: impl Into<String>, event_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id,
            function_id: function_id.into(),
            event_id,
            status: WorkflowRunStatus::Running,
            attempt: 1,
            started_at: now,
            ended_at: None,
            last_error: None,
            final_error: None,
            wake_at: None,
            cancelled: false,
        }
    }
}

/// A memoized step outcome. Primary key is `(run_id, step_name)`; a memo
/// entry exists iff the step function returned or threw terminally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepMemo {
    pub run_id: Uuid,
    pub step_name: String,
    pub attempt: u32,
    pub completed_at: DateTime<Utc>,
    pub result_json: Option<Value>,
    pub error_json: Option<Value>,
    pub wake_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DlqStatus {
    Failed,
    Retrying,
    ManualReview,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqRecord {
    pub id: Uuid,
    pub function_id: String,
    pub run_id: Uuid,
    pub original_event: Value,
    pub error_message: String,
    pub error_stack: Option<String>,
    pub attempt_count: u32,
    pub failed_at: DateTime<Utc>,
    pub status: DlqStatus,
    pub tenant_id: Option<String>,
    pub company_id: Option<String>,
    pub recovery_action: Option<String>,
    pub retry_count: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub tenant_id: String,
    pub company_id: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub file_name: String,
    pub file_path: String,
    pub file_type: String,
    pub file_size: u64,
    pub created_by: String,
    pub ocr_confidence: Option<f64>,
    pub ocr_status: Option<String>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FxRateRecord {
    pub from_currency: String,
    pub to_currency: String,
    pub rate: f64,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
}

impl FxRateRecord {
    /// `rate > 0`, 3-letter ISO codes, `timestamp <= now`.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), String> {
        if self.rate <= 0.0 {
            return Err(format!("rate must be positive, got {}", self.rate));
        }
        if self.from_currency.len() != 3 || self.to_currency.len() != 3 {
            return Err("currency codes must be exactly three letters".to_string());
        }
        if self.timestamp > now {
            return Err("timestamp must not be in the future".to_string());
        }
        Ok(())
    }
}

/// Conditional update outcome: distinguishes "nothing matched the
/// predicate" from a hard error, so callers (e.g. the finalization
/// claimer) can branch without treating a lost race as failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalUpdateOutcome {
    Applied,
    PredicateNotMatched,
}

/// Transactional data access port. Implementations must make the
/// `(run_id, step_name)` upsert and the workflow-run conditional update
/// atomic per step completion.
#[async_trait]
pub trait DataPort: Send + Sync + std::fmt::Debug {
    async fn upsert_workflow_run(&self, run: WorkflowRun) -> TaskerResult<()>;
    async fn get_workflow_run(&self, run_id: Uuid) -> TaskerResult<Option<WorkflowRun>>;

    /// Conditionally move a run out of its current state. Used to enforce
    /// "a WorkflowRun cannot transition out of a terminal state."
    async fn conditional_update_run_status(
        &self,
        run_id: Uuid,
        expected_status: WorkflowRunStatus,
        new_status: WorkflowRunStatus,
    ) -> TaskerResult<ConditionalUpdateOutcome>;

    async fn upsert_step_memo(&self, memo: StepMemo) -> TaskerResult<()>;
    async fn get_step_memo(&self, run_id: Uuid, step_name: &str) -> TaskerResult<Option<StepMemo>>;
    async fn list_step_memos(&self, run_id: Uuid) -> TaskerResult<Vec<StepMemo>>;

    async fn insert_dlq_record(&self, record: DlqRecord) -> TaskerResult<()>;
    async fn get_dlq_record(&self, id: Uuid) -> TaskerResult<Option<DlqRecord>>;
    async fn update_dlq_record(&self, record: DlqRecord) -> TaskerResult<()>;
    async fn scan_dlq_records(&self, status: Option<DlqStatus>) -> TaskerResult<Vec<DlqRecord>>;
    async fn dlq_record_exists_for_run(&self, run_id: Uuid) -> TaskerResult<bool>;

    async fn get_attachment(&self, id: Uuid) -> TaskerResult<Option<Attachment>>;
    async fn upsert_attachment(&self, attachment: Attachment) -> TaskerResult<()>;

    async fn insert_fx_rates(&self, rates: Vec<FxRateRecord>) -> TaskerResult<()>;
    async fn latest_fx_rate_timestamp(&self) -> TaskerResult<Option<DateTime<Utc>>>;
    async fn list_fx_rates(&self) -> TaskerResult<Vec<FxRateRecord>>;
}
