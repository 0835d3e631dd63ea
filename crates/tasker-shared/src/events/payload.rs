//! # Discriminated Event Payloads
//!
//! One variant per event name the runtime understands, instead of an
//! untyped JSON blob. Unknown event names are still accepted by the bus
//! but carry an opaque payload and are routed to a rejection log by the
//! runtime rather than dispatched to a handler.

use crate::approval::{Priority, WorkflowType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FxIngestManualPayload {
    pub base_currency: Option<String>,
    pub target_currencies: Option<Vec<String>>,
    pub force_update: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfGeneratePayload {
    pub template_type: String,
    pub data: serde_json::Value,
    pub tenant_id: String,
    pub company_id: String,
    pub entity_id: Option<String>,
    pub entity_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSendPayload {
    pub to: String,
    pub subject: String,
    pub template: String,
    pub data: serde_json::Value,
    pub tenant_id: Option<String>,
    pub priority: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceApprovedPayload {
    pub invoice_id: String,
    pub tenant_id: String,
    pub company_id: String,
    pub customer_email: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecisionKind {
    Approve,
    Reject,
}

/// One requested approver, as provided by the caller starting the
/// workflow. Distinct from [`crate::approval::Approver`]: this carries no
/// `id`/`status`/decision bookkeeping, just who is being asked to approve
/// what stage and in what order within it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproverRequest {
    pub user_id: String,
    pub email: Option<String>,
    pub stage: u32,
    pub order: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentApprovalStartPayload {
    pub attachment_id: Uuid,
    pub tenant_id: String,
    pub submitted_by: String,
    pub workflow_type: WorkflowType,
    pub approvers: Vec<ApproverRequest>,
    pub require_all_approvers: bool,
    pub allow_self_approval: bool,
    pub priority: Priority,
    pub auto_approve_threshold: Option<f64>,
    pub reminder_interval_hours: Option<i64>,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentApprovalDecisionPayload {
    pub attachment_id: Uuid,
    pub user_id: String,
    pub decision: ApprovalDecisionKind,
    pub comments: Option<String>,
    pub conditions: Option<String>,
    pub delegate_to: Option<String>,
    pub delegation_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentApprovalReminderPayload {
    pub attachment_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionFailedPayload {
    pub function_id: String,
    pub run_id: Uuid,
    pub error_message: String,
    pub error_stack: Option<String>,
    pub original_event: Box<EventPayload>,
    pub original_event_name: String,
    pub attempt_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqRetryPayload {
    pub dlq_id: Uuid,
    pub original_event: Box<EventPayload>,
    pub original_event_name: String,
    pub retry_delay_ms: u64,
    pub error_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FxRatesIngestedPayload {
    pub rates_count: usize,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfGeneratedPayload {
    pub template_type: String,
    pub file_path: String,
    pub file_name: String,
    pub public_url: String,
    pub tenant_id: String,
    pub company_id: String,
    pub entity_id: Option<String>,
    pub entity_type: Option<String>,
    pub size_kb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentApprovedPayload {
    pub attachment_id: Uuid,
    pub tenant_id: String,
    pub approved_by: String,
    pub approved_at: DateTime<Utc>,
}

/// Discriminated payload union, one variant per event name the runtime
/// knows about, plus [`EventPayload::Unknown`] for anything else. Cron
/// triggers carry a `staticData` payload too, represented here as
/// whichever concrete variant the trigger's target event expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EventPayload {
    FxIngestManual(FxIngestManualPayload),
    FxStalenessCheck,
    PdfGenerate(PdfGeneratePayload),
    EmailSend(EmailSendPayload),
    InvoiceApproved(InvoiceApprovedPayload),
    DocumentApprovalStart(DocumentApprovalStartPayload),
    DocumentApprovalDecision(DocumentApprovalDecisionPayload),
    DocumentApprovalReminder(DocumentApprovalReminderPayload),
    FunctionFailed(FunctionFailedPayload),
    DlqRetry(DlqRetryPayload),
    FxRatesIngested(FxRatesIngestedPayload),
    PdfGenerated(PdfGeneratedPayload),
    DocumentApproved(DocumentApprovedPayload),
    /// Accepted by the bus, but not routable by any handler. The runtime
    /// logs these to a rejection log rather than dispatching them.
    Unknown(serde_json::Value),
}

impl EventPayload {
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            EventPayload::FxIngestManual(_) => "FxIngestManual",
            EventPayload::FxStalenessCheck => "FxStalenessCheck",
            EventPayload::PdfGenerate(_) => "PdfGenerate",
            EventPayload::EmailSend(_) => "EmailSend",
            EventPayload::InvoiceApproved(_) => "InvoiceApproved",
            EventPayload::DocumentApprovalStart(_) => "DocumentApprovalStart",
            EventPayload::DocumentApprovalDecision(_) => "DocumentApprovalDecision",
            EventPayload::DocumentApprovalReminder(_) => "DocumentApprovalReminder",
            EventPayload::FunctionFailed(_) => "FunctionFailed",
            EventPayload::DlqRetry(_) => "DlqRetry",
            EventPayload::FxRatesIngested(_) => "FxRatesIngested",
            EventPayload::PdfGenerated(_) => "PdfGenerated",
            EventPayload::DocumentApproved(_) => "DocumentApproved",
            EventPayload::Unknown(_) => "Unknown",
        }
    }
}
