//! # Event Envelope
//!
//! The event envelope is the unit the bus moves around; its contents are
//! a typed [`crate::events::payload::EventPayload`].

use crate::events::payload::EventPayload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventUser {
    pub id: String,
}

/// An accepted, immutable event. Identity is `id`; a duplicate
/// `idempotency_key` within the configured window collapses to the first
/// accepted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub data: EventPayload,
    pub idempotency_key: Option<String>,
    pub user: Option<EventUser>,
    pub scheduled_for: DateTime<Utc>,
    pub attempt: u32,
}

impl Event {
    #[must_use]
    pub fn new(id: Uuid, name: impl Into<String>, data: EventPayload, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            data,
            idempotency_key: None,
            user: None,
            scheduled_for: now,
            attempt: 0,
        }
    }

    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = at;
        self
    }
}

/// Names of the events the runtime itself publishes.
pub mod names {
    pub const FUNCTION_FAILED: &str = "inngest/function.failed";
    pub const DLQ_RETRY: &str = "dlq/retry";
    pub const FX_RATES_INGESTED: &str = "fx/rates.ingested";
    pub const FX_INGEST_MANUAL: &str = "fx/ingest.manual";
    pub const PDF_GENERATE: &str = "pdf/generate";
    pub const PDF_GENERATED: &str = "pdf/generated";
    pub const EMAIL_SEND: &str = "email/send";
    pub const INVOICE_APPROVED: &str = "accounting.invoice.approved";
    pub const DOCUMENT_APPROVAL_START: &str = "document/approval.start";
    pub const DOCUMENT_APPROVAL_DECISION: &str = "document/approval.decision";
    pub const DOCUMENT_APPROVAL_REMINDER: &str = "document/approval.reminder";
    pub const DOCUMENT_APPROVED: &str = "document/approved";
    pub const CRON_FX_RATE_INGEST: &str = "cron/fx-rate-ingest";
    pub const CRON_FX_RATE_STALENESS_ALERT: &str = "cron/fx-rate-staleness-alert";
}
