//! The concrete workflow handlers that exercise the runtime end to end:
//! FX rate ingest (cron + manual) and staleness alert, PDF generation,
//! email send, invoice-approved side effects, and the multi-stage
//! document approval flow.

pub mod document_approval;
pub mod email;
pub mod fx;
pub mod invoice;
pub mod pdf;

pub use document_approval::{
    DocumentApprovalDecisionHandler, DocumentApprovalReminderHandler, DocumentApprovalStartHandler,
};
pub use email::EmailWorkflowHandler;
pub use fx::{FxRateIngestHandler, FxRateStalenessAlertHandler};
pub use invoice::InvoiceApprovedHandler;
pub use pdf::PdfGenerationHandler;
