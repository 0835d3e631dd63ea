pub mod adapters;
pub mod blob;
pub mod data;

pub use adapters::{
    EmailMessage, EmailSender, FxFetchResult, FxRateFetcher, FxRateQuote, FxRateSource, PdfRenderer,
    RenderedPdf,
};
pub use blob::BlobPort;
pub use data::{
    Attachment, ConditionalUpdateOutcome, DataPort, DlqRecord, DlqStatus, FxRateRecord, StepMemo,
    WorkflowRun, WorkflowRunStatus,
};
