//! In-memory port implementations good enough to run every included
//! workflow without a real row store, blob store, email provider, PDF
//! renderer, or FX rate provider. This is what [`crate::runtime::build`]
//! wires up by default; a deployment with real backends would implement
//! the same traits and pass those in instead.

pub mod blob;
pub mod data;
pub mod email;
pub mod fx;
pub mod pdf;

pub use blob::InMemoryBlob;
pub use data::InMemoryData;
pub use email::InMemoryEmailSender;
pub use fx::InMemoryFxRateFetcher;
pub use pdf::InMemoryPdfRenderer;
