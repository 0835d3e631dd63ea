//! # Outbound Adapters
//!
//! Ports for the three external systems workflow handlers call out to:
//! email delivery, PDF rendering, and FX rate fetching. Handlers depend
//! on these traits, never on a concrete HTTP client, so test doubles can
//! stand in without touching the network.

use crate::error::TaskerResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub template: String,
    pub data: Value,
}

#[async_trait]
pub trait EmailSender: Send + Sync + std::fmt::Debug {
    /// Returns a provider message id on success.
    async fn send(&self, message: EmailMessage) -> TaskerResult<String>;
}

#[derive(Debug, Clone)]
pub struct RenderedPdf {
    pub bytes: Vec<u8>,
    pub file_name: String,
}

#[async_trait]
pub trait PdfRenderer: Send + Sync + std::fmt::Debug {
    async fn render(&self, template_type: &str, data: Value) -> TaskerResult<RenderedPdf>;
}

#[derive(Debug, Clone)]
pub struct FxRateQuote {
    pub from_currency: String,
    pub to_currency: String,
    pub rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FxRateSource {
    Primary,
    Fallback,
}

impl std::fmt::Display for FxRateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FxRateSource::Primary => write!(f, "primary"),
            FxRateSource::Fallback => write!(f, "fallback"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FxFetchResult {
    pub quotes: Vec<FxRateQuote>,
    pub source: FxRateSource,
}

/// Fetches current rates, internally failing over from a primary
/// provider to a fallback one. Implementations report which provider
/// actually answered so callers can raise a visibility alert on
/// fallback use.
#[async_trait]
pub trait FxRateFetcher: Send + Sync + std::fmt::Debug {
    async fn fetch_rates(&self, base: &str, targets: &[String]) -> TaskerResult<FxFetchResult>;
}
