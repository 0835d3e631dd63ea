//! In-memory [`FxRateFetcher`]: returns deterministic quotes for whatever
//! targets are requested, answering from the primary source unless told
//! to fail over, so tests can exercise the fallback-notification path
//! without a real provider outage.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tasker_shared::error::TaskerResult;
use tasker_shared::ports::{FxFetchResult, FxRateFetcher, FxRateQuote, FxRateSource};

#[derive(Debug)]
pub struct InMemoryFxRateFetcher {
    rate: f64,
    fail_primary: AtomicBool,
}

impl InMemoryFxRateFetcher {
    #[must_use]
    pub fn new(rate: f64) -> Self {
        Self {
            rate,
            fail_primary: AtomicBool::new(false),
        }
    }

    /// After this call, `fetch_rates` answers from [`FxRateSource::Fallback`]
    /// instead of the primary, as if the primary provider were down.
    pub fn force_fallback(&self) {
        self.fail_primary.store(true, Ordering::SeqCst);
    }
}

impl Default for InMemoryFxRateFetcher {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[async_trait]
impl FxRateFetcher for InMemoryFxRateFetcher {
    async fn fetch_rates(&self, base: &str, targets: &[String]) -> TaskerResult<FxFetchResult> {
        let source = if self.fail_primary.load(Ordering::SeqCst) {
            FxRateSource::Fallback
        } else {
            FxRateSource::Primary
        };
        let quotes = targets
            .iter()
            .map(|target| FxRateQuote {
                from_currency: base.to_string(),
                to_currency: target.clone(),
                rate: self.rate,
            })
            .collect();
        Ok(FxFetchResult { quotes, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn answers_from_primary_by_default() {
        let fetcher = InMemoryFxRateFetcher::default();
        let result = fetcher.fetch_rates("MYR", &["USD".to_string(), "EUR".to_string()]).await.unwrap();
        assert_eq!(result.source, FxRateSource::Primary);
        assert_eq!(result.quotes.len(), 2);
    }

    #[tokio::test]
    async fn force_fallback_switches_source() {
        let fetcher = InMemoryFxRateFetcher::default();
        fetcher.force_fallback();
        let result = fetcher.fetch_rates("MYR", &["USD".to_string()]).await.unwrap();
        assert_eq!(result.source, FxRateSource::Fallback);
    }
}
