//! FX rate ingest (cron and manual) and the staleness alert.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tasker_runtime::{HandlerResult, StepContext, WorkflowHandler};
use tasker_shared::config::FxStalenessConfig;
use tasker_shared::events::{
    names,
    payload::{EmailSendPayload, FxRatesIngestedPayload},
};
use tasker_shared::ports::{DataPort, FxRateFetcher, FxRateRecord, FxRateSource};
use tasker_shared::{Clock, Event, EventPayload};
use tracing::info;

const DEFAULT_TARGETS: &[&str] = &["USD", "EUR", "GBP", "SGD", "JPY"];

#[derive(Debug, Serialize, Deserialize, Clone)]
struct StalenessCheck {
    fresh: bool,
    age_minutes: i64,
}

async fn check_staleness(
    data: &dyn DataPort,
    clock: &dyn Clock,
    warning_minutes: i64,
) -> anyhow::Result<StalenessCheck> {
    let now = clock.now();
    let latest = data.latest_fx_rate_timestamp().await?;
    let age_minutes = match latest {
        Some(ts) => (now - ts).num_minutes(),
        None => i64::MAX,
    };
    Ok(StalenessCheck {
        fresh: age_minutes <= warning_minutes,
        age_minutes,
    })
}

/// `fxRateIngestJob` (cron `0 */4 * * *`) and `fxRateIngestManual` (event
/// `fx/ingest.manual`) share this pipeline: check staleness, ingest,
/// store, validate, and notify if the fallback provider had to answer.
#[derive(Debug)]
pub struct FxRateIngestHandler {
    fetcher: Arc<dyn FxRateFetcher>,
    data: Arc<dyn DataPort>,
    clock: Arc<dyn Clock>,
    staleness: FxStalenessConfig,
    base_currency: String,
    admin_address: String,
}

impl FxRateIngestHandler {
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn FxRateFetcher>,
        data: Arc<dyn DataPort>,
        clock: Arc<dyn Clock>,
        staleness: FxStalenessConfig,
        admin_address: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            data,
            clock,
            staleness,
            base_currency: "MYR".to_string(),
            admin_address: admin_address.into(),
        }
    }

    fn request_params(&self, ctx: &StepContext) -> (String, Vec<String>, bool) {
        match &ctx.event.data {
            EventPayload::FxIngestManual(payload) => (
                payload.base_currency.clone().unwrap_or_else(|| self.base_currency.clone()),
                payload
                    .target_currencies
                    .clone()
                    .unwrap_or_else(|| DEFAULT_TARGETS.iter().map(|s| s.to_string()).collect()),
                payload.force_update.unwrap_or(false),
            ),
            _ => (
                self.base_currency.clone(),
                DEFAULT_TARGETS.iter().map(|s| s.to_string()).collect(),
                false,
            ),
        }
    }
}

#[async_trait]
impl WorkflowHandler for FxRateIngestHandler {
    async fn handle(&self, ctx: &StepContext) -> HandlerResult {
        let (base, targets, force_update) = self.request_params(ctx);
        let warning_minutes = self.staleness.warning_minutes;

        let check = ctx
            .run("check-staleness", || async {
                check_staleness(self.data.as_ref(), self.clock.as_ref(), warning_minutes).await
            })
            .await?;

        if check.fresh && !force_update {
            info!(age_minutes = check.age_minutes, "fx rates are fresh, skipping ingest");
            return Ok(serde_json::json!({ "skipped": true, "ageMinutes": check.age_minutes }));
        }

        let fetched = ctx
            .run("ingest-fx-rates", || {
                let fetcher = self.fetcher.clone();
                let base = base.clone();
                let targets = targets.clone();
                async move {
                    let result = fetcher.fetch_rates(&base, &targets).await?;
                    Ok::<_, anyhow::Error>((
                        result
                            .quotes
                            .into_iter()
                            .map(|q| (q.from_currency, q.to_currency, q.rate))
                            .collect::<Vec<_>>(),
                        result.source,
                    ))
                }
            })
            .await?;

        let (quotes, source) = fetched;
        let now = self.clock.now();
        let records: Vec<FxRateRecord> = quotes
            .into_iter()
            .map(|(from_currency, to_currency, rate)| FxRateRecord {
                from_currency,
                to_currency,
                rate,
                source: source.to_string(),
                timestamp: now,
                valid_from: now,
                valid_to: None,
            })
            .collect();

        ctx.run("store-fx-rates", || {
            let data = self.data.clone();
            let records = records.clone();
            async move {
                data.insert_fx_rates(records).await?;
                Ok::<_, anyhow::Error>(())
            }
        })
        .await?;

        ctx.run("validate-stored-rates", || {
            let records = records.clone();
            let now = now;
            async move {
                for record in &records {
                    record
                        .validate(now)
                        .map_err(|e| anyhow::anyhow!("validation: {e}"))?;
                }
                Ok::<_, anyhow::Error>(())
            }
        })
        .await?;

        if source == FxRateSource::Fallback {
            ctx.send(
                "notify-fallback-source",
                Event::new(
                    self.clock.new_id(),
                    names::EMAIL_SEND,
                    EventPayload::EmailSend(EmailSendPayload {
                        to: self.admin_address.clone(),
                        subject: "FX rate ingest fell back to the secondary provider".to_string(),
                        template: "fx-fallback-source".to_string(),
                        data: serde_json::json!({ "ratesIngested": records.len() }),
                        tenant_id: None,
                        priority: Some("normal".to_string()),
                    }),
                    now,
                ),
            )
            .await?;
        }

        ctx.send(
            "publish-rates-ingested",
            Event::new(
                self.clock.new_id(),
                names::FX_RATES_INGESTED,
                EventPayload::FxRatesIngested(FxRatesIngestedPayload {
                    rates_count: records.len(),
                    source: source.to_string(),
                    timestamp: now,
                }),
                now,
            ),
        )
        .await?;

        Ok(serde_json::json!({ "ratesIngested": records.len(), "source": source.to_string() }))
    }
}

/// `fxRateStalenessAlert` (cron `0 9,17 * * *`): no ingestion, just an
/// escalation email when rates have gone past the critical threshold.
#[derive(Debug)]
pub struct FxRateStalenessAlertHandler {
    data: Arc<dyn DataPort>,
    clock: Arc<dyn Clock>,
    staleness: FxStalenessConfig,
    admin_address: String,
}

impl FxRateStalenessAlertHandler {
    #[must_use]
    pub fn new(data: Arc<dyn DataPort>, clock: Arc<dyn Clock>, staleness: FxStalenessConfig, admin_address: impl Into<String>) -> Self {
        Self {
            data,
            clock,
            staleness,
            admin_address: admin_address.into(),
        }
    }
}

#[async_trait]
impl WorkflowHandler for FxRateStalenessAlertHandler {
    async fn handle(&self, ctx: &StepContext) -> HandlerResult {
        let critical_minutes = self.staleness.critical_minutes;
        let check = ctx
            .run("check-staleness", || async {
                check_staleness(self.data.as_ref(), self.clock.as_ref(), critical_minutes).await
            })
            .await?;

        if check.age_minutes <= critical_minutes {
            return Ok(serde_json::json!({ "alerted": false, "ageMinutes": check.age_minutes }));
        }

        let admin_address = self.admin_address.clone();
        let age_minutes = check.age_minutes;
        ctx.send(
            "alert-stale-rates",
            Event::new(
                self.clock.new_id(),
                names::EMAIL_SEND,
                EventPayload::EmailSend(EmailSendPayload {
                    to: admin_address,
                    subject: "FX rates are critically stale".to_string(),
                    template: "fx-staleness-alert".to_string(),
                    data: serde_json::json!({ "ageMinutes": age_minutes }),
                    tenant_id: None,
                    priority: Some("high".to_string()),
                }),
                self.clock.now(),
            ),
        )
        .await?;

        Ok(serde_json::json!({ "alerted": true, "ageMinutes": age_minutes }))
    }
}
