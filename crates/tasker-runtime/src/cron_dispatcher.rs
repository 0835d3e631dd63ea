//! # Cron Dispatcher
//!
//! Maintains a set of `(schedule, event name, static payload)` triggers
//! and publishes the associated event at each fire time. A worker that
//! was down across one or more fire times catches up on the most recent
//! `catch_up_budget` misses (carrying the historical `scheduled_for`);
//! anything older is dropped with a warning rather than replayed.

use crate::bus::EventBus;
use std::sync::Arc;
use tasker_shared::error::TaskerResult;
use tasker_shared::events::names;
use tasker_shared::{Clock, CronSchedule, Event, EventPayload};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct CronTrigger {
    pub function_id: String,
    pub schedule: CronSchedule,
    pub event_name: String,
    pub static_data: EventPayload,
}

/// The two triggers the core registers at startup.
#[must_use]
pub fn default_triggers() -> Vec<CronTrigger> {
    vec![
        CronTrigger {
            function_id: "fx-rate-ingestion".to_string(),
            schedule: CronSchedule::parse("0 */4 * * *").expect("builtin schedule is valid"),
            event_name: names::CRON_FX_RATE_INGEST.to_string(),
            static_data: EventPayload::FxIngestManual(tasker_shared::events::payload::FxIngestManualPayload {
                base_currency: Some("MYR".to_string()),
                target_currencies: None,
                force_update: Some(false),
            }),
        },
        CronTrigger {
            function_id: "fx-rate-staleness-alert".to_string(),
            schedule: CronSchedule::parse("0 9,17 * * *").expect("builtin schedule is valid"),
            event_name: names::CRON_FX_RATE_STALENESS_ALERT.to_string(),
            static_data: EventPayload::FxStalenessCheck,
        },
    ]
}

#[derive(Debug, Clone)]
struct ScheduleState {
    trigger: CronTrigger,
    last_checked: chrono::DateTime<chrono::Utc>,
}

/// Tracks next-fire time per trigger and publishes through an
/// [`EventBus`] on each tick.
#[derive(Debug)]
pub struct CronDispatcher<B: EventBus> {
    bus: Arc<B>,
    clock: Arc<dyn Clock>,
    catch_up_budget: usize,
    triggers: Vec<ScheduleState>,
}

impl<B: EventBus> CronDispatcher<B> {
    pub fn new(bus: Arc<B>, clock: Arc<dyn Clock>, catch_up_budget: usize, triggers: Vec<CronTrigger>) -> Self {
        let now = clock.now();
        Self {
            bus,
            clock,
            catch_up_budget,
            triggers: triggers
                .into_iter()
                .map(|trigger| ScheduleState {
                    trigger,
                    last_checked: now,
                })
                .collect(),
        }
    }

    /// Check every trigger for fires since it was last checked, publishing
    /// at most `catch_up_budget` of the most recent misses per trigger.
    pub async fn tick(&mut self) -> TaskerResult<usize> {
        let now = self.clock.now();
        let mut published = 0;

        for state in &mut self.triggers {
            let fires = state.trigger.schedule.fires_between(state.last_checked, now);
            if fires.is_empty() {
                state.last_checked = now;
                continue;
            }

            let dropped = fires.len().saturating_sub(self.catch_up_budget);
            if dropped > 0 {
                warn!(
                    function_id = %state.trigger.function_id,
                    dropped,
                    "dropping missed cron fires beyond catch-up budget"
                );
            }

            for fire_at in fires.iter().skip(dropped) {
                let event = Event::new(
                    self.clock.new_id(),
                    state.trigger.event_name.clone(),
                    state.trigger.static_data.clone(),
                    now,
                )
                .with_scheduled_for(*fire_at);
                self.bus.publish(event).await?;
                published += 1;
            }

            state.last_checked = now;
        }

        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryEventBus;
    use chrono::Duration;
    use tasker_shared::FakeClock;

    #[tokio::test]
    async fn publishes_on_fire_and_advances_watermark() {
        let clock = Arc::new(FakeClock::new(
            chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&chrono::Utc),
        ));
        let bus = Arc::new(InMemoryEventBus::new(clock.clone(), Duration::hours(24)));
        let mut dispatcher = CronDispatcher::new(
            bus.clone(),
            clock.clone(),
            1,
            vec![CronTrigger {
                function_id: "fx-rate-ingestion".to_string(),
                schedule: CronSchedule::parse("0 */4 * * *").unwrap(),
                event_name: names::FX_INGEST_MANUAL.to_string(),
                static_data: EventPayload::FxStalenessCheck,
            }],
        );

        clock.advance(Duration::hours(5));
        let published = dispatcher.tick().await.unwrap();
        assert_eq!(published, 1);
    }

    #[tokio::test]
    async fn drops_fires_beyond_catch_up_budget() {
        let clock = Arc::new(FakeClock::new(
            chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&chrono::Utc),
        ));
        let bus = Arc::new(InMemoryEventBus::new(clock.clone(), Duration::hours(24)));
        let mut dispatcher = CronDispatcher::new(
            bus,
            clock.clone(),
            1,
            vec![CronTrigger {
                function_id: "fx-rate-ingestion".to_string(),
                schedule: CronSchedule::parse("0 */4 * * *").unwrap(),
                event_name: names::FX_INGEST_MANUAL.to_string(),
                static_data: EventPayload::FxStalenessCheck,
            }],
        );

        // Three fires (4h, 8h, 12h) should occur but only the most recent
        // one is published given a catch-up budget of 1.
        clock.advance(Duration::hours(13));
        let published = dispatcher.tick().await.unwrap();
        assert_eq!(published, 1);
    }
}
