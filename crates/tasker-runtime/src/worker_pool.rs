//! # Worker Pool
//!
//! The dispatch loop: lease a visible event off the bus, resolve its
//! subscribed functions from the registry, gate each through the
//! concurrency governor, and hand it to the step executor. One tick
//! processes at most one event; callers drive the cadence (a tight loop
//! with a short idle sleep in production, a handful of explicit calls in
//! tests).

use crate::bus::EventBus;
use crate::concurrency::ConcurrencyGovernor;
use crate::executor::{AttemptOutcome, StepExecutor};
use crate::registry::FunctionRegistry;
use chrono::Duration;
use std::sync::Arc;
use tasker_shared::error::TaskerResult;
use tasker_shared::Event;
use tracing::{info, warn};

#[derive(Debug)]
pub struct WorkerPool<B: EventBus> {
    bus: Arc<B>,
    registry: Arc<FunctionRegistry>,
    governor: Arc<ConcurrencyGovernor>,
    executor: Arc<StepExecutor>,
    lease_duration: Duration,
}

impl<B: EventBus + 'static> WorkerPool<B> {
    #[must_use]
    pub fn new(
        bus: Arc<B>,
        registry: Arc<FunctionRegistry>,
        governor: Arc<ConcurrencyGovernor>,
        executor: Arc<StepExecutor>,
        lease_duration: Duration,
    ) -> Self {
        Self {
            bus,
            registry,
            governor,
            executor,
            lease_duration,
        }
    }

    /// Lease and process at most one visible event. Returns the number of
    /// function invocations it dispatched (zero, one, or more if several
    /// functions subscribe to the same event name).
    pub async fn tick(&self) -> TaskerResult<usize> {
        let Some(event) = self.bus.next_visible(self.lease_duration).await? else {
            return Ok(0);
        };

        let subscribers = self.registry.subscribed_to(&event.name);
        if subscribers.is_empty() {
            warn!(event_name = %event.name, event_id = %event.id, "no function subscribed to event, acking as unroutable");
            self.bus.ack(event.id).await?;
            return Ok(0);
        }

        let mut dispatched = 0;
        for spec in subscribers {
            let _permit = self.governor.acquire(&spec.id, Some(spec.concurrency)).await;
            let outcome = self.executor.run_attempt(spec, event.clone()).await;

            match outcome {
                Ok(AttemptOutcome::Succeeded | AttemptOutcome::Failed { .. } | AttemptOutcome::AlreadyTerminal) => {
                    self.bus.ack(event.id).await?;
                }
                Ok(AttemptOutcome::Sleeping { wake_at } | AttemptOutcome::RetryScheduled { wake_at, .. }) => {
                    self.bus.nack(event.id, "run sleeping", wake_at).await?;
                }
                Err(err) => {
                    warn!(function_id = %spec.id, event_id = %event.id, error = %err, "executor error, re-queueing");
                    self.requeue_after_error(&event).await?;
                }
            }
            dispatched += 1;
        }

        Ok(dispatched)
    }

    async fn requeue_after_error(&self, event: &Event) -> TaskerResult<()> {
        let visible_after = chrono::Utc::now() + Duration::seconds(30);
        self.bus.nack(event.id, "executor error", visible_after).await
    }

    /// Run the dispatch loop until `shutdown` resolves, idling briefly
    /// between empty ticks so an idle worker doesn't spin.
    pub async fn run_until(&self, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        info!("worker pool starting dispatch loop");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("worker pool received shutdown signal");
                    break;
                }
                result = self.tick() => {
                    match result {
                        Ok(0) => tokio::time::sleep(std::time::Duration::from_millis(200)).await,
                        Ok(_) => {}
                        Err(err) => {
                            warn!(error = %err, "worker pool tick failed");
                            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                        }
                    }
                }
            }
        }
    }
}
