//! # Event Bus
//!
//! Accepts events, honors `scheduled_for` visibility, and leases the
//! oldest visible event to exactly one caller at a time. Delivery is
//! at-least-once: a leased event that is never acked becomes visible
//! again once its lease expires.
//!
//! The in-memory implementation here is the one the worker composition
//! root wires up by default and the one integration tests exercise
//! directly; a durable backend would satisfy the same [`EventBus`] trait
//! without the runtime caring which is in play.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tasker_shared::error::{TaskerError, TaskerResult};
use tasker_shared::{Clock, Event};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::step::Publisher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lease {
    None,
    Held { until: DateTime<Utc> },
}

#[derive(Debug, Clone)]
struct QueuedEvent {
    event: Event,
    lease: Lease,
}

/// Queue of events by name, with per-event idempotency keys and
/// scheduled-visibility timestamps.
#[async_trait]
pub trait EventBus: Send + Sync + std::fmt::Debug {
    /// Accept and persist `event`. If `idempotency_key` matches an event
    /// seen within the configured window, this is a no-op that returns
    /// the id of the prior event instead.
    async fn publish(&self, event: Event) -> TaskerResult<Uuid>;

    /// Lease the oldest event whose `scheduled_for <= now`, marking it
    /// in-flight with a lease deadline. Returns `None` if nothing is
    /// visible.
    async fn next_visible(&self, lease_duration: Duration) -> TaskerResult<Option<Event>>;

    async fn ack(&self, event_id: Uuid) -> TaskerResult<()>;

    /// Re-queue `event_id`, visible again after `visible_after`.
    async fn nack(&self, event_id: Uuid, reason: &str, visible_after: DateTime<Utc>) -> TaskerResult<()>;
}

/// In-process event bus backed by a concurrent map. Idempotency keys are
/// retained for `idempotency_window`; entries older than the window are
/// pruned lazily on publish.
#[derive(Debug)]
pub struct InMemoryEventBus {
    events: DashMap<Uuid, QueuedEvent>,
    idempotency_index: DashMap<String, (Uuid, DateTime<Utc>)>,
    idempotency_window: Duration,
    clock: Arc<dyn Clock>,
}

impl InMemoryEventBus {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, idempotency_window: Duration) -> Self {
        Self {
            events: DashMap::new(),
            idempotency_index: DashMap::new(),
            idempotency_window,
            clock,
        }
    }

    fn prune_idempotency_index(&self, now: DateTime<Utc>) {
        self.idempotency_index
            .retain(|_, (_, seen_at)| now - *seen_at <= self.idempotency_window);
    }

    /// Number of events currently queued, leased or not. Used by the
    /// health check and metrics exposition; not part of the [`EventBus`]
    /// trait since a durable backend might expose this more cheaply (or
    /// more expensively) than a simple count.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.events.len()
    }

    /// Whether `key` has a live entry in the idempotency window. Ingress
    /// uses this ahead of `publish` to answer with 409 instead of 202 for
    /// a duplicate, since `publish` itself collapses duplicates silently.
    #[must_use]
    pub fn contains_idempotency_key(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.idempotency_index
            .get(key)
            .is_some_and(|entry| now - entry.1 <= self.idempotency_window)
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: Event) -> TaskerResult<Uuid> {
        let now = self.clock.now();
        self.prune_idempotency_index(now);

        if let Some(key) = &event.idempotency_key {
            if let Some(entry) = self.idempotency_index.get(key) {
                debug!(idempotency_key = %key, existing_id = %entry.0, "collapsing duplicate event");
                return Ok(entry.0);
            }
        }

        let id = event.id;
        if let Some(key) = &event.idempotency_key {
            self.idempotency_index.insert(key.clone(), (id, now));
        }

        self.events.insert(
            id,
            QueuedEvent {
                event,
                lease: Lease::None,
            },
        );
        Ok(id)
    }

    async fn next_visible(&self, lease_duration: Duration) -> TaskerResult<Option<Event>> {
        let now = self.clock.now();

        let mut candidate: Option<(Uuid, DateTime<Utc>)> = None;
        for entry in self.events.iter() {
            let visible = match entry.lease {
                Lease::None => true,
                Lease::Held { until } => until <= now,
            };
            if !visible || entry.event.scheduled_for > now {
                continue;
            }
            let replace = match candidate {
                None => true,
                Some((_, scheduled)) => entry.event.scheduled_for < scheduled,
            };
            if replace {
                candidate = Some((entry.key().to_owned(), entry.event.scheduled_for));
            }
        }

        let Some((id, _)) = candidate else {
            return Ok(None);
        };

        let mut entry = self
            .events
            .get_mut(&id)
            .ok_or_else(|| TaskerError::NotFound(format!("event {id} disappeared under lease")))?;
        entry.lease = Lease::Held {
            until: now + lease_duration,
        };
        Ok(Some(entry.event.clone()))
    }

    async fn ack(&self, event_id: Uuid) -> TaskerResult<()> {
        self.events.remove(&event_id);
        Ok(())
    }

    async fn nack(&self, event_id: Uuid, reason: &str, visible_after: DateTime<Utc>) -> TaskerResult<()> {
        let Some(mut entry) = self.events.get_mut(&event_id) else {
            warn!(%event_id, reason, "nack for event no longer queued");
            return Ok(());
        };
        entry.event.scheduled_for = visible_after;
        entry.event.attempt += 1;
        entry.lease = Lease::None;
        Ok(())
    }
}

/// Adapts any [`EventBus`] to the narrow [`Publisher`] surface
/// `step.send` needs, so the step API doesn't depend on lease/ack
/// machinery it never touches.
#[derive(Debug)]
pub struct BusPublisher<B: EventBus> {
    bus: Arc<B>,
}

impl<B: EventBus> BusPublisher<B> {
    #[must_use]
    pub fn new(bus: Arc<B>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl<B: EventBus + 'static> Publisher for BusPublisher<B> {
    async fn publish(&self, event: Event) -> TaskerResult<Uuid> {
        self.bus.publish(event).await
    }
}
