//! # Step API
//!
//! The object a workflow handler closes over. `run`, `sleep`/`sleep_until`
//! and `send` are the only way a handler observes non-determinism, talks
//! to the event bus, or waits — everything else in the handler body must
//! be a pure function of its inputs so replay reproduces the same step
//! sequence up to the first unmemoized step.
//!
//! A handler is `async fn(StepContext) -> HandlerOutcome`. Each `step.*`
//! call that cannot resolve immediately (a transient failure, a fatal
//! failure, or a pending sleep) stashes the reason on `StepContext` and
//! returns the opaque [`StepAborted`] marker; the handler propagates it
//! with `?` exactly like any other error, and the executor reads the
//! stashed reason back out once the handler future resolves. This keeps
//! handler bodies ordinary straight-line Rust instead of a bespoke
//! control-flow DSL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tasker_shared::error::TaskerResult;
use tasker_shared::ports::{DataPort, StepMemo};
use tasker_shared::retry::{classify, ErrorClass};
use tasker_shared::{Event, TaskerError};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Opaque marker propagated via `?` out of a handler when a step cannot
/// resolve immediately. Carries no data itself; the real reason lives on
/// [`StepContext::outcome`].
#[derive(Debug, Clone, Copy)]
pub struct StepAborted;

impl std::fmt::Display for StepAborted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "step aborted, see StepContext outcome for details")
    }
}

impl std::error::Error for StepAborted {}

pub type HandlerResult = Result<Value, StepAborted>;

/// What actually happened on the step that caused the handler to abort.
/// Read back by the executor after the handler future resolves.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Fatal {
        step_name: String,
        message: String,
    },
    Transient {
        step_name: String,
        class: ErrorClass,
        message: String,
    },
    WaitUntil {
        step_name: String,
        wake_at: DateTime<Utc>,
    },
}

/// Bus-facing publish operation used by [`StepContext::send`]. Kept
/// narrow so the step API doesn't need the full [`crate::bus::EventBus`]
/// surface.
#[async_trait]
pub trait Publisher: Send + Sync + std::fmt::Debug {
    async fn publish(&self, event: Event) -> TaskerResult<Uuid>;
}

/// The object passed to a workflow handler for one attempt of one run.
#[derive(Debug)]
pub struct StepContext {
    pub run_id: Uuid,
    pub attempt: u32,
    pub event: Event,
    data: Arc<dyn DataPort>,
    bus: Arc<dyn Publisher>,
    now: DateTime<Utc>,
    seen_step_names: Mutex<HashSet<String>>,
    outcome: Mutex<Option<RunOutcome>>,
}

impl StepContext {
    #[must_use]
    pub fn new(
        run_id: Uuid,
        attempt: u32,
        event: Event,
        data: Arc<dyn DataPort>,
        bus: Arc<dyn Publisher>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id,
            attempt,
            event,
            data,
            bus,
            now,
            seen_step_names: Mutex::new(HashSet::new()),
            outcome: Mutex::new(None),
        }
    }

    /// Drains and returns the reason the handler aborted, if any.
    pub async fn take_outcome(&self) -> Option<RunOutcome> {
        self.outcome.lock().await.take()
    }

    async fn record(&self, outcome: RunOutcome) {
        *self.outcome.lock().await = Some(outcome);
    }

    /// Reject a `stepName` reused within the same run attempt. A
    /// well-behaved replay never hits this; it fires only when a handler
    /// requests a previously used name with different intent.
    async fn claim_step_name(&self, step_name: &str) -> Result<(), StepAborted> {
        let mut seen = self.seen_step_names.lock().await;
        if !seen.insert(step_name.to_string()) {
            self.record(RunOutcome::Fatal {
                step_name: step_name.to_string(),
                message: format!("step name '{step_name}' reused within run {}", self.run_id),
            })
            .await;
            return Err(StepAborted);
        }
        Ok(())
    }

    /// Execute `work` exactly once per `(run_id, step_name)`. On replay, a
    /// prior successful result short-circuits `work`; a prior fatal
    /// failure re-raises the same failure.
    pub async fn run<F, Fut, T>(&self, step_name: &str, work: F) -> Result<T, StepAborted>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
        T: Serialize + DeserializeOwned + Clone,
    {
        self.claim_step_name(step_name).await?;

        let existing = self.data.get_step_memo(self.run_id, step_name).await.ok().flatten();

        if let Some(memo) = existing {
            if let Some(result_json) = memo.result_json {
                // Deserialization failure against our own memo is an
                // integrity error, not a transient condition.
                return serde_json::from_value(result_json).map_err(|_| StepAborted);
            }
            if let Some(error_json) = memo.error_json {
                let message = error_json
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("replayed fatal error")
                    .to_string();
                // Replaying a historical fatal failure is itself fatal.
                return self.abort_fatal(step_name, message).await;
            }
        }

        match work().await {
            Ok(value) => {
                let result_json = serde_json::to_value(&value).map_err(TaskerError::from);
                let result_json = match result_json {
                    Ok(v) => v,
                    Err(e) => return self.abort_fatal(step_name, e.to_string()).await,
                };
                let memo = StepMemo {
                    run_id: self.run_id,
                    step_name: step_name.to_string(),
                    attempt: self.attempt,
                    completed_at: self.now,
                    result_json: Some(result_json),
                    error_json: None,
                    wake_at: None,
                };
                if self.data.upsert_step_memo(memo).await.is_err() {
                    return self
                        .abort_fatal(step_name, "failed to persist step memo".to_string())
                        .await;
                }
                Ok(value)
            }
            Err(err) => {
                let message = err.to_string();
                let classification = classify(&message);
                match classification.class {
                    ErrorClass::Fatal => self.abort_fatal(step_name, message).await,
                    ErrorClass::Transient | ErrorClass::WaitUntil => {
                        self.record(RunOutcome::Transient {
                            step_name: step_name.to_string(),
                            class: classification.class,
                            message,
                        })
                        .await;
                        Err(StepAborted)
                    }
                }
            }
        }
    }

    async fn abort_fatal<T>(&self, step_name: &str, message: String) -> Result<T, StepAborted> {
        let memo = StepMemo {
            run_id: self.run_id,
            step_name: step_name.to_string(),
            attempt: self.attempt,
            completed_at: self.now,
            result_json: None,
            error_json: Some(serde_json::json!({ "message": message })),
            wake_at: None,
        };
        // Best-effort: if persisting the error memo itself fails we still
        // want the run to fail, not retry forever.
        let _ = self.data.upsert_step_memo(memo).await;
        self.record(RunOutcome::Fatal {
            step_name: step_name.to_string(),
            message,
        })
        .await;
        Err(StepAborted)
    }

    /// Sleep until `wake_at`. Resolves immediately on replay once
    /// `now >= wake_at`; otherwise checkpoints and tells the executor to
    /// re-dispatch at that time without consuming a retry attempt.
    pub async fn sleep_until(&self, step_name: &str, wake_at: DateTime<Utc>) -> Result<(), StepAborted> {
        self.claim_step_name(step_name).await?;

        let existing = self
            .data
            .get_step_memo(self.run_id, step_name)
            .await
            .ok()
            .flatten();

        let wake_at = existing.and_then(|m| m.wake_at).unwrap_or(wake_at);

        if self.now >= wake_at {
            return Ok(());
        }

        let memo = StepMemo {
            run_id: self.run_id,
            step_name: step_name.to_string(),
            attempt: self.attempt,
            completed_at: self.now,
            result_json: None,
            error_json: None,
            wake_at: Some(wake_at),
        };
        let _ = self.data.upsert_step_memo(memo).await;
        self.record(RunOutcome::WaitUntil {
            step_name: step_name.to_string(),
            wake_at,
        })
        .await;
        Err(StepAborted)
    }

    pub async fn sleep(&self, step_name: &str, duration: chrono::Duration) -> Result<(), StepAborted> {
        self.sleep_until(step_name, self.now + duration).await
    }

    /// Publish `event` through the bus, memoizing the resulting event id
    /// so replay does not re-publish.
    pub async fn send(&self, step_name: &str, event: Event) -> Result<Uuid, StepAborted> {
        self.claim_step_name(step_name).await?;

        if let Some(memo) = self
            .data
            .get_step_memo(self.run_id, step_name)
            .await
            .ok()
            .flatten()
        {
            if let Some(result_json) = memo.result_json {
                if let Some(id) = result_json.get("eventId").and_then(Value::as_str) {
                    if let Ok(uuid) = Uuid::parse_str(id) {
                        return Ok(uuid);
                    }
                }
            }
        }

        let event_id = match self.bus.publish(event).await {
            Ok(id) => id,
            Err(e) => return self.abort_fatal(step_name, e.to_string()).await,
        };

        let memo = StepMemo {
            run_id: self.run_id,
            step_name: step_name.to_string(),
            attempt: self.attempt,
            completed_at: self.now,
            result_json: Some(serde_json::json!({ "published": true, "eventId": event_id })),
            error_json: None,
            wake_at: None,
        };
        let _ = self.data.upsert_step_memo(memo).await;
        Ok(event_id)
    }
}

/// A registered workflow handler. Implementations must be deterministic
/// up to the first unmemoized `step.*` call.
#[async_trait]
pub trait WorkflowHandler: Send + Sync + std::fmt::Debug {
    async fn handle(&self, ctx: &StepContext) -> HandlerResult;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasker_shared::ports::{
        Attachment, ConditionalUpdateOutcome, DlqRecord, DlqStatus, FxRateRecord, WorkflowRun, WorkflowRunStatus,
    };
    use tasker_shared::EventPayload;
    use tokio::sync::Mutex as TokioMutex;

    #[derive(Debug, Default)]
    struct InMemoryData {
        memos: TokioMutex<Vec<StepMemo>>,
    }

    #[async_trait]
    impl DataPort for InMemoryData {
        async fn upsert_workflow_run(&self, _run: WorkflowRun) -> TaskerResult<()> {
            Ok(())
        }
        async fn get_workflow_run(&self, _run_id: Uuid) -> TaskerResult<Option<WorkflowRun>> {
            Ok(None)
        }
        async fn conditional_update_run_status(
            &self,
            _run_id: Uuid,
            _expected: WorkflowRunStatus,
            _new: WorkflowRunStatus,
        ) -> TaskerResult<ConditionalUpdateOutcome> {
            Ok(ConditionalUpdateOutcome::Applied)
        }
        async fn upsert_step_memo(&self, memo: StepMemo) -> TaskerResult<()> {
            let mut guard = self.memos.lock().await;
            guard.retain(|m| !(m.run_id == memo.run_id && m.step_name == memo.step_name));
            guard.push(memo);
            Ok(())
        }
        async fn get_step_memo(&self, run_id: Uuid, step_name: &str) -> TaskerResult<Option<StepMemo>> {
            Ok(self
                .memos
                .lock()
                .await
                .iter()
                .find(|m| m.run_id == run_id && m.step_name == step_name)
                .cloned())
        }
        async fn list_step_memos(&self, run_id: Uuid) -> TaskerResult<Vec<StepMemo>> {
            Ok(self.memos.lock().await.iter().filter(|m| m.run_id == run_id).cloned().collect())
        }
        async fn insert_dlq_record(&self, _record: DlqRecord) -> TaskerResult<()> {
            Ok(())
        }
        async fn get_dlq_record(&self, _id: Uuid) -> TaskerResult<Option<DlqRecord>> {
            Ok(None)
        }
        async fn update_dlq_record(&self, _record: DlqRecord) -> TaskerResult<()> {
            Ok(())
        }
        async fn scan_dlq_records(&self, _status: Option<DlqStatus>) -> TaskerResult<Vec<DlqRecord>> {
            Ok(vec![])
        }
        async fn dlq_record_exists_for_run(&self, _run_id: Uuid) -> TaskerResult<bool> {
            Ok(false)
        }
        async fn get_attachment(&self, _id: Uuid) -> TaskerResult<Option<Attachment>> {
            Ok(None)
        }
        async fn upsert_attachment(&self, _attachment: Attachment) -> TaskerResult<()> {
            Ok(())
        }
        async fn insert_fx_rates(&self, _rates: Vec<FxRateRecord>) -> TaskerResult<()> {
            Ok(())
        }
        async fn latest_fx_rate_timestamp(&self) -> TaskerResult<Option<DateTime<Utc>>> {
            Ok(None)
        }
        async fn list_fx_rates(&self) -> TaskerResult<Vec<FxRateRecord>> {
            Ok(vec![])
        }
    }

    #[derive(Debug, Default)]
    struct RecordingPublisher {
        published: TokioMutex<Vec<Event>>,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, event: Event) -> TaskerResult<Uuid> {
            let id = event.id;
            self.published.lock().await.push(event);
            Ok(id)
        }
    }

    fn ctx(data: Arc<dyn DataPort>, bus: Arc<dyn Publisher>, attempt: u32) -> StepContext {
        StepContext::new(
            Uuid::new_v4(),
            attempt,
            Event::new(Uuid::new_v4(), "test/event", EventPayload::FxStalenessCheck, Utc::now()),
            data,
            bus,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn run_memoizes_success_and_skips_work_on_replay() {
        let data: Arc<dyn DataPort> = Arc::new(InMemoryData::default());
        let bus: Arc<dyn Publisher> = Arc::new(RecordingPublisher::default());
        let run_id = Uuid::new_v4();
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));

        for _ in 0..2 {
            let ctx = StepContext::new(
                run_id,
                1,
                Event::new(Uuid::new_v4(), "test/event", EventPayload::FxStalenessCheck, Utc::now()),
                data.clone(),
                bus.clone(),
                Utc::now(),
            );
            let calls = calls.clone();
            let result = ctx
                .run("do-work", || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        Ok::<_, anyhow::Error>(42u32)
                    }
                })
                .await;
            assert_eq!(result.unwrap(), 42);
        }

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_reusing_step_name_in_same_attempt_is_fatal() {
        let data: Arc<dyn DataPort> = Arc::new(InMemoryData::default());
        let bus: Arc<dyn Publisher> = Arc::new(RecordingPublisher::default());
        let ctx = ctx(data, bus, 1);

        ctx.run("same-name", || async { Ok::<_, anyhow::Error>(1u32) }).await.unwrap();
        let second = ctx.run("same-name", || async { Ok::<_, anyhow::Error>(2u32) }).await;
        assert!(second.is_err());

        match ctx.take_outcome().await {
            Some(RunOutcome::Fatal { step_name, .. }) => assert_eq!(step_name, "same-name"),
            other => panic!("expected Fatal outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn run_transient_failure_records_outcome_without_memoizing() {
        let data: Arc<dyn DataPort> = Arc::new(InMemoryData::default());
        let bus: Arc<dyn Publisher> = Arc::new(RecordingPublisher::default());
        let ctx = ctx(data, bus, 1);

        let result = ctx
            .run("flaky", || async { Err::<u32, _>(anyhow::anyhow!("connection refused")) })
            .await;
        assert!(result.is_err());

        match ctx.take_outcome().await {
            Some(RunOutcome::Transient { step_name, .. }) => assert_eq!(step_name, "flaky"),
            other => panic!("expected Transient outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sleep_until_future_time_aborts_with_wait_until() {
        let data: Arc<dyn DataPort> = Arc::new(InMemoryData::default());
        let bus: Arc<dyn Publisher> = Arc::new(RecordingPublisher::default());
        let ctx = ctx(data, bus, 1);

        let wake_at = Utc::now() + chrono::Duration::hours(1);
        let result = ctx.sleep_until("wait-a-bit", wake_at).await;
        assert!(result.is_err());

        match ctx.take_outcome().await {
            Some(RunOutcome::WaitUntil { wake_at: recorded, .. }) => assert_eq!(recorded, wake_at),
            other => panic!("expected WaitUntil outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sleep_until_past_time_resolves_immediately() {
        let data: Arc<dyn DataPort> = Arc::new(InMemoryData::default());
        let bus: Arc<dyn Publisher> = Arc::new(RecordingPublisher::default());
        let ctx = ctx(data, bus, 1);

        let result = ctx.sleep_until("already-due", Utc::now() - chrono::Duration::minutes(1)).await;
        assert!(result.is_ok());
        assert!(ctx.take_outcome().await.is_none());
    }

    #[tokio::test]
    async fn send_publishes_once_and_memoizes_event_id_on_replay() {
        let data: Arc<dyn DataPort> = Arc::new(InMemoryData::default());
        let bus: Arc<dyn Publisher> = Arc::new(RecordingPublisher::default());
        let run_id = Uuid::new_v4();
        let event = Event::new(Uuid::new_v4(), "downstream/event", EventPayload::FxStalenessCheck, Utc::now());

        let first_ctx = StepContext::new(run_id, 1, event.clone(), data.clone(), bus.clone(), Utc::now());
        let first_id = first_ctx.send("notify", event.clone()).await.unwrap();

        let second_ctx = StepContext::new(run_id, 2, event.clone(), data.clone(), bus.clone(), Utc::now());
        let second_id = second_ctx.send("notify", event).await.unwrap();

        assert_eq!(first_id, second_id);
    }
}
