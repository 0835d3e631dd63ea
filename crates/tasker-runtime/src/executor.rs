//! # Step Executor
//!
//! Runs one attempt of one [`FunctionSpec`] handler against a
//! [`WorkflowRun`], translating the handler's outcome (success, a fatal
//! failure, a transient failure, or a pending sleep) into the run's next
//! persisted state. This is the piece everything else in the runtime
//! exists to drive.

use crate::bus::EventBus;
use crate::registry::FunctionSpec;
use crate::step::{Publisher, RunOutcome, StepContext};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tasker_shared::error::TaskerResult;
use tasker_shared::events::{names, payload::FunctionFailedPayload};
use tasker_shared::ports::{ConditionalUpdateOutcome, DataPort, WorkflowRun, WorkflowRunStatus};
use tasker_shared::retry::{backoff_delay, ErrorClass};
use tasker_shared::{Clock, Event, EventPayload, RuntimeConfig};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Deterministic so that re-dispatching the same event against the same
/// function always resumes the same run instead of starting a fresh one.
#[must_use]
pub fn derive_run_id(function_id: &str, event_id: Uuid) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{function_id}:{event_id}").as_bytes())
}

#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Succeeded,
    Sleeping { wake_at: DateTime<Utc> },
    RetryScheduled { wake_at: DateTime<Utc>, attempt: u32 },
    Failed { reason: String },
    /// The run had already reached a terminal state before this attempt
    /// started; nothing was executed.
    AlreadyTerminal,
}

#[derive(Debug)]
pub struct StepExecutor {
    data: Arc<dyn DataPort>,
    bus_publisher: Arc<dyn Publisher>,
    clock: Arc<dyn Clock>,
    config: RuntimeConfig,
}

impl StepExecutor {
    #[must_use]
    pub fn new(
        data: Arc<dyn DataPort>,
        bus_publisher: Arc<dyn Publisher>,
        clock: Arc<dyn Clock>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            data,
            bus_publisher,
            clock,
            config,
        }
    }

    /// Run (or resume) one attempt of `spec` against `event`.
    pub async fn run_attempt(&self, spec: &FunctionSpec, event: Event) -> TaskerResult<AttemptOutcome> {
        let now = self.clock.now();
        let run_id = derive_run_id(&spec.id, event.id);

        let mut run = match self.data.get_workflow_run(run_id).await? {
            Some(existing) => existing,
            None => WorkflowRun::new(run_id, spec.id.clone(), event.id, now),
        };

        if run.status.is_terminal() || run.cancelled {
            return Ok(AttemptOutcome::AlreadyTerminal);
        }

        run.status = WorkflowRunStatus::Running;
        self.data.upsert_workflow_run(run.clone()).await?;

        let ctx = StepContext::new(run_id, run.attempt, event.clone(), self.data.clone(), self.bus_publisher.clone(), now);

        let handler_result = spec.handler.handle(&ctx).await;

        match handler_result {
            Ok(_value) => {
                self.finalize(&mut run, WorkflowRunStatus::Succeeded, now, None).await?;
                info!(function_id = %spec.id, %run_id, "run succeeded");
                Ok(AttemptOutcome::Succeeded)
            }
            Err(_aborted) => {
                let outcome = ctx.take_outcome().await;
                self.handle_abort(spec, &mut run, outcome, &event, now).await
            }
        }
    }

    async fn handle_abort(
        &self,
        spec: &FunctionSpec,
        run: &mut WorkflowRun,
        outcome: Option<RunOutcome>,
        event: &Event,
        now: DateTime<Utc>,
    ) -> TaskerResult<AttemptOutcome> {
        match outcome {
            Some(RunOutcome::WaitUntil { wake_at, step_name }) => {
                run.status = WorkflowRunStatus::Sleeping;
                run.wake_at = Some(wake_at);
                self.data.upsert_workflow_run(run.clone()).await?;
                info!(function_id = %spec.id, run_id = %run.id, step_name, %wake_at, "run sleeping");
                Ok(AttemptOutcome::Sleeping { wake_at })
            }
            Some(RunOutcome::Fatal { step_name, message }) => {
                warn!(function_id = %spec.id, run_id = %run.id, step_name, message, "run failed fatally");
                self.fail_run(spec, run, event, message, now).await
            }
            Some(RunOutcome::Transient { step_name, class, message }) => {
                debug_assert!(matches!(class, ErrorClass::Transient | ErrorClass::WaitUntil));
                if run.attempt < spec.max_attempts() {
                    let delay = backoff_delay(
                        run.attempt,
                        std::time::Duration::from_millis(self.config.retry.base_delay_ms),
                        self.config.retry.factor,
                        std::time::Duration::from_millis(self.config.retry.max_delay_ms),
                        matches!(self.config.retry.jitter, tasker_shared::config::JitterKind::Full),
                    );
                    let wake_at = now + chrono::Duration::from_std(delay).unwrap_or_default();
                    run.attempt += 1;
                    run.status = WorkflowRunStatus::Sleeping;
                    run.wake_at = Some(wake_at);
                    run.last_error = Some(message.clone());
                    self.data.upsert_workflow_run(run.clone()).await?;
                    info!(
                        function_id = %spec.id,
                        run_id = %run.id,
                        step_name,
                        attempt = run.attempt,
                        delay_ms = delay.as_millis() as u64,
                        "scheduling retry after transient failure"
                    );
                    Ok(AttemptOutcome::RetryScheduled {
                        wake_at,
                        attempt: run.attempt,
                    })
                } else {
                    warn!(function_id = %spec.id, run_id = %run.id, step_name, "retries exhausted");
                    self.fail_run(spec, run, event, message, now).await
                }
            }
            None => {
                error!(function_id = %spec.id, run_id = %run.id, "handler aborted without recording an outcome");
                self.fail_run(spec, run, event, "internal: missing abort outcome".to_string(), now)
                    .await
            }
        }
    }

    async fn fail_run(
        &self,
        spec: &FunctionSpec,
        run: &mut WorkflowRun,
        event: &Event,
        message: String,
        now: DateTime<Utc>,
    ) -> TaskerResult<AttemptOutcome> {
        self.finalize(run, WorkflowRunStatus::Failed, now, Some(message.clone()))
            .await?;

        let failure = Event::new(
            self.clock.new_id(),
            names::FUNCTION_FAILED,
            EventPayload::FunctionFailed(FunctionFailedPayload {
                function_id: spec.id.clone(),
                run_id: run.id,
                error_message: message,
                error_stack: None,
                original_event: Box::new(event.data.clone()),
                original_event_name: event.name.clone(),
                attempt_count: run.attempt,
            }),
            now,
        );
        self.bus_publisher.publish(failure).await?;

        Ok(AttemptOutcome::Failed {
            reason: run.final_error.clone().unwrap_or_default(),
        })
    }

    async fn finalize(
        &self,
        run: &mut WorkflowRun,
        status: WorkflowRunStatus,
        now: DateTime<Utc>,
        final_error: Option<String>,
    ) -> TaskerResult<()> {
        let expected = run.status;

        // Claim the transition first so two concurrent attempts finalizing
        // the same run can't both think they won.
        let applied = self
            .data
            .conditional_update_run_status(run.id, expected, status)
            .await?;
        if matches!(applied, ConditionalUpdateOutcome::PredicateNotMatched) {
            warn!(run_id = %run.id, "finalize raced with a concurrent status transition, skipping");
            return Ok(());
        }

        run.status = status;
        run.ended_at = Some(now);
        run.final_error = final_error;
        self.data.upsert_workflow_run(run.clone()).await?;
        Ok(())
    }
}
