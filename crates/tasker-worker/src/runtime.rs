//! # Composition Root
//!
//! Wires every runtime component — clock, event bus, function registry,
//! concurrency governor, step executor, DLQ handler, cron dispatcher, and
//! the worker pool that drives them — into one [`Runtime`], registering
//! the six included workflow families plus the DLQ's own two functions
//! against the in-memory ports from [`crate::testing`].

use std::sync::Arc;

use tasker_runtime::{
    default_rules, default_triggers, BusPublisher, ConcurrencyGovernor, CronDispatcher, DlqHandler,
    EventBus, FunctionRegistry, FunctionSpec, InMemoryEventBus, StepExecutor, Trigger, WorkerPool,
};
use tasker_shared::error::TaskerResult;
use tasker_shared::events::names;
use tasker_shared::ports::DataPort;
use tasker_shared::{Clock, RuntimeConfig, SystemClock};
use tasker_workflows::{
    DocumentApprovalDecisionHandler, DocumentApprovalReminderHandler, DocumentApprovalStartHandler,
    EmailWorkflowHandler, FxRateIngestHandler, FxRateStalenessAlertHandler, InvoiceApprovedHandler,
    PdfGenerationHandler,
};
use tokio::sync::Mutex;
use tracing::info;

use crate::dlq_adapter::{DlqFunctionFailedHandler, DlqRetryHandler};

const ADMIN_ADDRESS: &str = "admin@tasker-flow.local";
const LEASE_SECONDS: i64 = 30;

/// Everything the binary entry point needs to drive the system: the bus
/// (for ingress and the health/metrics surface), the dispatch loop, and
/// the cron tick loop. `Arc`-wrapped so `tasker-worker/src/bin/server.rs`
/// can hand clones of the pieces it needs to independently spawned tasks.
#[derive(Debug)]
pub struct Runtime {
    pub config: RuntimeConfig,
    pub bus: Arc<InMemoryEventBus>,
    pub registry: Arc<FunctionRegistry>,
    pub worker_pool: Arc<WorkerPool<InMemoryEventBus>>,
    pub cron_dispatcher: Mutex<CronDispatcher<InMemoryEventBus>>,
    pub data: Arc<dyn DataPort>,
}

fn register_all(
    registry: &mut FunctionRegistry,
    data: Arc<dyn DataPort>,
    bus: Arc<InMemoryEventBus>,
    clock: Arc<dyn Clock>,
    config: &RuntimeConfig,
) -> TaskerResult<()> {
    let publisher = Arc::new(BusPublisher::new(bus));

    let fetcher: Arc<dyn tasker_shared::ports::FxRateFetcher> =
        Arc::new(crate::testing::InMemoryFxRateFetcher::new(4.4));
    let ingest_handler = Arc::new(FxRateIngestHandler::new(
        fetcher,
        data.clone(),
        clock.clone(),
        config.fx.staleness_thresholds.clone(),
        ADMIN_ADDRESS,
    ));

    registry.register(FunctionSpec {
        id: "fx-rate-ingestion".to_string(),
        name: "fxRateIngestManual".to_string(),
        trigger: Trigger::Event(names::FX_INGEST_MANUAL.to_string()),
        retries: 4,
        concurrency: config.concurrency.default_per_function,
        handler: ingest_handler.clone(),
    })?;
    registry.register(FunctionSpec {
        id: "fx-rate-ingestion-cron".to_string(),
        name: "fxRateIngestJob".to_string(),
        trigger: Trigger::Event(names::CRON_FX_RATE_INGEST.to_string()),
        retries: 4,
        concurrency: config.concurrency.default_per_function,
        handler: ingest_handler,
    })?;

    registry.register(FunctionSpec {
        id: "fx-rate-staleness-alert".to_string(),
        name: "fxRateStalenessAlert".to_string(),
        trigger: Trigger::Event(names::CRON_FX_RATE_STALENESS_ALERT.to_string()),
        retries: 2,
        concurrency: config.concurrency.default_per_function,
        handler: Arc::new(FxRateStalenessAlertHandler::new(
            data.clone(),
            clock.clone(),
            config.fx.staleness_thresholds.clone(),
            ADMIN_ADDRESS,
        )),
    })?;

    let blob: Arc<dyn tasker_shared::ports::BlobPort> =
        Arc::new(crate::testing::InMemoryBlob::new("https://blobs.tasker-flow.local"));
    let pdf_renderer: Arc<dyn tasker_shared::ports::PdfRenderer> = Arc::new(crate::testing::InMemoryPdfRenderer::new());
    let email_sender: Arc<dyn tasker_shared::ports::EmailSender> = Arc::new(crate::testing::InMemoryEmailSender::new());

    registry.register(FunctionSpec {
        id: "pdf-generation".to_string(),
        name: "pdfGeneration".to_string(),
        trigger: Trigger::Event(names::PDF_GENERATE.to_string()),
        retries: 2,
        concurrency: 5,
        handler: Arc::new(PdfGenerationHandler::new(
            pdf_renderer.clone(),
            blob.clone(),
            data.clone(),
            clock.clone(),
            std::time::Duration::from_millis(config.pdf.step_timeout_ms),
        )),
    })?;

    registry.register(FunctionSpec {
        id: "email-workflow".to_string(),
        name: "emailWorkflow".to_string(),
        trigger: Trigger::Event(names::EMAIL_SEND.to_string()),
        retries: 2,
        concurrency: config.concurrency.default_per_function,
        handler: Arc::new(EmailWorkflowHandler::new(email_sender.clone())),
    })?;

    registry.register(FunctionSpec {
        id: "invoice-approved".to_string(),
        name: "invoiceApproved".to_string(),
        trigger: Trigger::Event(names::INVOICE_APPROVED.to_string()),
        retries: 2,
        concurrency: config.concurrency.default_per_function,
        handler: Arc::new(InvoiceApprovedHandler::new(
            pdf_renderer,
            blob,
            email_sender,
            clock.clone(),
        )),
    })?;

    registry.register(FunctionSpec {
        id: "document-approval-start".to_string(),
        name: "documentApprovalWorkflow.start".to_string(),
        trigger: Trigger::Event(names::DOCUMENT_APPROVAL_START.to_string()),
        retries: 2,
        concurrency: config.concurrency.default_per_function,
        handler: Arc::new(DocumentApprovalStartHandler::new(data.clone(), clock.clone())),
    })?;
    registry.register(FunctionSpec {
        id: "document-approval-decision".to_string(),
        name: "documentApprovalWorkflow.decision".to_string(),
        trigger: Trigger::Event(names::DOCUMENT_APPROVAL_DECISION.to_string()),
        retries: 2,
        concurrency: config.concurrency.default_per_function,
        handler: Arc::new(DocumentApprovalDecisionHandler::new(data.clone(), clock.clone())),
    })?;
    registry.register(FunctionSpec {
        id: "document-approval-reminder".to_string(),
        name: "documentApprovalWorkflow.reminder".to_string(),
        trigger: Trigger::Event(names::DOCUMENT_APPROVAL_REMINDER.to_string()),
        retries: 2,
        concurrency: config.concurrency.default_per_function,
        handler: Arc::new(DocumentApprovalReminderHandler::new(data.clone(), clock.clone())),
    })?;

    let mut dlq_rules = default_rules();
    for critical in &config.dlq.critical_functions {
        dlq_rules.entry(critical.clone()).or_insert_with(tasker_runtime::dlq::fallback_rule);
    }
    let dlq = Arc::new(DlqHandler::new(
        data,
        publisher,
        clock,
        dlq_rules,
        config.dlq.critical_functions.clone(),
        ADMIN_ADDRESS,
    ));

    registry.register(FunctionSpec {
        id: "dlq-function-failed".to_string(),
        name: "dlqFunctionFailed".to_string(),
        trigger: Trigger::Event(names::FUNCTION_FAILED.to_string()),
        retries: 2,
        concurrency: config.concurrency.default_per_function,
        handler: Arc::new(DlqFunctionFailedHandler::new(dlq.clone())),
    })?;
    registry.register(FunctionSpec {
        id: "dlq-retry".to_string(),
        name: "dlqRetry".to_string(),
        trigger: Trigger::Event(names::DLQ_RETRY.to_string()),
        retries: 2,
        concurrency: config.concurrency.default_per_function,
        handler: Arc::new(DlqRetryHandler::new(dlq)),
    })?;

    Ok(())
}

impl Runtime {
    /// Build the composition root against the in-memory reference ports.
    /// A deployment with real backends would swap the `Arc<dyn ...>`
    /// constructions in [`register_all`] for production adapters without
    /// touching anything downstream of the ports.
    pub fn build(config: RuntimeConfig) -> TaskerResult<Arc<Self>> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let data: Arc<dyn DataPort> = Arc::new(crate::testing::InMemoryData::new());
        let bus = Arc::new(InMemoryEventBus::new(
            clock.clone(),
            chrono::Duration::hours(i64::from(config.idempotency.window_hours)),
        ));

        let mut registry = FunctionRegistry::new();
        register_all(&mut registry, data.clone(), bus.clone(), clock.clone(), &config)?;
        let registry = Arc::new(registry);

        let governor = Arc::new(ConcurrencyGovernor::new(
            config.concurrency.global,
            config.concurrency.default_per_function,
        ));
        let executor_publisher = Arc::new(BusPublisher::new(bus.clone()));
        let executor = Arc::new(StepExecutor::new(data.clone(), executor_publisher, clock.clone(), config.clone()));

        let worker_pool = Arc::new(WorkerPool::new(
            bus.clone(),
            registry.clone(),
            governor,
            executor,
            chrono::Duration::seconds(LEASE_SECONDS),
        ));

        let cron_dispatcher = Mutex::new(CronDispatcher::new(
            bus.clone(),
            clock,
            config.cron.catch_up_budget as usize,
            default_triggers(),
        ));

        info!(functions = registry.len(), "composition root wired, ready to dispatch");

        Ok(Arc::new(Self {
            config,
            bus,
            registry,
            worker_pool,
            cron_dispatcher,
            data,
        }))
    }

    /// Drive the worker pool's dispatch loop until `shutdown` resolves.
    pub async fn run_worker_pool(&self, shutdown: tokio::sync::oneshot::Receiver<()>) {
        self.worker_pool.run_until(shutdown).await;
    }

    /// Tick the cron dispatcher on a fixed interval until `shutdown`
    /// resolves. Runs independently of the worker pool loop so a slow
    /// dispatch tick never delays cron fires (and vice versa).
    pub async fn run_cron_loop(&self, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("cron dispatcher received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.cron_dispatcher.lock().await.tick().await {
                        tracing::warn!(error = %err, "cron dispatcher tick failed");
                    }
                }
            }
        }
    }
}
