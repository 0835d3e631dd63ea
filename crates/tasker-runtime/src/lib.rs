//! The workflow runtime: event bus, cron dispatcher, function registry,
//! step executor, concurrency governor, DLQ handler, and the worker pool
//! that ties them together into a dispatch loop.

pub mod bus;
pub mod concurrency;
pub mod cron_dispatcher;
pub mod dlq;
pub mod executor;
pub mod registry;
pub mod step;
pub mod worker_pool;

pub use bus::{BusPublisher, EventBus, InMemoryEventBus};
pub use concurrency::{AttemptPermit, ConcurrencyGovernor};
pub use cron_dispatcher::{default_triggers, CronDispatcher, CronTrigger};
pub use dlq::{default_rules, DlqHandler, DlqRule};
pub use executor::{derive_run_id, AttemptOutcome, StepExecutor};
pub use registry::{FunctionRegistry, FunctionSpec, Trigger};
pub use step::{HandlerResult, Publisher, RunOutcome, StepAborted, StepContext, WorkflowHandler};
pub use worker_pool::WorkerPool;
