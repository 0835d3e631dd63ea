//! # Function Registry
//!
//! Maps a function id to its trigger, retry/concurrency policy, and
//! handler. Registration happens once at startup; duplicate ids are
//! rejected immediately rather than silently overwriting an earlier
//! registration.

use crate::step::WorkflowHandler;
use std::collections::HashMap;
use std::sync::Arc;
use tasker_shared::error::{TaskerError, TaskerResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Trigger {
    Event(String),
    Cron(String),
}

#[derive(Clone)]
pub struct FunctionSpec {
    pub id: String,
    pub name: String,
    pub trigger: Trigger,
    pub retries: u32,
    pub concurrency: u32,
    pub handler: Arc<dyn WorkflowHandler>,
}

impl std::fmt::Debug for FunctionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionSpec")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("trigger", &self.trigger)
            .field("retries", &self.retries)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl FunctionSpec {
    /// Total invocations a run of this function may make: the initial
    /// attempt plus `retries` retries.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.retries + 1
    }
}

/// Registry of all functions known to the runtime. Built once at startup
/// and treated as immutable afterward.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    by_id: HashMap<String, FunctionSpec>,
    by_event_name: HashMap<String, Vec<String>>,
}

impl FunctionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function. Fails if `spec.id` has already been
    /// registered.
    pub fn register(&mut self, spec: FunctionSpec) -> TaskerResult<()> {
        if self.by_id.contains_key(&spec.id) {
            return Err(TaskerError::Config(format!(
                "duplicate function id '{}' at startup",
                spec.id
            )));
        }

        if let Trigger::Event(name) = &spec.trigger {
            self.by_event_name
                .entry(name.clone())
                .or_default()
                .push(spec.id.clone());
        }

        self.by_id.insert(spec.id.clone(), spec);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&FunctionSpec> {
        self.by_id.get(id)
    }

    /// All functions subscribed to `event_name`, in registration order.
    #[must_use]
    pub fn subscribed_to(&self, event_name: &str) -> Vec<&FunctionSpec> {
        self.by_event_name
            .get(event_name)
            .into_iter()
            .flatten()
            .filter_map(|id| self.by_id.get(id))
            .collect()
    }

    #[must_use]
    pub fn cron_functions(&self) -> Vec<&FunctionSpec> {
        self.by_id
            .values()
            .filter(|f| matches!(f.trigger, Trigger::Cron(_)))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{HandlerResult, StepContext};
    use async_trait::async_trait;

    #[derive(Debug)]
    struct NoopHandler;

    #[async_trait]
    impl WorkflowHandler for NoopHandler {
        async fn handle(&self, _ctx: &StepContext) -> HandlerResult {
            Ok(serde_json::Value::Null)
        }
    }

    fn spec(id: &str, trigger: Trigger) -> FunctionSpec {
        FunctionSpec {
            id: id.to_string(),
            name: id.to_string(),
            trigger,
            retries: 2,
            concurrency: 5,
            handler: Arc::new(NoopHandler),
        }
    }

    #[test]
    fn rejects_duplicate_ids() {
        let mut registry = FunctionRegistry::new();
        registry
            .register(spec("fx-rate-ingestion", Trigger::Cron("0 */4 * * *".into())))
            .unwrap();
        let err = registry
            .register(spec("fx-rate-ingestion", Trigger::Cron("0 9 * * *".into())))
            .unwrap_err();
        assert!(matches!(err, TaskerError::Config(_)));
    }

    #[test]
    fn finds_functions_subscribed_to_an_event() {
        let mut registry = FunctionRegistry::new();
        registry
            .register(spec("email-workflow", Trigger::Event("email/send".into())))
            .unwrap();
        registry
            .register(spec("pdf-generation", Trigger::Event("pdf/generate".into())))
            .unwrap();

        let subscribed = registry.subscribed_to("email/send");
        assert_eq!(subscribed.len(), 1);
        assert_eq!(subscribed[0].id, "email-workflow");
    }

    #[test]
    fn max_attempts_is_retries_plus_one() {
        let f = spec("x", Trigger::Event("x".into()));
        assert_eq!(f.max_attempts(), 3);
    }
}
