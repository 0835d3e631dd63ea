//! # Concurrency Governor
//!
//! Per-function [`tokio::sync::Semaphore`] plus a global worker pool
//! semaphore. A run holds one global permit and one per-function permit
//! for the duration of a single attempt; a sleeping run releases both
//! (the permit is acquired again when the run wakes and re-dispatches).

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Permits held for the duration of one attempt. Dropping this releases
/// both the per-function and the global slot.
#[derive(Debug)]
pub struct AttemptPermit {
    _function: OwnedSemaphorePermit,
    _global: OwnedSemaphorePermit,
}

#[derive(Debug)]
pub struct ConcurrencyGovernor {
    global: Arc<Semaphore>,
    per_function: DashMap<String, Arc<Semaphore>>,
    default_per_function: u32,
}

impl ConcurrencyGovernor {
    #[must_use]
    pub fn new(global_capacity: u32, default_per_function: u32) -> Self {
        Self {
            global: Arc::new(Semaphore::new(global_capacity as usize)),
            per_function: DashMap::new(),
            default_per_function,
        }
    }

    fn function_semaphore(&self, function_id: &str, capacity: u32) -> Arc<Semaphore> {
        self.per_function
            .entry(function_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(capacity as usize)))
            .clone()
    }

    /// Acquire one global permit and one per-function permit, in that
    /// order, so a function starved at its own limit never holds a
    /// global slot hostage.
    pub async fn acquire(&self, function_id: &str, capacity: Option<u32>) -> AttemptPermit {
        let capacity = capacity.unwrap_or(self.default_per_function);
        let global = self
            .global
            .clone()
            .acquire_owned()
            .await
            .expect("global semaphore is never closed");
        let function = self
            .function_semaphore(function_id, capacity)
            .acquire_owned()
            .await
            .expect("function semaphore is never closed");

        AttemptPermit {
            _function: function,
            _global: global,
        }
    }

    #[must_use]
    pub fn global_available(&self) -> usize {
        self.global.available_permits()
    }
}
