//! Metric event fan-out
//!
//! The bus is shared by every virtual user of a run. Emission takes a snapshot
//! of the registered listeners under a short lock and notifies them outside of
//! it, so listeners may register or unregister others while events flow.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::ListenerError;
use crate::event::{LifecycleEvent, MetricEvent};

/// Consumer of metric and lifecycle events
///
/// Called synchronously from the emitting virtual user, so implementations
/// should be quick. Returning an error (or panicking) only produces a log line.
pub trait EventListener: Send + Sync {
    /// Name used in logs when the listener fails
    fn name(&self) -> &str {
        "listener"
    }

    /// Handle one metric event
    fn on_event(&self, event: &MetricEvent) -> Result<(), ListenerError>;

    /// Handle a run lifecycle event
    fn on_lifecycle(&self, _event: &LifecycleEvent) -> Result<(), ListenerError> {
        Ok(())
    }
}

/// Handle returned by [`MetricEventBus::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Adapts a closure into an [`EventListener`]
pub struct FnListener<F> {
    name: String,
    func: F,
}

impl<F> FnListener<F>
where
    F: Fn(&MetricEvent) -> Result<(), ListenerError> + Send + Sync,
{
    /// Wrap `func` under `name`
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> EventListener for FnListener<F>
where
    F: Fn(&MetricEvent) -> Result<(), ListenerError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&self, event: &MetricEvent) -> Result<(), ListenerError> {
        (self.func)(event)
    }
}

struct Registration {
    id: ListenerId,
    listener: Arc<dyn EventListener>,
}

/// Process-wide sink for metric events
#[derive(Default)]
pub struct MetricEventBus {
    listeners: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
}

impl MetricEventBus {
    /// Create a bus with no listeners
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; it sees every event emitted after this call returns
    pub fn register(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(listener = listener.name(), id = id.0, "Registering listener");
        self.lock().push(Registration { id, listener });
        id
    }

    /// Register a closure as a listener
    pub fn register_fn<F>(&self, name: impl Into<String>, func: F) -> ListenerId
    where
        F: Fn(&MetricEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnListener::new(name, func)))
    }

    /// Remove a listener; returns `false` if it was not registered
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|r| r.id != id);
        before != listeners.len()
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.lock().len()
    }

    /// Deliver a metric event to every registered listener, in registration order
    pub fn emit(&self, event: &MetricEvent) {
        for listener in self.snapshot() {
            let result = catch_unwind(AssertUnwindSafe(|| listener.on_event(event)));
            report_failure(listener.as_ref(), &event.name, result);
        }
    }

    /// Deliver a lifecycle event to every registered listener
    pub fn emit_lifecycle(&self, event: &LifecycleEvent) {
        for listener in self.snapshot() {
            let result = catch_unwind(AssertUnwindSafe(|| listener.on_lifecycle(event)));
            report_failure(listener.as_ref(), "lifecycle", result);
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn EventListener>> {
        self.lock()
            .iter()
            .map(|r| Arc::clone(&r.listener))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Registration>> {
        // Listeners never run under this lock, so a poisoned guard still holds a valid list.
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for MetricEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricEventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

fn report_failure(
    listener: &dyn EventListener,
    event: &str,
    result: std::thread::Result<Result<(), ListenerError>>,
) {
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(listener = listener.name(), event, error = %e, "Listener failed");
        }
        Err(_) => {
            tracing::warn!(listener = listener.name(), event, "Listener panicked");
        }
    }
}
