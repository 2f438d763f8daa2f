//! Builder pattern for LoadScheduler construction

use std::sync::Arc;

use crate::bus::{EventListener, MetricEventBus};
use crate::error::SetupError;
use crate::event::Classifier;
use crate::request::RequestExecutor;

use super::executor::LoadScheduler;

/// Builder for creating a [`LoadScheduler`]
///
/// # Example
///
/// ```ignore
/// let scheduler = LoadScheduler::builder()
///     .executor(Arc::new(http))
///     .classifier(Classifier::any_2xx())
///     .listener(Arc::new(LogListener::new()))
///     .build()?;
/// ```
#[derive(Default)]
pub struct LoadSchedulerBuilder {
    executor: Option<Arc<dyn RequestExecutor>>,
    bus: Option<Arc<MetricEventBus>>,
    classifier: Classifier,
    listeners: Vec<Arc<dyn EventListener>>,
}

impl LoadSchedulerBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the transport every user issues requests through
    pub fn executor(mut self, executor: Arc<dyn RequestExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Use an existing bus instead of a fresh one
    pub fn bus(mut self, bus: Arc<MetricEventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Set the run-wide status classifier (default: exactly 200)
    pub fn classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Register a listener on the bus when building
    pub fn listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Build the scheduler
    ///
    /// # Errors
    ///
    /// [`SetupError::MissingConfig`] if no executor was set.
    pub fn build(self) -> Result<LoadScheduler, SetupError> {
        let executor = self
            .executor
            .ok_or(SetupError::MissingConfig("executor"))?;

        let bus = self.bus.unwrap_or_default();
        for listener in self.listeners {
            bus.register(listener);
        }

        Ok(LoadScheduler::new(executor, bus, self.classifier))
    }
}
