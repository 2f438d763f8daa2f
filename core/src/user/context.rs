//! Per-user execution context

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rand::rngs::StdRng;

use crate::bus::MetricEventBus;
use crate::event::{Classifier, MetricEvent};
use crate::request::{Request, RequestExecutor, RequestOutcome};

use super::stats::UserStats;

/// Typed per-user session storage
///
/// Holds at most one value per type. Never shared between users.
#[derive(Default)]
pub struct Session {
    values: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Session {
    /// Empty session
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value`, returning the previous value of the same type
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) -> Option<T> {
        self.values
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Borrow the stored value of type `T`
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    /// Mutably borrow the stored value of type `T`
    pub fn get_mut<T: Any + Send + Sync>(&mut self) -> Option<&mut T> {
        self.values
            .get_mut(&TypeId::of::<T>())
            .and_then(|v| v.downcast_mut::<T>())
    }

    /// Remove and return the stored value of type `T`
    pub fn remove<T: Any + Send + Sync>(&mut self) -> Option<T> {
        self.values
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    /// Whether a value of type `T` is stored
    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("values", &self.len()).finish()
    }
}

/// Everything a behavior can reach while it runs
///
/// Owned by exactly one virtual user. Requests issued through
/// [`request`](Self::request) are timed by the executor, classified, counted
/// and published on the bus before the outcome is handed back.
pub struct UserContext {
    user_id: usize,
    executor: Arc<dyn RequestExecutor>,
    bus: Arc<MetricEventBus>,
    classifier: Classifier,
    session: Session,
    rng: StdRng,
    stats: UserStats,
}

impl UserContext {
    /// Create a context for user `user_id`
    pub fn new(
        user_id: usize,
        executor: Arc<dyn RequestExecutor>,
        bus: Arc<MetricEventBus>,
        classifier: Classifier,
        rng: StdRng,
    ) -> Self {
        Self {
            user_id,
            executor,
            bus,
            classifier,
            session: Session::new(),
            rng,
            stats: UserStats::new(),
        }
    }

    /// Owning user's id
    pub fn user_id(&self) -> usize {
        self.user_id
    }

    /// Session storage
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Mutable session storage
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// The user's random number generator
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Issue `request` and publish one metric event for it
    pub async fn request(&mut self, request: &Request) -> RequestOutcome {
        let outcome = self.executor.execute(request).await;
        let category = self.classifier.classify(&outcome, request.expected_status);
        let event = MetricEvent::from_outcome(
            request.report_name(),
            request.method,
            &outcome,
            category,
            request.context.clone(),
            self.user_id,
        );

        self.stats.record(category);
        self.bus.emit(&event);
        outcome
    }

    /// Publish a custom event on the bus
    pub fn emit(&self, event: &MetricEvent) {
        self.bus.emit(event);
    }

    /// Counters accumulated so far
    pub fn stats(&self) -> &UserStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut UserStats {
        &mut self.stats
    }

    pub(crate) fn into_stats(self) -> UserStats {
        self.stats
    }
}

impl fmt::Debug for UserContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserContext")
            .field("user_id", &self.user_id)
            .field("executor", &self.executor.name())
            .field("session", &self.session)
            .finish()
    }
}
