//! Behaviors and the weighted task table

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use rand::distributions::WeightedIndex;
use rand::Rng;
use rand_distr::Distribution;

use crate::error::{BehaviorError, SetupError};
use crate::user::UserContext;

/// Future returned by a behavior
pub type BehaviorFuture<'a> = BoxFuture<'a, Result<(), BehaviorError>>;

type BehaviorFn = dyn for<'a> Fn(&'a mut UserContext) -> BehaviorFuture<'a> + Send + Sync;

/// A named unit of simulated work
///
/// A behavior receives the user's [`UserContext`], may issue any number of
/// requests through it, and may fail with any error. Cloning is cheap.
///
/// ```
/// use loadgen_core::{Behavior, Request};
///
/// let search = Behavior::new("search_text", |ctx| {
///     Box::pin(async move {
///         ctx.request(&Request::post("/chromadb/search").param("query", "rust")).await;
///         Ok(())
///     })
/// });
/// assert_eq!(search.name(), "search_text");
/// ```
#[derive(Clone)]
pub struct Behavior {
    name: Arc<str>,
    func: Arc<BehaviorFn>,
}

impl Behavior {
    /// Create a behavior from an async closure returning a boxed future
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: for<'a> Fn(&'a mut UserContext) -> BehaviorFuture<'a> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            func: Arc::new(func),
        }
    }

    /// Stable name used for reporting
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the behavior once for `ctx`
    pub fn invoke<'a>(&self, ctx: &'a mut UserContext) -> BehaviorFuture<'a> {
        (self.func)(ctx)
    }
}

impl fmt::Debug for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Behavior").field("name", &self.name).finish()
    }
}

/// A behavior together with its selection weight
#[derive(Debug, Clone)]
pub struct TaskEntry {
    /// The behavior
    pub behavior: Behavior,
    /// Relative weight, at least 1
    pub weight: u32,
}

/// Ordered set of weighted behaviors
///
/// Built before a run and shared read-only between all users. Selection needs
/// only a caller-provided random number generator, so users never coordinate.
#[derive(Clone, Default)]
pub struct TaskTable {
    entries: Vec<TaskEntry>,
    index: Option<WeightedIndex<u32>>,
    total_weight: u64,
}

impl TaskTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `behavior` with `weight`
    ///
    /// # Errors
    /// [`SetupError::InvalidWeight`] if `weight` is 0, or if the total weight
    /// would no longer fit in a `u32`.
    pub fn add(&mut self, behavior: Behavior, weight: u32) -> Result<&mut Self, SetupError> {
        let total_weight = self.total_weight + u64::from(weight);
        if weight < 1 || total_weight > u64::from(u32::MAX) {
            return Err(SetupError::InvalidWeight {
                task: behavior.name().to_string(),
                weight,
            });
        }

        self.entries.push(TaskEntry { behavior, weight });
        self.total_weight = total_weight;
        self.index = WeightedIndex::new(self.entries.iter().map(|e| e.weight)).ok();
        Ok(self)
    }

    /// Consuming variant of [`add`](Self::add) for chained construction
    pub fn with(mut self, behavior: Behavior, weight: u32) -> Result<Self, SetupError> {
        self.add(behavior, weight)?;
        Ok(self)
    }

    /// Pick a behavior with probability `weight / total_weight`
    ///
    /// Returns `None` only for an empty table.
    pub fn select_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&Behavior> {
        let index = self.index.as_ref()?;
        self.entries.get(index.sample(rng)).map(|e| &e.behavior)
    }

    /// [`select_with`](Self::select_with) using the thread-local generator
    pub fn select(&self) -> Option<&Behavior> {
        self.select_with(&mut rand::thread_rng())
    }

    /// Number of registered behaviors
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no behavior is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all weights
    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    /// Selection probability of the entry at `position`
    pub fn probability(&self, position: usize) -> Option<f64> {
        self.entries
            .get(position)
            .map(|e| f64::from(e.weight) / self.total_weight as f64)
    }

    /// Entries in registration order
    pub fn iter(&self) -> impl Iterator<Item = &TaskEntry> {
        self.entries.iter()
    }
}

impl fmt::Debug for TaskTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| (e.behavior.name(), e.weight)))
            .finish()
    }
}
