//! Virtual user execution loop

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::ThinkTime;
use crate::event::MetricEvent;
use crate::request::elapsed_ms;
use crate::task::{Behavior, TaskTable};

use super::context::UserContext;
use super::state::{UserState, UserStatus};
use super::stats::UserStats;

/// Run-wide bound on task selections, shared by every user
///
/// Users claim one slot per selection; once `limit` slots are claimed every
/// further claim fails.
#[derive(Debug, Clone)]
pub struct IterationBudget {
    claimed: Arc<AtomicUsize>,
    limit: usize,
}

impl IterationBudget {
    /// Budget of `limit` selections
    pub fn new(limit: usize) -> Self {
        Self {
            claimed: Arc::new(AtomicUsize::new(0)),
            limit,
        }
    }

    /// Claim one selection; `false` once the budget is spent
    pub fn try_claim(&self) -> bool {
        let claimed = self.claimed.fetch_add(1, Ordering::SeqCst);
        if claimed >= self.limit {
            // Over-claimed near the limit; keep the counter exact for the others.
            self.claimed.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Selections claimed so far
    pub fn claimed(&self) -> usize {
        self.claimed.load(Ordering::SeqCst).min(self.limit)
    }

    /// Total budget
    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// Decrements the in-flight counter even if the behavior future is dropped
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One simulated client session
///
/// Created by the scheduler and consumed by [`run`](Self::run).
pub struct VirtualUser {
    context: UserContext,
    tasks: Arc<TaskTable>,
    startup: Option<Behavior>,
    think_time: ThinkTime,
    status: Arc<UserStatus>,
    stop_flag: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    budget: Option<IterationBudget>,
    deadline: Option<Instant>,
}

impl VirtualUser {
    /// Create a user that runs until its stop flag is raised
    pub fn new(context: UserContext, tasks: Arc<TaskTable>, think_time: ThinkTime) -> Self {
        let status = Arc::new(UserStatus::new(context.user_id()));
        Self {
            context,
            tasks,
            startup: None,
            think_time,
            status,
            stop_flag: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            budget: None,
            deadline: None,
        }
    }

    /// Behavior to run once before the task loop
    pub fn with_startup(mut self, startup: Option<Behavior>) -> Self {
        self.startup = startup;
        self
    }

    /// Share a status cell with an observer
    pub fn with_status(mut self, status: Arc<UserStatus>) -> Self {
        self.status = status;
        self
    }

    /// Share the run's stop flag
    pub fn with_stop_flag(mut self, stop_flag: Arc<AtomicBool>) -> Self {
        self.stop_flag = stop_flag;
        self
    }

    /// Share the run's in-flight behavior counter
    pub fn with_in_flight(mut self, in_flight: Arc<AtomicUsize>) -> Self {
        self.in_flight = in_flight;
        self
    }

    /// Share the run's iteration budget
    pub fn with_budget(mut self, budget: Option<IterationBudget>) -> Self {
        self.budget = budget;
        self
    }

    /// Stop selecting new behaviors at `deadline`
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// The user's id
    pub fn id(&self) -> usize {
        self.context.user_id()
    }

    /// Shared status cell
    pub fn status(&self) -> Arc<UserStatus> {
        Arc::clone(&self.status)
    }

    /// Run the user until it is stopped, runs out of time, or runs out of budget
    ///
    /// `shutdown` only interrupts think-time; a behavior that has started
    /// always runs to completion.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> UserStats {
        let user_id = self.id();
        self.context.stats_mut().start();
        self.status.advance(UserState::Starting);
        tracing::debug!(user_id, "Virtual user starting");

        if let Some(startup) = self.startup.clone() {
            self.invoke(&startup).await;
        }
        // A failed start-up behavior has already been recorded; the user runs regardless.
        self.status.finish_startup(self.should_stop());

        loop {
            if self.should_stop() {
                break;
            }

            if let Some(budget) = &self.budget {
                if !budget.try_claim() {
                    tracing::debug!(user_id, "Iteration budget spent");
                    break;
                }
            }

            let Some(behavior) = self.tasks.select_with(self.context.rng()).cloned() else {
                tracing::debug!(user_id, "Task table is empty");
                break;
            };
            self.context.stats_mut().iterations += 1;
            self.invoke(&behavior).await;

            if self.should_stop() {
                break;
            }

            let mut pause = self.think_time.sample(self.context.rng());
            if let Some(deadline) = self.deadline {
                pause = pause.min(deadline.saturating_duration_since(Instant::now()));
            }

            tokio::select! {
                biased;

                // Any outcome (signal, lag, closed channel) means the run is over.
                _ = shutdown.recv() => {
                    tracing::debug!(user_id, "Woken from think-time by shutdown");
                    break;
                }

                _ = tokio::time::sleep(pause) => {}
            }
        }

        self.status.advance(UserState::Stopping);
        let mut stats = self.context.into_stats();
        stats.stop();
        self.status.advance(UserState::Stopped);

        tracing::debug!(
            user_id,
            iterations = stats.iterations,
            requests = stats.total_requests(),
            behavior_errors = stats.behavior_errors,
            "Virtual user stopped"
        );
        stats
    }

    fn should_stop(&self) -> bool {
        if self.stop_flag.load(Ordering::SeqCst) {
            return true;
        }
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    /// Run one behavior, turning an error or panic into an `exception` event
    async fn invoke(&mut self, behavior: &Behavior) {
        let start = std::time::Instant::now();
        let result = {
            let _in_flight = InFlight::enter(&self.in_flight);
            AssertUnwindSafe(behavior.invoke(&mut self.context))
                .catch_unwind()
                .await
        };

        let error = match result {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(panic) => format!("behavior panicked: {}", panic_message(panic.as_ref())),
        };

        let user_id = self.context.user_id();
        tracing::warn!(user_id, behavior = behavior.name(), error = %error, "Behavior failed");
        self.context.stats_mut().record_behavior_error();
        let event = MetricEvent::behavior_error(behavior.name(), error, elapsed_ms(start), user_id);
        self.context.emit(&event);
    }
}

impl std::fmt::Debug for VirtualUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualUser")
            .field("id", &self.id())
            .field("tasks", &self.tasks)
            .field("startup", &self.startup.as_ref().map(Behavior::name))
            .field("think_time", &self.think_time)
            .field("state", &self.status.get())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
