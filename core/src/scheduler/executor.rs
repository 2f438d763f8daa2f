//! Scheduler execution logic

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::bus::MetricEventBus;
use crate::config::RunConfig;
use crate::error::{Error, Result, SetupError};
use crate::event::{Classifier, LifecycleEvent};
use crate::request::RequestExecutor;
use crate::task::{Behavior, TaskTable};
use crate::user::{IterationBudget, UserContext, UserState, UserStatus, VirtualUser};

use super::aggregator::{aggregate_user_stats, RunReport};
use super::builder::LoadSchedulerBuilder;
use super::ramp::RampLimiter;

/// Starts runs of virtual users against one executor
///
/// A scheduler can start any number of runs; each gets its own
/// [`RunHandle`]. All runs share the scheduler's bus and classifier.
pub struct LoadScheduler {
    executor: Arc<dyn RequestExecutor>,
    bus: Arc<MetricEventBus>,
    classifier: Classifier,
}

impl LoadScheduler {
    /// Create a scheduler
    ///
    /// Use [`LoadScheduler::builder`] for a more ergonomic construction.
    pub fn new(
        executor: Arc<dyn RequestExecutor>,
        bus: Arc<MetricEventBus>,
        classifier: Classifier,
    ) -> Self {
        Self {
            executor,
            bus,
            classifier,
        }
    }

    /// Builder with defaults for everything but the executor
    pub fn builder() -> LoadSchedulerBuilder {
        LoadSchedulerBuilder::new()
    }

    /// The bus every run publishes on
    pub fn bus(&self) -> &Arc<MetricEventBus> {
        &self.bus
    }

    /// Validate `config` and start `config.user_count` virtual users
    ///
    /// Returns as soon as the run is launched; users are spawned in the
    /// background, paced by `config.ramp_up_rate`.
    ///
    /// # Errors
    ///
    /// A [`SetupError`] for an invalid configuration, an empty task table
    /// (unless no users are requested), or when called outside a tokio runtime.
    /// No user is started in that case.
    pub fn start(
        &self,
        config: RunConfig,
        tasks: TaskTable,
        startup: Option<Behavior>,
    ) -> std::result::Result<RunHandle, SetupError> {
        config.validate()?;
        if config.user_count > 0 && tasks.is_empty() {
            return Err(SetupError::EmptyTaskTable);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| SetupError::MissingConfig("tokio runtime"))?;

        let (shutdown_tx, _) = broadcast::channel(1);
        let shared = Arc::new(RunShared {
            stop_flag: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            in_flight: Arc::new(AtomicUsize::new(0)),
            statuses: (0..config.user_count)
                .map(|id| Arc::new(UserStatus::new(id)))
                .collect(),
        });

        tracing::info!(
            target_host = %config.target_host,
            users = config.user_count,
            ramp_up_rate = config.ramp_up_rate,
            run_duration = ?config.run_duration,
            max_iterations = ?config.max_iterations,
            think_time = ?config.think_time,
            tasks = ?tasks,
            "Starting load run"
        );

        let plan = RunPlan {
            config,
            tasks: Arc::new(tasks),
            startup,
            executor: Arc::clone(&self.executor),
            bus: Arc::clone(&self.bus),
            classifier: self.classifier.clone(),
        };
        let supervisor = runtime.spawn(supervise(Arc::clone(&shared), plan));

        Ok(RunHandle {
            shared,
            state: Mutex::new(RunState::Running(supervisor)),
        })
    }
}

impl std::fmt::Debug for LoadScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadScheduler")
            .field("executor", &self.executor.name())
            .field("bus", &self.bus)
            .field("classifier", &self.classifier)
            .finish()
    }
}

/// State shared between a run's supervisor, its users and its handle
struct RunShared {
    stop_flag: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    in_flight: Arc<AtomicUsize>,
    statuses: Vec<Arc<UserStatus>>,
}

impl RunShared {
    /// Raise the stop flag and wake every sleeping user; `false` if already stopping
    fn request_stop(&self) -> bool {
        if self.stop_flag.swap(true, Ordering::SeqCst) {
            return false;
        }
        for status in &self.statuses {
            if !status.transition(UserState::Running, UserState::Stopping) {
                status.transition(UserState::Starting, UserState::Stopping);
            }
        }
        // No receivers just means no user is running yet.
        let _ = self.shutdown_tx.send(());
        true
    }

    fn is_stopping(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }
}

struct RunPlan {
    config: RunConfig,
    tasks: Arc<TaskTable>,
    startup: Option<Behavior>,
    executor: Arc<dyn RequestExecutor>,
    bus: Arc<MetricEventBus>,
    classifier: Classifier,
}

enum RunState {
    Running(JoinHandle<RunReport>),
    Finished(RunReport),
    Failed(String),
}

/// Control over one started run
///
/// Dropping the handle stops the run without waiting for it.
pub struct RunHandle {
    shared: Arc<RunShared>,
    state: Mutex<RunState>,
}

impl RunHandle {
    /// Stop every user and wait until all of them are `Stopped`
    ///
    /// Behaviors already running are allowed to finish. Calling this again
    /// (or after the run ended on its own) returns the same report.
    pub async fn stop(&self) -> Result<RunReport> {
        if self.shared.request_stop() {
            tracing::info!("Stopping load run");
        }
        self.wait().await
    }

    /// Wait until the run ends on its own (deadline, iteration budget) or is stopped
    pub async fn await_completion(&self) -> Result<RunReport> {
        self.wait().await
    }

    /// [`await_completion`](Self::await_completion), stopping the run on Ctrl+C
    pub async fn run_with_signal_handling(&self) -> Result<RunReport> {
        let shared = Arc::clone(&self.shared);

        let signal_handle = tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Received Ctrl+C, stopping virtual users...");
                    shared.request_stop();
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                }
            }
        });

        let result = self.wait().await;
        signal_handle.abort();
        result
    }

    /// Behaviors currently executing across all users
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// State of every user, by user id
    ///
    /// Users not yet launched by the ramp (or never launched because the run
    /// ended first) report `Created`.
    pub fn user_states(&self) -> Vec<UserState> {
        self.shared.statuses.iter().map(|s| s.get()).collect()
    }

    /// Users in `Starting`, `Running` or `Stopping`
    pub fn active_users(&self) -> usize {
        self.shared
            .statuses
            .iter()
            .filter(|s| s.get().is_active())
            .count()
    }

    /// Users that have reached `Running` at least once
    pub fn users_reached_running(&self) -> usize {
        self.shared
            .statuses
            .iter()
            .filter(|s| s.reached_running())
            .count()
    }

    /// Whether a stop was requested
    pub fn is_stopping(&self) -> bool {
        self.shared.is_stopping()
    }

    async fn wait(&self) -> Result<RunReport> {
        let mut state = self.state.lock().await;
        let outcome = match &mut *state {
            RunState::Running(supervisor) => supervisor.await.map_err(|e| e.to_string()),
            RunState::Finished(report) => Ok(report.clone()),
            RunState::Failed(e) => Err(e.clone()),
        };
        *state = match &outcome {
            Ok(report) => RunState::Finished(report.clone()),
            Err(e) => RunState::Failed(e.clone()),
        };
        outcome.map_err(Error::Join)
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        self.shared.request_stop();
    }
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("users", &self.shared.statuses.len())
            .field("active_users", &self.active_users())
            .field("in_flight", &self.in_flight())
            .field("stopping", &self.is_stopping())
            .finish()
    }
}

/// Spawn users (paced by the ramp), then collect their stats
async fn supervise(shared: Arc<RunShared>, plan: RunPlan) -> RunReport {
    let RunPlan {
        config,
        tasks,
        startup,
        executor,
        bus,
        classifier,
    } = plan;

    let start = Instant::now();
    let deadline = config.run_duration.and_then(|d| start.checked_add(d));
    let budget = config.max_iterations.map(IterationBudget::new);
    let ramp = RampLimiter::new(config.ramp_up_rate);
    let mut shutdown_rx = shared.shutdown_tx.subscribe();

    bus.emit_lifecycle(&LifecycleEvent::RunStarted {
        target_host: config.target_host.clone(),
        user_count: config.user_count,
        timestamp: chrono::Utc::now(),
    });

    let mut handles = Vec::with_capacity(config.user_count);
    for (user_id, status) in shared.statuses.iter().enumerate() {
        if ramp.is_enabled() {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => break,
                _ = sleep_until(deadline) => {
                    tracing::debug!(started = handles.len(), "Run ended during ramp-up");
                    break;
                }
                _ = ramp.until_ready() => {}
            }
        }

        // Subscribe before checking the flag so a concurrent stop is never missed.
        let user_shutdown = shared.shutdown_tx.subscribe();
        if shared.is_stopping() || deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(user_id as u64)),
            None => StdRng::from_entropy(),
        };
        let context = UserContext::new(
            user_id,
            Arc::clone(&executor),
            Arc::clone(&bus),
            classifier.clone(),
            rng,
        );
        let user = VirtualUser::new(context, Arc::clone(&tasks), config.think_time)
            .with_startup(startup.clone())
            .with_status(Arc::clone(status))
            .with_stop_flag(Arc::clone(&shared.stop_flag))
            .with_in_flight(Arc::clone(&shared.in_flight))
            .with_budget(budget.clone())
            .with_deadline(deadline);

        tracing::debug!(user_id, "Spawning virtual user");
        handles.push(tokio::spawn(user.run(user_shutdown)));
    }

    let mut users = Vec::with_capacity(handles.len());
    for (user_id, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(stats) => users.push(stats),
            Err(e) => {
                tracing::error!(user_id, error = %e, "Virtual user task failed");
            }
        }
    }

    let elapsed = start.elapsed();
    let report = aggregate_user_stats(&users, elapsed);

    bus.emit_lifecycle(&LifecycleEvent::RunStopped {
        elapsed,
        timestamp: chrono::Utc::now(),
    });
    tracing::info!(
        elapsed_secs = elapsed.as_secs_f64(),
        users = report.users_started,
        iterations = report.iterations,
        requests = report.total_requests(),
        failures = report.failures,
        exceptions = report.exceptions,
        rps = report.requests_per_second,
        "Load run completed"
    );

    report
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
