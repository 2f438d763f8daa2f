//! Load scheduler and run lifecycle
//!
//! The scheduler turns a [`RunConfig`](crate::RunConfig) and a
//! [`TaskTable`](crate::TaskTable) into a running load test:
//! - Validating the configuration before anything starts
//! - Spawning one tokio task per virtual user, optionally ramped up
//! - Broadcasting cancellation to every user on stop
//! - Collecting per-user counters into a [`RunReport`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use loadgen_core::{Behavior, LoadScheduler, Request, RequestExecutor, RunConfig, TaskTable};
//!
//! # async fn run(executor: Arc<dyn RequestExecutor>) -> Result<(), Box<dyn std::error::Error>> {
//! let scheduler = LoadScheduler::builder().executor(executor).build()?;
//!
//! let tasks = TaskTable::new().with(
//!     Behavior::new("health", |ctx| {
//!         Box::pin(async move {
//!             ctx.request(&Request::get("/health")).await;
//!             Ok(())
//!         })
//!     }),
//!     1,
//! )?;
//!
//! let handle = scheduler.start(RunConfig::new("http://localhost:5115", 10), tasks, None)?;
//! let report = handle.run_with_signal_handling().await?;
//! println!("requests: {}", report.total_requests());
//! # Ok(())
//! # }
//! ```

mod aggregator;
mod builder;
mod executor;
mod ramp;

pub use aggregator::{aggregate_user_stats, RunReport};
pub use builder::LoadSchedulerBuilder;
pub use executor::{LoadScheduler, RunHandle};
pub use ramp::RampLimiter;
