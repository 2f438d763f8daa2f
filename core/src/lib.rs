//! loadgen-core: virtual-user load generation engine
//!
//! This crate simulates many independent clients hitting a service:
//!
//! - [`TaskTable`] of weighted [`Behavior`]s, sampled by every user
//! - [`VirtualUser`] loop: select, invoke, record, think, repeat
//! - [`LoadScheduler`] to start, ramp up and stop a population of users
//! - [`MetricEventBus`] fanning [`MetricEvent`]s out to listeners
//! - [`RequestExecutor`], the transport seam, implemented elsewhere
//!
//! Built-in listeners: [`LogListener`] and [`StatsCollector`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod listener;
pub mod request;
pub mod scheduler;
pub mod stats;
pub mod task;
pub mod user;

pub use bus::{EventListener, FnListener, ListenerId, MetricEventBus};
pub use config::{RunConfig, ThinkTime, ThinkTimeProfile, MAX_RUN_DURATION};
pub use error::{BehaviorError, Error, ListenerError, Result, SetupError};
pub use event::{Classifier, LifecycleEvent, MetricCategory, MetricEvent};
pub use listener::LogListener;
pub use request::{elapsed_ms, Method, Params, Request, RequestExecutor, RequestOutcome};
pub use scheduler::{
    aggregate_user_stats, LoadScheduler, LoadSchedulerBuilder, RampLimiter, RunHandle, RunReport,
};
pub use stats::{
    EndpointStats, ErrorCount, LatencyHistogram, LatencyPercentiles, StatsCollector, StatsSnapshot,
};
pub use task::{Behavior, BehaviorFuture, TaskEntry, TaskTable};
pub use user::{
    IterationBudget, Session, UserContext, UserState, UserStats, UserStatus, VirtualUser,
};
