//! Virtual users
//!
//! A virtual user is one simulated client session. It runs as its own tokio
//! task and drives the loop **select -> invoke -> record -> think -> repeat**:
//!
//! 1. Runs the optional start-up behavior once (failures are recorded, not fatal)
//! 2. Picks a behavior from the shared [`TaskTable`](crate::TaskTable)
//! 3. Invokes it with its private [`UserContext`]; every request the behavior
//!    issues becomes a [`MetricEvent`](crate::MetricEvent) on the bus
//! 4. Sleeps a random think-time, waking early if the run is stopped
//! 5. Repeats until stopped, out of time, or out of iteration budget
//!
//! A behavior that is already running is always allowed to finish; stopping
//! only takes effect between behaviors.

mod context;
mod executor;
mod state;
mod stats;

pub use context::{Session, UserContext};
pub use executor::{IterationBudget, VirtualUser};
pub use state::{UserState, UserStatus};
pub use stats::UserStats;

#[cfg(test)]
mod tests;
