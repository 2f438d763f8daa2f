//! HTTP transport for loadgen
//!
//! Provides [`HttpExecutor`], a [`RequestExecutor`](loadgen_core::RequestExecutor)
//! backed by a pooled `reqwest` client. Request parameters travel as a query
//! string, and latency covers everything from dispatch until the whole body has
//! been read.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod executor;

pub use config::HttpConfig;
pub use executor::HttpExecutor;
