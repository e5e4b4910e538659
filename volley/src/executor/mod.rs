//! Executor — orchestration of one concurrency level
//!
//! The `Executor` trait is the runtime that executes a `Scenario`. The built-in
//! [`BarrierExecutor`] spawns one task per simulated client, parks all of them
//! behind a start barrier and releases them at once, so "N concurrent" means N
//! requests genuinely in flight together rather than a ramp.
//!
//! # High-level flow
//! 1. Each worker subscribes to the release channel and reports itself parked.
//! 2. The executor waits until every worker parked, or until the `settle` grace
//!    period runs out, then broadcasts the release and records `released_at`.
//! 3. Workers run their dispatches (one per round) and return a worker-local
//!    `Aggregate` together with their completion instant.
//! 4. The executor joins every worker. A worker that fails to join has each of its
//!    dispatches recorded through [`Aggregate::record_lost`], then all aggregates
//!    are merged into the level result.
//!
//! # Tuning knobs
//! - `settle` (Duration): upper bound on waiting for workers to park. Parking normally
//!   takes microseconds; the bound only matters on a starved runtime.
//! - `rounds` (usize): sequential requests each client issues after release.
pub mod barrier;
pub use barrier::BarrierExecutor;

use crate::{aggregate::Aggregate, metric::Dispatch, scenario::Scenario};
use std::future::Future;
use tokio::time::Instant;

/// The runtime hook that executes a `Scenario`.
pub trait Executor<A, F, Fut>
where
    Self: Send + Sync + Sized,
    A: Aggregate,
    F: Fn(Dispatch) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = A::Metric> + Send + 'static,
{
    type Error;

    /// Execute the scenario and return the merged aggregate with its timing.
    fn exec(
        &self,
        scenario: &Scenario<A, F, Fut>,
    ) -> impl Future<Output = Result<Execution<A>, Self::Error>> + Send;
}

/// What an executor hands back for one level.
#[derive(Debug, Clone)]
pub struct Execution<A> {
    pub concurrency: usize,
    pub dispatched: usize,
    pub aggregate: A,
    /// Instant the barrier released the workers.
    pub released_at: Instant,
    /// Latest completion instant among all workers.
    pub finished_at: Instant,
}

impl<A> Execution<A> {
    pub fn elapsed(&self) -> std::time::Duration {
        self.finished_at.saturating_duration_since(self.released_at)
    }
}
