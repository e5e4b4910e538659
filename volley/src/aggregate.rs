use crate::metric::{Dispatch, Metric};
use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;

/// The `Aggregate` trait defines how raw [`Metric`] values are collected and combined
/// into an intermediate, mergeable representation.
///
/// **Important:** `Aggregate` implementations should **not** compute final statistics
/// such as averages. Those derived values belong in a [`crate::Report`], which is
/// converted from an [`crate::executor::Execution`] and performs the final processing.
///
/// # Role
///
/// - Collect individual [`Metric`] samples produced by a `Scenario` action.
/// - Be cheaply mergeable so worker-local aggregates can be combined into a level view
///   once every worker has been joined.
/// - Account for dispatches that never produced a metric (see [`Aggregate::record_lost`]),
///   so totals always match what was dispatched.
///
/// # Example
/// ```rust
/// use volley::{Aggregate, Metric, macros::*, metric::Dispatch};
///
/// #[metric]
/// struct Hit(u64);
///
/// #[aggregate]
/// struct Hits {
///     count: u64,
///     lost: u64,
/// }
///
/// impl Aggregate for Hits {
///     type Metric = Hit;
///
///     fn new() -> Self {
///         Self { count: 0, lost: 0 }
///     }
///
///     fn consume(&mut self, _: &Self::Metric) {
///         self.count += 1;
///     }
///
///     fn record_lost(&mut self, _: &Dispatch) {
///         self.lost += 1;
///     }
///
///     fn merge(&mut self, other: Self) {
///         self.count += other.count;
///         self.lost += other.lost;
///     }
/// }
/// ```
///
/// # Implementor notes
/// - `merge` must be **associative** and **commutative**; worker aggregates are merged
///   in join order, not completion order.
pub trait Aggregate
where
    Self: Serialize + DeserializeOwned + PartialOrd + PartialEq + Send + Sync + Debug + Clone,
{
    /// The metric type this aggregate summarizes.
    type Metric: Metric;

    /// Create a new, empty instance of the aggregate.
    fn new() -> Self;

    /// Aggregate multiple metrics into the current instance.
    fn aggregate(&mut self, metrics: &[Self::Metric]) {
        metrics.iter().for_each(|m| self.consume(m));
    }

    /// Incorporate a single metric into the aggregate.
    fn consume(&mut self, metric: &Self::Metric);

    /// Account for a dispatch whose worker terminated before reporting a metric.
    fn record_lost(&mut self, dispatch: &Dispatch);

    /// Combine two different aggregates into one.
    fn merge(&mut self, other: Self);
}

pub use level::*;

mod level {
    use super::*;
    use crate::macros::aggregate;
    use crate::metric::{OutcomeStatus, RequestOutcome};

    /// Per-level collector of [`RequestOutcome`]s.
    ///
    /// Keeps the raw counters plus every outcome, so the level report can list
    /// requests in id order no matter which worker finished first.
    #[aggregate]
    #[derive(Default)]
    pub struct LevelAggregate {
        pub success_count: usize,
        pub failed_count: usize,
        pub timeout_count: usize,
        pub artifacts_saved: usize,
        /// Sum of success `duration_seconds` only.
        pub success_seconds: f64,
        pub outcomes: Vec<RequestOutcome>,
    }

    impl LevelAggregate {
        pub fn count(&self) -> usize {
            self.success_count + self.failed_count + self.timeout_count
        }
    }

    impl Aggregate for LevelAggregate {
        type Metric = RequestOutcome;

        fn new() -> Self {
            LevelAggregate::default()
        }

        fn consume(&mut self, metric: &Self::Metric) {
            match metric.status {
                OutcomeStatus::Success => {
                    self.success_count += 1;
                    self.success_seconds += metric.duration_seconds;
                    if metric.artifact_path.is_some() {
                        self.artifacts_saved += 1;
                    }
                }
                OutcomeStatus::Failed => self.failed_count += 1,
                OutcomeStatus::Timeout => self.timeout_count += 1,
            }
            self.outcomes.push(metric.clone());
        }

        fn record_lost(&mut self, dispatch: &Dispatch) {
            self.consume(&RequestOutcome::vanished(dispatch));
        }

        fn merge(&mut self, other: Self) {
            self.success_count += other.success_count;
            self.failed_count += other.failed_count;
            self.timeout_count += other.timeout_count;
            self.artifacts_saved += other.artifacts_saved;
            self.success_seconds += other.success_seconds;
            self.outcomes.extend(other.outcomes);
        }
    }
}
