use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt::{self, Debug};
use std::future::Future;
use std::path::{Path, PathBuf};

use crate::{Aggregate, error::VolleyError, executor::Execution};

/// A [`Report`] represents the processed form of an [`Aggregate`].
///
/// Reports derive the final numbers (averages, ratios, ordered listings) from the
/// raw aggregate an executor produced. They are *pure data structures*: no I/O, and
/// once built they are never recomputed. A [`Reporter`] takes care of presenting them.
///
/// # Example
/// ```rust, ignore
/// use volley::{Report, executor::Execution};
///
/// #[report(MyAggregate)]
/// struct MyReport {
///     hits: u64,
/// }
///
/// impl From<Execution<MyAggregate>> for MyReport {
///     fn from(e: Execution<MyAggregate>) -> Self {
///         Self { hits: e.aggregate.count }
///     }
/// }
/// ```
pub trait Report<A>
where
    Self: Send + Sync + Debug + From<Execution<A>> + Serialize + DeserializeOwned,
    A: Aggregate,
{
}

/// A [`Reporter`] consumes a finished [`SweepReport`] and performs side effects:
/// printing it, writing it to a file, shipping it somewhere.
///
/// Reporters are the I/O boundary of volley, which keeps the metric → aggregate →
/// report path pure and deterministic.
pub trait Reporter {
    fn report(&self, report: &SweepReport) -> impl Future<Output = Result<(), VolleyError>>;
}

pub use builtins::*;

mod builtins {
    use tokio::time::Instant;

    use super::*;
    use crate::aggregate::LevelAggregate;
    use crate::macros::report;
    use crate::metric::RequestOutcome;

    /// Release and finish instants of one level. Only meaningful inside the
    /// process that ran it, so it is never serialized.
    #[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
    pub struct LevelWindow {
        pub released_at: Instant,
        pub finished_at: Instant,
    }

    /// Statistics for one concurrency level.
    #[report(LevelAggregate)]
    pub struct LevelStatistics {
        pub concurrency: usize,
        pub dispatched: usize,
        pub success_count: usize,
        pub failed_count: usize,
        pub timeout_count: usize,
        pub artifacts_saved: usize,
        /// Barrier release to last worker completion.
        pub total_duration_seconds: f64,
        /// Mean duration of successes; 0 when there were none.
        pub average_response_seconds: f64,
        /// Sorted by request id.
        pub outcomes: Vec<RequestOutcome>,
        #[serde(skip)]
        pub window: Option<LevelWindow>,
    }

    impl From<Execution<LevelAggregate>> for LevelStatistics {
        fn from(value: Execution<LevelAggregate>) -> Self {
            let total_duration_seconds = value.elapsed().as_secs_f64();
            let window = LevelWindow {
                released_at: value.released_at,
                finished_at: value.finished_at,
            };
            let agg = value.aggregate;
            let average_response_seconds = if agg.success_count == 0 {
                0.0
            } else {
                agg.success_seconds / agg.success_count as f64
            };
            let mut outcomes = agg.outcomes;
            outcomes.sort_by_key(|o| o.request_id);

            Self {
                concurrency: value.concurrency,
                dispatched: value.dispatched,
                success_count: agg.success_count,
                failed_count: agg.failed_count,
                timeout_count: agg.timeout_count,
                artifacts_saved: agg.artifacts_saved,
                total_duration_seconds,
                average_response_seconds,
                outcomes,
                window: Some(window),
            }
        }
    }

    /// Ordered collection of every level that ran, plus where artifacts went.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct SweepReport {
        pub output_dir: Option<PathBuf>,
        levels: Vec<LevelStatistics>,
    }

    impl SweepReport {
        pub fn new(output_dir: Option<PathBuf>) -> Self {
            Self {
                output_dir,
                levels: Vec::new(),
            }
        }

        /// Appends the next level. Levels arrive in increasing order.
        pub fn push(&mut self, stats: LevelStatistics) {
            debug_assert!(
                self.levels
                    .last()
                    .is_none_or(|last| last.concurrency < stats.concurrency),
                "levels must be pushed in increasing order"
            );
            self.levels.push(stats);
        }

        pub fn levels(&self) -> &[LevelStatistics] {
            &self.levels
        }

        pub fn is_empty(&self) -> bool {
            self.levels.is_empty()
        }

        /// Renders the summary table followed by the artifact location.
        pub fn render_table(&self) -> String {
            self.to_string()
        }
    }

    impl fmt::Display for SweepReport {
        fn fmt(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
            writeln!(
                out,
                "{:>11} | {:>7} | {:>6} | {:>7} | {:>9} | {:>10} | {:>8}",
                "concurrency", "success", "failed", "timeout", "artifacts", "total (s)", "avg (s)"
            )?;
            writeln!(out, "{}", "-".repeat(85))?;

            if self.levels.is_empty() {
                writeln!(out, "(no levels were run)")?;
            }
            for l in &self.levels {
                writeln!(
                    out,
                    "{:>11} | {:>7} | {:>6} | {:>7} | {:>9} | {:>10.2} | {:>8.2}",
                    l.concurrency,
                    l.success_count,
                    l.failed_count,
                    l.timeout_count,
                    l.artifacts_saved,
                    l.total_duration_seconds,
                    l.average_response_seconds
                )?;
            }

            match &self.output_dir {
                Some(dir) => writeln!(out, "\nArtifacts saved under: {}", dir.display()),
                None => writeln!(out, "\nArtifacts were not saved."),
            }
        }
    }

    /// Prints the summary table to stdout.
    pub struct TableReporter;

    impl Reporter for TableReporter {
        async fn report(&self, report: &SweepReport) -> Result<(), VolleyError> {
            println!("{}", report.render_table());
            Ok(())
        }
    }

    /// Serializes the whole report, per-request outcomes included, as pretty JSON.
    /// Writes to `path` when set, stdout otherwise.
    pub struct JsonReporter {
        pub path: Option<PathBuf>,
    }

    impl JsonReporter {
        pub fn stdout() -> Self {
            Self { path: None }
        }

        pub fn to_file(path: impl AsRef<Path>) -> Self {
            Self {
                path: Some(path.as_ref().to_path_buf()),
            }
        }
    }

    impl Reporter for JsonReporter {
        async fn report(&self, report: &SweepReport) -> Result<(), VolleyError> {
            let value = serde_json::to_string_pretty(report)?;
            match &self.path {
                Some(path) => {
                    tokio::fs::write(path, value).await?;
                    tracing::info!("Report written to {}", path.display());
                }
                None => println!("{value}"),
            }
            Ok(())
        }
    }
}
