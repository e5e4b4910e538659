//! Volley — concurrency-sweep load testing for image generation servers.
//!
//! Volley answers one question about an inference server: what happens when N
//! clients ask for an image *at the same time*? It runs level 1, then level 2, and
//! so on up to a configured maximum. At every level it parks N workers behind a
//! start barrier, releases them together, classifies every response, saves the
//! returned images and records per-level statistics. A cooldown between levels lets
//! the server drain, so stragglers from one level never pollute the next.
//!
//! # Architecture
//!
//! The building blocks follow the usual metric → aggregate → report pipeline:
//!
//! - [`Scenario`]: the action being measured. The action receives a
//!   [`metric::Dispatch`] (level and request id) and resolves to one metric.
//! - [`Executor`]: runs a scenario. [`BarrierExecutor`] runs one concurrency level
//!   with a synchronized start.
//! - [`Metric`]: one observed sample. [`metric::RequestOutcome`] is the built-in one.
//! - [`Aggregate`]: worker-local, mergeable collector of metrics
//!   ([`aggregate::LevelAggregate`]).
//! - [`Report`]: pure projection of an executed level ([`report::LevelStatistics`]).
//! - [`Reporter`]: renders the finished [`report::SweepReport`] (table or JSON).
//! - [`sweep::Sweep`]: the driver tying it together against a real server through
//!   [`request::ImageRequester`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use volley::{
//!     Reporter,
//!     report::TableReporter,
//!     sweep::{Sweep, SweepConfig},
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), volley::VolleyError> {
//!     let config = SweepConfig::builder()
//!         .base_url("http://localhost:8000")
//!         .max_concurrency(4)
//!         .cooldown(Duration::from_secs(3))
//!         .build();
//!
//!     let report = Sweep::new(config).run().await?;
//!     TableReporter.report(&report).await
//! }
//! ```
//!
//! # Feature flags
//! - `internals`: exposes the barrier plumbing of the executor (unstable).

/// Metric aggregators
pub mod aggregate;
/// Setup-phase errors
pub mod error;
/// Orchestrators that define how a level actually runs
pub mod executor;
/// Single samples
pub mod metric;
/// Reports and Reporters
pub mod report;
/// Issuing and classifying image generation requests
pub mod request;
/// The action under test
pub mod scenario;
/// Level-by-level driver
pub mod sweep;

pub use aggregate::Aggregate;
pub use error::VolleyError;
pub use executor::{BarrierExecutor, Executor};
pub use metric::Metric;
pub use report::{Report, Reporter};
pub use scenario::Scenario;

/// Procedural macros to reduce boilerplate
pub mod macros {
    pub use volley_macros::*;
}
