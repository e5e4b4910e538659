//! The concurrency sweep: run level 1, cool down, run level 2, ... up to the maximum.

use std::{path::PathBuf, time::Duration};

use typed_builder::TypedBuilder;

use crate::{
    aggregate::LevelAggregate,
    error::VolleyError,
    executor::{BarrierExecutor, Executor},
    metric::Dispatch,
    report::{LevelStatistics, SweepReport},
    request::{ArtifactStore, GenerationRequest, ImageRequester},
    scenario::Scenario,
};

/// What to do when the server does not answer the health probe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HealthPolicy {
    /// Log a warning and run anyway.
    #[default]
    Warn,
    /// Abort before any level runs.
    Abort,
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct SweepConfig {
    /// Server root, e.g. `http://localhost:8000`.
    #[builder(setter(into))]
    pub base_url: String,
    /// Bound on every single request.
    #[builder(default = Duration::from_secs(120))]
    pub timeout: Duration,
    /// Levels run from 1 to this value, inclusive.
    #[builder(default = 5)]
    pub max_concurrency: usize,
    /// Requests per client per level.
    #[builder(default = 1)]
    pub rounds: usize,
    /// Pause between levels so the server drains before the next one starts.
    #[builder(default = Duration::from_secs(5))]
    pub cooldown: Duration,
    /// Upper bound on waiting for workers to park at the barrier.
    #[builder(default = Duration::from_millis(250))]
    pub settle: Duration,
    /// Parent of the per-run artifact directory.
    #[builder(default = PathBuf::from("volley-output"), setter(into))]
    pub output_dir: PathBuf,
    #[builder(default = true)]
    pub save_artifacts: bool,
    #[builder(default)]
    pub health: HealthPolicy,
    #[builder(default)]
    pub request: GenerationRequest,
}

impl SweepConfig {
    fn validate(&self) -> Result<(), VolleyError> {
        if self.base_url.trim().is_empty() {
            return Err(VolleyError::InvalidConfig("base url is empty".into()));
        }
        if self.rounds == 0 {
            return Err(VolleyError::InvalidConfig("rounds must be at least 1".into()));
        }
        Ok(())
    }
}

/// Runs the whole sweep and owns the resulting [`SweepReport`].
pub struct Sweep {
    config: SweepConfig,
}

impl Sweep {
    pub fn new(config: SweepConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Sets up the run, then tests every level in order.
    ///
    /// Only setup problems are errors. Failed or timed out requests are data and
    /// show up in the report.
    pub async fn run(&self) -> Result<SweepReport, VolleyError> {
        let cfg = &self.config;
        cfg.validate()?;

        let store = cfg.save_artifacts.then(|| {
            ArtifactStore::new(cfg.output_dir.join(format!(
                "run_{}",
                chrono::Local::now().format("%Y%m%d_%H%M%S")
            )))
        });

        let requester = ImageRequester::new(
            cfg.base_url.as_str(),
            cfg.timeout,
            cfg.request.clone(),
            store.clone(),
        )?;

        if !requester.probe_health().await {
            match cfg.health {
                HealthPolicy::Warn => tracing::warn!(
                    "{} did not pass the health probe, testing anyway",
                    cfg.base_url
                ),
                HealthPolicy::Abort => return Err(VolleyError::Unhealthy(cfg.base_url.clone())),
            }
        }

        // All directories up front: an I/O error must not discard finished levels
        if let Some(store) = &store {
            tokio::fs::create_dir_all(store.root())
                .await
                .map_err(|source| VolleyError::OutputDir {
                    path: store.root().to_path_buf(),
                    source,
                })?;
            for level in 1..=cfg.max_concurrency {
                store.prepare_level(level).await?;
            }
            tracing::info!("Saving images under {}", store.root().display());
        }

        tracing::info!(
            "Sweeping {} from 1 to {} concurrent clients ({} round(s) each, timeout {:?})",
            requester.endpoint(),
            cfg.max_concurrency,
            cfg.rounds,
            cfg.timeout
        );

        let mut report = SweepReport::new(store.as_ref().map(|s| s.root().to_path_buf()));
        for level in 1..=cfg.max_concurrency {
            let stats = self.run_level(&requester, level).await?;
            tracing::info!(
                "Level {level}: {} ok, {} failed, {} timed out, {} saved in {:.2}s (avg {:.2}s)",
                stats.success_count,
                stats.failed_count,
                stats.timeout_count,
                stats.artifacts_saved,
                stats.total_duration_seconds,
                stats.average_response_seconds
            );
            report.push(stats);

            if level < cfg.max_concurrency && !cfg.cooldown.is_zero() {
                tracing::info!("Cooling down for {:?}...", cfg.cooldown);
                tokio::time::sleep(cfg.cooldown).await;
            }
        }

        tracing::info!("Sweep finished: {} level(s)", report.levels().len());
        Ok(report)
    }

    async fn run_level(
        &self,
        requester: &ImageRequester,
        level: usize,
    ) -> Result<LevelStatistics, VolleyError> {
        let requester = requester.clone();
        let scenario = Scenario::<LevelAggregate, _, _>::builder()
            .name(format!("{level} concurrent"))
            .action(move |dispatch: Dispatch| {
                let requester = requester.clone();
                async move { requester.execute(dispatch).await }
            })
            .build();

        let executor = BarrierExecutor::builder()
            .level(level)
            .concurrency(level)
            .rounds(self.config.rounds)
            .settle(self.config.settle)
            .build();

        let execution = executor.exec(&scenario).await?;
        Ok(LevelStatistics::from(execution))
    }
}
