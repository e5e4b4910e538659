// Volley CLI
//
// Every option doubles as a VOLLEY_* environment variable, so running `volley`
// with no arguments sweeps with whatever the environment (or the defaults) says.

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use volley::{
    Reporter,
    report::{JsonReporter, TableReporter},
    request::GenerationRequest,
    sweep::{HealthPolicy, Sweep, SweepConfig},
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Table,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "volley")]
#[command(about = "Sweep concurrent image generation requests from 1 to N clients and summarize each level")]
#[command(version)]
struct Cli {
    /// Inference server root URL
    #[arg(long, env = "VOLLEY_BASE_URL", default_value = "http://localhost:8000")]
    base_url: String,

    /// Per-request timeout in seconds
    #[arg(long, env = "VOLLEY_TIMEOUT", default_value_t = 120)]
    timeout: u64,

    /// Highest concurrency level to test
    #[arg(long, short = 'c', env = "VOLLEY_MAX_CONCURRENCY", default_value_t = 5)]
    max_concurrency: usize,

    /// Requests each client sends per level
    #[arg(long, env = "VOLLEY_ROUNDS", default_value_t = 1)]
    rounds: usize,

    /// Pause between levels in seconds
    #[arg(long, env = "VOLLEY_COOLDOWN", default_value_t = 5)]
    cooldown: u64,

    /// Longest wait, in milliseconds, for clients to line up before release
    #[arg(long, env = "VOLLEY_SETTLE_MS", default_value_t = 250)]
    settle_ms: u64,

    /// Directory receiving one sub-directory per run
    #[arg(long, short = 'o', env = "VOLLEY_OUTPUT_DIR", default_value = "volley-output")]
    output_dir: PathBuf,

    /// Do not decode and save returned images
    #[arg(long, env = "VOLLEY_NO_ARTIFACTS")]
    no_artifacts: bool,

    /// Abort when the health probe fails instead of warning
    #[arg(long, env = "VOLLEY_STRICT_HEALTH")]
    strict_health: bool,

    /// Prompt sent with every request
    #[arg(long, env = "VOLLEY_PROMPT")]
    prompt: Option<String>,

    /// Image size as WxH
    #[arg(long, env = "VOLLEY_SIZE", default_value = "1024x1024")]
    size: String,

    /// Diffusion steps
    #[arg(long, env = "VOLLEY_STEPS", default_value_t = 20)]
    steps: u32,

    /// Classifier-free guidance scale
    #[arg(long, env = "VOLLEY_CFG_SCALE", default_value_t = 7.0)]
    cfg_scale: f64,

    /// Seed, -1 for random
    #[arg(long, env = "VOLLEY_SEED", default_value_t = -1, allow_negative_numbers = true)]
    seed: i64,

    /// Summary format
    #[arg(long, short = 'f', env = "VOLLEY_FORMAT", value_enum, default_value_t = Format::Table)]
    format: Format,

    /// Write the JSON report to this file (in addition to the table)
    #[arg(long, env = "VOLLEY_JSON_OUT")]
    json_out: Option<PathBuf>,
}

impl Cli {
    fn sweep_config(&self) -> SweepConfig {
        let base = match &self.prompt {
            Some(prompt) => GenerationRequest::builder().prompt(prompt.as_str()).build(),
            None => GenerationRequest::default(),
        };
        let request = GenerationRequest {
            size: self.size.clone(),
            num_inference_steps: self.steps,
            cfg_scale: self.cfg_scale,
            seed: self.seed,
            ..base
        };

        SweepConfig::builder()
            .base_url(self.base_url.as_str())
            .timeout(Duration::from_secs(self.timeout))
            .max_concurrency(self.max_concurrency)
            .rounds(self.rounds)
            .cooldown(Duration::from_secs(self.cooldown))
            .settle(Duration::from_millis(self.settle_ms))
            .output_dir(self.output_dir.clone())
            .save_artifacts(!self.no_artifacts)
            .health(if self.strict_health {
                HealthPolicy::Abort
            } else {
                HealthPolicy::Warn
            })
            .request(request)
            .build()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "volley=info,volley_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    tracing::debug!(?cli, "Parsed arguments");

    let report = Sweep::new(cli.sweep_config())
        .run()
        .await
        .context("sweep could not start")?;

    match cli.format {
        Format::Table => TableReporter.report(&report).await?,
        Format::Json => JsonReporter::stdout().report(&report).await?,
    }
    if let Some(path) = &cli.json_out {
        JsonReporter::to_file(path)
            .report(&report)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_arguments_uses_defaults() {
        let cli = Cli::try_parse_from(["volley"]).unwrap();
        let cfg = cli.sweep_config();

        assert_eq!(cfg.max_concurrency, 5);
        assert_eq!(cfg.rounds, 1);
        assert_eq!(cfg.timeout, Duration::from_secs(120));
        assert_eq!(cfg.health, HealthPolicy::Warn);
        assert!(cfg.save_artifacts);
        assert_eq!(cfg.request.seed, -1);
        assert_eq!(cfg.request.response_format, "b64_json");
    }

    #[test]
    fn flags_reach_the_config() {
        let cli = Cli::try_parse_from([
            "volley",
            "--max-concurrency",
            "8",
            "--rounds",
            "2",
            "--strict-health",
            "--no-artifacts",
            "--prompt",
            "a red bicycle",
            "--seed",
            "42",
            "--format",
            "json",
        ])
        .unwrap();
        let cfg = cli.sweep_config();

        assert_eq!(cfg.max_concurrency, 8);
        assert_eq!(cfg.rounds, 2);
        assert_eq!(cfg.health, HealthPolicy::Abort);
        assert!(!cfg.save_artifacts);
        assert_eq!(cfg.request.prompt, "a red bicycle");
        assert_eq!(cfg.request.seed, 42);
        assert!(matches!(cli.format, Format::Json));
    }

    #[test]
    fn help_is_available() {
        let err = Cli::try_parse_from(["volley", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
