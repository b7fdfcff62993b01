use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use gatebench::{
    config::ScenarioFile,
    work::{fixed_latency, profile_services, service_calls},
    GateConfig, JsonReporter, LogReporter, Reporter, RunMetrics, Scenario, SchedulingStrategy,
    StdoutReporter,
};

#[derive(Parser)]
#[command(name = "gatebench", version, about = "Compare pooled and lightweight task scheduling")]
struct Cli {
    /// How to print run results
    #[arg(long, value_enum, global = true, default_value_t = Format::Text)]
    format: Format,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
    Log,
}

#[derive(Subcommand)]
enum Command {
    /// Pooled vs lightweight on simulated calls
    Throughput {
        #[arg(long, default_value_t = 1_000)]
        requests: usize,
        #[arg(long, default_value_t = 200)]
        latency_ms: u64,
        /// Pooled workers (default: two per CPU)
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Many short requests behind a concurrency gate
    Gated {
        #[arg(long, default_value_t = 1_000)]
        requests: usize,
        #[arg(long, default_value_t = 10)]
        capacity: usize,
        #[arg(long, default_value_t = 10)]
        latency_ms: u64,
        /// Use the pooled strategy instead of lightweight
        #[arg(long)]
        pooled: bool,
    },

    /// Each request fans out to four downstream services
    Fanout {
        #[arg(long, default_value_t = 100)]
        requests: usize,
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Run every scenario of a TOML file
    Run {
        #[arg(long)]
        config: PathBuf,
    },
}

fn pooled(workers: Option<usize>) -> SchedulingStrategy {
    workers
        .map(|workers| SchedulingStrategy::Pooled { workers })
        .unwrap_or_else(SchedulingStrategy::pooled_default)
}

async fn report(format: Format, metrics: &RunMetrics) -> anyhow::Result<()> {
    let res = match format {
        Format::Text => StdoutReporter.report(metrics).await,
        Format::Json => JsonReporter.report(metrics).await,
        Format::Log => LogReporter.report(metrics).await,
    };
    res.map_err(|e| anyhow::anyhow!(e))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Throughput {
            requests,
            latency_ms,
            workers,
        } => {
            let action = fixed_latency(Duration::from_millis(latency_ms), None);
            for strategy in [pooled(workers), SchedulingStrategy::Lightweight] {
                let metrics = Scenario::builder()
                    .name(format!("{requests} calls of {latency_ms}ms"))
                    .total_requests(requests)
                    .strategy(strategy)
                    .action(action.clone())
                    .build()
                    .run()
                    .await?;
                report(cli.format, &metrics).await?;
            }
        }
        Command::Gated {
            requests,
            capacity,
            latency_ms,
            pooled: use_pool,
        } => {
            let strategy = if use_pool {
                pooled(None)
            } else {
                SchedulingStrategy::Lightweight
            };
            let metrics = Scenario::builder()
                .name(format!("gate of {capacity}"))
                .total_requests(requests)
                .strategy(strategy)
                .gate(GateConfig::new(capacity))
                .action(fixed_latency(Duration::from_millis(latency_ms), None))
                .build()
                .run()
                .await?;
            report(cli.format, &metrics).await?;
        }
        Command::Fanout { requests, workers } => {
            let services = profile_services();
            let width = services.len();
            let action = service_calls(services);
            for strategy in [pooled(workers), SchedulingStrategy::Lightweight] {
                let metrics = Scenario::builder()
                    .name(format!("profile pages ({width} services each)"))
                    .total_requests(requests)
                    .strategy(strategy)
                    .fan_out(width)
                    .action(action.clone())
                    .build()
                    .run()
                    .await?;
                report(cli.format, &metrics).await?;
            }
        }
        Command::Run { config } => {
            let file = ScenarioFile::load(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            if file.scenarios.is_empty() {
                tracing::warn!("{} defines no scenarios", config.display());
            }
            for scenario in &file.scenarios {
                let metrics = scenario
                    .run()
                    .await
                    .with_context(|| format!("running scenario {:?}", scenario.name))?;
                report(cli.format, &metrics).await?;
            }
        }
    }

    Ok(())
}
