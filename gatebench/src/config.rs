//! Declarative scenarios loaded from TOML.
//!
//! ```toml
//! [[scenario]]
//! name = "gated lightweight"
//! requests = 1000
//! strategy = "lightweight"
//! gate = 10
//! latency_ms = 10
//!
//! [[scenario]]
//! name = "pooled fan-out"
//! requests = 100
//! strategy = "pooled"
//! workers = 16
//! fan_out = 4
//! latency_ms = 200
//! gather = "earliest"
//! ```
//!
//! Every unit of work is a simulated call of `latency_ms`; `fail_every = n`
//! makes every n-th request fail.

use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    error::HarnessError,
    fanout::{FanOutAggregator, GatherPolicy},
    harness::ThroughputHarness,
    report::RunMetrics,
    scenario::{GateConfig, Scenario, WorkUnit},
    scheduler::{SchedulerOptions, SchedulingStrategy, DEFAULT_QUEUE_DEPTH},
    work::{self, SimulatedCall},
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse scenario file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("scenario {scenario:?}: {reason}")]
    Invalid { scenario: String, reason: String },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Pooled,
    #[default]
    Lightweight,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    pub name: String,
    pub requests: usize,
    #[serde(default)]
    pub strategy: StrategyKind,
    /// Pooled workers; defaults to two per CPU.
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Gate capacity. No gate when absent.
    #[serde(default)]
    pub gate: Option<usize>,
    #[serde(default)]
    pub acquire_timeout_ms: Option<u64>,
    #[serde(default)]
    pub fan_out: Option<usize>,
    #[serde(default)]
    pub gather: GatherPolicy,
    #[serde(default)]
    pub gather_timeout_ms: Option<u64>,
    pub latency_ms: u64,
    #[serde(default)]
    pub fail_every: Option<usize>,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_queue_depth() -> usize {
    DEFAULT_QUEUE_DEPTH
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl ScenarioConfig {
    pub fn strategy(&self) -> SchedulingStrategy {
        match (self.strategy, self.workers) {
            (StrategyKind::Lightweight, _) => SchedulingStrategy::Lightweight,
            (StrategyKind::Pooled, Some(workers)) => SchedulingStrategy::Pooled { workers },
            (StrategyKind::Pooled, None) => SchedulingStrategy::pooled_default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::Invalid {
            scenario: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.workers == Some(0) {
            return Err(invalid("workers must be at least 1"));
        }
        if self.workers.is_some() && self.strategy == StrategyKind::Lightweight {
            return Err(invalid("workers only applies to the pooled strategy"));
        }
        if self.gate == Some(0) {
            return Err(invalid("gate capacity must be at least 1"));
        }
        if self.fan_out == Some(0) {
            return Err(invalid("fan_out must be at least 1"));
        }
        if self.queue_depth == 0 {
            return Err(invalid("queue_depth must be at least 1"));
        }
        Ok(())
    }

    pub fn harness(&self) -> ThroughputHarness {
        let aggregator = match self.gather_timeout_ms {
            Some(ms) => FanOutAggregator::builder()
                .policy(self.gather)
                .gather_timeout(Duration::from_millis(ms))
                .build(),
            None => FanOutAggregator::builder().policy(self.gather).build(),
        };
        ThroughputHarness::builder()
            .scheduler_options(
                SchedulerOptions::builder()
                    .queue_depth(self.queue_depth)
                    .shutdown_timeout(Duration::from_secs(self.shutdown_timeout_secs))
                    .build(),
            )
            .aggregator(aggregator)
            .build()
    }

    pub fn to_scenario(
        &self,
    ) -> Scenario<impl Fn(WorkUnit) -> SimulatedCall<()> + Clone + Send + Sync + 'static> {
        let gate = self.gate.map(|capacity| {
            let gate = GateConfig::new(capacity);
            match self.acquire_timeout_ms {
                Some(ms) => gate.with_acquire_timeout(Duration::from_millis(ms)),
                None => gate,
            }
        });
        Scenario {
            name: self.name.clone(),
            total_requests: self.requests,
            strategy: self.strategy(),
            gate,
            fan_out: self.fan_out,
            action: work::fixed_latency(Duration::from_millis(self.latency_ms), self.fail_every),
        }
    }

    /// Validates, builds and runs the scenario.
    pub async fn run(&self) -> Result<RunMetrics, RunConfigError> {
        self.validate()?;
        Ok(self.harness().run(&self.to_scenario()).await?)
    }
}

/// Failure of [`ScenarioConfig::run`].
#[derive(Debug, Error)]
pub enum RunConfigError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Harness(#[from] HarnessError),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioFile {
    #[serde(rename = "scenario", default)]
    pub scenarios: Vec<ScenarioConfig>,
}

impl ScenarioFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        text.parse()
    }
}

impl FromStr for ScenarioFile {
    type Err = ConfigError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let file: Self = toml::from_str(text)?;
        for scenario in &file.scenarios {
            scenario.validate()?;
        }
        Ok(file)
    }
}
