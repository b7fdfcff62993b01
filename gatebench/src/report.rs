use std::{fmt, future::Future, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    aggregate::{FailureCounts, RunAggregate},
    error::BoxError,
    gate::GateStats,
    scheduler::SchedulingStrategy,
};

/// What a run can say about its peak concurrency.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PeakConcurrency {
    /// A gate of `capacity` was active; `peak` never exceeds it.
    Bounded { peak: usize, capacity: usize },
    /// No gate: only the scheduler limited concurrency. `observed` is reported
    /// for information.
    Unbounded { observed: usize },
}

impl PeakConcurrency {
    pub fn observed(&self) -> usize {
        match self {
            Self::Bounded { peak, .. } => *peak,
            Self::Unbounded { observed } => *observed,
        }
    }
}

impl fmt::Display for PeakConcurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bounded { peak, capacity } => write!(f, "peak {peak}/{capacity}"),
            Self::Unbounded { observed } => write!(f, "unbounded (observed {observed})"),
        }
    }
}

/// Final figures of one scenario run. Built once at the end of a run and never
/// touched again.
///
/// A report contains no I/O. Hand it to a [`Reporter`] to display or ship it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub scenario: String,
    pub strategy: SchedulingStrategy,
    pub total_tasks: usize,
    pub elapsed: Duration,
    /// Requests per second over the whole run.
    pub throughput: f64,
    pub peak_concurrency: PeakConcurrency,
    pub succeeded: usize,
    pub failed: FailureCounts,
    pub average_latency: Duration,
    /// Gate counters after teardown, for gated runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<GateStats>,
}

impl RunMetrics {
    pub fn from_aggregate(
        scenario: impl Into<String>,
        strategy: SchedulingStrategy,
        aggregate: RunAggregate,
        elapsed: Duration,
        peak_concurrency: PeakConcurrency,
    ) -> Self {
        let secs = elapsed.as_secs_f64();
        let throughput = if secs > 0.0 {
            aggregate.count as f64 / secs
        } else {
            0.0
        };
        Self {
            scenario: scenario.into(),
            strategy,
            total_tasks: aggregate.count,
            elapsed,
            throughput,
            peak_concurrency,
            succeeded: aggregate.succeeded,
            failed: aggregate.failures,
            average_latency: aggregate.average_latency(),
            gate: None,
        }
    }

    pub fn with_gate(mut self, stats: GateStats) -> Self {
        self.gate = Some(stats);
        self
    }

    pub fn failures(&self) -> usize {
        self.failed.total()
    }
}

impl fmt::Display for RunMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} completed {} tasks in {} ms ({:.2} requests/sec, {}, {} failed)",
            self.scenario,
            self.strategy,
            self.total_tasks,
            self.elapsed.as_millis(),
            self.throughput,
            self.peak_concurrency,
            self.failures(),
        )
    }
}

/// Sink for finished [`RunMetrics`]: stdout, a file, a log pipeline, ...
///
/// # Example
/// ```rust
/// use gatebench::{Reporter, RunMetrics};
///
/// struct Silent;
/// impl Reporter for Silent {
///     async fn report(&self, _: &RunMetrics) -> Result<(), gatebench::BoxError> {
///         Ok(())
///     }
/// }
/// ```
pub trait Reporter {
    fn report(&self, metrics: &RunMetrics) -> impl Future<Output = Result<(), BoxError>>;
}

#[cfg(feature = "builtins")]
pub use builtins::*;

#[cfg(feature = "builtins")]
mod builtins {
    use super::*;

    /// Prints one human-readable line per run.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct StdoutReporter;

    impl Reporter for StdoutReporter {
        async fn report(&self, metrics: &RunMetrics) -> Result<(), BoxError> {
            println!("{metrics}");
            Ok(())
        }
    }

    /// Prints each run as one JSON object per line.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct JsonReporter;

    impl Reporter for JsonReporter {
        async fn report(&self, metrics: &RunMetrics) -> Result<(), BoxError> {
            let value = serde_json::to_string(metrics)?;
            println!("{value}");
            Ok(())
        }
    }

    /// Emits each run as a structured `tracing` event.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct LogReporter;

    impl Reporter for LogReporter {
        async fn report(&self, metrics: &RunMetrics) -> Result<(), BoxError> {
            tracing::info!(
                scenario = %metrics.scenario,
                strategy = %metrics.strategy,
                total_tasks = metrics.total_tasks,
                elapsed_ms = metrics.elapsed.as_millis() as u64,
                throughput = metrics.throughput,
                peak = %metrics.peak_concurrency,
                failed = metrics.failures(),
                "Run finished"
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::metric::{RequestMetric, RequestOutcome};

    fn aggregate(ok: usize, failed: usize) -> RunAggregate {
        let mut agg = RunAggregate::new();
        for i in 0..ok + failed {
            agg.consume(&RequestMetric {
                request: i,
                latency: Duration::from_millis(10),
                outcome: if i < ok {
                    RequestOutcome::Succeeded
                } else {
                    RequestOutcome::TaskFailed
                },
            });
        }
        agg
    }

    #[test]
    fn throughput_is_tasks_per_second() {
        let metrics = RunMetrics::from_aggregate(
            "t",
            SchedulingStrategy::Lightweight,
            aggregate(1000, 0),
            Duration::from_millis(500),
            PeakConcurrency::Unbounded { observed: 1000 },
        );
        assert_eq!(metrics.total_tasks, 1000);
        assert!((metrics.throughput - 2000.0).abs() < 1e-9);
        assert_eq!(metrics.average_latency, Duration::from_millis(10));
    }

    #[test]
    fn zero_elapsed_gives_zero_throughput() {
        let metrics = RunMetrics::from_aggregate(
            "empty",
            SchedulingStrategy::Lightweight,
            RunAggregate::new(),
            Duration::ZERO,
            PeakConcurrency::Bounded { peak: 0, capacity: 4 },
        );
        assert_eq!(metrics.throughput, 0.0);
        assert_eq!(metrics.failures(), 0);
    }

    #[test]
    fn display_mentions_failures_and_peak() {
        let metrics = RunMetrics::from_aggregate(
            "gated",
            SchedulingStrategy::Pooled { workers: 4 },
            aggregate(8, 2),
            Duration::from_secs(1),
            PeakConcurrency::Bounded { peak: 3, capacity: 3 },
        );
        assert_eq!(
            metrics.to_string(),
            "[gated] pooled(4) completed 10 tasks in 1000 ms (10.00 requests/sec, peak 3/3, 2 failed)"
        );
    }

    #[test]
    fn metrics_survive_json() {
        let metrics = RunMetrics::from_aggregate(
            "json",
            SchedulingStrategy::Lightweight,
            aggregate(3, 1),
            Duration::from_millis(250),
            PeakConcurrency::Unbounded { observed: 4 },
        );
        let json = serde_json::to_string(&metrics).unwrap();
        assert!(json.contains("\"kind\":\"unbounded\""));
        let back: RunMetrics = serde_json::from_str(&json).unwrap();
        assert_eq!(back, metrics);
    }
}
