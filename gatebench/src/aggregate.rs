use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::metric::{RequestMetric, RequestOutcome};

/// Raw, mergeable tallies of a run's [`RequestMetric`]s.
///
/// Like any aggregate it only stores counts and sums. Averages and rates are
/// derived later, when it is turned into [`RunMetrics`](crate::RunMetrics).
/// `merge` is associative and commutative, so partial aggregates (e.g. one per
/// repetition of a scenario) can be combined in any order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunAggregate {
    pub count: usize,
    pub succeeded: usize,
    pub failures: FailureCounts,
    pub total_latency: Duration,
}

/// Failed requests broken down by where they failed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCounts {
    pub task: usize,
    pub gate: usize,
    pub aggregation: usize,
    pub panicked: usize,
    pub lost: usize,
}

impl FailureCounts {
    pub fn total(&self) -> usize {
        self.task + self.gate + self.aggregation + self.panicked + self.lost
    }

    fn merge(&mut self, other: Self) {
        self.task += other.task;
        self.gate += other.gate;
        self.aggregation += other.aggregation;
        self.panicked += other.panicked;
        self.lost += other.lost;
    }
}

impl RunAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds every metric of a slice into the aggregate.
    pub fn aggregate(&mut self, metrics: &[RequestMetric]) {
        metrics.iter().for_each(|m| self.consume(m));
    }

    pub fn consume(&mut self, metric: &RequestMetric) {
        self.count += 1;
        self.total_latency += metric.latency;
        match metric.outcome {
            RequestOutcome::Succeeded => self.succeeded += 1,
            RequestOutcome::TaskFailed => self.failures.task += 1,
            RequestOutcome::GateFailed => self.failures.gate += 1,
            RequestOutcome::AggregationFailed => self.failures.aggregation += 1,
            RequestOutcome::Panicked => self.failures.panicked += 1,
            RequestOutcome::Lost => self.failures.lost += 1,
        }
    }

    pub fn merge(&mut self, other: Self) {
        self.count += other.count;
        self.succeeded += other.succeeded;
        self.failures.merge(other.failures);
        self.total_latency += other.total_latency;
    }

    pub fn average_latency(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total_latency.div_f64(self.count as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn metric(outcome: RequestOutcome, ms: u64) -> RequestMetric {
        RequestMetric {
            request: 0,
            latency: Duration::from_millis(ms),
            outcome,
        }
    }

    #[test]
    fn consume_counts_by_outcome() {
        let mut agg = RunAggregate::new();
        agg.aggregate(&[
            metric(RequestOutcome::Succeeded, 10),
            metric(RequestOutcome::Succeeded, 30),
            metric(RequestOutcome::GateFailed, 0),
            metric(RequestOutcome::AggregationFailed, 20),
        ]);

        assert_eq!(agg.count, 4);
        assert_eq!(agg.succeeded, 2);
        assert_eq!(agg.failures.gate, 1);
        assert_eq!(agg.failures.aggregation, 1);
        assert_eq!(agg.failures.total(), 2);
        assert_eq!(agg.average_latency(), Duration::from_millis(15));
    }

    #[test]
    fn merge_is_order_independent() {
        let mut a = RunAggregate::new();
        a.consume(&metric(RequestOutcome::Succeeded, 5));
        let mut b = RunAggregate::new();
        b.consume(&metric(RequestOutcome::Panicked, 7));
        b.consume(&metric(RequestOutcome::Lost, 1));

        let mut ab = a.clone();
        ab.merge(b.clone());
        let mut ba = b;
        ba.merge(a);

        assert_eq!(ab, ba);
        assert_eq!(ab.count, 3);
        assert_eq!(ab.total_latency, Duration::from_millis(13));
    }

    #[test]
    fn empty_aggregate_has_zero_average() {
        assert_eq!(RunAggregate::new().average_latency(), Duration::ZERO);
    }
}
