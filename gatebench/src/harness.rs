//! Harness: one timed run of a [`Scenario`]
//!
//! [`ThroughputHarness::run`] wires the pieces together:
//!
//! 1. A request scheduler is built for the scenario's strategy and, when fanning
//!    out, a second lightweight scheduler for sub-tasks, so sub-tasks are never
//!    starved by the request pool.
//! 2. The clock starts and every request is submitted. Each request acquires a
//!    gate permit (if gated), enters the [`ConcurrencyTracker`], runs the action
//!    directly or fanned out, then exits the tracker and releases the permit.
//! 3. Once all requests are terminal the clock stops, both schedulers are shut
//!    down, and per-request [`RequestMetric`]s are folded into [`RunMetrics`].
//!
//! Failed requests are counted, not raised. The run itself fails only on bad
//! configuration or when a scheduler cannot be torn down.

use std::{future::Future, sync::Arc, time::Instant};

use typed_builder::TypedBuilder;

use crate::{
    aggregate::RunAggregate,
    error::{BoxError, GateError, HarnessError, SchedulerError},
    fanout::{FanOutAggregator, FanOutRequest},
    gate::{ConcurrencyGate, GatePermit},
    metric::{RequestMetric, RequestOutcome},
    report::{PeakConcurrency, RunMetrics},
    scenario::{GateConfig, Scenario, WorkUnit},
    scheduler::{SchedulerOptions, SchedulingStrategy, TaskScheduler},
    task::Task,
    tracker::ConcurrencyTracker,
};

#[derive(Clone, Debug, Default, TypedBuilder)]
pub struct ThroughputHarness {
    /// Options for both the request and the fan-out scheduler.
    #[builder(default)]
    pub scheduler_options: SchedulerOptions,
    /// How fanned-out requests gather their sub-results.
    #[builder(default)]
    pub aggregator: FanOutAggregator,
}

impl ThroughputHarness {
    pub async fn run<F, Fut, T>(&self, scenario: &Scenario<F>) -> Result<RunMetrics, HarnessError>
    where
        F: Fn(WorkUnit) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
        T: Send + 'static,
    {
        if scenario.fan_out == Some(0) {
            return Err(HarnessError::InvalidFanOut);
        }
        let gate = scenario
            .gate
            .map(|g| ConcurrencyGate::new(g.capacity))
            .transpose()?;
        let tracker = Arc::new(ConcurrencyTracker::new());

        let requests =
            TaskScheduler::with_options(scenario.strategy, self.scheduler_options.clone())?;
        let fan_out = match scenario.fan_out {
            Some(width) => {
                match TaskScheduler::with_options(
                    SchedulingStrategy::Lightweight,
                    self.scheduler_options.clone(),
                ) {
                    Ok(scheduler) => Some(FanOut {
                        width,
                        scheduler: Arc::new(scheduler),
                    }),
                    Err(e) => {
                        requests.shutdown().await?;
                        return Err(e.into());
                    }
                }
            }
            None => None,
        };

        tracing::info!(
            "Running scenario: {} ({} requests, {}, gate: {:?}, fan-out: {:?})",
            scenario.name,
            scenario.total_requests,
            scenario.strategy,
            gate.as_ref().map(ConcurrencyGate::capacity),
            scenario.fan_out,
        );

        let ctx = RequestContext {
            gate: gate.clone(),
            gate_config: scenario.gate,
            tracker: Arc::clone(&tracker),
            fan_out: fan_out.clone(),
            aggregator: self.aggregator.clone(),
            action: scenario.action.clone(),
        };

        let start = Instant::now();
        let tasks = (0..scenario.total_requests).map(|request| {
            let ctx = ctx.clone();
            Task::new(request, move || async move { Ok::<_, BoxError>(ctx.serve(request).await) })
        });
        let outcomes = requests.submit_all(tasks).await;
        let elapsed = start.elapsed();
        drop(ctx);

        tracing::info!("Requests finished, shutting down schedulers...");
        let teardown =
            shutdown_all(&requests, fan_out.as_ref().map(|f| f.scheduler.as_ref())).await;

        let mut aggregate = RunAggregate::new();
        for (request, outcome) in outcomes.into_iter().enumerate() {
            let metric = outcome.unwrap_or_else(|e| {
                tracing::error!("Request {request} did not complete: {e}");
                RequestMetric {
                    request,
                    latency: Default::default(),
                    outcome: RequestOutcome::from(&e),
                }
            });
            aggregate.consume(&metric);
        }
        teardown?;

        let peak_concurrency = match &gate {
            Some(gate) => PeakConcurrency::Bounded {
                peak: tracker.peak(),
                capacity: gate.capacity(),
            },
            None => PeakConcurrency::Unbounded {
                observed: tracker.peak(),
            },
        };
        let gate_stats = gate.as_ref().map(ConcurrencyGate::stats);
        if let Some(stats) = gate_stats.filter(|s| !s.is_conserved()) {
            tracing::warn!("Gate of scenario {} ended unbalanced: {stats:?}", scenario.name);
        }
        if aggregate.failures.total() > 0 {
            tracing::warn!(
                "Scenario {} had {} failed requests",
                scenario.name,
                aggregate.failures.total()
            );
        }
        tracing::info!("Done running scenario: {}!", scenario.name);

        let metrics = RunMetrics::from_aggregate(
            scenario.name.clone(),
            scenario.strategy,
            aggregate,
            elapsed,
            peak_concurrency,
        );
        Ok(match gate_stats {
            Some(stats) => metrics.with_gate(stats),
            None => metrics,
        })
    }
}

/// Shuts down both schedulers even if the first one fails.
async fn shutdown_all(
    requests: &TaskScheduler,
    fan_out: Option<&TaskScheduler>,
) -> Result<(), SchedulerError> {
    let outer = requests.shutdown().await;
    let inner = match fan_out {
        Some(scheduler) => scheduler.shutdown().await,
        None => Ok(()),
    };
    outer.and(inner)
}

#[derive(Clone)]
struct FanOut {
    width: usize,
    scheduler: Arc<TaskScheduler>,
}

/// Per-request state, cloned into every request task.
#[derive(Clone)]
struct RequestContext<F> {
    gate: Option<ConcurrencyGate>,
    gate_config: Option<GateConfig>,
    tracker: Arc<ConcurrencyTracker>,
    fan_out: Option<FanOut>,
    aggregator: FanOutAggregator,
    action: F,
}

impl<F> RequestContext<F> {
    async fn serve<Fut, T>(self, request: usize) -> RequestMetric
    where
        F: Fn(WorkUnit) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
        T: Send + 'static,
    {
        let start = Instant::now();
        let outcome = self.admit_and_run(request).await;
        RequestMetric {
            request,
            latency: start.elapsed(),
            outcome,
        }
    }

    async fn admit_and_run<Fut, T>(&self, request: usize) -> RequestOutcome
    where
        F: Fn(WorkUnit) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
        T: Send + 'static,
    {
        // Declared before the tracker guard so it is released after it.
        let _permit = match self.admit().await {
            Ok(permit) => permit,
            Err(e) => {
                tracing::warn!("Request {request} was not admitted: {e}");
                return RequestOutcome::GateFailed;
            }
        };
        let _inside = self.tracker.track();

        match &self.fan_out {
            Some(fan_out) => {
                let subtasks = (0..fan_out.width)
                    .map(|part| {
                        let action = self.action.clone();
                        Task::new(part, move || {
                            action(WorkUnit {
                                request,
                                part: Some(part),
                            })
                        })
                    })
                    .collect();
                let req = FanOutRequest::new(format!("request-{request}"), subtasks);
                match self.aggregator.handle(req, &fan_out.scheduler).await {
                    Ok(_) => RequestOutcome::Succeeded,
                    Err(e) => {
                        tracing::warn!("Request {request} failed: {e}");
                        RequestOutcome::AggregationFailed
                    }
                }
            }
            None => match (self.action)(WorkUnit { request, part: None }).await {
                Ok(_) => RequestOutcome::Succeeded,
                Err(e) => {
                    tracing::warn!("Request {request} failed: {e}");
                    RequestOutcome::TaskFailed
                }
            },
        }
    }

    async fn admit(&self) -> Result<Option<GatePermit>, GateError> {
        let Some(gate) = &self.gate else {
            return Ok(None);
        };
        let permit = match self.gate_config.and_then(|c| c.acquire_timeout) {
            Some(limit) => gate.acquire_timeout(limit).await?,
            None => gate.acquire().await?,
        };
        Ok(Some(permit))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn gated_run_respects_capacity() {
        let strategies = [
            SchedulingStrategy::Lightweight,
            SchedulingStrategy::Pooled { workers: 8 },
        ];
        for strategy in strategies {
            let metrics = Scenario::builder()
                .name("gated")
                .total_requests(60)
                .strategy(strategy)
                .gate(GateConfig::new(3))
                .action(|_| async {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok::<_, BoxError>(())
                })
                .build()
                .run()
                .await
                .unwrap();

            assert_eq!(metrics.total_tasks, 60);
            assert_eq!(metrics.succeeded, 60);
            assert_eq!(
                metrics.peak_concurrency,
                PeakConcurrency::Bounded { peak: 3, capacity: 3 },
                "{strategy}"
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn ungated_run_reports_unbounded() {
        let metrics = Scenario::builder()
            .name("open")
            .total_requests(10)
            .action(|_| async { Ok::<_, BoxError>(()) })
            .build()
            .run()
            .await
            .unwrap();

        assert!(matches!(metrics.peak_concurrency, PeakConcurrency::Unbounded { .. }));
        assert_eq!(metrics.gate, None);
        assert!(metrics.peak_concurrency.observed() >= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failures_are_counted_not_raised() {
        let metrics = Scenario::builder()
            .name("flaky")
            .total_requests(20)
            .action(|unit: WorkUnit| async move {
                if unit.request % 4 == 0 {
                    return Err::<(), BoxError>("upstream 503".into());
                }
                Ok(())
            })
            .build()
            .run()
            .await
            .unwrap();

        assert_eq!(metrics.succeeded, 15);
        assert_eq!(metrics.failed.task, 5);
        assert_eq!(metrics.failures(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fan_out_runs_every_part_and_counts_aggregation_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let metrics = Scenario::builder()
            .name("fan-out")
            .total_requests(10)
            .strategy(SchedulingStrategy::Pooled { workers: 2 })
            .fan_out(4)
            .action(move |unit: WorkUnit| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    if unit.request == 3 && unit.part == Some(2) {
                        return Err::<usize, BoxError>("orders service down".into());
                    }
                    Ok(unit.part.unwrap_or_default())
                }
            })
            .build()
            .run()
            .await
            .unwrap();

        // failed sub-tasks' siblings still ran to completion
        assert_eq!(calls.load(Ordering::SeqCst), 40);
        assert_eq!(metrics.succeeded, 9);
        assert_eq!(metrics.failed.aggregation, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn gate_timeout_is_counted_as_gate_failure() {
        let metrics = Scenario::builder()
            .name("starved")
            .total_requests(4)
            .gate(GateConfig::new(1).with_acquire_timeout(Duration::from_millis(20)))
            .action(|_| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, BoxError>(())
            })
            .build()
            .run()
            .await
            .unwrap();

        assert_eq!(metrics.succeeded, 1);
        assert_eq!(metrics.failed.gate, 3);
        assert_eq!(metrics.peak_concurrency, PeakConcurrency::Bounded { peak: 1, capacity: 1 });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_request_is_counted() {
        let metrics = Scenario::builder()
            .name("panics")
            .total_requests(3)
            .strategy(SchedulingStrategy::Pooled { workers: 1 })
            .action(|unit: WorkUnit| async move {
                assert_ne!(unit.request, 1, "request 1 always panics");
                Ok::<_, BoxError>(())
            })
            .build()
            .run()
            .await
            .unwrap();

        assert_eq!(metrics.succeeded, 2);
        assert_eq!(metrics.failed.panicked, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn gate_permits_are_conserved_across_failures_and_panics() {
        let strategies = [
            SchedulingStrategy::Lightweight,
            SchedulingStrategy::Pooled { workers: 4 },
        ];
        for strategy in strategies {
            let metrics = Scenario::builder()
                .name("mixed")
                .total_requests(30)
                .strategy(strategy)
                .gate(GateConfig::new(3))
                .action(|unit: WorkUnit| async move {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    match unit.request % 5 {
                        1 => Err::<(), BoxError>("upstream 500".into()),
                        3 => panic!("request {} blew up", unit.request),
                        _ => Ok(()),
                    }
                })
                .build()
                .run()
                .await
                .unwrap();

            assert_eq!(metrics.succeeded, 18, "{strategy}");
            assert_eq!(metrics.failed.task, 6);
            assert_eq!(metrics.failed.panicked, 6);
            let stats = metrics.gate.unwrap();
            assert_eq!(stats.available, stats.capacity);
            assert_eq!(stats.acquired, 30);
            assert_eq!(stats.acquired, stats.released);
            assert!(stats.is_conserved());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stuck_fan_out_sibling_fails_the_run_at_teardown() {
        let harness = ThroughputHarness::builder()
            .scheduler_options(
                SchedulerOptions::builder()
                    .shutdown_timeout(Duration::from_millis(20))
                    .build(),
            )
            .build();
        let scenario = Scenario::builder()
            .name("stuck sibling")
            .total_requests(1)
            .fan_out(2)
            .action(|unit: WorkUnit| async move {
                if unit.part == Some(0) {
                    return Err::<(), BoxError>("fast failure".into());
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            })
            .build();

        let err = harness.run(&scenario).await.unwrap_err();
        assert!(
            matches!(err, HarnessError::Scheduler(SchedulerError::ShutdownTimeout(_))),
            "{err}"
        );
    }

    #[tokio::test]
    async fn zero_width_fan_out_is_rejected() {
        let err = Scenario::builder()
            .name("bad")
            .total_requests(1)
            .fan_out(0)
            .action(|_| async { Ok::<_, BoxError>(()) })
            .build()
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::InvalidFanOut));
    }

    #[tokio::test]
    async fn zero_capacity_gate_is_rejected() {
        let err = Scenario::builder()
            .name("bad")
            .total_requests(1)
            .gate(GateConfig::new(0))
            .action(|_| async { Ok::<_, BoxError>(()) })
            .build()
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Gate(GateError::ZeroCapacity)));
    }

    #[tokio::test]
    async fn empty_run_reports_zero_tasks() {
        let metrics = Scenario::builder()
            .name("empty")
            .total_requests(0)
            .gate(GateConfig::new(5))
            .action(|_| async { Ok::<_, BoxError>(()) })
            .build()
            .run()
            .await
            .unwrap();
        assert_eq!(metrics.total_tasks, 0);
        assert_eq!(metrics.peak_concurrency, PeakConcurrency::Bounded { peak: 0, capacity: 5 });
    }
}
