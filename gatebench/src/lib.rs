//! Gatebench, a bounded concurrent task dispatcher with fan-out aggregation and
//! throughput measurement.
//!
//! Gatebench answers a narrow question: how do two ways of running many
//! I/O-bound tasks compare, and what happens when you cap how many of them may be
//! in their critical section at once?
//!
//! # Architecture
//!
//! - [`TaskScheduler`]: runs [`Task`]s under a [`SchedulingStrategy`]. `Pooled`
//!   is a fixed set of OS worker threads, each blocked for the whole duration of
//!   the task it runs. `Lightweight` is one tokio task per submission, suspending
//!   at every `.await`.
//! - [`ConcurrencyGate`]: a counting semaphore admitting at most `capacity` holders
//!   of a [`GatePermit`]. Dropping the permit releases it, on every exit path.
//! - [`ConcurrencyTracker`]: counts how many requests are inside at once and keeps
//!   the peak.
//! - [`FanOutAggregator`]: splits one [`FanOutRequest`] into concurrent sub-tasks
//!   and gathers them, in order, into an [`AggregateResult`].
//! - [`Scenario`] and [`ThroughputHarness`]: one timed run, producing
//!   [`RunMetrics`] for a [`Reporter`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use gatebench::{BoxError, GateConfig, Reporter, Scenario, SchedulingStrategy, StdoutReporter};
//!
//! #[tokio::main]
//! async fn main() {
//!     let metrics = Scenario::builder()
//!         .name("gated lightweight")
//!         .total_requests(1_000)
//!         .strategy(SchedulingStrategy::Lightweight)
//!         .gate(GateConfig::new(10))
//!         .action(|_unit| async {
//!             tokio::time::sleep(Duration::from_millis(10)).await;
//!             Ok::<_, BoxError>(())
//!         })
//!         .build()
//!         .run()
//!         .await
//!         .unwrap();
//!
//!     StdoutReporter.report(&metrics).await.unwrap();
//! }
//! ```
//!
//! # Feature flags
//!
//! - `builtins`: the stdout/JSON/log reporters, simulated downstream calls, and
//!   TOML scenario files. (Enabled by default)

/// Per-run tallies of request metrics
pub mod aggregate;
#[cfg(feature = "builtins")]
/// Scenario files
pub mod config;
/// Error types of every layer
pub mod error;
/// Fan-out of one request into concurrent sub-tasks
pub mod fanout;
/// Admission control
pub mod gate;
/// Timed runs of a scenario
pub mod harness;
/// Per-request samples
pub mod metric;
/// Run results and reporters
pub mod report;
/// What a run consists of
pub mod scenario;
/// Pooled and lightweight task execution
pub mod scheduler;
/// Units of work and their handles
pub mod task;
/// In-flight and peak concurrency counting
pub mod tracker;
#[cfg(feature = "builtins")]
/// Simulated I/O workloads
pub mod work;

pub use aggregate::{FailureCounts, RunAggregate};
pub use error::{AggregationError, BoxError, GateError, HarnessError, SchedulerError, TaskError};
pub use fanout::{AggregateResult, FanOutAggregator, FanOutRequest, GatherPolicy};
pub use gate::{ConcurrencyGate, GatePermit, GateStats};
pub use harness::ThroughputHarness;
pub use metric::{RequestMetric, RequestOutcome};
pub use report::{PeakConcurrency, Reporter, RunMetrics};
#[cfg(feature = "builtins")]
pub use report::{JsonReporter, LogReporter, StdoutReporter};
pub use scenario::{GateConfig, Scenario, WorkUnit};
pub use scheduler::{SchedulerOptions, SchedulingStrategy, TaskScheduler};
pub use task::{Task, TaskHandle, TaskOutcome};
pub use tracker::{ConcurrencyTracker, InFlightGuard};
