use std::{future::Future, time::Duration};

use typed_builder::TypedBuilder;

use crate::{
    error::{BoxError, HarnessError},
    harness::ThroughputHarness,
    report::RunMetrics,
    scheduler::SchedulingStrategy,
};

/// Identifies the piece of work an action is asked to perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WorkUnit {
    /// Index of the logical request, `0..total_requests`.
    pub request: usize,
    /// Position of the sub-task within the request when fanning out.
    pub part: Option<usize>,
}

/// Admission gate settings for a scenario.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GateConfig {
    pub capacity: usize,
    /// Give up on a permit after this long. `None` waits indefinitely.
    pub acquire_timeout: Option<Duration>,
}

impl GateConfig {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            acquire_timeout: None,
        }
    }

    pub fn with_acquire_timeout(mut self, limit: Duration) -> Self {
        self.acquire_timeout = Some(limit);
        self
    }
}

/// Everything that defines one run: how many requests, which strategy, whether
/// requests are gated or fanned out, and the action doing the work.
///
/// The action is cloned per request and per sub-task. Keep it cheap to clone and
/// build heavy state (clients, pools) outside of it.
///
/// ```rust,no_run
/// use std::time::Duration;
/// use gatebench::{GateConfig, Scenario, SchedulingStrategy};
///
/// # async fn demo() -> Result<(), gatebench::HarnessError> {
/// let metrics = Scenario::builder()
///     .name("gated")
///     .total_requests(1_000)
///     .strategy(SchedulingStrategy::Lightweight)
///     .gate(GateConfig::new(10))
///     .action(|_unit| async {
///         tokio::time::sleep(Duration::from_millis(10)).await;
///         Ok::<_, gatebench::BoxError>(())
///     })
///     .build()
///     .run()
///     .await?;
/// println!("{metrics}");
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, TypedBuilder)]
pub struct Scenario<F> {
    #[builder(setter(into))]
    pub name: String,
    pub total_requests: usize,
    #[builder(default = SchedulingStrategy::Lightweight)]
    pub strategy: SchedulingStrategy,
    #[builder(default, setter(strip_option))]
    pub gate: Option<GateConfig>,
    /// Number of sub-tasks each request fans out into.
    #[builder(default, setter(strip_option))]
    pub fan_out: Option<usize>,
    pub action: F,
}

impl<F> Scenario<F> {
    /// Runs the scenario with a default [`ThroughputHarness`].
    pub async fn run<Fut, T>(&self) -> Result<RunMetrics, HarnessError>
    where
        F: Fn(WorkUnit) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
        T: Send + 'static,
    {
        ThroughputHarness::default().run(self).await
    }
}
