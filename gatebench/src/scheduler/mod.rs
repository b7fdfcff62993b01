//! Scheduler: how submitted tasks get onto threads
//!
//! A [`TaskScheduler`] runs [`Task`]s under one of two strategies, fixed at
//! construction:
//!
//! - [`SchedulingStrategy::Pooled`]: `workers` long-lived OS threads pull tasks
//!   from a bounded queue and drive them one at a time. A task waiting on I/O
//!   blocks its worker, so concurrency never exceeds the worker count.
//! - [`SchedulingStrategy::Lightweight`]: every task becomes its own tokio task.
//!   Waiting suspends only the task, so thousands of tasks can be outstanding on
//!   a handful of carrier threads.
//!
//! # Lifecycle
//! 1. Build the scheduler inside a tokio runtime (the pooled workers borrow the
//!    runtime's timer and I/O drivers through its [`Handle`]).
//! 2. [`submit`](TaskScheduler::submit) tasks one by one, or hand a batch to
//!    [`submit_all`](TaskScheduler::submit_all), which returns once every task has
//!    reached a terminal state. Per-task failures are returned, never raised.
//! 3. [`shutdown`](TaskScheduler::shutdown) joins what the scheduler owns. It is
//!    bounded by [`SchedulerOptions::shutdown_timeout`] and the only error that
//!    should end a run.
//!
//! [`TaskScheduler::run_all`] bundles all three steps.

mod lightweight;
mod pooled;

use std::{fmt, time::Duration};

use futures::future::{join_all, BoxFuture};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use typed_builder::TypedBuilder;

use crate::{
    error::SchedulerError,
    task::{Task, TaskHandle, TaskOutcome},
};
use lightweight::LightweightSpawner;
use pooled::PooledWorkers;

/// A task with its result plumbing attached and its type erased.
pub(crate) type Job = BoxFuture<'static, ()>;

/// Pending tasks the pooled queue holds before submitters start waiting.
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingStrategy {
    Pooled { workers: usize },
    Lightweight,
}

impl SchedulingStrategy {
    /// Pooled strategy sized at two workers per CPU.
    pub fn pooled_default() -> Self {
        Self::Pooled {
            workers: num_cpus::get() * 2,
        }
    }

    /// The ceiling the scheduler itself puts on concurrency, if any.
    pub fn ceiling(&self) -> Option<usize> {
        match self {
            Self::Pooled { workers } => Some(*workers),
            Self::Lightweight => None,
        }
    }
}

impl fmt::Display for SchedulingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pooled { workers } => write!(f, "pooled({workers})"),
            Self::Lightweight => f.write_str("lightweight"),
        }
    }
}

#[derive(Clone, Debug, TypedBuilder)]
pub struct SchedulerOptions {
    /// Capacity of the pooled strategy's queue. Ignored by the lightweight strategy.
    #[builder(default = DEFAULT_QUEUE_DEPTH)]
    pub queue_depth: usize,
    /// How long [`TaskScheduler::shutdown`] may wait for owned work to finish.
    #[builder(default = Duration::from_secs(30))]
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

enum Inner {
    Pooled(PooledWorkers),
    Lightweight(LightweightSpawner),
}

pub struct TaskScheduler {
    strategy: SchedulingStrategy,
    options: SchedulerOptions,
    inner: Inner,
}

impl TaskScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Result<Self, SchedulerError> {
        Self::with_options(strategy, SchedulerOptions::default())
    }

    pub fn with_options(
        strategy: SchedulingStrategy,
        options: SchedulerOptions,
    ) -> Result<Self, SchedulerError> {
        let runtime = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;
        let inner = match strategy {
            SchedulingStrategy::Pooled { workers: 0 } => {
                return Err(SchedulerError::InvalidWorkers)
            }
            SchedulingStrategy::Pooled { workers } => {
                Inner::Pooled(PooledWorkers::spawn(workers, options.queue_depth, runtime)?)
            }
            SchedulingStrategy::Lightweight => {
                Inner::Lightweight(LightweightSpawner::new(runtime))
            }
        };
        Ok(Self {
            strategy,
            options,
            inner,
        })
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Hands one task to the scheduler.
    ///
    /// Under the pooled strategy this waits while the queue is full. A scheduler
    /// that was shut down returns a handle resolving to
    /// [`TaskError::Rejected`](crate::TaskError::Rejected).
    pub async fn submit<T: Send + 'static>(&self, task: Task<T>) -> TaskHandle<T> {
        let index = task.index();
        let (job, handle) = task.into_job();
        let accepted = match &self.inner {
            Inner::Pooled(pool) => pool.submit(job).await,
            Inner::Lightweight(spawner) => spawner.submit(job),
        };
        match accepted {
            Ok(()) => handle,
            Err(_) => {
                tracing::warn!(
                    "Task {index} submitted to a {} scheduler after shutdown",
                    self.strategy
                );
                TaskHandle::rejected(index)
            }
        }
    }

    /// Submits every task, then waits until each one has succeeded or failed.
    ///
    /// Outcomes come back in submission order, whatever order the tasks finished in.
    pub async fn submit_all<T, I>(&self, tasks: I) -> Vec<TaskOutcome<T>>
    where
        T: Send + 'static,
        I: IntoIterator<Item = Task<T>>,
    {
        let mut handles = Vec::new();
        for task in tasks {
            handles.push(self.submit(task).await);
        }
        tracing::debug!("Submitted {} tasks to {} scheduler", handles.len(), self.strategy);
        join_all(handles.into_iter().map(TaskHandle::join)).await
    }

    /// Joins everything the scheduler owns. Safe to call more than once.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        let limit = self.options.shutdown_timeout;
        let res = match &self.inner {
            Inner::Pooled(pool) => pool.shutdown(limit).await,
            Inner::Lightweight(spawner) => spawner.shutdown(limit).await,
        };
        if let Err(e) = &res {
            tracing::error!("Failed to shut down {} scheduler: {e}", self.strategy);
        }
        res
    }

    /// Builds a scheduler, runs `tasks` to completion and tears it down again.
    pub async fn run_all<T, I>(
        strategy: SchedulingStrategy,
        tasks: I,
    ) -> Result<Vec<TaskOutcome<T>>, SchedulerError>
    where
        T: Send + 'static,
        I: IntoIterator<Item = Task<T>>,
    {
        let scheduler = Self::new(strategy)?;
        let outcomes = scheduler.submit_all(tasks).await;
        scheduler.shutdown().await?;
        Ok(outcomes)
    }
}

impl fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("strategy", &self.strategy)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
