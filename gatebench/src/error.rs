use std::time::Duration;

use thiserror::Error;

/// Opaque failure produced by a task body or a simulated call.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure of one task, always tied to the index it was submitted with.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task {index} failed: {source}")]
    Failed {
        index: usize,
        #[source]
        source: BoxError,
    },
    #[error("task {index} panicked: {message}")]
    Panicked { index: usize, message: String },
    /// The scheduler was already shut down when the task was submitted.
    #[error("task {index} rejected: scheduler is shut down")]
    Rejected { index: usize },
    /// The task was dropped without producing a result (its worker went away).
    #[error("task {index} was lost before completing")]
    Lost { index: usize },
}

impl TaskError {
    pub fn index(&self) -> usize {
        match self {
            Self::Failed { index, .. }
            | Self::Panicked { index, .. }
            | Self::Rejected { index }
            | Self::Lost { index } => *index,
        }
    }
}

/// Admission failures. A task that sees one of these never entered its
/// critical section.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("gate capacity must be at least 1")]
    ZeroCapacity,
    #[error("gate closed while waiting for a permit")]
    Closed,
    #[error("timed out after {0:?} waiting for a permit")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("a tokio runtime is required to build a scheduler")]
    NoRuntime,
    #[error("pooled strategy needs at least one worker")]
    InvalidWorkers,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("scheduler did not shut down within {0:?}")]
    ShutdownTimeout(Duration),
    #[error("{0} worker thread(s) panicked during shutdown")]
    WorkerPanicked(usize),
}

/// The only failure that crosses the dispatcher → harness boundary.
#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("request {request_id}: sub-task {index} failed")]
    SubTask {
        request_id: String,
        index: usize,
        #[source]
        source: TaskError,
    },
    #[error("request {request_id}: sub-task {index} did not finish within {timeout:?}")]
    TimedOut {
        request_id: String,
        index: usize,
        timeout: Duration,
    },
}

impl AggregationError {
    /// Position of the offending sub-task within the request.
    pub fn subtask(&self) -> usize {
        match self {
            Self::SubTask { index, .. } | Self::TimedOut { index, .. } => *index,
        }
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("fan-out width must be at least 1")]
    InvalidFanOut,
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}
