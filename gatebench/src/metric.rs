use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// A single observation: how one logical request ended and how long it took,
/// measured from the moment it started waiting for admission.
///
/// Metrics are produced by the harness for every request, then folded into a
/// [`RunAggregate`](crate::RunAggregate).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestMetric {
    pub request: usize,
    pub latency: Duration,
    pub outcome: RequestOutcome,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOutcome {
    Succeeded,
    /// The request's own work returned an error.
    TaskFailed,
    /// The request never got a permit.
    GateFailed,
    /// One of the request's fan-out sub-tasks failed or timed out.
    AggregationFailed,
    Panicked,
    /// The request was rejected or dropped by its scheduler.
    Lost,
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl From<&TaskError> for RequestOutcome {
    fn from(err: &TaskError) -> Self {
        match err {
            TaskError::Failed { .. } => Self::TaskFailed,
            TaskError::Panicked { .. } => Self::Panicked,
            TaskError::Rejected { .. } | TaskError::Lost { .. } => Self::Lost,
        }
    }
}
