//! Fan-out / fan-in of one logical request.
//!
//! A [`FanOutRequest`] carries a fixed, ordered list of sub-tasks. The
//! [`FanOutAggregator`] submits all of them to a scheduler before waiting on any,
//! then gathers the results back into submission order.
//!
//! # Gathering
//! With the default [`GatherPolicy::SubmissionOrder`] results are awaited as
//! sub-task 0, 1, 2, ... and the first *position* holding a failure is reported,
//! even when a later sub-task failed earlier in wall-clock time.
//! [`GatherPolicy::Earliest`] reports whichever failure completes first instead.
//!
//! Under both policies the sub-tasks still running after a failure are left
//! alone: they finish in the background and their results are dropped. Nothing
//! is retried.

use std::time::Duration;

use futures::{stream::FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use typed_builder::TypedBuilder;

use crate::{
    error::AggregationError,
    scheduler::TaskScheduler,
    task::{Task, TaskHandle},
};

pub struct FanOutRequest<T> {
    id: String,
    subtasks: Vec<Task<T>>,
}

impl<T> FanOutRequest<T> {
    pub fn new(id: impl Into<String>, subtasks: Vec<Task<T>>) -> Self {
        Self {
            id: id.into(),
            subtasks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn width(&self) -> usize {
        self.subtasks.len()
    }
}

/// Sub-results of a successful fan-out, in submission order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregateResult<T> {
    pub request_id: String,
    pub parts: Vec<T>,
}

impl<T> AggregateResult<T> {
    /// Folds the parts into whatever composite the caller wants.
    pub fn combine<R>(self, f: impl FnOnce(Vec<T>) -> R) -> R {
        f(self.parts)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatherPolicy {
    /// Wait in submission order; report the lowest failing position.
    #[default]
    SubmissionOrder,
    /// Report the first failure to complete.
    Earliest,
}

#[derive(Clone, Debug, Default, TypedBuilder)]
pub struct FanOutAggregator {
    #[builder(default)]
    pub policy: GatherPolicy,
    /// Upper bound on gathering all sub-results. `None` waits forever.
    #[builder(default, setter(strip_option))]
    pub gather_timeout: Option<Duration>,
}

impl FanOutAggregator {
    pub async fn handle<T: Send + 'static>(
        &self,
        request: FanOutRequest<T>,
        scheduler: &TaskScheduler,
    ) -> Result<AggregateResult<T>, AggregationError> {
        let FanOutRequest { id, subtasks } = request;
        let deadline = self.gather_timeout.map(|t| Instant::now() + t);

        let mut handles = Vec::with_capacity(subtasks.len());
        for task in subtasks {
            handles.push(scheduler.submit(task).await);
        }
        tracing::debug!("Request {id} fanned out into {} sub-tasks", handles.len());

        let parts = match self.policy {
            GatherPolicy::SubmissionOrder => self.gather_in_order(&id, handles, deadline).await?,
            GatherPolicy::Earliest => self.gather_earliest(&id, handles, deadline).await?,
        };
        Ok(AggregateResult {
            request_id: id,
            parts,
        })
    }

    async fn gather_in_order<T>(
        &self,
        request_id: &str,
        handles: Vec<TaskHandle<T>>,
        deadline: Option<Instant>,
    ) -> Result<Vec<T>, AggregationError> {
        let mut parts = Vec::with_capacity(handles.len());
        for (index, handle) in handles.into_iter().enumerate() {
            let outcome = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, handle.join())
                    .await
                    .map_err(|_| self.timed_out(request_id, index))?,
                None => handle.join().await,
            };
            match outcome {
                Ok(part) => parts.push(part),
                Err(source) => {
                    return Err(AggregationError::SubTask {
                        request_id: request_id.to_string(),
                        index,
                        source,
                    })
                }
            }
        }
        Ok(parts)
    }

    async fn gather_earliest<T>(
        &self,
        request_id: &str,
        handles: Vec<TaskHandle<T>>,
        deadline: Option<Instant>,
    ) -> Result<Vec<T>, AggregationError> {
        let mut slots: Vec<Option<T>> = handles.iter().map(|_| None).collect();
        let mut pending: FuturesUnordered<_> = handles
            .into_iter()
            .enumerate()
            .map(|(index, handle)| async move { (index, handle.join().await) })
            .collect();

        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, pending.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        let index = slots.iter().position(Option::is_none).unwrap_or_default();
                        return Err(self.timed_out(request_id, index));
                    }
                },
                None => pending.next().await,
            };
            match next {
                Some((index, Ok(part))) => slots[index] = Some(part),
                Some((index, Err(source))) => {
                    return Err(AggregationError::SubTask {
                        request_id: request_id.to_string(),
                        index,
                        source,
                    })
                }
                None => break,
            }
        }
        Ok(slots.into_iter().flatten().collect())
    }

    fn timed_out(&self, request_id: &str, index: usize) -> AggregationError {
        AggregationError::TimedOut {
            request_id: request_id.to_string(),
            index,
            timeout: self.gather_timeout.unwrap_or_default(),
        }
    }
}
