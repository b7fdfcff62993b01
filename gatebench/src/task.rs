//! Units of work handed to a [`TaskScheduler`](crate::TaskScheduler).

use std::{any::Any, fmt, future::Future, panic::AssertUnwindSafe};

use futures::{future::BoxFuture, FutureExt};
use tokio::sync::oneshot;

use crate::error::{BoxError, TaskError};

/// Terminal state of a task.
pub type TaskOutcome<T> = Result<T, TaskError>;

type Body<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, BoxError>> + Send>;

/// A body that produces a `T` or fails, plus the index it was submitted under.
///
/// The body is only invoked once the scheduler picks the task up, so building a
/// task is cheap regardless of how much work it describes.
pub struct Task<T> {
    index: usize,
    body: Body<T>,
}

impl<T: Send + 'static> Task<T> {
    pub fn new<F, Fut>(index: usize, body: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        Self {
            index,
            body: Box::new(move || body().boxed()),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Splits the task into an erased job and the handle observing its result.
    ///
    /// The job never panics: a panic in the body is caught and reported through
    /// the handle as [`TaskError::Panicked`].
    pub(crate) fn into_job(self) -> (BoxFuture<'static, ()>, TaskHandle<T>) {
        let (tx, rx) = oneshot::channel();
        let index = self.index;
        let body = self.body;
        let job = async move {
            let outcome = match AssertUnwindSafe(async move { body().await })
                .catch_unwind()
                .await
            {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(source)) => Err(TaskError::Failed { index, source }),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::error!("Task {index} panicked: {message}");
                    Err(TaskError::Panicked { index, message })
                }
            };
            // The caller may have stopped listening; the outcome is discarded then.
            let _ = tx.send(outcome);
        }
        .boxed();
        (job, TaskHandle::pending(index, rx))
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("index", &self.index).finish_non_exhaustive()
    }
}

/// Awaitable result of a submitted task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    index: usize,
    state: HandleState<T>,
}

#[derive(Debug)]
enum HandleState<T> {
    Pending(oneshot::Receiver<TaskOutcome<T>>),
    Rejected,
}

impl<T> TaskHandle<T> {
    fn pending(index: usize, rx: oneshot::Receiver<TaskOutcome<T>>) -> Self {
        Self {
            index,
            state: HandleState::Pending(rx),
        }
    }

    pub(crate) fn rejected(index: usize) -> Self {
        Self {
            index,
            state: HandleState::Rejected,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Waits for the task to reach a terminal state.
    pub async fn join(self) -> TaskOutcome<T> {
        match self.state {
            HandleState::Pending(rx) => match rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(TaskError::Lost { index: self.index }),
            },
            HandleState::Rejected => Err(TaskError::Rejected { index: self.index }),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
