//! One tokio task per submission.
//!
//! Tasks are multiplexed over the runtime's carrier threads and suspend at every
//! `.await`, so a waiting task never holds a thread. Nothing here caps
//! concurrency; a [`ConcurrencyGate`](crate::ConcurrencyGate) is the only ceiling.

use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use tokio::{runtime::Handle, task::JoinSet};

use super::Job;
use crate::error::SchedulerError;

pub(crate) struct LightweightSpawner {
    runtime: Handle,
    tasks: Mutex<Option<JoinSet<()>>>,
}

impl LightweightSpawner {
    pub(crate) fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            tasks: Mutex::new(Some(JoinSet::new())),
        }
    }

    pub(crate) fn submit(&self, job: Job) -> Result<(), Job> {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        match tasks.as_mut() {
            Some(set) => {
                // Reap whatever already finished so the set does not grow with the run.
                while set.try_join_next().is_some() {}
                set.spawn_on(job, &self.runtime);
                Ok(())
            }
            None => Err(job),
        }
    }

    /// Waits for every spawned task, including ones nobody is awaiting any more
    /// (e.g. fan-out siblings of a failed sub-task). Tasks still running when
    /// `limit` expires are aborted.
    pub(crate) async fn shutdown(&self, limit: Duration) -> Result<(), SchedulerError> {
        let taken = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut set) = taken else {
            return Ok(());
        };

        let drained = tokio::time::timeout(limit, async {
            while let Some(res) = set.join_next().await {
                if let Err(e) = res {
                    tracing::error!("Lightweight task ended abnormally: {e}");
                }
            }
        })
        .await;

        match drained {
            Ok(()) => Ok(()),
            Err(_) => {
                tracing::warn!("Aborting {} lightweight tasks after {limit:?}", set.len());
                set.abort_all();
                Err(SchedulerError::ShutdownTimeout(limit))
            }
        }
    }
}

impl Drop for LightweightSpawner {
    // Dropping a JoinSet aborts its tasks; detach them so a skipped shutdown
    // leaves background work running like the pooled workers do.
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut set) = tasks.take() {
            if !set.is_empty() {
                tracing::warn!(
                    "Lightweight scheduler dropped without shutdown, detaching {} tasks",
                    set.len()
                );
            }
            set.detach_all();
        }
    }
}
