//! Fixed set of OS worker threads sharing one bounded queue.
//!
//! Every worker drives exactly one task at a time with [`Handle::block_on`], so a
//! task that waits on simulated I/O keeps its whole thread busy for the duration.
//! When all workers are busy the queue fills up and submitters wait: that is the
//! only backpressure this strategy has, and it serializes excess concurrency
//! instead of rejecting it.

use std::{
    sync::{Arc, Mutex, PoisonError},
    thread::{self, JoinHandle},
    time::Duration,
};

use tokio::{
    runtime::Handle,
    sync::{mpsc, Mutex as AsyncMutex},
};

use super::Job;
use crate::error::SchedulerError;

type SharedQueue = Arc<AsyncMutex<mpsc::Receiver<Job>>>;

pub(crate) struct PooledWorkers {
    queue: Mutex<Option<mpsc::Sender<Job>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl PooledWorkers {
    pub(crate) fn spawn(
        workers: usize,
        queue_depth: usize,
        runtime: Handle,
    ) -> Result<Self, SchedulerError> {
        let (tx, rx) = mpsc::channel::<Job>(queue_depth.max(1));
        let rx: SharedQueue = Arc::new(AsyncMutex::new(rx));

        tracing::debug!("Spawning {workers} pooled workers...");
        // If a spawn fails, `tx` is dropped on return and the threads that did
        // start see a closed queue and exit.
        let threads = (0..workers)
            .map(|i| {
                let rx = Arc::clone(&rx);
                let runtime = runtime.clone();
                thread::Builder::new()
                    .name(format!("gatebench-worker-{i}"))
                    .spawn(move || worker_loop(i, runtime, rx))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            queue: Mutex::new(Some(tx)),
            threads: Mutex::new(threads),
        })
    }

    /// Queues a job, waiting for room when the queue is full. Hands the job back
    /// if the pool is already shut down.
    pub(crate) async fn submit(&self, job: Job) -> Result<(), Job> {
        let tx = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match tx {
            Some(tx) => tx.send(job).await.map_err(|e| e.0),
            None => Err(job),
        }
    }

    /// Closes the queue and joins every worker once it has drained.
    pub(crate) async fn shutdown(&self, limit: Duration) -> Result<(), SchedulerError> {
        drop(
            self.queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let threads = std::mem::take(
            &mut *self.threads.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if threads.is_empty() {
            return Ok(());
        }

        let workers = threads.len();
        let joined = tokio::task::spawn_blocking(move || {
            threads
                .into_iter()
                .map(JoinHandle::join)
                .filter(Result::is_err)
                .count()
        });
        match tokio::time::timeout(limit, joined).await {
            Ok(Ok(0)) => {
                tracing::debug!("All {workers} pooled workers joined.");
                Ok(())
            }
            Ok(Ok(panicked)) => Err(SchedulerError::WorkerPanicked(panicked)),
            Ok(Err(_)) => Err(SchedulerError::WorkerPanicked(workers)),
            Err(_) => Err(SchedulerError::ShutdownTimeout(limit)),
        }
    }
}

fn worker_loop(i: usize, runtime: Handle, rx: SharedQueue) {
    tracing::debug!("Worker {i} started.");
    loop {
        let job = runtime.block_on(async { rx.lock().await.recv().await });
        match job {
            Some(job) => runtime.block_on(job),
            None => break,
        }
    }
    tracing::debug!("Worker {i} shutting down.");
}
