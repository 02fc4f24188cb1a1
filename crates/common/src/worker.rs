//! Worker pool for chunked transfers.
//!
//! A fixed number of workers pull tasks from a flume channel in submission
//! order. With a single worker, tasks run strictly one after another.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tracing::{debug, warn};

use crate::error::{Result, StorageError};

/// A unit of work submitted to a [`WorkerPool`].
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Executes submitted tasks on pool workers.
///
/// Completion is signalled by the task itself, so `submit` only queues it.
pub trait WorkerPool: Send + Sync + fmt::Debug + 'static {
    fn submit(&self, task: Task) -> Result<()>;
}

/// Pool of tokio workers fed through an unbounded flume queue.
#[derive(Clone)]
pub struct QueuedWorkerPool {
    tx: flume::Sender<Task>,
    workers: usize,
}

impl QueuedWorkerPool {
    /// Spawn `workers` worker loops on the current tokio runtime.
    pub fn spawn(workers: usize) -> Result<Self> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| StorageError::Config(format!("worker pool needs a tokio runtime: {e}")))?;
        let workers = workers.max(1);
        let (tx, rx) = flume::unbounded::<Task>();

        for id in 0..workers {
            let rx = rx.clone();
            handle.spawn(async move {
                while let Ok(task) = rx.recv_async().await {
                    // A panicking task drops its completion sender, which the
                    // waiter observes as a failed part.
                    if let Err(e) = tokio::spawn(task).await {
                        warn!(worker = id, error = %e, "worker task aborted");
                    }
                }
                debug!(worker = id, "worker stopped");
            });
        }

        Ok(Self { tx, workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

impl fmt::Debug for QueuedWorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedWorkerPool")
            .field("workers", &self.workers)
            .field("queued", &self.tx.len())
            .finish()
    }
}

impl WorkerPool for QueuedWorkerPool {
    fn submit(&self, task: Task) -> Result<()> {
        self.tx
            .send(task)
            .map_err(|_| StorageError::BackendUnavailable("worker pool has shut down".into()))
    }
}
