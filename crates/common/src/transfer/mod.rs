//! Chunked transfers over the worker pool.
//!
//! A transfer at or below the single-shot threshold is one direct call.
//! Larger transfers are split into fixed-size parts, one task per part.
//! Results are collected in part order. The first failed part interrupts
//! every sibling that has not started yet; the coordinator still waits for
//! all of them before reporting, and asks the operation to abort.

mod download;
mod upload;

pub use download::DownloadOperation;
pub use upload::UploadOperation;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::TransferSettings;
use crate::error::{Result, StorageError};
use crate::worker::WorkerPool;

/// Lifecycle of one part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartState {
    Pending,
    Dispatched,
    Succeeded,
    Failed,
    /// Skipped because a sibling failed first
    Interrupted,
}

/// One fixed-size slice of a transfer. `index` is 1-based.
#[derive(Debug)]
pub struct PartDescriptor {
    pub index: usize,
    pub offset: u64,
    pub length: u64,
    interrupted: AtomicBool,
    state: Mutex<PartState>,
}

impl PartDescriptor {
    fn new(index: usize, offset: u64, length: u64) -> Self {
        Self {
            index,
            offset,
            length,
            interrupted: AtomicBool::new(false),
            state: Mutex::new(PartState::Pending),
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
    }

    pub fn state(&self) -> PartState {
        *self.state.lock()
    }

    fn set_state(&self, state: PartState) {
        *self.state.lock() = state;
    }
}

/// Split `total` bytes into parts of `part_size`, the last one holding the
/// remainder.
pub fn plan_parts(total: u64, part_size: u64) -> Vec<PartDescriptor> {
    let part_size = part_size.max(1);
    let count = total.div_ceil(part_size);
    (0..count)
        .map(|i| {
            let offset = i * part_size;
            PartDescriptor::new(i as usize + 1, offset, part_size.min(total - offset))
        })
        .collect()
}

/// A transfer that can run in one call or in parts.
#[async_trait]
pub trait TransferOperation: Send + Sync + fmt::Debug + 'static {
    /// Per-part result handed to [`TransferOperation::complete`].
    type Part: Send + 'static;

    async fn single_shot(&self) -> Result<()>;

    /// Runs once before any part is dispatched.
    async fn begin(&self, _parts: usize) -> Result<()> {
        Ok(())
    }

    async fn transfer_part(&self, part: &PartDescriptor) -> Result<Self::Part>;

    /// Receives every part result ordered by ascending index.
    async fn complete(&self, parts: Vec<(usize, Self::Part)>) -> Result<()>;

    /// Undo remote state after a failed multi-part transfer.
    async fn abort(&self) -> Result<()> {
        Ok(())
    }
}

/// How a finished transfer ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSummary {
    /// 1 for a single-shot transfer
    pub parts: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct TransferCoordinator {
    pool: Arc<dyn WorkerPool>,
    settings: TransferSettings,
}

impl TransferCoordinator {
    pub fn new(pool: Arc<dyn WorkerPool>, settings: TransferSettings) -> Self {
        Self { pool, settings }
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    pub async fn execute<T: TransferOperation>(
        &self,
        op: Arc<T>,
        total_size: u64,
    ) -> Result<TransferSummary> {
        if total_size <= self.settings.single_shot_threshold {
            debug!(op = ?op, size = total_size, "single-shot transfer");
            op.single_shot().await?;
            return Ok(TransferSummary {
                parts: 1,
                bytes: total_size,
            });
        }

        let parts: Arc<Vec<PartDescriptor>> =
            Arc::new(plan_parts(total_size, self.settings.part_size));
        let total = parts.len();
        debug!(op = ?op, size = total_size, parts = total, "multi-part transfer");

        op.begin(total).await?;

        let mut waiters = Vec::with_capacity(total);
        for slot in 0..total {
            let (tx, rx) = oneshot::channel();
            let task_op = op.clone();
            let task_parts = parts.clone();
            let task = Box::pin(async move {
                let result = run_part(task_op.as_ref(), &task_parts, slot).await;
                let _ = tx.send(result);
            });

            if let Err(e) = self.pool.submit(task) {
                warn!(op = ?op, error = %e, "failed to dispatch part");
                interrupt_all(&parts);
                for rx in waiters {
                    let _ = rx.await;
                }
                abort(op.as_ref()).await;
                return Err(e);
            }
            waiters.push(rx);
        }

        let mut results = Vec::with_capacity(total);
        let mut failed = 0;
        for (slot, rx) in waiters.into_iter().enumerate() {
            match rx.await {
                Ok(Some(result)) => results.push((slot + 1, result)),
                // Err means the task was dropped without reporting
                Ok(None) | Err(_) => {
                    if failed == 0 {
                        interrupt_all(&parts);
                    }
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            warn!(op = ?op, failed, total, "multi-part transfer failed");
            abort(op.as_ref()).await;
            return Err(StorageError::PartialTransfer { failed, total });
        }

        op.complete(results).await?;
        info!(op = ?op, size = total_size, parts = total, "multi-part transfer complete");
        Ok(TransferSummary {
            parts: total,
            bytes: total_size,
        })
    }
}

fn interrupt_all(parts: &[PartDescriptor]) {
    for part in parts {
        part.interrupt();
    }
}

async fn abort<T: TransferOperation>(op: &T) {
    if let Err(e) = op.abort().await {
        warn!(op = ?op, error = %e, "failed to abort transfer");
    }
}

/// Body of one part task. A failure interrupts all siblings right away so
/// queued parts stop before touching the network.
async fn run_part<T: TransferOperation>(
    op: &T,
    parts: &[PartDescriptor],
    slot: usize,
) -> Option<T::Part> {
    let part = &parts[slot];
    if part.is_interrupted() {
        part.set_state(PartState::Interrupted);
        debug!(op = ?op, part = part.index, "part interrupted before start");
        return None;
    }

    part.set_state(PartState::Dispatched);
    match op.transfer_part(part).await {
        Ok(result) => {
            part.set_state(PartState::Succeeded);
            Some(result)
        }
        Err(e) => {
            warn!(op = ?op, part = part.index, error = %e, "part failed");
            part.set_state(PartState::Failed);
            interrupt_all(parts);
            None
        }
    }
}
