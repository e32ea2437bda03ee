//! Bounded pool of single-connection workers for one primary.
//!
//! A pool is addressed by `PoolId`, stable across snapshot rebuilds as long
//! as the underlying `{host, port}` doesn't change (see `Snapshot::reconcile`
//! in `monitor.rs`). Acquisition never blocks indefinitely: once `size +
//! max_overflow` workers are checked out, `with_worker` fails fast with
//! `WorkerError::Closed`-shaped `no_connection` rather than queuing forever.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use crate::config::NodeAddr;
use crate::error::ClientError;
use crate::worker::{Worker, WorkerError};

/// Opaque identifier naming a worker pool for one primary. Two addresses
/// with the same `{host, port}` share one `PoolId` for the lifetime of the
/// snapshot they were discovered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(pub u64);

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

impl PoolId {
    fn next() -> Self {
        Self(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A bounded collection of `Worker` connections to one primary.
///
/// Invariant: `idle.len() + in_flight <= size + max_overflow`, enforced by a
/// `Semaphore` sized to `size + max_overflow` permits; `idle` only ever holds
/// workers that are not currently held by a caller.
pub struct WorkerPool {
    pub id: PoolId,
    pub addr: NodeAddr,
    password: Option<String>,
    connect_timeout: std::time::Duration,
    permits: Semaphore,
    idle: Mutex<VecDeque<Worker>>,
    generation: AtomicU64,
}

impl WorkerPool {
    pub fn new(
        addr: NodeAddr,
        password: Option<String>,
        size: usize,
        max_overflow: usize,
        connect_timeout: std::time::Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: PoolId::next(),
            addr,
            password,
            connect_timeout,
            permits: Semaphore::new(size + max_overflow),
            idle: Mutex::new(VecDeque::new()),
            generation: AtomicU64::new(0),
        })
    }

    async fn acquire_worker(&self, generation: u64) -> Result<Worker, ClientError> {
        if let Some(worker) = self.idle.lock().await.pop_front() {
            return Ok(worker);
        }
        tokio::time::timeout(
            self.connect_timeout,
            Worker::connect(&self.addr.host, self.addr.port, self.password.as_deref()),
        )
        .await
        .map_err(|_| ClientError::Transport(WorkerError::ConnectTimeout))?
        .map_err(|e| {
            warn!(pool = self.id.0, addr = %self.addr, error = %e, "failed to connect worker");
            ClientError::Transport(e)
        })
        .inspect(|_| {
            if generation != self.generation.load(Ordering::Acquire) {
                debug!(pool = self.id.0, "worker connected against a stale generation");
            }
        })
    }

    /// Borrows a worker, runs `f` against it, and returns the worker to the
    /// idle set on completion (success or error). A transport error removes
    /// the worker instead of returning it, so the pool lazily reconnects on
    /// next acquisition.
    pub async fn with_worker<F, Fut, R>(&self, f: F) -> Result<R, ClientError>
    where
        F: FnOnce(&mut Worker) -> Fut,
        Fut: std::future::Future<Output = Result<R, WorkerError>>,
    {
        let Ok(permit) = self.permits.try_acquire() else {
            return Err(ClientError::NoConnection);
        };
        let generation = self.generation.load(Ordering::Acquire);
        let mut worker = self.acquire_worker(generation).await?;

        let result = f(&mut worker).await;
        drop(permit);

        match result {
            Ok(value) => {
                self.idle.lock().await.push_back(worker);
                Ok(value)
            }
            // Transport failure: drop the worker, let the next caller
            // reconnect. Never put a broken socket back in the idle set.
            Err(e @ (WorkerError::Closed | WorkerError::Io(_))) => Err(ClientError::Transport(e)),
            Err(e) => {
                self.idle.lock().await.push_back(worker);
                Err(ClientError::Transport(e))
            }
        }
    }

    /// Best-effort signal to recycle all idle workers, forcing fresh
    /// connections on next acquisition. Concurrent calls carrying the same
    /// `observed_generation` coalesce: only the first drains the idle set.
    pub async fn reconnect_all(&self, observed_generation: u64) {
        if self
            .generation
            .compare_exchange(
                observed_generation,
                observed_generation + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }
        let drained: Vec<Worker> = self.idle.lock().await.drain(..).collect();
        debug!(pool = self.id.0, drained = drained.len(), "recycled idle workers");
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}
