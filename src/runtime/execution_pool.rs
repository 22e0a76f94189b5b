// src/runtime/execution_pool.rs
//! Execution pool of single-use worker processes
//!
//! # Architecture
//!
//! ```text
//! ExecutionPool (generation N)
//! ├─ Idle:    [Worker1, Worker2, ...]   (limited, waiting for one task)
//! ├─ Permits: worker_count              (bounds outstanding tasks; extra submissions queue)
//! └─ Shutdown token                     (teardown: refuse, abandon, kill)
//! ```
//!
//! Every task runs on its own tokio task: it waits for a permit, takes an idle
//! worker (or spawns one), runs, and resolves a [`PendingResult`]. The worker
//! is then retired and a replacement spawned before the permit is released,
//! so the number of live workers never exceeds the worker count.

use crate::observability::WORKER_SPAWNS_TOTAL;
use crate::runtime::process_manager::{ProcessManager, SpawnConfig, WorkerProcess};
use crate::runtime::protocol::{RenderRequest, WorkerReply, WorkerRequest};
use crate::utils::errors::{Result, SandboxError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for an execution pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker processes (default: 4)
    pub worker_count: usize,

    /// How workers are launched and limited
    pub spawn: SpawnConfig,
}

/// Handle to a submitted task
#[must_use = "a pending result does nothing unless waited on"]
pub struct PendingResult {
    rx: oneshot::Receiver<Result<WorkerReply>>,
}

impl PendingResult {
    /// Wait up to `timeout`. `None` means the budget elapsed; the task itself
    /// keeps running and its result is dropped.
    pub async fn wait(self, timeout: Duration) -> Option<Result<WorkerReply>> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(result)) => Some(result),
            // The task was dropped without resolving (runtime shutting down)
            Ok(Err(_)) => Some(Err(SandboxError::PoolUnavailable)),
            Err(_) => None,
        }
    }
}

/// Pool of single-use worker processes
pub struct ExecutionPool {
    generation: u64,
    worker_count: usize,
    manager: ProcessManager,
    idle: Mutex<VecDeque<WorkerProcess>>,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl ExecutionPool {
    /// Create a pool and start `worker_count` workers up front
    pub async fn open(config: PoolConfig, generation: u64) -> Result<Arc<Self>> {
        if config.worker_count == 0 {
            return Err(SandboxError::Config("worker_count must be at least 1".into()));
        }

        info!(generation, workers = config.worker_count, "Opening execution pool");

        let pool = Arc::new(Self {
            generation,
            worker_count: config.worker_count,
            manager: ProcessManager::new(config.spawn),
            idle: Mutex::new(VecDeque::with_capacity(config.worker_count)),
            permits: Arc::new(Semaphore::new(config.worker_count)),
            shutdown: CancellationToken::new(),
        });

        let spawns = (0..pool.worker_count).map(|_| pool.spawn_worker());
        for spawned in futures::future::join_all(spawns).await {
            match spawned {
                Ok(worker) => pool.idle.lock().push_back(worker),
                Err(e) => {
                    warn!(generation, "Failed to start worker: {}", e);
                    pool.teardown();
                    return Err(e);
                }
            }
        }

        info!(generation, "Execution pool ready");
        Ok(pool)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_open(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Queue a render task
    pub fn submit(self: &Arc<Self>, request: RenderRequest) -> Result<PendingResult> {
        self.enqueue(WorkerRequest::Render(request))
    }

    /// Queue a no-op task that only proves the pool can still run work
    pub fn probe(self: &Arc<Self>) -> Result<PendingResult> {
        self.enqueue(WorkerRequest::Ping)
    }

    /// Stop accepting tasks, abandon in-flight ones and kill every worker.
    /// Idempotent.
    pub fn teardown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }

        info!(generation = self.generation, "Tearing down execution pool");
        self.shutdown.cancel();
        self.permits.close();

        let idle: Vec<WorkerProcess> = self.idle.lock().drain(..).collect();
        for worker in idle {
            debug!(pid = worker.pid(), "Killing idle worker");
            worker.kill();
        }
    }

    /// Snapshot of the pool's state
    pub fn stats(&self) -> PoolStats {
        let idle_pids: Vec<u32> = self.idle.lock().iter().map(WorkerProcess::pid).collect();
        let busy = if self.is_open() {
            self.worker_count - self.permits.available_permits()
        } else {
            0
        };

        PoolStats {
            generation: self.generation,
            worker_count: self.worker_count,
            idle_pids,
            busy_tasks: busy,
            open: self.is_open(),
        }
    }

    fn enqueue(self: &Arc<Self>, request: WorkerRequest) -> Result<PendingResult> {
        if self.shutdown.is_cancelled() {
            return Err(SandboxError::PoolUnavailable);
        }

        let (tx, rx) = oneshot::channel();
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let (result, slot) = tokio::select! {
                biased;
                _ = pool.shutdown.cancelled() => (Err(SandboxError::PoolUnavailable), None),
                outcome = pool.execute(request) => outcome,
            };
            // Nobody may be listening any more; that's fine
            let _ = tx.send(result);

            if let Some(permit) = slot {
                pool.replenish().await;
                drop(permit);
            }
        });

        Ok(PendingResult { rx })
    }

    /// Run one task on one worker. When a worker was used up, its slot's
    /// permit is handed back so it can be held until the replacement exists.
    async fn execute(
        self: &Arc<Self>,
        request: WorkerRequest,
    ) -> (Result<WorkerReply>, Option<OwnedSemaphorePermit>) {
        let permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return (Err(SandboxError::PoolUnavailable), None),
        };

        let worker = match self.take_idle() {
            Some(worker) => worker,
            None => match self.spawn_worker().await {
                Ok(worker) => worker,
                Err(e) => return (Err(e), None),
            },
        };

        debug!(generation = self.generation, pid = worker.pid(), "Running task on worker");
        let result = worker.run(&request).await;
        (result, Some(permit))
    }

    /// Spawn the replacement for a retired worker
    async fn replenish(&self) {
        if !self.is_open() {
            return;
        }

        match self.spawn_worker().await {
            Ok(worker) => {
                let mut idle = self.idle.lock();
                if self.is_open() && idle.len() < self.worker_count {
                    idle.push_back(worker);
                } else {
                    drop(idle);
                    worker.kill();
                }
            }
            Err(e) => warn!(
                generation = self.generation,
                "Failed to spawn replacement worker; will spawn on demand: {}", e
            ),
        }
    }

    fn take_idle(&self) -> Option<WorkerProcess> {
        self.idle.lock().pop_front()
    }

    async fn spawn_worker(&self) -> Result<WorkerProcess> {
        let worker = self.manager.spawn().await?;
        metrics::counter!(WORKER_SPAWNS_TOTAL).increment(1);
        Ok(worker)
    }
}

impl Drop for ExecutionPool {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Pool statistics
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub generation: u64,
    pub worker_count: usize,

    /// Pids of idle workers, in the order they will be handed out
    pub idle_pids: Vec<u32>,

    /// Tasks currently holding a worker slot
    pub busy_tasks: usize,

    pub open: bool,
}
