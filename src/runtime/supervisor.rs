// src/runtime/supervisor.rs
//! Pool supervisor
//!
//! Owns the one shared [`ExecutionPool`] handle. Readers take a cheap clone of
//! the current `Arc`; only the supervisor installs a new one. Opening and
//! replacing are serialized by an async mutex, so concurrent callers that see
//! the same dead pool trigger a single replacement and the rest wait for it.

use crate::observability::POOL_RESTARTS_TOTAL;
use crate::runtime::execution_pool::{ExecutionPool, PoolConfig, PoolStats};
use crate::utils::errors::Result;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Holds and replaces the shared execution pool
pub struct PoolSupervisor {
    config: PoolConfig,
    current: RwLock<Option<Arc<ExecutionPool>>>,
    lifecycle: Mutex<()>,
    generations: AtomicU64,
}

impl PoolSupervisor {
    /// Create a supervisor; no pool is opened until first use
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            current: RwLock::new(None),
            lifecycle: Mutex::new(()),
            generations: AtomicU64::new(0),
        }
    }

    /// The installed pool, opening one if there is none yet
    pub async fn current(&self) -> Result<Arc<ExecutionPool>> {
        if let Some(pool) = self.installed() {
            return Ok(pool);
        }

        let _guard = self.lifecycle.lock().await;
        if let Some(pool) = self.installed() {
            return Ok(pool);
        }

        let pool = self.open_pool().await?;
        *self.current.write() = Some(Arc::clone(&pool));
        Ok(pool)
    }

    /// Open the pool now rather than on first use
    pub async fn open(&self) -> Result<()> {
        self.current().await.map(|_| ())
    }

    /// Replace `suspect` with a fresh pool.
    ///
    /// If another caller already replaced it, the pool they installed is
    /// returned instead of starting a second replacement.
    pub async fn replace(&self, suspect: &Arc<ExecutionPool>) -> Result<Arc<ExecutionPool>> {
        let _guard = self.lifecycle.lock().await;

        if let Some(pool) = self.installed() {
            if !Arc::ptr_eq(&pool, suspect) {
                info!(
                    stale = suspect.generation(),
                    current = pool.generation(),
                    "Pool already replaced by another request"
                );
                return Ok(pool);
            }
        }

        warn!(generation = suspect.generation(), "Replacing unresponsive execution pool");
        suspect.teardown();

        let pool = match self.open_pool().await {
            Ok(pool) => pool,
            Err(e) => {
                // Nothing can render without a pool; clear the handle so the
                // next caller tries again from scratch
                error!(generation = suspect.generation(), "Failed to open replacement pool: {}", e);
                self.current.write().take();
                return Err(e);
            }
        };

        *self.current.write() = Some(Arc::clone(&pool));
        metrics::counter!(POOL_RESTARTS_TOTAL).increment(1);
        info!(generation = pool.generation(), "Replacement pool installed");
        Ok(pool)
    }

    /// Tear down the installed pool, if any
    pub async fn close(&self) {
        let _guard = self.lifecycle.lock().await;
        if let Some(pool) = self.current.write().take() {
            pool.teardown();
        }
    }

    /// Tear down the installed pool without waiting for the lifecycle lock.
    /// A replacement already in progress may still install its pool afterwards.
    pub fn shutdown(&self) {
        if let Some(pool) = self.current.write().take() {
            pool.teardown();
        }
    }

    /// Generation of the installed pool (0 before the first open)
    pub fn generation(&self) -> u64 {
        self.installed().map(|pool| pool.generation()).unwrap_or(0)
    }

    pub fn stats(&self) -> Option<PoolStats> {
        self.installed().map(|pool| pool.stats())
    }

    fn installed(&self) -> Option<Arc<ExecutionPool>> {
        self.current.read().clone()
    }

    async fn open_pool(&self) -> Result<Arc<ExecutionPool>> {
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        ExecutionPool::open(self.config.clone(), generation).await
    }
}

impl Drop for PoolSupervisor {
    fn drop(&mut self) {
        if let Some(pool) = self.current.get_mut().take() {
            pool.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::testing::pong_after;

    fn fake_worker_config() -> PoolConfig {
        pong_after(1, "0")
    }

    #[tokio::test]
    async fn test_pool_opened_lazily() {
        let supervisor = PoolSupervisor::new(fake_worker_config());
        assert_eq!(supervisor.generation(), 0);
        assert!(supervisor.stats().is_none());

        let pool = supervisor.current().await.unwrap();
        assert_eq!(pool.generation(), 1);

        let again = supervisor.current().await.unwrap();
        assert!(Arc::ptr_eq(&pool, &again));
    }

    #[tokio::test]
    async fn test_replace_installs_new_generation() {
        let supervisor = PoolSupervisor::new(fake_worker_config());
        let old = supervisor.current().await.unwrap();

        let new = supervisor.replace(&old).await.unwrap();
        assert_eq!(new.generation(), 2);
        assert!(!old.is_open());
        assert!(new.is_open());
        assert_eq!(supervisor.generation(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_replacements_collapse_into_one() {
        let supervisor = Arc::new(PoolSupervisor::new(fake_worker_config()));
        let old = supervisor.current().await.unwrap();

        let replacements = (0..4).map(|_| {
            let supervisor = Arc::clone(&supervisor);
            let old = Arc::clone(&old);
            tokio::spawn(async move { supervisor.replace(&old).await.unwrap().generation() })
        });

        for generation in futures::future::join_all(replacements).await {
            assert_eq!(generation.unwrap(), 2);
        }
        assert_eq!(supervisor.generation(), 2);
    }

    #[tokio::test]
    async fn test_close_then_reopen() {
        let supervisor = PoolSupervisor::new(fake_worker_config());
        let first = supervisor.current().await.unwrap();

        supervisor.close().await;
        assert!(!first.is_open());
        assert!(supervisor.stats().is_none());

        let second = supervisor.current().await.unwrap();
        assert_eq!(second.generation(), 2);
    }
}
