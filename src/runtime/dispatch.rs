// src/runtime/dispatch.rs
//! Dispatch and timeout cascade
//!
//! Three nested budgets govern one request:
//!
//! ```text
//! worker CPU cap  <  task wait budget  <  overall request deadline
//!  (kernel kills)     (this module)        (render facade)
//! ```
//!
//! A task that outlives the wait budget is not necessarily the pool's fault,
//! so before blaming the pool we send it a liveness probe:
//!
//! ```text
//! submit ──► wait ──► result ─────────────────────────────► done
//!              │
//!              └─ budget elapsed ─► probe ─► pong ─────────► TaskTimeout
//!                                     │
//!                                     └─ no pong ─► replace pool ─► resubmit
//! ```
//!
//! Submissions refused because a pool is mid-teardown are retried after a
//! short backoff; both that retry and the pool restart are bounded.

use crate::observability::TASK_TIMEOUTS_TOTAL;
use crate::runtime::execution_pool::{ExecutionPool, PendingResult};
use crate::runtime::protocol::{RenderRequest, WorkerReply};
use crate::runtime::supervisor::PoolSupervisor;
use crate::utils::config::SandboxConfig;
use crate::utils::errors::{Result, SandboxError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Budgets and retry bounds for the cascade
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    /// How long to wait for a task, and separately for a probe
    pub task_wait: Duration,

    /// Pool replacements a single request may trigger
    pub max_pool_restarts: u32,

    /// Submissions attempted while the pool reports itself unavailable
    pub max_submit_attempts: u32,

    /// Sleep between those attempts
    pub unavailable_backoff: Duration,

    /// Abort the process when a replacement pool cannot be started
    pub abort_on_restart_failure: bool,
}

impl DispatchPolicy {
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            task_wait: config.task_wait(),
            max_pool_restarts: config.pool.max_pool_restarts,
            max_submit_attempts: config.pool.max_submit_attempts,
            unavailable_backoff: config.unavailable_backoff(),
            abort_on_restart_failure: config.pool.abort_on_restart_failure,
        }
    }
}

/// Result of waiting on the pool for one request
enum Attempt {
    Resolved(Result<String>),
    /// The pool was mid-teardown; try again on whatever pool is installed next
    Unavailable,
    /// The wait budget elapsed and the pool failed its liveness probe
    PoolUnhealthy(Arc<ExecutionPool>),
}

/// Run `request` through the pool, following the timeout cascade
pub async fn dispatch(
    supervisor: &PoolSupervisor,
    request: &RenderRequest,
    policy: &DispatchPolicy,
) -> Result<String> {
    let mut restarts = 0;
    let mut unavailable = 0;

    loop {
        match attempt(supervisor, request, policy).await? {
            Attempt::Resolved(result) => return result,
            Attempt::Unavailable => {
                unavailable += 1;
                if unavailable >= policy.max_submit_attempts {
                    warn!(attempts = unavailable, "Pool stayed unavailable; giving up");
                    return Err(SandboxError::PoolUnavailable);
                }
                debug!(attempt = unavailable, "Pool unavailable; backing off");
                tokio::time::sleep(policy.unavailable_backoff).await;
            }
            Attempt::PoolUnhealthy(pool) => {
                if restarts >= policy.max_pool_restarts {
                    warn!(
                        generation = pool.generation(),
                        restarts, "Pool unresponsive and no restarts left"
                    );
                    return Err(SandboxError::PoolUnresponsive);
                }
                restarts += 1;
                replace_pool(supervisor, &pool, policy).await?;
            }
        }
    }
}

async fn attempt(
    supervisor: &PoolSupervisor,
    request: &RenderRequest,
    policy: &DispatchPolicy,
) -> Result<Attempt> {
    let pool = supervisor.current().await?;

    let pending = match pool.submit(request.clone()) {
        Ok(pending) => pending,
        Err(SandboxError::PoolUnavailable) => return Ok(Attempt::Unavailable),
        Err(e) => return Err(e),
    };

    match pending.wait(policy.task_wait).await {
        Some(Err(SandboxError::PoolUnavailable)) => Ok(Attempt::Unavailable),
        Some(result) => Ok(Attempt::Resolved(into_rendered(result))),
        None => {
            metrics::counter!(TASK_TIMEOUTS_TOTAL).increment(1);
            debug!(generation = pool.generation(), "Task exceeded wait budget; probing pool");
            probe_after_timeout(pool, policy).await
        }
    }
}

/// Decide between "this task is slow" and "the pool is dead"
async fn probe_after_timeout(pool: Arc<ExecutionPool>, policy: &DispatchPolicy) -> Result<Attempt> {
    let probe: PendingResult = match pool.probe() {
        Ok(probe) => probe,
        Err(SandboxError::PoolUnavailable) => return Ok(Attempt::Unavailable),
        Err(e) => return Err(e),
    };

    match probe.wait(policy.task_wait).await {
        Some(Ok(WorkerReply::Pong)) => {
            debug!(generation = pool.generation(), "Pool answered probe; task is just slow");
            Ok(Attempt::Resolved(Err(SandboxError::TaskTimeout(policy.task_wait))))
        }
        Some(Err(SandboxError::PoolUnavailable)) => Ok(Attempt::Unavailable),
        Some(other) => {
            warn!(generation = pool.generation(), ?other, "Liveness probe failed");
            Ok(Attempt::PoolUnhealthy(pool))
        }
        None => {
            warn!(generation = pool.generation(), "Liveness probe timed out");
            Ok(Attempt::PoolUnhealthy(pool))
        }
    }
}

async fn replace_pool(
    supervisor: &PoolSupervisor,
    pool: &Arc<ExecutionPool>,
    policy: &DispatchPolicy,
) -> Result<()> {
    match supervisor.replace(pool).await {
        Ok(_) => Ok(()),
        Err(e) if policy.abort_on_restart_failure => {
            error!("Cannot start a replacement execution pool, aborting: {}", e);
            std::process::abort();
        }
        Err(e) => Err(e),
    }
}

fn into_rendered(result: Result<WorkerReply>) -> Result<String> {
    match result? {
        WorkerReply::Rendered { output } => Ok(output),
        WorkerReply::RenderFailed { message } => Err(SandboxError::Render(message)),
        other => Err(SandboxError::Protocol(format!(
            "unexpected reply to a render task: {:?}",
            other
        ))),
    }
}
