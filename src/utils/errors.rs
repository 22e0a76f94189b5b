// src/utils/errors.rs
//! Error type for the template sandbox
//!
//! Every failure the pool or a worker can produce is a variant here. The
//! render facade turns these into diagnostic text, so nothing above it ever
//! sees a `SandboxError`.

use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, SandboxError>;

#[derive(Debug, Error)]
pub enum SandboxError {
    /// The worker was killed for exceeding its CPU-time cap
    #[error("worker exceeded its CPU time limit")]
    CpuLimitExceeded,

    /// The worker ran out of address space
    #[error("worker exceeded its address-space limit")]
    MemoryLimitExceeded,

    /// The worker went away without replying, for a reason we can't attribute
    #[error("worker exited without a reply: {0}")]
    WorkerLost(String),

    /// The task did not resolve within the wait budget, but the pool answered a probe
    #[error("task did not complete within {0:?}")]
    TaskTimeout(Duration),

    /// Neither the task nor the liveness probe resolved, and no restarts remain
    #[error("execution pool is unresponsive")]
    PoolUnresponsive,

    /// The pool is shutting down (or was torn down under an in-flight task)
    #[error("execution pool is not accepting tasks")]
    PoolUnavailable,

    #[error("failed to start worker process: {0}")]
    WorkerSpawnFailed(String),

    /// An ordinary template evaluation error raised by the engine
    #[error("{0}")]
    Render(String),

    #[error("worker protocol error: {0}")]
    Protocol(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to apply resource limit: {0}")]
    ResourceLimit(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for SandboxError {
    fn from(err: config::ConfigError) -> Self {
        SandboxError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for SandboxError {
    fn from(err: serde_json::Error) -> Self {
        SandboxError::Protocol(err.to_string())
    }
}

impl From<minijinja::Error> for SandboxError {
    fn from(err: minijinja::Error) -> Self {
        SandboxError::Render(err.to_string())
    }
}
