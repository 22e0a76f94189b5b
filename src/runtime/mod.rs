// src/runtime/mod.rs
//! Isolated execution runtime
//!
//! - **Resource Limiter**: CPU-time and address-space caps, applied inside each worker
//! - **Process Manager**: Spawning workers and driving their single task
//! - **Protocol**: Line-delimited JSON between host and worker
//! - **Worker**: The worker program's side of the protocol
//! - **Execution Pool**: Fixed-size pool of single-use workers
//! - **Supervisor**: Owns the shared pool and replaces it when it stops responding
//! - **Dispatch**: The per-request timeout cascade
//!
//! # Architecture
//!
//! ```text
//!   render() ─► dispatch ─► PoolSupervisor ─► ExecutionPool (generation N)
//!                  │                             ├─ worker (limited, 1 task)
//!                  │ probe on timeout            ├─ worker (limited, 1 task)
//!                  └─ replace on failed probe ─► └─ ...
//! ```

pub mod dispatch;
pub mod execution_pool;
pub mod process_manager;
pub mod protocol;
pub mod resource_limiter;
pub mod supervisor;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use dispatch::{dispatch, DispatchPolicy};
pub use execution_pool::{ExecutionPool, PendingResult, PoolConfig, PoolStats};
pub use process_manager::{ProcessManager, SpawnConfig, WorkerCommand, WorkerProcess};
pub use protocol::{Context, RenderRequest, WorkerReply, WorkerRequest};
pub use resource_limiter::{ResourceLimiter, ResourceLimits};
pub use supervisor::PoolSupervisor;
