// src/runtime/resource_limiter.rs
//! Resource limiting for worker processes
//!
//! Applied once, inside a freshly started worker, before it accepts a task:
//! - CPU time (`RLIMIT_CPU`, whole seconds, cumulative for the process)
//! - Address space (`RLIMIT_AS`, bytes)
//!
//! Soft and hard limits are set to the same value, so the worker cannot raise
//! them again. Exceeding the CPU cap gets the process killed by the kernel;
//! exceeding the address-space cap makes allocation fail, which aborts it.

use crate::utils::errors::{Result, SandboxError};
use nix::sys::resource::{getrlimit, setrlimit, Resource};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Smallest address space we accept; below this the worker can't even start
pub const MIN_ADDRESS_SPACE_BYTES: u64 = 16 * 1024 * 1024;

/// Resource limits for a worker process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Cumulative CPU time cap in seconds
    pub cpu_seconds: u64,

    /// Virtual address-space cap in bytes
    pub address_space_bytes: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_seconds: 2,
            address_space_bytes: 400_000_000,
        }
    }
}

impl ResourceLimits {
    pub fn cpu_time(&self) -> Duration {
        Duration::from_secs(self.cpu_seconds)
    }

    /// Validate resource limits
    pub fn validate(&self) -> Result<()> {
        if self.cpu_seconds == 0 {
            return Err(SandboxError::Config(
                "limits.cpu_seconds must be at least 1".into(),
            ));
        }
        if self.address_space_bytes < MIN_ADDRESS_SPACE_BYTES {
            return Err(SandboxError::Config(format!(
                "limits.address_space_bytes must be at least {}",
                MIN_ADDRESS_SPACE_BYTES
            )));
        }
        Ok(())
    }

    /// Command-line flags understood by the worker program
    pub fn to_args(&self) -> Vec<String> {
        vec![
            format!("--cpu-seconds={}", self.cpu_seconds),
            format!("--address-space-bytes={}", self.address_space_bytes),
        ]
    }
}

/// Applies [`ResourceLimits`] to the calling process
pub struct ResourceLimiter;

impl ResourceLimiter {
    /// Install the limits on the current process.
    ///
    /// Must be called from inside the worker. There is no way back: once the
    /// hard limits are lowered, an unprivileged process cannot raise them.
    pub fn apply(limits: &ResourceLimits) -> Result<()> {
        limits.validate()?;

        Self::set("RLIMIT_AS", Resource::RLIMIT_AS, limits.address_space_bytes)?;
        Self::set("RLIMIT_CPU", Resource::RLIMIT_CPU, limits.cpu_seconds)?;

        debug!(
            cpu_seconds = limits.cpu_seconds,
            address_space_bytes = limits.address_space_bytes,
            "Resource limits applied"
        );
        Ok(())
    }

    /// Read back the limits currently in force (soft values)
    pub fn current() -> Result<ResourceLimits> {
        let (cpu, _) = getrlimit(Resource::RLIMIT_CPU)
            .map_err(|e| SandboxError::ResourceLimit(format!("getrlimit(RLIMIT_CPU): {}", e)))?;
        let (address_space, _) = getrlimit(Resource::RLIMIT_AS)
            .map_err(|e| SandboxError::ResourceLimit(format!("getrlimit(RLIMIT_AS): {}", e)))?;

        Ok(ResourceLimits {
            cpu_seconds: cpu as u64,
            address_space_bytes: address_space as u64,
        })
    }

    fn set(name: &str, resource: Resource, value: u64) -> Result<()> {
        let value = value as libc::rlim_t;
        setrlimit(resource, value, value)
            .map_err(|e| SandboxError::ResourceLimit(format!("{}={}: {}", name, value, e)))
    }
}
