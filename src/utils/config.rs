// src/utils/config.rs
//! Sandbox configuration
//!
//! Settings are layered: built-in defaults, then an optional config file, then
//! `TEMPLATE_SANDBOX__*` environment variables (e.g.
//! `TEMPLATE_SANDBOX__POOL__WORKERS=8`).
//!
//! The three time budgets must nest: the worker CPU cap is below the task wait
//! budget, and the overall request deadline is the task wait budget plus a pool
//! restart allowance. The allowance must exceed the task wait budget, since a
//! restart costs a probe wait before the retried task even starts.

use crate::runtime::process_manager::WorkerCommand;
use crate::runtime::resource_limiter::ResourceLimits;
use crate::utils::errors::{Result, SandboxError};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "TEMPLATE_SANDBOX_CONFIG";

/// Prefix for per-field environment overrides
pub const ENV_PREFIX: &str = "TEMPLATE_SANDBOX";

/// Default worker executable, looked up next to the current executable
pub const DEFAULT_WORKER_PROGRAM: &str = "template-worker";

const DEFAULT_CONFIG_BASENAME: &str = "template-sandbox";

/// Top-level sandbox configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub pool: PoolSettings,
    pub limits: ResourceLimits,
    pub timeouts: TimeoutSettings,
    pub worker: WorkerSettings,
}

/// Execution pool sizing and retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Number of worker processes (default: 4)
    pub workers: usize,

    /// Pool replacements a single request may trigger (default: 1)
    pub max_pool_restarts: u32,

    /// Submission attempts while the pool is unavailable (default: 5)
    pub max_submit_attempts: u32,

    /// Sleep between submission attempts in milliseconds (default: 1000)
    pub unavailable_backoff_ms: u64,

    /// Abort the process if a replacement pool can't be started (default: true)
    pub abort_on_restart_failure: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            max_pool_restarts: 1,
            max_submit_attempts: 5,
            unavailable_backoff_ms: 1_000,
            abort_on_restart_failure: true,
        }
    }
}

/// Wall-clock budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// How long dispatch waits for a task (and for a probe) in milliseconds
    pub task_wait_ms: u64,

    /// Extra time the overall deadline allows for one pool restart
    pub pool_restart_allowance_ms: u64,

    /// How long a new worker may take to apply its limits and report ready
    pub worker_startup_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            task_wait_ms: 2_500,
            pool_restart_allowance_ms: 5_000,
            worker_startup_ms: 5_000,
        }
    }
}

/// How to launch a worker process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Worker executable; defaults to `template-worker` beside the current executable
    pub program: Option<PathBuf>,

    /// Extra arguments passed before the limit flags
    pub args: Vec<String>,
}

impl SandboxConfig {
    /// Load configuration from the default file locations and the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// Load configuration, reading `path` (required) if given, or the optional
    /// `template-sandbox.{toml,yaml,json}` in the working directory otherwise
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_BASENAME).required(false),
        };

        let config: SandboxConfig = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        debug!(?config, "Sandbox configuration loaded");
        Ok(config)
    }

    /// Check the pool sizing and that the time budgets nest correctly
    pub fn validate(&self) -> Result<()> {
        if self.pool.workers == 0 {
            return Err(SandboxError::Config("pool.workers must be at least 1".into()));
        }
        if self.pool.max_submit_attempts == 0 {
            return Err(SandboxError::Config(
                "pool.max_submit_attempts must be at least 1".into(),
            ));
        }

        self.limits.validate()?;

        if self.task_wait() <= self.limits.cpu_time() {
            return Err(SandboxError::Config(format!(
                "timeouts.task_wait_ms ({}) must exceed the CPU limit ({}s)",
                self.timeouts.task_wait_ms, self.limits.cpu_seconds
            )));
        }
        // One restart cycle is a probe wait plus a retried task wait
        if self.timeouts.pool_restart_allowance_ms <= self.timeouts.task_wait_ms {
            return Err(SandboxError::Config(format!(
                "timeouts.pool_restart_allowance_ms ({}) must exceed timeouts.task_wait_ms ({})",
                self.timeouts.pool_restart_allowance_ms, self.timeouts.task_wait_ms
            )));
        }
        if self.timeouts.worker_startup_ms == 0 {
            return Err(SandboxError::Config(
                "timeouts.worker_startup_ms must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Budget for a single task (and for the liveness probe)
    pub fn task_wait(&self) -> Duration {
        Duration::from_millis(self.timeouts.task_wait_ms)
    }

    /// Absolute ceiling for one `render` call
    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.timeouts.task_wait_ms + self.timeouts.pool_restart_allowance_ms)
    }

    pub fn worker_startup(&self) -> Duration {
        Duration::from_millis(self.timeouts.worker_startup_ms)
    }

    pub fn unavailable_backoff(&self) -> Duration {
        Duration::from_millis(self.pool.unavailable_backoff_ms)
    }

    /// Resolve the command used to launch workers
    pub fn worker_command(&self) -> Result<WorkerCommand> {
        let program = match &self.worker.program {
            Some(program) => program.clone(),
            None => std::env::current_exe()?.with_file_name(DEFAULT_WORKER_PROGRAM),
        };

        Ok(WorkerCommand {
            program,
            args: self.worker.args.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_follow_budget_ordering() {
        let config = SandboxConfig::default();
        assert!(config.validate().is_ok());

        assert_eq!(config.pool.workers, 4);
        assert_eq!(config.limits.cpu_seconds, 2);
        assert_eq!(config.limits.address_space_bytes, 400_000_000);
        assert_eq!(config.task_wait(), Duration::from_millis(2_500));
        assert_eq!(config.request_deadline(), Duration::from_millis(7_500));
        assert!(config.limits.cpu_time() < config.task_wait());
        assert!(config.task_wait() < config.request_deadline());
    }

    #[test]
    fn test_task_wait_must_exceed_cpu_cap() {
        let mut config = SandboxConfig::default();
        config.timeouts.task_wait_ms = 2_000;
        assert!(matches!(config.validate(), Err(SandboxError::Config(_))));
    }

    #[test]
    fn test_restart_allowance_must_exceed_task_wait() {
        let mut config = SandboxConfig::default();
        config.timeouts.pool_restart_allowance_ms = config.timeouts.task_wait_ms;
        assert!(matches!(config.validate(), Err(SandboxError::Config(_))));

        config.timeouts.pool_restart_allowance_ms = 0;
        assert!(config.validate().is_err());

        config.timeouts.pool_restart_allowance_ms = config.timeouts.task_wait_ms + 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = SandboxConfig::default();
        config.pool.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "[pool]\nworkers = 2\n\n[limits]\ncpu_seconds = 1\n\n[timeouts]\ntask_wait_ms = 1500\n\n[worker]\nprogram = \"/opt/bin/template-worker\""
        )
        .unwrap();

        let config = SandboxConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.pool.workers, 2);
        assert_eq!(config.limits.cpu_seconds, 1);
        // Unset fields keep their defaults
        assert_eq!(config.limits.address_space_bytes, 400_000_000);
        assert_eq!(config.pool.max_pool_restarts, 1);
        assert_eq!(config.request_deadline(), Duration::from_millis(6_500));

        let command = config.worker_command().unwrap();
        assert_eq!(command.program, PathBuf::from("/opt/bin/template-worker"));
    }

    #[test]
    fn test_load_rejects_inverted_budgets() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "[timeouts]\ntask_wait_ms = 500").unwrap();

        assert!(SandboxConfig::load_from(Some(file.path())).is_err());
    }

    #[test]
    fn test_default_worker_program_is_sibling_of_current_exe() {
        let command = SandboxConfig::default().worker_command().unwrap();
        assert_eq!(
            command.program.file_name().unwrap(),
            DEFAULT_WORKER_PROGRAM
        );
    }
}
