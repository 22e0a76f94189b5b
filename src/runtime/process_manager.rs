// src/runtime/process_manager.rs
//! Process manager for spawning and driving worker processes
//!
//! A worker is a separate executable (by default `template-worker`) started
//! with fresh stdin/stdout pipes. It applies its resource limits, announces
//! `ready`, runs exactly one task and exits. [`WorkerProcess`] is consumed by
//! [`WorkerProcess::run`], so a worker can't be handed a second task.

use crate::runtime::protocol::{decode_line, encode_line, WorkerReply, WorkerRequest};
use crate::runtime::resource_limiter::ResourceLimits;
use crate::utils::errors::{Result, SandboxError};
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

/// Program and leading arguments used to launch a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }
}

/// Configuration for spawning workers
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    pub command: WorkerCommand,
    pub limits: ResourceLimits,

    /// How long a worker may take to report `ready`
    pub startup_timeout: Duration,
}

/// Spawns worker processes
#[derive(Debug, Clone)]
pub struct ProcessManager {
    config: SpawnConfig,
}

impl ProcessManager {
    pub fn new(config: SpawnConfig) -> Self {
        Self { config }
    }

    /// Spawn a worker and wait for it to confirm its limits are in force
    pub async fn spawn(&self) -> Result<WorkerProcess> {
        let command = &self.config.command;
        debug!(program = ?command.program, "Spawning worker process");

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .args(self.config.limits.to_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SandboxError::WorkerSpawnFailed(format!(
                    "failed to start {:?}: {}",
                    command.program, e
                ))
            })?;

        let pid = child
            .id()
            .ok_or_else(|| SandboxError::WorkerSpawnFailed("worker exited immediately".into()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::WorkerSpawnFailed("failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::WorkerSpawnFailed("failed to capture stdout".into()))?;

        let mut worker = WorkerProcess {
            pid,
            child,
            stdin,
            stdout: BufReader::new(stdout),
        };

        match tokio::time::timeout(self.config.startup_timeout, worker.read_reply()).await {
            Ok(Ok(WorkerReply::Ready { limits })) if limits == self.config.limits => {
                debug!(pid, "Worker ready");
                Ok(worker)
            }
            Ok(Ok(WorkerReply::Ready { limits })) => {
                worker.kill();
                Err(SandboxError::ResourceLimit(format!(
                    "worker {} reported {:?}, expected {:?}",
                    pid, limits, self.config.limits
                )))
            }
            Ok(Ok(other)) => {
                worker.kill();
                Err(SandboxError::Protocol(format!(
                    "expected ready from worker {}, got {:?}",
                    pid, other
                )))
            }
            Ok(Err(e)) => {
                worker.kill();
                Err(SandboxError::WorkerSpawnFailed(format!(
                    "worker {} failed during startup: {}",
                    pid, e
                )))
            }
            Err(_) => {
                worker.kill();
                Err(SandboxError::WorkerSpawnFailed(format!(
                    "worker {} not ready within {:?}",
                    pid, self.config.startup_timeout
                )))
            }
        }
    }
}

/// A live, limited worker waiting for its one task
pub struct WorkerProcess {
    pid: u32,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl WorkerProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Hand the worker its task and wait for the reply.
    ///
    /// The worker is used up either way. If it dies before replying, the exit
    /// status decides which error is reported.
    pub async fn run(mut self, request: &WorkerRequest) -> Result<WorkerReply> {
        let line = encode_line(request)?;
        if let Err(e) = self.send(&line).await {
            // A broken pipe usually means the worker is already dead
            debug!(pid = self.pid, "Write to worker failed: {}", e);
            return Err(self.reap().await);
        }

        let reply = self.read_reply().await;
        match reply {
            Ok(reply) => {
                self.retire();
                Ok(reply)
            }
            Err(SandboxError::WorkerLost(_)) => Err(self.reap().await),
            Err(e) => {
                self.kill();
                Err(e)
            }
        }
    }

    /// Kill the worker without waiting for it
    pub fn kill(mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!(pid = self.pid, "Failed to kill worker: {}", e);
        }
        // Dropping the child leaves the zombie to tokio's orphan reaper
    }

    async fn send(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.stdin.write_all(line).await?;
        self.stdin.flush().await
    }

    async fn read_reply(&mut self) -> Result<WorkerReply> {
        let mut line = String::new();
        let read = self.stdout.read_line(&mut line).await?;
        if read == 0 {
            return Err(SandboxError::WorkerLost("stdout closed".into()));
        }
        decode_line(&line)
    }

    /// The worker exits on its own after replying; collect it in the background
    fn retire(self) {
        let WorkerProcess { pid, mut child, .. } = self;
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!(pid, %status, "Worker retired"),
                Err(e) => warn!(pid, "Failed to reap worker: {}", e),
            }
        });
    }

    /// Wait for a worker that stopped talking and classify how it ended
    async fn reap(mut self) -> SandboxError {
        drop(self.stdin);
        match self.child.wait().await {
            Ok(status) => classify_exit(status),
            Err(e) => SandboxError::WorkerLost(format!("failed to reap worker {}: {}", self.pid, e)),
        }
    }
}

/// Map the exit status of a worker that died without replying
pub fn classify_exit(status: ExitStatus) -> SandboxError {
    match status.signal() {
        // RLIMIT_CPU: SIGXCPU at the soft limit, SIGKILL at the hard limit.
        // A SIGKILL from the OOM killer or an operator looks the same and is
        // reported as a CPU limit too.
        Some(libc::SIGXCPU) | Some(libc::SIGKILL) => SandboxError::CpuLimitExceeded,
        // Allocation failure aborts; a refused stack extension faults
        Some(libc::SIGABRT) | Some(libc::SIGSEGV) => SandboxError::MemoryLimitExceeded,
        Some(signal) => SandboxError::WorkerLost(format!("killed by signal {}", signal)),
        None => SandboxError::WorkerLost(status.to_string()),
    }
}
