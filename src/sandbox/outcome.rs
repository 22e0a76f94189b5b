// src/sandbox/outcome.rs
//! Render outcomes and their diagnostic text

use crate::utils::errors::SandboxError;
use std::fmt;

/// First line of every resource-limit diagnostic
pub const LIMIT_EXCEEDED_SENTINEL: &str =
    "Rendering the template exceeded the CPU, memory, or time limit.";

/// Prefix of ordinary template-error diagnostics
pub const RENDER_FAILED_SENTINEL: &str = "Failed to render template due to the following error:";

/// Which budget ran out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutCause {
    /// The facade's overall request deadline
    Deadline,
    /// The task outlived its wait budget but the pool answered a probe
    SlowTask,
    /// The pool failed its probe and no restarts were left
    PoolUnresponsive,
}

/// Tagged result of one render request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered(String),
    CpuLimit,
    MemoryLimit,
    Timeout(TimeoutCause),
    /// The engine rejected the template; not a resource condition
    RenderError(String),
    PoolUnavailable,
    /// The sandbox itself failed (worker couldn't start, died oddly, spoke nonsense)
    WorkerFailure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Success,
    CpuLimit,
    MemoryLimit,
    Timeout,
    RenderError,
    PoolUnavailable,
    WorkerFailure,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::CpuLimit => "cpu_limit",
            OutcomeKind::MemoryLimit => "memory_limit",
            OutcomeKind::Timeout => "timeout",
            OutcomeKind::RenderError => "render_error",
            OutcomeKind::PoolUnavailable => "pool_unavailable",
            OutcomeKind::WorkerFailure => "worker_failure",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RenderOutcome {
    /// Normalize the cascade's result
    pub fn from_result(result: Result<String, SandboxError>) -> Self {
        match result {
            Ok(output) => RenderOutcome::Rendered(output),
            Err(SandboxError::CpuLimitExceeded) => RenderOutcome::CpuLimit,
            Err(SandboxError::MemoryLimitExceeded) => RenderOutcome::MemoryLimit,
            Err(SandboxError::TaskTimeout(_)) => RenderOutcome::Timeout(TimeoutCause::SlowTask),
            Err(SandboxError::PoolUnresponsive) => {
                RenderOutcome::Timeout(TimeoutCause::PoolUnresponsive)
            }
            Err(SandboxError::PoolUnavailable) => RenderOutcome::PoolUnavailable,
            Err(SandboxError::Render(message)) => RenderOutcome::RenderError(message),
            Err(other) => RenderOutcome::WorkerFailure(other.to_string()),
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            RenderOutcome::Rendered(_) => OutcomeKind::Success,
            RenderOutcome::CpuLimit => OutcomeKind::CpuLimit,
            RenderOutcome::MemoryLimit => OutcomeKind::MemoryLimit,
            RenderOutcome::Timeout(_) => OutcomeKind::Timeout,
            RenderOutcome::RenderError(_) => OutcomeKind::RenderError,
            RenderOutcome::PoolUnavailable => OutcomeKind::PoolUnavailable,
            RenderOutcome::WorkerFailure(_) => OutcomeKind::WorkerFailure,
        }
    }

    /// The text handed back to callers: rendered output, or a diagnostic
    /// that names the failure and quotes `template`
    pub fn into_text(self, template: &str) -> String {
        let label = match self {
            RenderOutcome::Rendered(output) => return output,
            RenderOutcome::RenderError(message) => {
                return format!(
                    "{} {}\nTemplate source:\n{}",
                    RENDER_FAILED_SENTINEL, message, template
                );
            }
            RenderOutcome::CpuLimit => "CpuLimitExceeded".to_string(),
            RenderOutcome::MemoryLimit => "MemoryLimitExceeded".to_string(),
            RenderOutcome::Timeout(TimeoutCause::Deadline) => "DeadlineExceeded".to_string(),
            RenderOutcome::Timeout(TimeoutCause::SlowTask) => "TaskTimeout".to_string(),
            RenderOutcome::Timeout(TimeoutCause::PoolUnresponsive) => {
                "PoolUnresponsive".to_string()
            }
            RenderOutcome::PoolUnavailable => "PoolUnavailable".to_string(),
            RenderOutcome::WorkerFailure(detail) => format!("WorkerFailure: {}", detail),
        };

        format!(
            "{}\n{}\nTemplate source:\n{}",
            LIMIT_EXCEEDED_SENTINEL, label, template
        )
    }
}
