// src/observability.rs
//! Logging and metrics
//!
//! Logs always go to stderr: a worker's stdout carries the wire protocol.
//! Metrics are emitted through the `metrics` facade and are no-ops until the
//! embedding application installs a recorder.

use crate::utils::errors::{Result, SandboxError};
use metrics::{describe_counter, describe_histogram, Unit};
use std::sync::Once;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const RENDERS_TOTAL: &str = "template_sandbox_renders_total";
pub const RENDER_SECONDS: &str = "template_sandbox_render_seconds";
pub const POOL_RESTARTS_TOTAL: &str = "template_sandbox_pool_restarts_total";
pub const WORKER_SPAWNS_TOTAL: &str = "template_sandbox_worker_spawns_total";
pub const TASK_TIMEOUTS_TOTAL: &str = "template_sandbox_task_timeouts_total";

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Compact,
    Json,
}

/// Install a global, env-filtered tracing subscriber writing to stderr
pub fn init_tracing(format: LogFormat) -> Result<()> {
    describe_metrics();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let fmt_layer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| SandboxError::Config(format!("failed to install tracing subscriber: {}", e)))
}

/// Register metric descriptions with the installed recorder (once)
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            RENDERS_TOTAL,
            Unit::Count,
            "Render requests completed, labelled by outcome."
        );
        describe_histogram!(
            RENDER_SECONDS,
            Unit::Seconds,
            "Wall-clock time of sandboxed renders."
        );
        describe_counter!(
            POOL_RESTARTS_TOTAL,
            Unit::Count,
            "Execution pools replaced after failing a liveness probe."
        );
        describe_counter!(
            WORKER_SPAWNS_TOTAL,
            Unit::Count,
            "Worker processes started."
        );
        describe_counter!(
            TASK_TIMEOUTS_TOTAL,
            Unit::Count,
            "Tasks that exceeded the wait budget."
        );
    });
}
