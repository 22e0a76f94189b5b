// src/sandbox/mod.rs
//! Render facade
//!
//! [`TemplateSandbox::render`] is what callers use. It never fails: every
//! problem comes back as diagnostic text (see [`outcome`]). Templates without
//! a single `{` are returned as-is without touching the pool; everything else
//! goes through the dispatch cascade on a separate tokio task, under an
//! overall deadline that is independent of the cascade's own budgets.

pub mod global;
pub mod outcome;

use crate::engine::TemplateEngine;
use crate::observability::{RENDERS_TOTAL, RENDER_SECONDS};
use crate::runtime::dispatch::{dispatch, DispatchPolicy};
use crate::runtime::execution_pool::{PoolConfig, PoolStats};
use crate::runtime::process_manager::SpawnConfig;
use crate::runtime::protocol::{Context, RenderRequest};
use crate::runtime::supervisor::PoolSupervisor;
use crate::utils::config::SandboxConfig;
use crate::utils::errors::{Result, SandboxError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

pub use outcome::{
    OutcomeKind, RenderOutcome, TimeoutCause, LIMIT_EXCEEDED_SENTINEL, RENDER_FAILED_SENTINEL,
};

/// Safe renderer for untrusted templates
pub struct TemplateSandbox {
    config: SandboxConfig,
    policy: DispatchPolicy,
    supervisor: Arc<PoolSupervisor>,
    engine: TemplateEngine,
}

impl TemplateSandbox {
    /// Build a sandbox; the pool opens on first use or on [`TemplateSandbox::open`]
    pub fn new(config: SandboxConfig) -> Result<Self> {
        config.validate()?;

        let pool_config = PoolConfig {
            worker_count: config.pool.workers,
            spawn: SpawnConfig {
                command: config.worker_command()?,
                limits: config.limits,
                startup_timeout: config.worker_startup(),
            },
        };

        Ok(Self {
            policy: DispatchPolicy::from_config(&config),
            supervisor: Arc::new(PoolSupervisor::new(pool_config)),
            engine: TemplateEngine::new(),
            config,
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Start the worker pool now
    pub async fn open(&self) -> Result<()> {
        self.supervisor.open().await
    }

    /// Tear down the worker pool; a later render opens a new one
    pub async fn close(&self) {
        self.supervisor.close().await
    }

    /// Tear down the worker pool without waiting for an in-progress replacement
    pub fn shutdown(&self) {
        self.supervisor.shutdown();
    }

    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.supervisor.stats()
    }

    /// Generation of the installed pool; bumps every time a pool is opened
    pub fn pool_generation(&self) -> u64 {
        self.supervisor.generation()
    }

    /// Compile `template` in-process without rendering it. Syntax only: which
    /// filters exist is up to the worker program and is checked at render time.
    pub fn validate(&self, template: &str) -> Result<()> {
        self.engine.validate(template)
    }

    /// Render `template` with `context` in a limited worker process
    pub async fn render<C: Serialize>(&self, template: &str, context: C) -> String {
        self.render_outcome(template, context)
            .await
            .into_text(template)
    }

    /// Like [`TemplateSandbox::render`], but returns the tagged outcome
    pub async fn render_outcome<C: Serialize>(&self, template: &str, context: C) -> RenderOutcome {
        if is_plain_text(template) {
            return RenderOutcome::Rendered(template.to_owned());
        }

        let context = match to_context(context) {
            Ok(context) => context,
            Err(e) => return RenderOutcome::RenderError(e.to_string()),
        };

        let started = Instant::now();
        let request = RenderRequest::new(template, context);
        let supervisor = Arc::clone(&self.supervisor);
        let policy = self.policy.clone();
        let task = tokio::spawn(async move { dispatch(&supervisor, &request, &policy).await });

        let deadline = self.config.request_deadline();
        let outcome = match tokio::time::timeout(deadline, task).await {
            Ok(Ok(result)) => RenderOutcome::from_result(result),
            Ok(Err(e)) => {
                warn!("Dispatch task failed: {}", e);
                RenderOutcome::WorkerFailure(format!("dispatch task failed: {}", e))
            }
            Err(_) => {
                // The dispatch task is left to finish on its own
                warn!(?deadline, "Render exceeded the overall request deadline");
                RenderOutcome::Timeout(TimeoutCause::Deadline)
            }
        };

        let kind = outcome.kind();
        debug!(%kind, elapsed = ?started.elapsed(), "Render finished");
        metrics::counter!(RENDERS_TOTAL, "outcome" => kind.as_str()).increment(1);
        metrics::histogram!(RENDER_SECONDS).record(started.elapsed().as_secs_f64());

        outcome
    }
}

/// Text with no `{` can't contain substitutions, blocks or comments
pub fn is_plain_text(template: &str) -> bool {
    !template.contains('{')
}

fn to_context<C: Serialize>(context: C) -> Result<Context> {
    let value = serde_json::to_value(context)
        .map_err(|e| SandboxError::Render(format!("template context is not serializable: {}", e)))?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        serde_json::Value::Null => Ok(Context::new()),
        other => Err(SandboxError::Render(format!(
            "template context must be a mapping, got {}",
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "a mapping",
    }
}
