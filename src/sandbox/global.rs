// src/sandbox/global.rs
//! Process-wide sandbox
//!
//! Most callers just want `render_user_template` without threading a
//! [`TemplateSandbox`] through their code. The first call installs a sandbox
//! built from [`SandboxConfig::load`]; [`open`] installs one explicitly and
//! hands back a guard that tears it down again.

use super::{is_plain_text, RenderOutcome, TemplateSandbox};
use crate::engine::TemplateEngine;
use crate::utils::config::SandboxConfig;
use crate::utils::errors::Result;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

static GLOBAL: Lazy<RwLock<Option<Arc<TemplateSandbox>>>> = Lazy::new(|| RwLock::new(None));

/// Keeps the global sandbox installed while alive.
///
/// A guard obtained while another sandbox was already installed does not own
/// it and leaves it running on drop.
pub struct GlobalSandboxGuard {
    sandbox: Arc<TemplateSandbox>,
    owns: bool,
}

impl GlobalSandboxGuard {
    pub fn sandbox(&self) -> &Arc<TemplateSandbox> {
        &self.sandbox
    }

    /// Whether dropping this guard tears the sandbox down
    pub fn owns(&self) -> bool {
        self.owns
    }
}

impl Drop for GlobalSandboxGuard {
    fn drop(&mut self) {
        if !self.owns {
            return;
        }

        let mut global = GLOBAL.write();
        let installed = global
            .as_ref()
            .map(|current| Arc::ptr_eq(current, &self.sandbox))
            .unwrap_or(false);
        if installed {
            global.take();
        }
        drop(global);

        debug!("Global sandbox guard released");
        self.sandbox.shutdown();
    }
}

/// Install a global sandbox and start its pool.
///
/// If one is already installed it is reused as-is, and `config` is ignored.
pub async fn open(config: SandboxConfig) -> Result<GlobalSandboxGuard> {
    if let Some(sandbox) = installed() {
        debug!("Reusing installed global sandbox");
        return Ok(GlobalSandboxGuard {
            sandbox,
            owns: false,
        });
    }

    let sandbox = Arc::new(TemplateSandbox::new(config)?);
    sandbox.open().await?;

    let winner = {
        let mut global = GLOBAL.write();
        match global.as_ref() {
            Some(existing) => Some(Arc::clone(existing)),
            None => {
                *global = Some(Arc::clone(&sandbox));
                None
            }
        }
    };

    match winner {
        Some(existing) => {
            // Someone else installed theirs while our pool was starting
            sandbox.shutdown();
            Ok(GlobalSandboxGuard {
                sandbox: existing,
                owns: false,
            })
        }
        None => {
            info!(
                workers = sandbox.config().pool.workers,
                "Global template sandbox opened"
            );
            Ok(GlobalSandboxGuard {
                sandbox,
                owns: true,
            })
        }
    }
}

/// Uninstall the global sandbox and tear down its pool
pub async fn close() {
    let sandbox = GLOBAL.write().take();
    if let Some(sandbox) = sandbox {
        sandbox.close().await;
        info!("Global template sandbox closed");
    }
}

/// Render `template` with the global sandbox, installing one on first use.
///
/// Like [`TemplateSandbox::render`], this never fails; a sandbox that can't
/// be built is reported as diagnostic text.
pub async fn render_user_template<C: Serialize>(template: &str, context: C) -> String {
    if is_plain_text(template) {
        return template.to_owned();
    }

    match get_or_init() {
        Ok(sandbox) => sandbox.render(template, context).await,
        Err(e) => {
            warn!("Cannot build the global template sandbox: {}", e);
            RenderOutcome::WorkerFailure(e.to_string()).into_text(template)
        }
    }
}

/// Compile `template` without rendering it
pub fn validate_user_template(template: &str) -> Result<()> {
    match installed() {
        Some(sandbox) => sandbox.validate(template),
        None => TemplateEngine::new().validate(template),
    }
}

/// The installed global sandbox, if any
pub fn installed() -> Option<Arc<TemplateSandbox>> {
    GLOBAL.read().clone()
}

fn get_or_init() -> Result<Arc<TemplateSandbox>> {
    if let Some(sandbox) = installed() {
        return Ok(sandbox);
    }

    let mut global = GLOBAL.write();
    if let Some(sandbox) = global.as_ref() {
        return Ok(Arc::clone(sandbox));
    }

    // The pool itself opens lazily on the first render
    let sandbox = Arc::new(TemplateSandbox::new(SandboxConfig::load()?)?);
    *global = Some(Arc::clone(&sandbox));
    Ok(sandbox)
}
