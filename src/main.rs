// src/main.rs
//! Template worker
//!
//! The single-use process the execution pool launches for each task. It limits
//! itself, renders one template (or answers one liveness probe) and exits.
//! It registers no filters beyond the engine's built-ins; programs that need
//! more build their own worker around [`template_sandbox::runtime::worker::run`].

use anyhow::{Context, Result};
use template_sandbox::runtime::worker;
use template_sandbox::TemplateEngine;

fn main() -> Result<()> {
    let engine = TemplateEngine::new();
    worker::run(&engine).context("worker failed")?;
    Ok(())
}
