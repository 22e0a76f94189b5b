// tests/workers/excitable_worker.rs
//! Worker program used by the integration tests: the stock worker plus an
//! `excitable` filter, started through `worker.program`.

use anyhow::{Context, Result};
use template_sandbox::runtime::worker;
use template_sandbox::TemplateEngine;

/// Appends `"!!!"`
fn excitable(value: String) -> String {
    format!("{}!!!", value)
}

fn main() -> Result<()> {
    let mut engine = TemplateEngine::new();
    engine.environment_mut().add_filter("excitable", excitable);
    worker::run(&engine).context("worker failed")?;
    Ok(())
}
