// src/runtime/worker.rs
//! Worker side of the protocol
//!
//! Runs inside the worker process. Deliberately synchronous: the worker
//! handles one task and exits, so there is nothing to schedule.
//!
//! The engine a worker renders with is fixed by the worker program. To make
//! extra filters available, build a binary whose `main` registers them and
//! hands the engine to [`run`], then point `worker.program` at it:
//!
//! ```no_run
//! use template_sandbox::runtime::worker;
//! use template_sandbox::TemplateEngine;
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut engine = TemplateEngine::new();
//!     engine
//!         .environment_mut()
//!         .add_filter("shout", |value: String| value.to_uppercase());
//!     worker::run(&engine)?;
//!     Ok(())
//! }
//! ```

use crate::engine::TemplateEngine;
use crate::observability::{init_tracing, LogFormat};
use crate::runtime::protocol::{decode_line, encode_line, RenderRequest, WorkerReply, WorkerRequest};
use crate::runtime::resource_limiter::{ResourceLimiter, ResourceLimits};
use crate::utils::errors::{Result, SandboxError};
use clap::Parser;
use std::io::{self, BufRead, BufWriter, Write};
use std::panic::{self, AssertUnwindSafe};
use tracing::debug;

/// Command line every worker program accepts; the pool passes the limits
#[derive(Debug, Parser)]
#[command(about = "Sandboxed template render worker")]
pub struct WorkerArgs {
    /// Cumulative CPU time cap in seconds
    #[arg(long, value_name = "SECONDS")]
    pub cpu_seconds: u64,

    /// Address-space cap in bytes
    #[arg(long, value_name = "BYTES")]
    pub address_space_bytes: u64,

    /// Log format for stderr diagnostics
    #[arg(long, value_enum, default_value_t = LogFormat::Compact, env = "TEMPLATE_WORKER_LOG_FORMAT")]
    pub log_format: LogFormat,
}

impl WorkerArgs {
    pub fn limits(&self) -> ResourceLimits {
        ResourceLimits {
            cpu_seconds: self.cpu_seconds,
            address_space_bytes: self.address_space_bytes,
        }
    }
}

/// Entry point for worker programs: parse the command line, then [`serve`]
/// one request on stdin/stdout with `engine`.
pub fn run(engine: &TemplateEngine) -> Result<()> {
    let args = WorkerArgs::parse();
    init_tracing(args.log_format)?;

    let stdin = io::stdin().lock();
    let stdout = BufWriter::new(io::stdout().lock());
    serve(engine, &args.limits(), stdin, stdout)
}

/// Apply `limits`, announce readiness on `output`, serve one request from
/// `input`, and return.
pub fn serve<R: BufRead, W: Write>(
    engine: &TemplateEngine,
    limits: &ResourceLimits,
    input: R,
    output: W,
) -> Result<()> {
    ResourceLimiter::apply(limits)?;
    let in_force = ResourceLimiter::current()?;
    serve_task(engine, in_force, input, output)
}

/// Announce `limits` and serve exactly one request. Split from [`serve`] so
/// the protocol can be exercised without limiting the calling process.
pub fn serve_task<R: BufRead, W: Write>(
    engine: &TemplateEngine,
    limits: ResourceLimits,
    mut input: R,
    mut output: W,
) -> Result<()> {
    write_reply(&mut output, &WorkerReply::Ready { limits })?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        debug!("Host closed stdin before sending a task");
        return Ok(());
    }

    let reply = match decode_line::<WorkerRequest>(&line)? {
        WorkerRequest::Ping => WorkerReply::Pong,
        WorkerRequest::Render(request) => render(engine, &request),
    };

    write_reply(&mut output, &reply)
}

fn render(engine: &TemplateEngine, request: &RenderRequest) -> WorkerReply {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        engine.render(&request.template, &request.context)
    }));

    match result {
        Ok(Ok(output)) => WorkerReply::Rendered { output },
        Ok(Err(SandboxError::Render(message))) => WorkerReply::RenderFailed { message },
        Ok(Err(e)) => WorkerReply::RenderFailed {
            message: e.to_string(),
        },
        Err(_) => WorkerReply::RenderFailed {
            message: "template engine panicked".into(),
        },
    }
}

fn write_reply<W: Write>(output: &mut W, reply: &WorkerReply) -> Result<()> {
    output.write_all(&encode_line(reply)?)?;
    output.flush()?;
    Ok(())
}
