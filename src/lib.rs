// src/lib.rs
//! Template Sandbox
//!
//! Renders untrusted Jinja-style templates in separate worker processes with
//! kernel-enforced CPU and memory caps, so a hostile template can't exhaust
//! the host.
//!
//! # Architecture
//!
//! - **sandbox**: The render facade; every failure comes back as text
//! - **runtime**: Worker processes, the execution pool, its supervisor and
//!   the dispatch timeout cascade
//! - **engine**: The template engine policy shared by host and worker
//! - **observability**: Tracing setup and metric names
//! - **utils**: Configuration and errors
//!
//! ```no_run
//! use template_sandbox::{SandboxConfig, TemplateSandbox};
//! use serde_json::json;
//!
//! # async fn demo() -> template_sandbox::Result<()> {
//! let sandbox = TemplateSandbox::new(SandboxConfig::load()?)?;
//! let text = sandbox.render("{{ greeting }}", json!({"greeting": "Hello"})).await;
//! assert_eq!(text, "Hello");
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod observability;
pub mod runtime;
pub mod sandbox;
pub mod utils;

// Re-export commonly used types
pub use engine::{TemplateEngine, MAX_RANGE};
pub use runtime::{PoolStats, ResourceLimits};
pub use sandbox::global::{render_user_template, validate_user_template, GlobalSandboxGuard};
pub use sandbox::{
    OutcomeKind, RenderOutcome, TemplateSandbox, TimeoutCause, LIMIT_EXCEEDED_SENTINEL,
    RENDER_FAILED_SENTINEL,
};
pub use utils::config::SandboxConfig;
pub use utils::errors::{Result, SandboxError};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
