// src/engine/mod.rs
//! Template engine adapter
//!
//! The sandbox treats the engine as a black box: template source and a context
//! go in, rendered text or an error comes out. `minijinja` provides the Jinja
//! syntax and is sandboxed by construction (templates can't reach host
//! objects); this module adds the policy on top:
//!
//! - undefined values are chainable and render as empty text
//! - `range()` refuses to produce more than [`MAX_RANGE`] items
//! - filters are registered through [`TemplateEngine::environment_mut`]
//!
//! Templates are rendered by the worker program, so custom filters belong in
//! the engine that program builds (see [`crate::runtime::worker`]). Filter
//! names are resolved at render time; [`TemplateEngine::validate`] checks
//! syntax only and gives the same answer with or without them.

pub mod filters;

use crate::runtime::protocol::Context;
use crate::utils::errors::Result;
use minijinja::{Environment, UndefinedBehavior};

pub use filters::MAX_RANGE;

/// Name used for templates compiled by [`TemplateEngine::validate`]
const VALIDATION_TEMPLATE_NAME: &str = "<user template>";

/// Sandboxed template engine
#[derive(Clone)]
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    /// Engine with the sandbox policy and no extra filters
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        env.add_function("range", filters::bounded_range);
        Self { env }
    }

    /// Access the environment to register filters, functions or globals
    pub fn environment_mut(&mut self) -> &mut Environment<'static> {
        &mut self.env
    }

    /// Render directly in the calling process, without any limits
    pub fn render(&self, template: &str, context: &Context) -> Result<String> {
        Ok(self.env.render_str(template, context)?)
    }

    /// Compile `template` without rendering it
    pub fn validate(&self, template: &str) -> Result<()> {
        let mut env = self.env.clone();
        env.add_template_owned(VALIDATION_TEMPLATE_NAME, template.to_owned())?;
        Ok(())
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}
