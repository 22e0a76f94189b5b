// src/utils/mod.rs
//! Common utilities shared by the host and the worker program
//!
//! - **config**: Layered sandbox configuration (defaults, file, environment)
//! - **errors**: The crate-wide error type

pub mod config;
pub mod errors;

pub use self::config::SandboxConfig;
pub use self::errors::{Result, SandboxError};
