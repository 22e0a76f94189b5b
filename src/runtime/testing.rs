// src/runtime/testing.rs
//! Shell stand-ins for the worker program, for pool-level tests

use crate::runtime::execution_pool::PoolConfig;
use crate::runtime::process_manager::{SpawnConfig, WorkerCommand};
use crate::runtime::resource_limiter::ResourceLimits;
use std::time::Duration;

/// Handshake line matching `ResourceLimits::default()`
const READY: &str =
    r#"printf '{"type":"ready","limits":{"cpu_seconds":2,"address_space_bytes":400000000}}\n'"#;

/// Pool of `/bin/sh` workers that handshake, read one request and then run
/// `after_request`
pub fn stub_pool_config(worker_count: usize, after_request: &str) -> PoolConfig {
    let script = format!("{}; read line; {}", READY, after_request);
    PoolConfig {
        worker_count,
        spawn: SpawnConfig {
            command: WorkerCommand {
                program: "/bin/sh".into(),
                args: vec!["-c".into(), script, "sh".into()],
            },
            limits: ResourceLimits::default(),
            startup_timeout: Duration::from_secs(5),
        },
    }
}

/// Workers that answer anything with `pong` after `delay` seconds
pub fn pong_after(worker_count: usize, delay: &str) -> PoolConfig {
    stub_pool_config(
        worker_count,
        &format!(r#"sleep {}; printf '{{"type":"pong"}}\n'"#, delay),
    )
}

/// Workers that answer anything with `rendered` `output` after `delay` seconds
pub fn rendered_after(worker_count: usize, delay: &str, output: &str) -> PoolConfig {
    stub_pool_config(
        worker_count,
        &format!(
            r#"sleep {}; printf '{{"type":"rendered","output":"{}"}}\n'"#,
            delay, output
        ),
    )
}
