// tests/render.rs
//! End-to-end rendering through real worker processes

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use proptest::prelude::*;
use serde_json::json;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use template_sandbox::{
    OutcomeKind, RenderOutcome, SandboxConfig, TemplateEngine, TemplateSandbox, TimeoutCause,
    LIMIT_EXCEEDED_SENTINEL, RENDER_FAILED_SENTINEL,
};

const GRINDY: &str = "{% for a in range(1000) %}{% for b in range(1000) %}\
                      {% for c in range(1000) %}{% for d in range(1000) %}\
                      {% endfor %}{% endfor %}{% endfor %}{% endfor %}";

const NIGHTMARE: &str = "{% for a in range(1000) %}{% for b in range(1000) %}\
                         {% for c in range(1000) %}{% for d in range(1000) %}\
                         hey there bud\
                         {% endfor %}{% endfor %}{% endfor %}{% endfor %}";

/// Worker program with the `excitable` filter registered
const EXCITABLE_WORKER: &str = env!("CARGO_BIN_EXE_excitable-worker");

/// The stock worker program, built-in filters only
const STOCK_WORKER: &str = env!("CARGO_BIN_EXE_template-worker");

/// Same engine the excitable worker renders with
fn excitable_engine() -> TemplateEngine {
    let mut engine = TemplateEngine::new();
    engine
        .environment_mut()
        .add_filter("excitable", |value: String| format!("{}!!!", value));
    engine
}

fn test_config(workers: usize) -> SandboxConfig {
    let mut config = SandboxConfig::default();
    config.pool.workers = workers;
    config.limits.cpu_seconds = 1;
    config.timeouts.task_wait_ms = 1_500;
    config.timeouts.pool_restart_allowance_ms = 5_000;
    config.worker.program = Some(PathBuf::from(EXCITABLE_WORKER));
    config
}

async fn open_sandbox(workers: usize) -> TemplateSandbox {
    let sandbox = TemplateSandbox::new(test_config(workers)).unwrap();
    sandbox.open().await.unwrap();
    sandbox
}

fn stop(pid: u32) {
    kill(Pid::from_raw(pid as i32), Signal::SIGSTOP).unwrap();
}

#[tokio::test]
async fn test_greeting() {
    let sandbox = open_sandbox(2).await;
    let text = sandbox
        .render("{{ greeting }}", json!({"greeting": "Hello"}))
        .await;
    assert_eq!(text, "Hello");
}

#[tokio::test]
async fn test_registered_filter() {
    let sandbox = open_sandbox(2).await;
    let text = sandbox
        .render("{{ greeting|excitable }}", json!({"greeting": "Hello"}))
        .await;
    assert_eq!(text, "Hello!!!");
}

#[tokio::test]
async fn test_filters_come_from_the_worker_program() {
    let mut config = test_config(1);
    config.worker.program = Some(PathBuf::from(STOCK_WORKER));
    let sandbox = TemplateSandbox::new(config).unwrap();
    let template = "{{ greeting|excitable }}";

    // Syntax is fine either way; the stock worker just doesn't know the filter
    assert!(sandbox.validate(template).is_ok());
    let outcome = sandbox
        .render_outcome(template, json!({"greeting": "Hello"}))
        .await;
    assert_eq!(outcome.kind(), OutcomeKind::RenderError);

    let text = sandbox.render("{{ greeting|upper }}", json!({"greeting": "Hello"})).await;
    assert_eq!(text, "HELLO");
}

#[tokio::test]
async fn test_matches_in_process_rendering() {
    let sandbox = open_sandbox(2).await;
    let engine = excitable_engine();
    let context = json!({
        "user": {"name": "Ada", "tags": ["admin", "ops"]},
        "count": 3,
    });
    let map = context.as_object().unwrap().clone();

    for template in [
        "Hi {{ user.name }}!",
        "{% for tag in user.tags %}[{{ tag|upper }}]{% endfor %}",
        "{% if count > 2 %}many{% else %}few{% endif %}",
        "{{ missing.deeply.nested }}|{{ user.name|excitable }}",
        "{% for i in range(count) %}{{ loop.index }}{% endfor %}",
    ] {
        let expected = engine.render(template, &map).unwrap();
        assert_eq!(sandbox.render(template, &context).await, expected, "{}", template);
    }
}

#[tokio::test]
async fn test_cpu_heavy_template_hits_limit() {
    let sandbox = open_sandbox(2).await;
    let deadline = sandbox.config().request_deadline();

    let started = Instant::now();
    let text = sandbox.render(GRINDY, json!({})).await;

    assert!(text.starts_with(LIMIT_EXCEEDED_SENTINEL), "{}", text);
    assert!(text.ends_with(GRINDY));
    assert!(started.elapsed() < deadline + Duration::from_secs(1));
}

#[tokio::test]
async fn test_output_heavy_template_hits_limit() {
    let sandbox = open_sandbox(2).await;
    let deadline = sandbox.config().request_deadline();

    let started = Instant::now();
    let outcome = sandbox.render_outcome(NIGHTMARE, json!({})).await;

    assert!(
        matches!(
            outcome.kind(),
            OutcomeKind::CpuLimit | OutcomeKind::MemoryLimit | OutcomeKind::Timeout
        ),
        "{:?}",
        outcome
    );
    assert!(outcome.into_text(NIGHTMARE).starts_with(LIMIT_EXCEEDED_SENTINEL));
    assert!(started.elapsed() < deadline + Duration::from_secs(1));
}

#[tokio::test]
async fn test_limit_does_not_poison_the_pool() {
    let sandbox = open_sandbox(1).await;
    let text = sandbox.render(GRINDY, json!({})).await;
    assert!(text.starts_with(LIMIT_EXCEEDED_SENTINEL));

    // The killed worker was single-use anyway; the pool itself is unchanged
    let text = sandbox.render("{{ n }}", json!({"n": 7})).await;
    assert_eq!(text, "7");
    assert_eq!(sandbox.pool_generation(), 1);
}

#[tokio::test]
async fn test_template_error_is_not_a_limit() {
    let sandbox = open_sandbox(1).await;
    let template = "{{ greeting|no_such_filter }}";
    let text = sandbox.render(template, json!({"greeting": "Hello"})).await;

    assert!(text.starts_with(RENDER_FAILED_SENTINEL), "{}", text);
    assert!(text.ends_with(template));
    assert_eq!(sandbox.pool_generation(), 1);
}

#[tokio::test]
async fn test_oversized_range_is_a_template_error() {
    let sandbox = open_sandbox(1).await;
    let outcome = sandbox
        .render_outcome("{% for i in range(1001) %}{% endfor %}", json!({}))
        .await;
    assert_eq!(outcome.kind(), OutcomeKind::RenderError);
}

#[tokio::test]
async fn test_concurrent_requests_get_their_own_results() {
    let sandbox = open_sandbox(4).await;

    let renders = (0..16).map(|i| {
        let sandbox = &sandbox;
        async move { (i, sandbox.render("{{ i }}", json!({ "i": i })).await) }
    });

    for (i, text) in futures::future::join_all(renders).await {
        assert_eq!(text, i.to_string());
    }
    assert_eq!(sandbox.pool_generation(), 1);
}

#[tokio::test]
async fn test_unresponsive_pool_is_replaced() {
    let sandbox = open_sandbox(1).await;
    let stats = sandbox.pool_stats().unwrap();
    assert_eq!(stats.idle_pids.len(), 1);
    stop(stats.idle_pids[0]);

    let text = sandbox
        .render("{{ greeting }}", json!({"greeting": "Hello"}))
        .await;

    assert_eq!(text, "Hello");
    assert_eq!(sandbox.pool_generation(), 2);
    assert!(!sandbox.pool_stats().unwrap().idle_pids.contains(&stats.idle_pids[0]));
}

#[tokio::test]
async fn test_slow_task_on_healthy_pool_is_a_timeout() {
    let sandbox = open_sandbox(2).await;
    let stats = sandbox.pool_stats().unwrap();
    assert_eq!(stats.idle_pids.len(), 2);
    // Workers are handed out in queue order, so this one gets the task
    stop(stats.idle_pids[0]);

    let outcome = sandbox
        .render_outcome("{{ greeting }}", json!({"greeting": "Hello"}))
        .await;

    assert_eq!(outcome, RenderOutcome::Timeout(TimeoutCause::SlowTask));
    assert_eq!(sandbox.pool_generation(), 1);
}

#[tokio::test]
async fn test_close_then_render_reopens() {
    let sandbox = open_sandbox(1).await;
    sandbox.close().await;
    assert!(sandbox.pool_stats().is_none());

    let text = sandbox.render("{{ 1 + 1 }}", json!({})).await;
    assert_eq!(text, "2");
    assert_eq!(sandbox.pool_generation(), 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_plain_text_is_returned_verbatim(text in "[^{]*") {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let sandbox = TemplateSandbox::new(test_config(1)).unwrap();

        let rendered = runtime.block_on(sandbox.render(&text, json!({})));
        prop_assert_eq!(rendered, text);
        prop_assert_eq!(sandbox.pool_generation(), 0);
    }
}
