//! Example sharing guard state through Redis.
//!
//! Counters, sessions, security events and audit entries live in Redis, so
//! several processes enforce the same admission decisions.
//!
//! # Quick Start
//!
//! 1. Start Redis:
//!    ```bash
//!    docker run -p 6379:6379 redis:7-alpine
//!    ```
//!
//! 2. Run the example (from project root):
//!    ```bash
//!    cargo run --example redis --features redis-storage
//!    ```
//!
//! Run it in two terminals at once: the second process sees the first one's
//! counter value and its blocked sessions.

use counter_guard::{
    CounterGuard, GuardError, RedisBackend, RedisStorageConfig, RequestContext, RetentionConfig,
    ALLOWED_COUNTER,
};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::prelude::*;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RedisStorageConfig {
        key_prefix: "counter-guard-demo:".to_string(),
        ..RedisStorageConfig::default()
    };
    let backend = RedisBackend::connect_with_config("redis://127.0.0.1:6379", config).await?;

    let guard = CounterGuard::builder().with_backend(backend).build()?;
    let sweeper = guard
        .retention_sweeper(RetentionConfig::new(Duration::from_secs(60), 30)?)
        .start();

    let ctx = RequestContext::new(format!("demo-{}", std::process::id()));
    for _ in 0..5 {
        match guard.increment_counter(ALLOWED_COUNTER, None, &ctx) {
            Ok(record) => info!(value = record.value, version = record.version, "incremented"),
            Err(GuardError::RateLimited { retry_after_ms }) => {
                info!(retry_after_ms, "rate limited");
                tokio::time::sleep(Duration::from_millis(retry_after_ms)).await;
            }
            Err(e) => info!(error = %e, "request failed"),
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    let stats = guard.admin().security_stats();
    info!(
        active_sessions = stats.active_sessions,
        blocked_sessions = stats.blocked_sessions,
        events_last_hour = stats.events_last_hour,
        "shared state"
    );

    sweeper.shutdown().await?;
    Ok(())
}
