//! Integration tests for Redis storage.
//!
//! These tests require a Redis instance running at `redis://127.0.0.1/`.
//! Tests are ignored by default - run with `cargo test --features redis-storage --test redis_storage -- --ignored`

#![cfg(feature = "redis-storage")]

use counter_guard::application::ports::Storage;
use counter_guard::{
    Backend, CounterGuard, CounterRecord, GuardError, RedisBackend, RedisStorageConfig,
    RequestContext, ALLOWED_COUNTER,
};
use std::sync::Barrier;
use std::thread;

const REDIS_URL: &str = "redis://127.0.0.1/";

/// Check if Redis is available before running tests
async fn redis_available() -> bool {
    RedisBackend::connect(REDIS_URL).await.is_ok()
}

/// Create a test backend with unique prefix
async fn create_test_backend(test_name: &str) -> RedisBackend {
    let config = RedisStorageConfig {
        key_prefix: format!("test:{}:", test_name),
        ..RedisStorageConfig::default()
    };

    let backend = RedisBackend::connect_with_config(REDIS_URL, config)
        .await
        .expect("Failed to connect to Redis");
    backend.counters().clear();
    backend.sessions().clear();
    backend.events().clear();
    backend.audits().clear();
    backend
}

#[tokio::test(flavor = "multi_thread")]
#[ignore] // Requires Redis
async fn test_redis_basic_set_get() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let backend = create_test_backend("basic_set_get").await;
    let counters = backend.counters();
    let name = ALLOWED_COUNTER.to_string();

    assert_eq!(counters.get(&name), None);
    counters.insert(name.clone(), CounterRecord::new(ALLOWED_COUNTER, 1_000));

    let stored = counters.get(&name).unwrap();
    assert_eq!((stored.value, stored.version), (0, 0));
    assert_eq!(counters.len(), 1);

    assert!(counters.remove(&name).is_some());
    assert!(counters.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
#[ignore] // Requires Redis
async fn test_redis_entry_mut_reports_creation() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let backend = create_test_backend("entry_mut").await;
    let counters = backend.counters();
    let name = ALLOWED_COUNTER.to_string();

    let created = counters
        .with_entry_mut(
            name.clone(),
            || CounterRecord::new(ALLOWED_COUNTER, 0),
            |record, created| {
                record.value = 5;
                created
            },
        )
        .unwrap();
    let again = counters
        .with_entry_mut(
            name.clone(),
            || CounterRecord::new(ALLOWED_COUNTER, 0),
            |record, created| {
                record.value += 1;
                created
            },
        )
        .unwrap();

    assert!(created);
    assert!(!again);
    assert_eq!(counters.get(&name).unwrap().value, 6);
    assert_eq!(counters.update(&"missing".to_string(), |r| r.value), Ok(None));
}

#[tokio::test(flavor = "multi_thread")]
#[ignore] // Requires Redis
async fn test_redis_retain_counts_removed() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let backend = create_test_backend("retain").await;
    let counters = backend.counters();
    for (i, name) in ["a", "b", "c"].iter().enumerate() {
        counters.insert(name.to_string(), CounterRecord::new(*name, i as u64));
    }

    let removed = counters.retain(|_, record| record.last_updated >= 1);

    assert_eq!(removed, 1);
    let mut names = Vec::new();
    counters.for_each(|name, _| names.push(name.clone()));
    names.sort();
    assert_eq!(names, vec!["b", "c"]);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore] // Requires Redis
async fn test_redis_guard_version_race() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let backend = create_test_backend("version_race").await;
    let guard = CounterGuard::builder()
        .with_backend(backend)
        .build()
        .unwrap();
    guard.initialize_counter(ALLOWED_COUNTER).unwrap();

    let barrier = Barrier::new(2);
    let outcomes: Vec<_> = tokio::task::block_in_place(|| {
        thread::scope(|s| {
            let handles: Vec<_> = ["a", "b"]
                .iter()
                .map(|session| {
                    let guard = guard.clone();
                    let barrier = &barrier;
                    s.spawn(move || {
                        barrier.wait();
                        guard.increment_counter(
                            ALLOWED_COUNTER,
                            Some(0),
                            &RequestContext::new(*session),
                        )
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    });

    let successes = outcomes.iter().filter(|o| o.is_ok()).count();
    let conflicts = outcomes
        .iter()
        .filter(|o| matches!(o, Err(GuardError::VersionMismatch { .. })))
        .count();
    assert_eq!((successes, conflicts), (1, 1));
    assert_eq!(guard.get_counter(ALLOWED_COUNTER).unwrap().version, 1);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore] // Requires Redis
async fn test_redis_shared_between_guards() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let backend = create_test_backend("shared").await;
    let first = CounterGuard::builder()
        .with_backend(backend.clone())
        .build()
        .unwrap();
    let second = CounterGuard::builder()
        .with_backend(backend)
        .build()
        .unwrap();

    first
        .increment_counter(ALLOWED_COUNTER, None, &RequestContext::new("s1"))
        .unwrap();
    first.admin().block_session("s2", 60_000, "test").unwrap();

    assert_eq!(second.get_counter(ALLOWED_COUNTER).unwrap().value, 1);
    assert!(matches!(
        second.increment_counter(ALLOWED_COUNTER, None, &RequestContext::new("s2")),
        Err(GuardError::Blocked { .. })
    ));
}
