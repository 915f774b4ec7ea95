//! Basic example of a guarded counter.
//!
//! Shows normal mutations, an optimistic-concurrency conflict, a burst of
//! automated requests escalating into a block, and what an administrator
//! sees afterwards.

use counter_guard::{
    CounterGuard, EventFilter, GuardError, RequestContext, RetryPolicy, ALLOWED_COUNTER,
};
use std::thread;
use std::time::Duration;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG=counter_guard=debug shows admission decisions too
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let guard = CounterGuard::new();

    println!("=== Guarded Counter Example ===\n");

    let alice = RequestContext::new("alice").with_address("203.0.113.10");
    let record = guard.increment_counter(ALLOWED_COUNTER, None, &alice)?;
    println!("alice incremented: value={} version={}", record.value, record.version);

    thread::sleep(Duration::from_millis(150));
    let bob = RequestContext::new("bob").with_address("203.0.113.20");
    guard.increment_counter(ALLOWED_COUNTER, Some(1), &bob)?;

    // alice still believes the version is 1
    thread::sleep(Duration::from_millis(150));
    match guard.increment_counter(ALLOWED_COUNTER, Some(1), &alice) {
        Err(GuardError::VersionMismatch { expected, actual }) => {
            println!("alice conflicted: expected v{}, counter is at v{}", expected, actual);
        }
        other => println!("unexpected: {:?}", other),
    }

    println!("\nA bot fires 10 requests 10ms apart:");
    let bot = RequestContext::new("bot").with_user_agent("python-requests/2.31");
    let retry = RetryPolicy::default();
    for attempt in 1..=10 {
        match guard.increment_counter(ALLOWED_COUNTER, None, &bot) {
            Ok(record) => println!("  #{} ok (value={})", attempt, record.value),
            Err(e) => println!(
                "  #{} {} (auto-retry: {})",
                attempt,
                e,
                retry.delay_for(1, &e).is_some()
            ),
        }
        thread::sleep(Duration::from_millis(10));
    }

    let admin = guard.admin();
    println!("\nBlocked sessions:");
    for session in admin.list_blocked_sessions() {
        println!(
            "  {} (violations {}, until {:?})",
            session.session_id, session.violation_count, session.block_until
        );
    }

    println!("\nRecent security events:");
    for event in admin.list_security_events(&EventFilter::all(), 5) {
        println!(
            "  [{}] {} session={}",
            event.severity, event.event_type, event.session_id
        );
    }

    let stats = admin.security_stats();
    println!(
        "\nEvents in the last hour: {}, unresolved: {}",
        stats.events_last_hour, stats.unresolved_events
    );

    let snapshot = guard.metrics().snapshot();
    println!(
        "Admitted: {}, denied: {} ({:.1}%)",
        snapshot.admitted,
        snapshot.denied(),
        snapshot.denial_rate() * 100.0
    );

    Ok(())
}
