//! Concurrent access through one shared guard.

use counter_guard::{CounterGuard, GuardError, RequestContext, ALLOWED_COUNTER};
use std::sync::Barrier;
use std::thread;

#[test]
fn test_same_version_increments_race() {
    let guard = CounterGuard::new();
    guard.initialize_counter(ALLOWED_COUNTER).unwrap();

    for round in 0..50u64 {
        let barrier = Barrier::new(2);
        let outcomes: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = ["a", "b"]
                .iter()
                .map(|prefix| {
                    let guard = guard.clone();
                    let barrier = &barrier;
                    s.spawn(move || {
                        // Fresh sessions are always admitted
                        let ctx = RequestContext::new(format!("{}-{}", prefix, round));
                        barrier.wait();
                        guard.increment_counter(ALLOWED_COUNTER, Some(round as i64), &ctx)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let successes = outcomes.iter().filter(|o| o.is_ok()).count();
        let conflicts = outcomes
            .iter()
            .filter(|o| {
                matches!(
                    o,
                    Err(GuardError::VersionMismatch { expected, actual })
                        if *expected == round && *actual == round + 1
                )
            })
            .count();
        assert_eq!((successes, conflicts), (1, 1), "round {}", round);
    }

    assert_eq!(guard.get_counter(ALLOWED_COUNTER).unwrap().version, 50);
    assert_eq!(guard.metrics().version_conflicts(), 50);
}

#[test]
fn test_unversioned_increments_are_not_lost() {
    let guard = CounterGuard::new();

    thread::scope(|s| {
        for t in 0..8 {
            let guard = guard.clone();
            s.spawn(move || {
                for i in 0..25 {
                    let ctx = RequestContext::new(format!("t{}-s{}", t, i));
                    guard
                        .increment_counter(ALLOWED_COUNTER, None, &ctx)
                        .unwrap();
                }
            });
        }
    });

    let record = guard.get_counter(ALLOWED_COUNTER).unwrap();
    assert_eq!(record.value, 200);
    assert_eq!(record.version, 200);
    assert_eq!(guard.admin().active_session_count(), 200);
}

#[test]
fn test_one_session_from_many_threads() {
    let guard = CounterGuard::new();
    let barrier = Barrier::new(4);

    let admitted: usize = thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let guard = guard.clone();
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    let ctx = RequestContext::new("shared");
                    usize::from(guard.increment_counter(ALLOWED_COUNTER, None, &ctx).is_ok())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    // The first request creates the session; the rest land within
    // milliseconds of it and are denied
    assert!(admitted >= 1);
    let session = guard.admin().list_active_sessions(1).pop().unwrap();
    assert_eq!(
        guard.get_counter(ALLOWED_COUNTER).unwrap().value,
        admitted as i64
    );
    assert_eq!(session.session_id, "shared");
}
