use fileclerk::ratelimit::{RateLimiter, RATE_WINDOW_CAPACITY, RATE_WINDOW_SECS};
use std::sync::Arc;
use std::thread;

#[test]
fn capacity_is_never_exceeded_under_concurrent_admission() {
    let limiter = Arc::new(RateLimiter::new());
    let mut handles = Vec::new();
    for _ in 0..8 {
        let limiter = Arc::clone(&limiter);
        handles.push(thread::spawn(move || {
            let mut admitted = 0usize;
            for _ in 0..10 {
                if limiter.admit("u1", 50) {
                    admitted += 1;
                }
            }
            admitted
        }));
    }

    let total: usize = handles
        .into_iter()
        .map(|h| h.join().expect("thread join"))
        .sum();
    assert_eq!(total, RATE_WINDOW_CAPACITY);
}

#[test]
fn admission_is_monotonic_across_a_sliding_window() {
    let limiter = RateLimiter::new();
    // Fill the window at t=0.
    for _ in 0..RATE_WINDOW_CAPACITY {
        assert!(limiter.admit("u1", 0));
    }
    // Rejected until the first entries age out, admitted right after.
    assert!(!limiter.admit("u1", RATE_WINDOW_SECS - 1));
    assert!(!limiter.admit("u1", RATE_WINDOW_SECS));
    assert!(limiter.admit("u1", RATE_WINDOW_SECS + 1));
}

#[test]
fn distinct_users_have_independent_budgets() {
    let limiter = RateLimiter::new();
    for i in 0..RATE_WINDOW_CAPACITY {
        assert!(limiter.admit("u1", i as i64));
        assert!(limiter.admit("u2", i as i64));
    }
    assert!(!limiter.admit("u1", 100));
    assert!(!limiter.admit("u2", 100));
}
