use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

pub const RATE_WINDOW_SECS: i64 = 3600;
pub const RATE_WINDOW_CAPACITY: usize = 30;

/// Sliding-window admission gate, one window per user. Entries older than
/// the window are pruned lazily on each check; a rejected call never
/// mutates the window.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<String, VecDeque<i64>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&self, user_id: &str, now: i64) -> bool {
        let mut windows = lock_windows(&self.windows);
        let window = windows.entry(user_id.to_string()).or_default();
        prune(window, now);
        if window.len() < RATE_WINDOW_CAPACITY {
            window.push_back(now);
            return true;
        }
        false
    }

    /// Events currently counted against the user's window.
    pub fn used(&self, user_id: &str, now: i64) -> usize {
        let mut windows = lock_windows(&self.windows);
        match windows.get_mut(user_id) {
            Some(window) => {
                prune(window, now);
                window.len()
            }
            None => 0,
        }
    }
}

fn prune(window: &mut VecDeque<i64>, now: i64) {
    // Strictly older than the trailing window is pruned; an entry exactly
    // one window old still counts.
    let cutoff = now - RATE_WINDOW_SECS;
    window.retain(|ts| *ts >= cutoff);
}

fn lock_windows(
    windows: &Mutex<HashMap<String, VecDeque<i64>>>,
) -> std::sync::MutexGuard<'_, HashMap<String, VecDeque<i64>>> {
    match windows.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_capacity_then_rejects() {
        let limiter = RateLimiter::new();
        for i in 0..RATE_WINDOW_CAPACITY {
            assert!(limiter.admit("u1", i as i64), "event {i} should admit");
        }
        assert!(!limiter.admit("u1", 100));
        assert_eq!(limiter.used("u1", 100), RATE_WINDOW_CAPACITY);
    }

    #[test]
    fn window_slides_as_entries_age_out() {
        let limiter = RateLimiter::new();
        for _ in 0..RATE_WINDOW_CAPACITY {
            assert!(limiter.admit("u1", 0));
        }
        assert!(!limiter.admit("u1", RATE_WINDOW_SECS));
        assert!(limiter.admit("u1", RATE_WINDOW_SECS + 1));
    }

    #[test]
    fn rejection_does_not_consume_a_slot() {
        let limiter = RateLimiter::new();
        for _ in 0..RATE_WINDOW_CAPACITY {
            assert!(limiter.admit("u1", 0));
        }
        for _ in 0..10 {
            assert!(!limiter.admit("u1", 10));
        }
        assert_eq!(limiter.used("u1", 10), RATE_WINDOW_CAPACITY);
    }

    #[test]
    fn users_do_not_share_windows() {
        let limiter = RateLimiter::new();
        for _ in 0..RATE_WINDOW_CAPACITY {
            assert!(limiter.admit("u1", 0));
        }
        assert!(limiter.admit("u2", 0));
    }

    #[test]
    fn adversarial_clustering_never_exceeds_capacity_in_any_window() {
        let limiter = RateLimiter::new();
        let mut admitted: Vec<i64> = Vec::new();
        // Bursts at the window edges plus a steady trickle.
        let mut times: Vec<i64> = Vec::new();
        times.extend(std::iter::repeat(0).take(40));
        times.extend((1..120).map(|i| i * 55));
        times.extend(std::iter::repeat(RATE_WINDOW_SECS - 1).take(40));
        times.extend(std::iter::repeat(RATE_WINDOW_SECS + 1).take(40));
        times.sort_unstable();

        for now in times {
            if limiter.admit("u1", now) {
                admitted.push(now);
            }
        }
        for &start in &admitted {
            let in_window = admitted
                .iter()
                .filter(|ts| **ts > start - RATE_WINDOW_SECS && **ts <= start)
                .count();
            assert!(in_window <= RATE_WINDOW_CAPACITY, "window ending at {start} held {in_window}");
        }
    }
}
