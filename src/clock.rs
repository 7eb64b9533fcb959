//! Time sources used by the decision engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Clock abstraction so window arithmetic can be faked in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Seconds since the Unix epoch, with sub-second precision.
    fn now_secs(&self) -> f64;
}

/// Wall clock backed by `SystemTime::now()`.
///
/// Instances sharing one counter store must agree on wall time, so this is
/// the only production clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    pub fn new(start_secs: f64) -> Self {
        let clock = Self::default();
        clock.set(start_secs);
        clock
    }

    pub fn set(&self, secs: f64) {
        self.micros.store((secs * 1_000_000.0).round() as u64, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: f64) {
        let delta = (secs * 1_000_000.0).round() as u64;
        self.micros.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> f64 {
        self.micros.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(100.25);
        assert_eq!(clock.now_secs(), 100.25);
        clock.advance(0.5);
        assert_eq!(clock.now_secs(), 100.75);
    }

    #[test]
    fn test_system_clock_is_after_epoch() {
        assert!(SystemClock.now_secs() > 1_600_000_000.0);
    }
}
