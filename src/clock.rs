// =============================================================================
// Clock — injectable time source
// =============================================================================
//
// Daily resets, per-asset cooldowns, and SL-update rate limits are all
// time-driven. Routing them through this trait keeps every one of them
// testable without sleeping in tests.
// =============================================================================

use std::sync::Arc;

use chrono::{TimeZone, Utc};

/// Time source for the engine. All cooldown, rate-limit, and daily-reset
/// logic must read time through this trait.
pub trait Clock: Send + Sync {
    /// Current time, epoch milliseconds.
    fn now_ms(&self) -> i64;

    /// Current UTC calendar date as `YYYY-MM-DD`. Daily counters reset when
    /// this value changes.
    fn utc_date(&self) -> String {
        let ts = self.now_ms();
        Utc.timestamp_millis_opt(ts)
            .single()
            .unwrap_or_else(Utc::now)
            .format("%Y-%m-%d")
            .to_string()
    }
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Manually advanced clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: std::sync::atomic::AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: std::sync::atomic::AtomicI64::new(start_ms),
        }
    }

    /// Move time forward by `delta_ms`.
    pub fn advance(&self, delta_ms: i64) {
        self.now_ms
            .fetch_add(delta_ms, std::sync::atomic::Ordering::SeqCst);
    }

    /// Jump to an absolute timestamp.
    pub fn set(&self, ts_ms: i64) {
        self.now_ms.store(ts_ms, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(std::sync::atomic::Ordering::SeqCst)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now_ms(), 1_500);
        clock.set(42);
        assert_eq!(clock.now_ms(), 42);
    }

    #[test]
    fn utc_date_rolls_at_midnight() {
        // 2024-01-01T23:59:59Z
        let clock = ManualClock::new(1_704_153_599_000);
        assert_eq!(clock.utc_date(), "2024-01-01");
        clock.advance(2_000);
        assert_eq!(clock.utc_date(), "2024-01-02");
    }

    #[test]
    fn system_clock_is_sane() {
        // Strictly after 2020-01-01.
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }
}
