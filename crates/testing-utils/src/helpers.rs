//! Test helper utilities and common testing patterns

use chrono::NaiveDate;
use ensemble_domain::DayId;
use std::time::{Duration, Instant};

/// Test environment setup utilities
pub struct TestEnv;

impl TestEnv {
    /// Wait for a condition to be true with timeout
    pub fn wait_for<F>(condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> bool,
    {
        Self::wait_for_with_interval(condition, timeout, Duration::from_millis(10))
    }

    /// Wait for a condition with a custom poll interval
    pub fn wait_for_with_interval<F>(
        mut condition: F,
        timeout: Duration,
        poll_interval: Duration,
    ) -> bool
    where
        F: FnMut() -> bool,
    {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if condition() {
                return true;
            }
            std::thread::sleep(poll_interval);
        }
        condition()
    }
}

/// Day `index` of a run starting on 2020-01-01
pub fn test_day(index: usize) -> DayId {
    let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default();
    DayId::new(index, start + chrono::Days::new(index as u64))
}
