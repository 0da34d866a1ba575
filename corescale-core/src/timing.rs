//! One-second window arithmetic for burst shaping
//!
//! Burst patterns reason in whole milliseconds inside a one-second window.
//! Every interval here is floored to the millisecond so that a pattern's
//! sleeps never add up to more than the window they shape.

use std::time::Duration;

/// Length of the window every burst pattern shapes
pub const WINDOW: Duration = Duration::from_secs(1);

/// Truncate a duration to whole milliseconds
#[inline]
pub fn floor_millis(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}

/// Sleep between single emits so that `rate` of them fill one window
///
/// `floor(1000 / rate)` ms; zero once the rate exceeds 1000/s.
///
/// # Example
/// ```
/// use corescale_core::timing::drip_interval;
/// use std::time::Duration;
///
/// assert_eq!(drip_interval(3), Duration::from_millis(333));
/// ```
#[inline]
pub fn drip_interval(rate: u32) -> Duration {
    debug_assert!(rate > 0);
    Duration::from_millis(1000 / u64::from(rate))
}

/// Time left in the window after a burst that took `elapsed`
///
/// Returns `None` when the burst overran the window, so callers never sleep
/// a negative amount and never try to catch up.
#[inline]
pub fn window_remainder(elapsed: Duration) -> Option<Duration> {
    if elapsed >= WINDOW {
        None
    } else {
        Some(WINDOW - floor_millis(elapsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drip_interval_floors() {
        assert_eq!(drip_interval(1), Duration::from_millis(1000));
        assert_eq!(drip_interval(10), Duration::from_millis(100));
        assert_eq!(drip_interval(7), Duration::from_millis(142));
        assert_eq!(drip_interval(2000), Duration::ZERO);
    }

    #[test]
    fn test_window_remainder() {
        assert_eq!(window_remainder(Duration::ZERO), Some(WINDOW));
        assert_eq!(
            window_remainder(Duration::from_micros(250_700)),
            Some(Duration::from_millis(750))
        );
        assert_eq!(window_remainder(Duration::from_millis(999)), Some(Duration::from_millis(1)));
        assert_eq!(window_remainder(WINDOW), None);
        assert_eq!(window_remainder(Duration::from_millis(1500)), None);
    }

    #[test]
    fn test_floor_millis() {
        assert_eq!(floor_millis(Duration::from_micros(1999)), Duration::from_millis(1));
        assert_eq!(floor_millis(Duration::from_nanos(999_999)), Duration::ZERO);
    }
}
