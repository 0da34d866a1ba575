//! Burst-pattern rate control
//!
//! A [`BurstScheduler`] turns a pattern and a per-second rate into an emit
//! cycle. Calling [`BurstScheduler::cycle`] back-to-back reproduces the
//! pattern's one-second shape indefinitely:
//!
//! - `Drip`: one emit, then `floor(1000/rate)` ms of sleep
//! - `Bolus`: `rate` emits back-to-back, then sleep out the rest of the second
//! - `HeavyDrip`: 4 sub-bursts of `rate/4` emits, each followed by
//!   `floor((1000/rate)/4)` ms of sleep
//! - `None`: one emit, no delay
//!
//! The pattern is resolved into a [`BurstShape`] once, at construction, so the
//! hot loop only matches on precomputed intervals.

use crate::config::{check_rate_and_pattern, BurstPattern, EventRate};
use crate::timing;
use crate::{Error, Result};
use std::thread;
use std::time::{Duration, Instant};

/// Number of sub-bursts a heavy drip splits each second into
pub const HEAVY_DRIP_SUB_BURSTS: u32 = 4;

/// Precomputed timing of one emit cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstShape {
    Drip { interval: Duration },
    Bolus { burst: u32 },
    HeavyDrip { per_sub_burst: u32, interval: Duration },
    Unshaped,
}

impl BurstShape {
    /// Resolve a pattern and rate into cycle timing
    pub fn resolve(pattern: BurstPattern, rate: EventRate) -> Result<Self> {
        check_rate_and_pattern(rate, pattern)?;

        let rate = match (pattern, rate) {
            (BurstPattern::None, _) => return Ok(BurstShape::Unshaped),
            (_, EventRate::PerSecond(rate)) => rate,
            (_, EventRate::Unbounded) => {
                return Err(Error::invalid("Shaped burst patterns need a bounded rate"))
            }
        };

        Ok(match pattern {
            BurstPattern::Drip => BurstShape::Drip { interval: timing::drip_interval(rate) },
            BurstPattern::Bolus => BurstShape::Bolus { burst: rate },
            BurstPattern::HeavyDrip => {
                let interval_ns =
                    1_000_000_000 / u64::from(rate) / u64::from(HEAVY_DRIP_SUB_BURSTS);
                BurstShape::HeavyDrip {
                    per_sub_burst: rate / HEAVY_DRIP_SUB_BURSTS,
                    interval: timing::floor_millis(Duration::from_nanos(interval_ns)),
                }
            }
            BurstPattern::None => BurstShape::Unshaped,
        })
    }

    /// Events fired by one call to `cycle()`
    pub fn events_per_cycle(&self) -> u64 {
        match self {
            BurstShape::Drip { .. } | BurstShape::Unshaped => 1,
            BurstShape::Bolus { burst } => u64::from(*burst),
            BurstShape::HeavyDrip { per_sub_burst, .. } => {
                u64::from(*per_sub_burst) * u64::from(HEAVY_DRIP_SUB_BURSTS)
            }
        }
    }
}

/// Repeatable emit cycle for one producer unit
///
/// `E` fires one event. `S` sleeps; it defaults to [`std::thread::sleep`] and
/// can be swapped with [`BurstScheduler::with_sleeper`].
pub struct BurstScheduler<E, S = fn(Duration)> {
    shape: BurstShape,
    emit: E,
    sleep: S,
}

impl<E: FnMut()> BurstScheduler<E> {
    /// Build a scheduler from the command-line rate (-1 = unbounded)
    ///
    /// # Errors
    /// `InvalidConfiguration` when `rate == 0`, when `rate` is negative other
    /// than -1, or when `rate == -1` with a pattern other than `None`.
    pub fn build(pattern: BurstPattern, rate: i64, emit: E) -> Result<Self> {
        Self::new(pattern, EventRate::from_raw(rate)?, emit)
    }

    /// Build a scheduler from an already decoded rate
    pub fn new(pattern: BurstPattern, rate: EventRate, emit: E) -> Result<Self> {
        Ok(Self { shape: BurstShape::resolve(pattern, rate)?, emit, sleep: thread::sleep })
    }
}

impl<E: FnMut(), S: FnMut(Duration)> BurstScheduler<E, S> {
    /// Replace the sleep function
    pub fn with_sleeper<S2: FnMut(Duration)>(self, sleep: S2) -> BurstScheduler<E, S2> {
        BurstScheduler { shape: self.shape, emit: self.emit, sleep }
    }

    pub fn shape(&self) -> BurstShape {
        self.shape
    }

    /// Run one emit cycle of the pattern
    pub fn cycle(&mut self) {
        match self.shape {
            BurstShape::Drip { interval } => {
                (self.emit)();
                (self.sleep)(interval);
            }
            BurstShape::Bolus { burst } => {
                let start = Instant::now();
                for _ in 0..burst {
                    (self.emit)();
                }
                if let Some(rest) = timing::window_remainder(start.elapsed()) {
                    (self.sleep)(rest);
                }
            }
            BurstShape::HeavyDrip { per_sub_burst, interval } => {
                for _ in 0..HEAVY_DRIP_SUB_BURSTS {
                    for _ in 0..per_sub_burst {
                        (self.emit)();
                    }
                    (self.sleep)(interval);
                }
            }
            BurstShape::Unshaped => (self.emit)(),
        }
    }
}
