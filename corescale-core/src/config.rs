//! Configuration types for corescale core
//!
//! `SweepConfig` is the validated, read-only description of one experiment.
//! It is built once by the CLI and hands each trial a `ProducerConfig`, which
//! renders the producer's command line.

use crate::consumer::ConsumerStrategy;
use crate::session::frame::MAX_EVENT_SIZE;
use crate::session::SessionRequest;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Shape of event emission within a one-second window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BurstPattern {
    /// Send one event, then sleep 1000/N ms
    Drip,
    /// Send N events back-to-back, then sleep out the rest of the second
    Bolus,
    /// Split the second into sub-bursts of N/4 events
    HeavyDrip,
    /// No shaping, emit as fast as possible
    #[default]
    None,
}

impl BurstPattern {
    /// Command-line spelling understood by the producer
    pub fn as_arg(&self) -> &'static str {
        match self {
            BurstPattern::Drip => "drip",
            BurstPattern::Bolus => "bolus",
            BurstPattern::HeavyDrip => "heavy_drip",
            BurstPattern::None => "none",
        }
    }
}

impl fmt::Display for BurstPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BurstPattern::Drip => "DRIP",
            BurstPattern::Bolus => "BOLUS",
            BurstPattern::HeavyDrip => "HEAVY_DRIP",
            BurstPattern::None => "NONE",
        };
        f.write_str(name)
    }
}

impl FromStr for BurstPattern {
    type Err = Error;

    /// Accepts the pattern names (case-insensitive) or the numeric codes
    /// 0 (drip), 1 (bolus), 2 (heavy_drip) and -1 (none).
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drip" | "0" => Ok(BurstPattern::Drip),
            "bolus" | "1" => Ok(BurstPattern::Bolus),
            "heavy_drip" | "heavy-drip" | "2" => Ok(BurstPattern::HeavyDrip),
            "none" | "-1" => Ok(BurstPattern::None),
            other => Err(Error::invalid(format!(
                "Unknown burst pattern '{other}'. Valid options: drip, bolus, heavy_drip, none"
            ))),
        }
    }
}

/// Per-worker production rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum EventRate {
    /// No rate limit (-1 on the command line)
    #[default]
    Unbounded,
    /// Events per second
    PerSecond(u32),
}

impl EventRate {
    /// Decode the command-line form: -1 is unbounded, 0 and other negatives are rejected
    pub fn from_raw(raw: i64) -> Result<Self> {
        match raw {
            -1 => Ok(EventRate::Unbounded),
            0 => Err(Error::invalid("Event rate cannot be 0")),
            r if r < 0 => Err(Error::invalid(format!("Event rate must be > 0 or -1, got {r}"))),
            r => u32::try_from(r)
                .map(EventRate::PerSecond)
                .map_err(|_| Error::invalid(format!("Event rate {r} is too large"))),
        }
    }

    /// Command-line form of the rate
    pub fn as_raw(&self) -> i64 {
        match self {
            EventRate::Unbounded => -1,
            EventRate::PerSecond(rate) => i64::from(*rate),
        }
    }
}

impl TryFrom<i64> for EventRate {
    type Error = Error;

    fn try_from(raw: i64) -> Result<Self> {
        EventRate::from_raw(raw)
    }
}

impl From<EventRate> for i64 {
    fn from(rate: EventRate) -> Self {
        rate.as_raw()
    }
}

impl fmt::Display for EventRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventRate::Unbounded => f.write_str("unbounded"),
            EventRate::PerSecond(rate) => write!(f, "{rate}/s"),
        }
    }
}

/// Producer thread count for a trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum ThreadCount {
    /// One producer thread per pinned core (-1 on the command line)
    #[default]
    MatchCores,
    /// Fixed number of producer threads regardless of the core count
    Fixed(usize),
}

impl ThreadCount {
    pub fn from_raw(raw: i64) -> Result<Self> {
        match raw {
            -1 => Ok(ThreadCount::MatchCores),
            r if r <= 0 => Err(Error::invalid(format!("Thread count must be > 0 or -1, got {r}"))),
            r => Ok(ThreadCount::Fixed(r as usize)),
        }
    }

    pub fn as_raw(&self) -> i64 {
        match self {
            ThreadCount::MatchCores => -1,
            ThreadCount::Fixed(n) => *n as i64,
        }
    }

    /// Resolve the thread count for a trial pinned to `core_count` cores
    pub fn resolve(&self, core_count: usize) -> usize {
        match self {
            ThreadCount::MatchCores => core_count,
            ThreadCount::Fixed(n) => *n,
        }
    }
}

impl TryFrom<i64> for ThreadCount {
    type Error = Error;

    fn try_from(raw: i64) -> Result<Self> {
        ThreadCount::from_raw(raw)
    }
}

impl From<ThreadCount> for i64 {
    fn from(threads: ThreadCount) -> Self {
        threads.as_raw()
    }
}

/// How the orchestrator reads the producer's event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReaderKind {
    /// Copy the raw stream to a file, then post-process it
    #[default]
    #[serde(rename = "stream")]
    Buffered,
    /// Decode events live as they arrive
    #[serde(rename = "eventpipe", alias = "epes")]
    Streaming,
}

impl fmt::Display for ReaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReaderKind::Buffered => f.write_str("stream"),
            ReaderKind::Streaming => f.write_str("eventpipe"),
        }
    }
}

impl FromStr for ReaderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stream" => Ok(ReaderKind::Buffered),
            "eventpipe" | "epes" => Ok(ReaderKind::Streaming),
            other => Err(Error::invalid(format!(
                "Unknown reader type '{other}'. Valid options: stream, eventpipe"
            ))),
        }
    }
}

/// Everything one producer process needs to run
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerConfig {
    pub threads: usize,
    pub event_size: usize,
    pub event_rate: EventRate,
    pub burst_pattern: BurstPattern,
    pub duration: Duration,
    pub event_count: Option<u64>,
}

impl ProducerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(Error::invalid("Producer needs at least one thread"));
        }
        check_event_size(self.event_size)?;
        check_duration(self.duration)?;
        if self.event_count == Some(0) {
            return Err(Error::invalid("Event count cap must be > 0 when set"));
        }
        check_rate_and_pattern(self.event_rate, self.burst_pattern)
    }

    /// Render the producer command line
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "--threads".to_string(),
            self.threads.to_string(),
            "--event-size".to_string(),
            self.event_size.to_string(),
            "--event-rate".to_string(),
            self.event_rate.as_raw().to_string(),
            "--burst-pattern".to_string(),
            self.burst_pattern.as_arg().to_string(),
            "--duration".to_string(),
            self.duration.as_secs().to_string(),
        ];
        if let Some(count) = self.event_count {
            args.push("--event-count".to_string());
            args.push(count.to_string());
        }
        args
    }
}

/// Validated configuration of a whole core sweep
#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub producer_path: PathBuf,
    pub event_size: usize,
    pub event_rate: EventRate,
    pub burst_pattern: BurstPattern,
    pub min_core: usize,
    pub max_core: usize,
    pub threads: ThreadCount,
    pub duration: Duration,
    pub event_count: Option<u64>,
    pub reader: ReaderKind,
    pub slow_reader_delay: Duration,
    pub buffer_size_mb: u32,
    pub request_rundown: bool,
    pub pause: bool,
    pub attach_timeout: Duration,
}

impl SweepConfig {
    /// Check every invariant against the machine's logical core count.
    ///
    /// Runs before any trial; a failure here is fatal for the sweep.
    pub fn validate(&self, logical_cores: usize) -> Result<()> {
        if !self.producer_path.is_file() {
            return Err(Error::invalid(format!(
                "Producer binary not found: {}",
                self.producer_path.display()
            )));
        }
        for (name, value) in [("min_core", self.min_core), ("max_core", self.max_core)] {
            if value < 1 || value > logical_cores {
                return Err(Error::invalid(format!(
                    "{name}={value}: core count must be between 1 and {logical_cores}"
                )));
            }
        }
        if self.min_core > self.max_core {
            return Err(Error::invalid(format!(
                "(min_core={}, max_core={}) min_core must be less than or equal to max_core",
                self.min_core, self.max_core
            )));
        }
        check_event_size(self.event_size)?;
        check_duration(self.duration)?;
        if self.buffer_size_mb == 0 {
            return Err(Error::invalid("Buffer size must be > 0 MB"));
        }
        if self.event_count == Some(0) {
            return Err(Error::invalid("Event count cap must be > 0 when set"));
        }
        if self.attach_timeout.is_zero() {
            return Err(Error::invalid("Attach timeout must be > 0"));
        }
        check_rate_and_pattern(self.event_rate, self.burst_pattern)
    }

    /// Core counts visited by the sweep, ascending
    pub fn core_range(&self) -> RangeInclusive<usize> {
        self.min_core..=self.max_core
    }

    /// Number of trials the sweep runs
    pub fn trial_count(&self) -> usize {
        self.max_core.saturating_sub(self.min_core) + 1
    }

    /// Producer configuration for the trial pinned to `core_count` cores
    pub fn producer_config(&self, core_count: usize) -> ProducerConfig {
        ProducerConfig {
            threads: self.threads.resolve(core_count),
            event_size: self.event_size,
            event_rate: self.event_rate,
            burst_pattern: self.burst_pattern,
            duration: self.duration,
            event_count: self.event_count,
        }
    }

    /// Session parameters requested when attaching to a producer
    pub fn session_request(&self) -> SessionRequest {
        SessionRequest {
            buffer_size_mb: self.buffer_size_mb,
            request_rundown: self.request_rundown,
        }
    }

    /// Resolve the reader kind into a concrete consumer strategy
    pub fn consumer_strategy(&self) -> ConsumerStrategy {
        match self.reader {
            ReaderKind::Buffered => ConsumerStrategy::Buffered,
            ReaderKind::Streaming => ConsumerStrategy::Streaming {
                slow_reader_delay: self.slow_reader_delay,
            },
        }
    }
}

/// Events must fit in a single session record
pub(crate) fn check_event_size(event_size: usize) -> Result<()> {
    if event_size == 0 {
        return Err(Error::invalid("Event size must be > 0"));
    }
    if event_size > MAX_EVENT_SIZE {
        return Err(Error::invalid(format!(
            "Event size {event_size} exceeds the {MAX_EVENT_SIZE} byte record limit"
        )));
    }
    Ok(())
}

/// The producer takes whole seconds on its command line
pub(crate) fn check_duration(duration: Duration) -> Result<()> {
    if duration.as_secs() == 0 {
        return Err(Error::invalid("Duration must be at least 1 second"));
    }
    if duration.subsec_nanos() != 0 {
        return Err(Error::invalid(format!(
            "Duration must be a whole number of seconds (got {duration:?})"
        )));
    }
    Ok(())
}

/// An unbounded rate only makes sense without a burst pattern
pub(crate) fn check_rate_and_pattern(rate: EventRate, pattern: BurstPattern) -> Result<()> {
    if rate == EventRate::Unbounded && pattern != BurstPattern::None {
        return Err(Error::invalid(format!(
            "Burst pattern must be NONE when the event rate is -1 (got {pattern})"
        )));
    }
    Ok(())
}
