//! Profile and command-line configuration for a sweep
//!
//! A sweep is configured from three layers. Command-line flags win over a
//! TOML profile, and the profile wins over the built-in defaults. The merged
//! result is a [`SweepConfig`], validated against the machine's core count
//! before any trial runs.

use anyhow::{bail, Context, Result};
use corescale_core::config::{BurstPattern, EventRate, ReaderKind, SweepConfig, ThreadCount};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_EVENT_SIZE: usize = 100;
pub const DEFAULT_DURATION: Duration = Duration::from_secs(60);
pub const DEFAULT_BUFFER_SIZE_MB: u32 = 256;
pub const DEFAULT_ATTACH_TIMEOUT: Duration = Duration::from_secs(10);

/// Top-level profile; every field is optional
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    #[serde(default)]
    pub experiment: ExperimentProfile,
    #[serde(default)]
    pub workload: WorkloadProfile,
    #[serde(default)]
    pub consumer: ConsumerProfile,
    #[serde(default)]
    pub output: OutputProfile,
}

/// Sweep bounds and trial control
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentProfile {
    /// Producer binary
    pub producer: Option<PathBuf>,
    pub min_core: Option<usize>,
    pub max_core: Option<usize>,
    /// Per-trial run time, e.g. "30s"
    #[serde(default, with = "humantime_serde")]
    pub duration: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub attach_timeout: Option<Duration>,
    /// Wait for Enter before starting each trial
    pub pause: Option<bool>,
}

/// What each producer emits
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WorkloadProfile {
    pub event_size: Option<usize>,
    /// Events per second per thread, -1 for unbounded
    pub event_rate: Option<EventRate>,
    pub burst_pattern: Option<BurstPattern>,
    /// Producer threads, -1 to match the trial's core count
    pub threads: Option<ThreadCount>,
    pub event_count: Option<u64>,
}

/// How the event stream is read
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConsumerProfile {
    /// "stream" or "eventpipe"
    pub reader: Option<ReaderKind>,
    #[serde(default, with = "humantime_serde")]
    pub slow_reader: Option<Duration>,
    pub buffer_size_mb: Option<u32>,
    pub rundown: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OutputProfile {
    /// JSON report path
    pub file: Option<PathBuf>,
}

impl ProfileConfig {
    /// Load profile from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read profile: {}", path.display()))?;

        let profile: ProfileConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse profile: {}", path.display()))?;

        profile.validate().with_context(|| format!("Invalid profile: {}", path.display()))?;
        Ok(profile)
    }

    /// Checks that do not depend on the machine or the command line
    pub fn validate(&self) -> Result<()> {
        if self.workload.event_size == Some(0) {
            bail!("workload.event_size must be > 0");
        }
        if self.workload.event_count == Some(0) {
            bail!("workload.event_count must be > 0 when set");
        }
        if self.consumer.buffer_size_mb == Some(0) {
            bail!("consumer.buffer_size_mb must be > 0");
        }
        if let Some(duration) = self.experiment.duration {
            if duration.as_secs() == 0 {
                bail!("experiment.duration must be at least 1s");
            }
            if duration.subsec_nanos() != 0 {
                bail!("experiment.duration must be whole seconds (got {duration:?})");
            }
        }
        if let (Some(min), Some(max)) = (self.experiment.min_core, self.experiment.max_core) {
            if min > max {
                bail!("experiment.min_core ({min}) must be <= experiment.max_core ({max})");
            }
        }
        if self.workload.event_rate == Some(EventRate::Unbounded)
            && matches!(self.workload.burst_pattern, Some(p) if p != BurstPattern::None)
        {
            bail!("workload.burst_pattern must be none when workload.event_rate is -1");
        }
        Ok(())
    }
}

/// Values given on the command line; `None` means "not given"
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub producer: Option<PathBuf>,
    pub event_size: Option<usize>,
    pub event_rate: Option<i64>,
    pub burst_pattern: Option<BurstPattern>,
    pub reader: Option<ReaderKind>,
    pub slow_reader_ms: Option<u64>,
    pub duration_secs: Option<u64>,
    pub min_core: Option<usize>,
    pub max_core: Option<usize>,
    pub threads: Option<i64>,
    pub event_count: Option<u64>,
    pub rundown: Option<bool>,
    pub buffer_size_mb: Option<u32>,
    pub pause: Option<bool>,
    pub attach_timeout_secs: Option<u64>,
    pub output: Option<PathBuf>,
}

/// Everything a sweep run needs
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub sweep: SweepConfig,
    pub output: Option<PathBuf>,
}

/// Merge command line, profile and defaults into a validated [`RunConfig`]
pub fn resolve(
    profile: Option<ProfileConfig>,
    cli: Overrides,
    logical_cores: usize,
) -> Result<RunConfig> {
    let profile = profile.unwrap_or_default();
    let ProfileConfig { experiment, workload, consumer, output } = profile;

    let producer_path = match cli.producer.or(experiment.producer) {
        Some(path) => path,
        None => bail!(
            "No producer binary given (pass it as the first argument or set experiment.producer)"
        ),
    };

    let event_rate = match cli.event_rate {
        Some(raw) => EventRate::from_raw(raw)?,
        None => workload.event_rate.unwrap_or_default(),
    };
    let threads = match cli.threads {
        Some(raw) => ThreadCount::from_raw(raw)?,
        None => workload.threads.unwrap_or_default(),
    };

    let sweep = SweepConfig {
        producer_path,
        event_size: cli.event_size.or(workload.event_size).unwrap_or(DEFAULT_EVENT_SIZE),
        event_rate,
        burst_pattern: cli.burst_pattern.or(workload.burst_pattern).unwrap_or_default(),
        min_core: cli.min_core.or(experiment.min_core).unwrap_or(logical_cores),
        max_core: cli.max_core.or(experiment.max_core).unwrap_or(logical_cores),
        threads,
        duration: cli
            .duration_secs
            .map(Duration::from_secs)
            .or(experiment.duration)
            .unwrap_or(DEFAULT_DURATION),
        event_count: cli.event_count.or(workload.event_count),
        reader: cli.reader.or(consumer.reader).unwrap_or_default(),
        slow_reader_delay: cli
            .slow_reader_ms
            .map(Duration::from_millis)
            .or(consumer.slow_reader)
            .unwrap_or(Duration::ZERO),
        buffer_size_mb: cli
            .buffer_size_mb
            .or(consumer.buffer_size_mb)
            .unwrap_or(DEFAULT_BUFFER_SIZE_MB),
        request_rundown: cli.rundown.or(consumer.rundown).unwrap_or(true),
        pause: cli.pause.or(experiment.pause).unwrap_or(false),
        attach_timeout: cli
            .attach_timeout_secs
            .map(Duration::from_secs)
            .or(experiment.attach_timeout)
            .unwrap_or(DEFAULT_ATTACH_TIMEOUT),
    };

    sweep.validate(logical_cores)?;
    if sweep.reader == ReaderKind::Buffered && !sweep.slow_reader_delay.is_zero() {
        tracing::warn!("Slow-reader delay only applies to the eventpipe reader; ignoring it");
    }

    Ok(RunConfig { sweep, output: cli.output.or(output.file) })
}
