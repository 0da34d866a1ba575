//! Trial results and sweep aggregation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub mod summary;

// Re-export main types
pub use summary::{summarize, SummaryRow, SweepSummary, UNIT_SIZE_BYTES};

/// How a trial ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    Completed,
    Failed(String),
    Cancelled,
}

impl TrialStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, TrialStatus::Completed)
    }
}

impl fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrialStatus::Completed => f.write_str("completed"),
            TrialStatus::Failed(reason) => write!(f, "failed: {reason}"),
            TrialStatus::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Outcome of one core-count trial
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialResult {
    pub core_count: usize,
    pub events_collected: u64,
    pub events_lost: u64,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    pub status: TrialStatus,
}

impl TrialResult {
    /// Result of a trial that produced no counts
    pub fn without_counts(core_count: usize, status: TrialStatus) -> Self {
        Self { core_count, events_collected: 0, events_lost: 0, elapsed: Duration::ZERO, status }
    }

    pub fn failed(core_count: usize, reason: impl Into<String>) -> Self {
        Self::without_counts(core_count, TrialStatus::Failed(reason.into()))
    }

    pub fn cancelled(core_count: usize) -> Self {
        Self::without_counts(core_count, TrialStatus::Cancelled)
    }
}

/// Ordered results of a sweep, one per core count, ascending
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub trials: Vec<TrialResult>,
}

impl SweepReport {
    pub fn new(trials: Vec<TrialResult>) -> Self {
        Self { trials }
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    pub fn completed(&self) -> usize {
        self.trials.iter().filter(|t| t.status.is_completed()).count()
    }

    pub fn was_cancelled(&self) -> bool {
        self.trials.iter().any(|t| t.status == TrialStatus::Cancelled)
    }
}

/// Durations as fractional seconds in serialized reports
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
