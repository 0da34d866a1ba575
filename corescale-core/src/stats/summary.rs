//! Throughput, byte rate and loss summaries over a sweep

use super::{SweepReport, TrialResult, TrialStatus};
use serde::Serialize;

/// Bytes per payload unit; event bodies are ASCII
pub const UNIT_SIZE_BYTES: u64 = 1;

/// Summary of one trial
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub core_count: usize,
    pub events_collected: u64,
    pub events_lost: u64,
    pub elapsed_secs: f64,
    /// Collected events per second
    pub throughput: f64,
    /// Collected payload bytes per second
    pub byte_rate: f64,
    /// Share of events lost, in [0, 100]
    pub loss_percent: f64,
    pub status: TrialStatus,
}

impl SummaryRow {
    pub fn from_result(result: &TrialResult, event_size: usize) -> Self {
        let secs = result.elapsed.as_secs_f64();
        let (throughput, byte_rate) = if secs > 0.0 {
            let collected = result.events_collected as f64;
            (
                collected / secs,
                collected * event_size as f64 * UNIT_SIZE_BYTES as f64 / secs,
            )
        } else {
            (0.0, 0.0)
        };

        Self {
            core_count: result.core_count,
            events_collected: result.events_collected,
            events_lost: result.events_lost,
            elapsed_secs: secs,
            throughput,
            byte_rate,
            loss_percent: loss_percent(result.events_collected, result.events_lost),
            status: result.status.clone(),
        }
    }
}

/// Whole-sweep summary: per-trial rows plus totals
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepSummary {
    pub event_size: usize,
    pub rows: Vec<SummaryRow>,
    pub total_collected: u64,
    pub total_lost: u64,
    pub total_loss_percent: f64,
}

/// lost / (collected + lost) as a percentage; 0 when nothing was seen
pub fn loss_percent(collected: u64, lost: u64) -> f64 {
    let seen = collected as f64 + lost as f64;
    if seen == 0.0 {
        0.0
    } else {
        (lost as f64 / seen * 100.0).clamp(0.0, 100.0)
    }
}

/// Summarize a sweep, rows ascending by core count
pub fn summarize(report: &SweepReport, event_size: usize) -> SweepSummary {
    let mut rows: Vec<SummaryRow> =
        report.trials.iter().map(|result| SummaryRow::from_result(result, event_size)).collect();
    rows.sort_by_key(|row| row.core_count);

    let total_collected = rows.iter().map(|row| row.events_collected).sum();
    let total_lost = rows.iter().map(|row| row.events_lost).sum();

    SweepSummary {
        event_size,
        rows,
        total_collected,
        total_lost,
        total_loss_percent: loss_percent(total_collected, total_lost),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn trial(core_count: usize, collected: u64, lost: u64, elapsed_ms: u64) -> TrialResult {
        TrialResult {
            core_count,
            events_collected: collected,
            events_lost: lost,
            elapsed: Duration::from_millis(elapsed_ms),
            status: TrialStatus::Completed,
        }
    }

    #[test]
    fn test_row_rates() {
        let row = SummaryRow::from_result(&trial(2, 1000, 0, 2000), 100);
        assert_eq!(row.throughput, 500.0);
        assert_eq!(row.byte_rate, 50_000.0);
        assert_eq!(row.loss_percent, 0.0);
        assert_eq!(row.elapsed_secs, 2.0);
    }

    #[test]
    fn test_zero_elapsed_gives_zero_rates() {
        let row = SummaryRow::from_result(&trial(1, 1000, 10, 0), 100);
        assert_eq!(row.throughput, 0.0);
        assert_eq!(row.byte_rate, 0.0);
    }

    #[test]
    fn test_loss_percent_bounds() {
        assert_eq!(loss_percent(0, 0), 0.0);
        assert_eq!(loss_percent(0, 5), 100.0);
        assert_eq!(loss_percent(75, 25), 25.0);
        assert_eq!(loss_percent(u64::MAX, u64::MAX), 50.0);
        for (collected, lost) in [(1, 0), (3, 7), (1_000_000, 1), (0, 1)] {
            let pct = loss_percent(collected, lost);
            assert!((0.0..=100.0).contains(&pct), "{collected}/{lost} -> {pct}");
        }
    }

    #[test]
    fn test_rows_ascending_with_totals() {
        let report = SweepReport::new(vec![
            trial(3, 300, 100, 1000),
            trial(1, 100, 0, 1000),
            TrialResult::failed(2, "attach timed out"),
            trial(4, 400, 0, 1000),
        ]);
        let summary = summarize(&report, 100);

        let cores: Vec<usize> = summary.rows.iter().map(|row| row.core_count).collect();
        assert_eq!(cores, vec![1, 2, 3, 4]);
        assert_eq!(summary.total_collected, 800);
        assert_eq!(summary.total_lost, 100);
        assert!((summary.total_loss_percent - 100.0 / 9.0).abs() < 1e-9);
        assert!(matches!(summary.rows[1].status, TrialStatus::Failed(_)));
    }

    #[test]
    fn test_summary_serializes() {
        let summary = summarize(&SweepReport::new(vec![trial(1, 10, 0, 1000)]), 8);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["rows"][0]["throughput"], 10.0);
        assert_eq!(json["rows"][0]["status"], "completed");
        assert_eq!(json["event_size"], 8);
    }
}
