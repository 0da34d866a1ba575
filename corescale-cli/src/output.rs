//! Results output formatting

use anyhow::{Context, Result};
use corescale_core::config::{SweepConfig, ThreadCount};
use corescale_core::stats::{
    summarize, SummaryRow, SweepReport, SweepSummary, TrialResult, TrialStatus,
};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Configuration echoed into the JSON report
#[derive(Debug, Clone, Serialize)]
pub struct ConfigEcho {
    pub producer: String,
    pub event_size: usize,
    pub event_rate: i64,
    pub burst_pattern: String,
    pub min_core: usize,
    pub max_core: usize,
    pub threads: i64,
    pub duration_secs: u64,
    pub event_count: Option<u64>,
    pub reader: String,
    pub slow_reader_ms: u64,
    pub buffer_size_mb: u32,
    pub rundown: bool,
}

impl From<&SweepConfig> for ConfigEcho {
    fn from(config: &SweepConfig) -> Self {
        Self {
            producer: config.producer_path.display().to_string(),
            event_size: config.event_size,
            event_rate: config.event_rate.as_raw(),
            burst_pattern: config.burst_pattern.to_string(),
            min_core: config.min_core,
            max_core: config.max_core,
            threads: config.threads.as_raw(),
            duration_secs: config.duration.as_secs(),
            event_count: config.event_count,
            reader: config.reader.to_string(),
            slow_reader_ms: config.slow_reader_delay.as_millis() as u64,
            buffer_size_mb: config.buffer_size_mb,
            rundown: config.request_rundown,
        }
    }
}

/// Sweep results: configuration, per-trial summary rows and totals
#[derive(Debug, Clone, Serialize)]
pub struct SweepResults {
    pub configuration: ConfigEcho,
    pub cancelled: bool,
    pub summary: SweepSummary,
}

impl SweepResults {
    pub fn new(config: &SweepConfig, report: &SweepReport) -> Self {
        Self {
            configuration: ConfigEcho::from(config),
            cancelled: report.was_cancelled(),
            summary: summarize(report, config.event_size),
        }
    }

    /// Print the summary table to stdout
    pub fn print_human(&self) {
        println!("\n{}", "=".repeat(60));
        println!("Corescale Sweep Results");
        println!("{}", "=".repeat(60));
        println!();
        println!(
            "{:>5}  {:>12}  {:>10}  {:>7}  {:>12}  {:>10}  {:>7}",
            "cores", "collected", "lost", "loss%", "events/s", "MB/s", "secs"
        );
        for row in &self.summary.rows {
            println!("{}", format_row(row));
        }
        println!();
        println!("Totals:");
        println!("  Collected:       {}", self.summary.total_collected);
        println!("  Lost:            {}", self.summary.total_lost);
        println!("  Loss:            {:.2}%", self.summary.total_loss_percent);
        if self.cancelled {
            println!();
            println!("Sweep was cancelled; cancelled trials have no counts.");
        }
        println!();
        println!("{}", "=".repeat(60));
    }

    /// Write results to JSON file
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file =
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        file.write_all(json.as_bytes())?;
        println!("Results written to: {}", path.display());
        Ok(())
    }
}

fn format_row(row: &SummaryRow) -> String {
    let line = format!(
        "{:>5}  {:>12}  {:>10}  {:>6.2}%  {:>12.1}  {:>10.3}  {:>7.2}",
        row.core_count,
        row.events_collected,
        row.events_lost,
        row.loss_percent,
        row.throughput,
        row.byte_rate / 1_000_000.0,
        row.elapsed_secs
    );
    match &row.status {
        TrialStatus::Completed => line,
        other => format!("{line}  ({other})"),
    }
}

/// Print the configuration banner before the sweep starts
pub fn print_config(config: &SweepConfig, logical_cores: usize) {
    println!("{}", "=".repeat(60));
    println!("Corescale Core Sweep");
    println!("{}", "=".repeat(60));
    println!("  Producer:        {}", config.producer_path.display());
    println!("  Logical cores:   {logical_cores}");
    println!(
        "  Core range:      {}..={} ({} trials)",
        config.min_core,
        config.max_core,
        config.trial_count()
    );
    match config.threads {
        ThreadCount::MatchCores => println!("  Threads:         match core count"),
        ThreadCount::Fixed(n) => println!("  Threads:         {n}"),
    }
    println!("  Event size:      {} bytes", config.event_size);
    println!("  Event rate:      {}", config.event_rate);
    println!("  Burst pattern:   {}", config.burst_pattern);
    println!("  Duration:        {}s", config.duration.as_secs());
    if let Some(count) = config.event_count {
        println!("  Event cap:       {count}");
    }
    println!("  Reader:          {}", config.reader);
    if !config.slow_reader_delay.is_zero() {
        println!("  Slow reader:     {} ms", config.slow_reader_delay.as_millis());
    }
    println!("  Buffer size:     {} MB", config.buffer_size_mb);
    println!("  Rundown:         {}", config.request_rundown);
    println!();
}

/// One line per finished trial
pub fn trial_line(result: &TrialResult) -> String {
    format!(
        "[cores={}] collected={} lost={} elapsed={:.2}s status={}",
        result.core_count,
        result.events_collected,
        result.events_lost,
        result.elapsed.as_secs_f64(),
        result.status
    )
}
