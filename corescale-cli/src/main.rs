use anyhow::Context;
use clap::Parser;
use corescale_cli::config::{self, Overrides, ProfileConfig};
use corescale_cli::output::{print_config, trial_line, SweepResults};
use corescale_core::config::{BurstPattern, ReaderKind};
use corescale_core::orchestrator::{cancel_on_ctrl_c, run_sweep, Cancellation, ProcessTrialExecutor};
use corescale_core::threading::get_core_count;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Corescale: event pipeline throughput and loss across core counts
///
/// Runs one trial per core count between --min-core and --max-core. Each trial
/// launches the producer pinned to that many cores, attaches a consumer to its
/// event session, and records how many events arrived and how many were lost.
///
/// Example usage:
///   corescale ./corescale-producer --event-rate 1000 --burst-pattern drip --duration 10
///   corescale ./corescale-producer --min-core 1 --max-core 8 --reader-type eventpipe
///   corescale --profile profiles/bolus-sweep.toml --output results.json
///
/// Command-line flags override profile values, which override the defaults.
#[derive(Parser, Debug)]
#[command(name = "corescale")]
#[command(
    version,
    about = "Core-count sweep for event pipeline throughput and loss",
    long_about = None
)]
struct Cli {
    /// Path to the corescale-producer binary
    producer: Option<PathBuf>,

    /// TOML profile with sweep settings
    #[arg(short = 'P', long)]
    profile: Option<PathBuf>,

    /// Payload size of each event in bytes [default: 100]
    #[arg(long)]
    event_size: Option<usize>,

    /// Events per second per producer thread, -1 for unbounded [default: -1]
    #[arg(long, allow_negative_numbers = true)]
    event_rate: Option<i64>,

    /// Burst pattern: drip, bolus, heavy_drip or none [default: none]
    #[arg(long)]
    burst_pattern: Option<BurstPattern>,

    /// Event reader: stream (buffered to a file) or eventpipe (live) [default: stream]
    #[arg(long)]
    reader_type: Option<ReaderKind>,

    /// Slow-reader delay in milliseconds, eventpipe reader only [default: 0]
    #[arg(long, value_name = "MS")]
    slow_reader: Option<u64>,

    /// Trial run time in seconds [default: 60]
    #[arg(long, value_name = "SECONDS")]
    duration: Option<u64>,

    /// Smallest core count of the sweep [default: logical core count]
    #[arg(long)]
    min_core: Option<usize>,

    /// Largest core count of the sweep [default: logical core count]
    #[arg(long)]
    max_core: Option<usize>,

    /// Producer threads, -1 to match each trial's core count [default: -1]
    #[arg(long, allow_negative_numbers = true)]
    threads: Option<i64>,

    /// Stop each producer after this many events
    #[arg(long)]
    event_count: Option<u64>,

    /// Request rundown records at session end [default: true]
    #[arg(long, value_name = "BOOL")]
    rundown: Option<bool>,

    /// Session buffer size in MB [default: 256]
    #[arg(long, value_name = "MB")]
    buffer_size: Option<u32>,

    /// Wait for Enter before starting each trial [default: false]
    #[arg(long, value_name = "BOOL")]
    pause: Option<bool>,

    /// Seconds to keep retrying the attach to a new producer [default: 10]
    #[arg(long, value_name = "SECONDS")]
    attach_timeout: Option<u64>,

    /// Write the JSON summary to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            producer: self.producer.clone(),
            event_size: self.event_size,
            event_rate: self.event_rate,
            burst_pattern: self.burst_pattern,
            reader: self.reader_type,
            slow_reader_ms: self.slow_reader,
            duration_secs: self.duration,
            min_core: self.min_core,
            max_core: self.max_core,
            threads: self.threads,
            event_count: self.event_count,
            rundown: self.rundown,
            buffer_size_mb: self.buffer_size,
            pause: self.pause,
            attach_timeout_secs: self.attach_timeout,
            output: self.output.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let logical_cores = get_core_count();
    let profile = cli.profile.as_ref().map(ProfileConfig::from_file).transpose()?;
    let run = config::resolve(profile, cli.overrides(), logical_cores)
        .context("Invalid sweep configuration")?;

    print_config(&run.sweep, logical_cores);

    let (handle, cancel) = Cancellation::pair();
    let signal_listener = cancel_on_ctrl_c(handle);

    let executor = ProcessTrialExecutor::new(run.sweep.clone());
    let report = run_sweep(&executor, run.sweep.core_range(), &cancel, |result| {
        println!("{}", trial_line(result));
    })
    .await;
    signal_listener.abort();

    let results = SweepResults::new(&run.sweep, &report);
    results.print_human();
    if let Some(path) = &run.output {
        results.write_json(path)?;
    }

    if report.was_cancelled() {
        anyhow::bail!("Sweep cancelled after {} completed trial(s)", report.completed());
    }
    Ok(())
}
