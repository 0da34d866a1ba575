//! Corescale producer
//!
//! Emits synthetic events with a burst-shaped rate from N threads and
//! publishes them over an event session that the orchestrator attaches to.
//!
//! Handshake on stdin:
//! - first line: start emitting (skipped with `--no-wait`)
//! - a later `stop` line: stop early

use anyhow::{Context, Result};
use clap::Parser;
use corescale_core::config::{BurstPattern, EventRate, ProducerConfig};
use corescale_core::session::{endpoint_for_pid, SessionInfo, SessionServer};
use corescale_core::threading::{ProducerPlan, ProducerRuntime, StopSignal};
use std::io::BufRead;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Line that requests an early stop
const STOP_TOKEN: &str = "stop";

#[derive(Parser, Debug)]
#[command(name = "corescale-producer")]
#[command(version, about = "Synthetic burst-shaped event producer")]
struct Args {
    /// Number of emitting threads
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Payload size of each event in bytes
    #[arg(long, default_value_t = 100)]
    event_size: usize,

    /// Events per second per thread (-1 = unbounded)
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    event_rate: i64,

    /// Burst pattern: drip, bolus, heavy_drip or none
    #[arg(long, default_value = "none")]
    burst_pattern: BurstPattern,

    /// Run time in seconds
    #[arg(long, default_value_t = 60)]
    duration: u64,

    /// Stop after this many events across all threads
    #[arg(long)]
    event_count: Option<u64>,

    /// Listen on this socket instead of the pid-derived one
    #[arg(long)]
    diagnostic_socket: Option<PathBuf>,

    /// Start immediately instead of waiting for a start line on stdin
    #[arg(long)]
    no_wait: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn producer_config(&self) -> Result<ProducerConfig> {
        let config = ProducerConfig {
            threads: self.threads,
            event_size: self.event_size,
            event_rate: EventRate::from_raw(self.event_rate)?,
            burst_pattern: self.burst_pattern,
            duration: Duration::from_secs(self.duration),
            event_count: self.event_count,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Block until the start line arrives; EOF also starts the run
fn wait_for_start() -> Result<()> {
    let mut line = String::new();
    let read = std::io::stdin().lock().read_line(&mut line).context("Failed to read start token")?;
    if read == 0 {
        tracing::warn!("stdin closed before a start token, starting anyway");
    } else if line.trim() == STOP_TOKEN {
        anyhow::bail!("Received stop before start");
    }
    Ok(())
}

/// Request a stop when a `stop` line arrives on stdin
fn watch_stdin(stop: StopSignal) -> Result<()> {
    thread::Builder::new()
        .name("stdin-watcher".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) if line.trim() == STOP_TOKEN => {
                        tracing::info!("Stop requested on stdin");
                        stop.request_stop();
                        return;
                    }
                    Ok(_) => {}
                    Err(_) => return,
                }
            }
        })
        .context("Failed to spawn stdin watcher")?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = args.producer_config().context("Invalid producer configuration")?;

    let socket = args
        .diagnostic_socket
        .clone()
        .unwrap_or_else(|| endpoint_for_pid(std::process::id()));
    let info = SessionInfo {
        event_size: config.event_size,
        metadata: vec![
            ("pid".to_string(), std::process::id().to_string()),
            ("threads".to_string(), config.threads.to_string()),
            ("event_size".to_string(), config.event_size.to_string()),
            ("event_rate".to_string(), config.event_rate.as_raw().to_string()),
            ("burst_pattern".to_string(), config.burst_pattern.to_string()),
        ],
    };
    let server = SessionServer::bind(&socket, info)
        .with_context(|| format!("Failed to open event session at {}", socket.display()))?;

    tracing::info!(
        "Producer ready: {} thread(s), {} byte events, rate {}, pattern {}, {}s (session {})",
        config.threads,
        config.event_size,
        config.event_rate,
        config.burst_pattern,
        config.duration.as_secs(),
        socket.display()
    );

    if !args.no_wait {
        wait_for_start()?;
    }

    let stop = StopSignal::new();
    watch_stdin(stop.clone())?;

    let emitter = server.emitter();
    if !emitter.is_attached() {
        tracing::warn!("No consumer attached; events will be discarded");
    }

    let plan = ProducerPlan {
        burst_pattern: config.burst_pattern,
        event_rate: config.event_rate,
        duration: config.duration,
        event_count: config.event_count,
    };
    let runtime = ProducerRuntime::new(config.threads);
    let summary = runtime
        .run(&plan, &stop, move |_| {
            let emitter = emitter.clone();
            move || emitter.emit()
        })
        .context("Producer run failed")?;

    tracing::info!(
        "Emitted {} events in {:.2}s ({:.0} events/s)",
        summary.events_emitted,
        summary.elapsed.as_secs_f64(),
        summary.events_per_sec()
    );

    match server.finish().context("Failed to close event session")? {
        Some(stats) => tracing::info!(
            "Session delivered {} events, dropped {}",
            stats.events_sent,
            stats.events_dropped
        ),
        None => tracing::info!("No consumer attached during the run"),
    }

    Ok(())
}
