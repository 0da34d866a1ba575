//! Consumer strategies for an attached event stream
//!
//! - `Streaming` decodes records as they arrive and can inject a periodic
//!   delay to emulate a slow reader.
//! - `Buffered` copies the raw stream into an anonymous temporary file while
//!   the producer runs and decodes the copy afterwards.

use crate::session::{read_record_async, EventStream, RecordReader, StreamTally};
use crate::Result;
use std::io::{Seek, SeekFrom};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;

/// Minimum time between two slow-reader delays
pub const SLOW_READER_INTERVAL: Duration = Duration::from_millis(750);

/// What one consumer run observed
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerReport {
    pub events_collected: u64,
    pub events_lost: u64,
    pub elapsed: Duration,
    pub rundown: Vec<String>,
    /// The stream ended with an end-of-stream record
    pub complete: bool,
}

/// How the orchestrator reads a trial's event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerStrategy {
    Streaming { slow_reader_delay: Duration },
    Buffered,
}

impl ConsumerStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            ConsumerStrategy::Streaming { .. } => "streaming",
            ConsumerStrategy::Buffered => "buffered",
        }
    }

    /// Read `stream` to its end and report counts
    pub async fn consume(&self, stream: EventStream) -> Result<ConsumerReport> {
        match *self {
            ConsumerStrategy::Streaming { slow_reader_delay } => {
                consume_streaming(stream, slow_reader_delay).await
            }
            ConsumerStrategy::Buffered => consume_buffered(stream).await,
        }
    }
}

async fn consume_streaming(
    mut stream: EventStream,
    slow_reader_delay: Duration,
) -> Result<ConsumerReport> {
    let start = Instant::now();
    let mut last_throttle = start;
    let mut tally = StreamTally::default();

    while let Some(record) = read_record_async(&mut stream).await? {
        if tally.observe(record) {
            break;
        }
        if !slow_reader_delay.is_zero() && last_throttle.elapsed() >= SLOW_READER_INTERVAL {
            tokio::time::sleep(slow_reader_delay).await;
            last_throttle = Instant::now();
        }
    }

    Ok(tally.into_report(start.elapsed()))
}

async fn consume_buffered(mut stream: EventStream) -> Result<ConsumerReport> {
    let start = Instant::now();
    let mut file = tokio::fs::File::from_std(tempfile::tempfile()?);
    let copied = tokio::io::copy(&mut stream, &mut file).await?;
    file.flush().await?;
    let elapsed = start.elapsed();
    tracing::debug!("Buffered {} bytes of event stream in {:?}", copied, elapsed);

    let mut file = file.into_std().await;
    let tally = tokio::task::spawn_blocking(move || -> Result<StreamTally> {
        file.seek(SeekFrom::Start(0))?;
        let mut reader = RecordReader::new(std::io::BufReader::new(file));
        let mut tally = StreamTally::default();
        while let Some(record) = reader.next_record()? {
            if tally.observe(record) {
                break;
            }
        }
        Ok(tally)
    })
    .await??;

    Ok(tally.into_report(elapsed))
}
