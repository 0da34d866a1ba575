//! Attaching to a freshly launched producer

use crate::session::{EventStream, EventStreamSource, SessionRequest};
use crate::{Error, Result};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use std::time::{Duration, Instant};

/// First retry delay
pub const ATTACH_INITIAL_INTERVAL: Duration = Duration::from_millis(10);

/// Largest delay between two attempts
pub const ATTACH_MAX_INTERVAL: Duration = Duration::from_millis(500);

/// Retry `try_attach` with exponential backoff until it succeeds, `timeout`
/// passes, or `producer_alive` reports the producer has exited.
///
/// `timeout` bounds the whole attach, including an attempt that connects but
/// never completes its handshake.
pub async fn attach_with_backoff<F>(
    source: &dyn EventStreamSource,
    pid: u32,
    request: &SessionRequest,
    timeout: Duration,
    mut producer_alive: F,
) -> Result<EventStream>
where
    F: FnMut() -> bool,
{
    let mut backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(ATTACH_INITIAL_INTERVAL)
        .with_max_interval(ATTACH_MAX_INTERVAL)
        .with_max_elapsed_time(Some(timeout))
        .build();
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let remaining = timeout.saturating_sub(start.elapsed());
        let attempt = tokio::time::timeout(remaining, source.try_attach(pid, request)).await;
        let err = match attempt {
            Ok(Ok(stream)) => {
                tracing::debug!(
                    "Attached to pid {} via {} after {} attempt(s)",
                    pid,
                    source.name(),
                    attempts
                );
                return Ok(stream);
            }
            Ok(Err(e)) => e,
            Err(_) => {
                return Err(Error::Attach(format!(
                    "Attach attempt {attempts} to pid {pid} did not complete within {timeout:?}"
                )));
            }
        };

        if !producer_alive() {
            return Err(Error::Producer(format!(
                "Producer {pid} exited before a consumer could attach"
            )));
        }

        match backoff.next_backoff() {
            Some(delay) => {
                tracing::trace!(
                    "Attach attempt {} to pid {} failed, retrying in {:?}: {}",
                    attempts,
                    pid,
                    delay,
                    err
                );
                tokio::time::sleep(delay).await;
            }
            None => {
                return Err(Error::Attach(format!(
                    "Gave up attaching to pid {pid} after {attempts} attempts in {timeout:?}: {err}"
                )));
            }
        }
    }
}
