//! One trial against a real producer process

use super::{attach_with_backoff, Cancellation, TrialExecutor};
use crate::config::SweepConfig;
use crate::session::{EventStreamSource, IpcStreamSource};
use crate::stats::{TrialResult, TrialStatus};
use crate::threading::{platform_affinity, AffinityControl};
use crate::{Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};

/// Line written to the producer's stdin to release it
pub const START_TOKEN: &str = "start";

/// Line written to the producer's stdin to request an early stop
pub const STOP_TOKEN: &str = "stop";

/// How long a cancelled producer gets to exit before it is killed
pub const STOP_GRACE: Duration = Duration::from_secs(2);

/// Launches, pins and consumes a producer process per trial
pub struct ProcessTrialExecutor {
    config: SweepConfig,
    source: Arc<dyn EventStreamSource>,
    affinity: Box<dyn AffinityControl>,
}

impl ProcessTrialExecutor {
    pub fn new(config: SweepConfig) -> Self {
        Self { config, source: Arc::new(IpcStreamSource::new()), affinity: platform_affinity() }
    }

    pub fn with_source(mut self, source: Arc<dyn EventStreamSource>) -> Self {
        self.source = source;
        self
    }

    pub fn with_affinity(mut self, affinity: Box<dyn AffinityControl>) -> Self {
        self.affinity = affinity;
        self
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    fn launch(&self, core_count: usize) -> Result<Child> {
        let args = self.config.producer_config(core_count).to_args();
        tracing::debug!("Launching {} {}", self.config.producer_path.display(), args.join(" "));

        Command::new(&self.config.producer_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Producer(format!(
                    "Failed to launch {}: {e}",
                    self.config.producer_path.display()
                ))
            })
    }

    /// Best-effort pinning; the trial runs unpinned if this fails
    fn pin(&self, pid: u32, core_count: usize) {
        if let Err(e) = self.affinity.pin_process(pid, core_count) {
            tracing::warn!(
                "Could not pin producer {} to {} core(s) ({}): {:#}",
                pid,
                core_count,
                self.affinity.name(),
                e
            );
        }
        if let Err(e) = self.affinity.raise_priority(pid) {
            tracing::warn!("Could not raise producer {} priority: {:#}", pid, e);
        }
    }

    async fn execute(&self, core_count: usize, cancel: &Cancellation) -> Result<TrialResult> {
        let mut child = self.launch(core_count)?;
        let pid = child
            .id()
            .ok_or_else(|| {
                Error::Producer("Producer exited before it could be pinned".to_string())
            })?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Producer("Producer stdin is not piped".to_string()))?;

        self.pin(pid, core_count);

        let request = self.config.session_request();
        let attached = tokio::select! {
            attached = attach_with_backoff(
                self.source.as_ref(),
                pid,
                &request,
                self.config.attach_timeout,
                || matches!(child.try_wait(), Ok(None)),
            ) => Some(attached),
            _ = cancel.cancelled() => None,
        };
        let stream = match attached {
            Some(Ok(stream)) => stream,
            Some(Err(e)) => {
                reap(&mut child).await;
                return Err(e);
            }
            None => {
                stop_producer(&mut child, &mut stdin).await;
                return Ok(TrialResult::cancelled(core_count));
            }
        };

        if self.config.pause {
            wait_for_operator(core_count, pid).await?;
        }

        send_line(&mut stdin, START_TOKEN)
            .await
            .map_err(|e| {
                Error::Producer(format!("Failed to send start token to producer {pid}: {e}"))
            })?;

        let strategy = self.config.consumer_strategy();
        let mut consumer = tokio::spawn(async move { strategy.consume(stream).await });

        let exited = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };
        let Some(status) = exited else {
            consumer.abort();
            stop_producer(&mut child, &mut stdin).await;
            return Ok(TrialResult::cancelled(core_count));
        };
        let status = status?;

        let joined = tokio::select! {
            joined = &mut consumer => Some(joined),
            _ = cancel.cancelled() => None,
        };
        let Some(joined) = joined else {
            consumer.abort();
            return Ok(TrialResult::cancelled(core_count));
        };
        let report = joined??;

        let status = if status.success() {
            TrialStatus::Completed
        } else {
            TrialStatus::Failed(format!("producer exited with {status}"))
        };
        if !report.complete {
            tracing::warn!(
                "Trial {} event stream ended without an end-of-stream record",
                core_count
            );
        }

        Ok(TrialResult {
            core_count,
            events_collected: report.events_collected,
            events_lost: report.events_lost,
            elapsed: report.elapsed,
            status,
        })
    }
}

#[async_trait]
impl TrialExecutor for ProcessTrialExecutor {
    async fn run_trial(&self, core_count: usize, cancel: &Cancellation) -> TrialResult {
        match self.execute(core_count, cancel).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Trial with {} core(s) failed: {}", core_count, e);
                TrialResult::failed(core_count, e.to_string())
            }
        }
    }
}

/// Ask the producer to stop, then kill it after the grace period
async fn stop_producer(child: &mut Child, stdin: &mut ChildStdin) {
    if let Err(e) = send_line(stdin, STOP_TOKEN).await {
        tracing::debug!("Could not send stop token: {}", e);
    }

    match tokio::time::timeout(STOP_GRACE, child.wait()).await {
        Ok(_) => tracing::debug!("Producer stopped within the grace period"),
        Err(_) => {
            tracing::warn!("Producer ignored the stop request for {:?}, killing it", STOP_GRACE);
            reap(child).await;
        }
    }
}

async fn send_line(stdin: &mut ChildStdin, token: &str) -> std::io::Result<()> {
    let line = format!("{token}\n");
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}

async fn reap(child: &mut Child) {
    if let Err(e) = child.kill().await {
        tracing::debug!("Killing producer failed: {}", e);
    }
}

async fn wait_for_operator(core_count: usize, pid: u32) -> Result<()> {
    eprintln!("Producer {pid} for {core_count} core(s) is attached. Press Enter to start...");
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| ())
    })
    .await??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BurstPattern, EventRate, ReaderKind, ThreadCount};
    use crate::threading::NoAffinity;
    use std::path::{Path, PathBuf};
    use std::time::Instant;

    fn sweep_config(producer: &Path) -> SweepConfig {
        SweepConfig {
            producer_path: producer.to_path_buf(),
            event_size: 100,
            event_rate: EventRate::PerSecond(10),
            burst_pattern: BurstPattern::Drip,
            min_core: 1,
            max_core: 1,
            threads: ThreadCount::MatchCores,
            duration: Duration::from_secs(1),
            event_count: None,
            reader: ReaderKind::Buffered,
            slow_reader_delay: Duration::ZERO,
            buffer_size_mb: 16,
            request_rundown: true,
            pause: false,
            attach_timeout: Duration::from_secs(5),
        }
    }

    fn false_binary() -> Option<PathBuf> {
        ["/bin/false", "/usr/bin/false"].iter().map(PathBuf::from).find(|p| p.is_file())
    }

    #[tokio::test]
    async fn test_missing_producer_fails_trial() {
        let config = sweep_config(Path::new("/nonexistent/corescale-producer"));
        let executor = ProcessTrialExecutor::new(config).with_affinity(Box::new(NoAffinity));
        let result = executor.run_trial(1, &Cancellation::never()).await;

        assert_eq!(result.core_count, 1);
        assert_eq!(result.events_collected, 0);
        match result.status {
            TrialStatus::Failed(reason) => assert!(reason.contains("Failed to launch"), "{reason}"),
            other => panic!("expected a failed trial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_producer_exit_before_attach_fails_fast() {
        let Some(producer) = false_binary() else {
            println!("Skipping: no false(1) binary on this system");
            return;
        };
        let executor =
            ProcessTrialExecutor::new(sweep_config(&producer)).with_affinity(Box::new(NoAffinity));

        let start = Instant::now();
        let result = executor.run_trial(1, &Cancellation::never()).await;

        assert!(matches!(result.status, TrialStatus::Failed(_)), "{:?}", result.status);
        assert!(start.elapsed() < Duration::from_secs(4), "took {:?}", start.elapsed());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let Some(producer) = false_binary() else {
            return;
        };
        let (handle, cancel) = Cancellation::pair();
        handle.cancel();

        let executor =
            ProcessTrialExecutor::new(sweep_config(&producer)).with_affinity(Box::new(NoAffinity));
        let result = executor.run_trial(2, &cancel).await;
        // Either the cancel or the early exit wins the race; both end the trial
        assert!(!result.status.is_completed());
        assert_eq!(result.core_count, 2);
    }
}
