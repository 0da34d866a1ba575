//! Core-count sweep orchestration
//!
//! The sweep runs one trial per core count, strictly in sequence, and always
//! returns one [`TrialResult`] per core count. A trial that fails or is
//! cancelled still gets a row.

use crate::stats::{SweepReport, TrialResult};
use async_trait::async_trait;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tokio::sync::watch;

pub mod attach;
pub mod trial;

// Re-export main types
pub use attach::attach_with_backoff;
pub use trial::{ProcessTrialExecutor, START_TOKEN, STOP_GRACE, STOP_TOKEN};

/// Trigger side of a sweep cancellation
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

/// Observer side of a sweep cancellation
#[derive(Debug, Clone)]
pub struct Cancellation {
    receiver: watch::Receiver<bool>,
}

impl Cancellation {
    /// Create a linked handle and token
    pub fn pair() -> (CancelHandle, Cancellation) {
        let (sender, receiver) = watch::channel(false);
        (CancelHandle { sender: Arc::new(sender) }, Cancellation { receiver })
    }

    /// A token that never fires
    pub fn never() -> Cancellation {
        Self::pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once cancellation is requested; pends forever if it never is
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        let sender_gone = receiver.wait_for(|cancelled| *cancelled).await.is_err();
        if sender_gone {
            std::future::pending::<()>().await;
        }
    }
}

/// Cancel the sweep on Ctrl-C
pub fn cancel_on_ctrl_c(handle: CancelHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::warn!("Received Ctrl-C, cancelling the sweep");
                handle.cancel();
            }
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
    })
}

/// Runs a single trial pinned to `core_count` cores
#[async_trait]
pub trait TrialExecutor: Send + Sync {
    /// Never fails: errors are folded into the result's status
    async fn run_trial(&self, core_count: usize, cancel: &Cancellation) -> TrialResult;
}

/// Run one trial per core count in `cores`, ascending
///
/// `observer` sees each result as soon as it is recorded. Once cancellation
/// is requested, the remaining core counts are recorded as cancelled without
/// running.
pub async fn run_sweep<E, O>(
    executor: &E,
    cores: RangeInclusive<usize>,
    cancel: &Cancellation,
    mut observer: O,
) -> SweepReport
where
    E: TrialExecutor + ?Sized,
    O: FnMut(&TrialResult),
{
    let mut trials = Vec::with_capacity(cores.clone().count());

    for core_count in cores {
        let result = if cancel.is_cancelled() {
            TrialResult::cancelled(core_count)
        } else {
            tracing::info!("Starting trial with {} core(s)", core_count);
            executor.run_trial(core_count, cancel).await
        };
        tracing::debug!("Trial {} finished: {}", core_count, result.status);

        observer(&result);
        trials.push(result);
    }

    SweepReport::new(trials)
}
