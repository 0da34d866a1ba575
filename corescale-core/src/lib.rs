//! Corescale Core Library
//!
//! This crate provides the core functionality for the corescale experiment
//! harness: burst-shaped event production, the IPC event session between a
//! producer process and its consumer, consumer strategies, the core-count
//! sweep orchestrator, and result aggregation.

pub mod config;
pub mod consumer;
pub mod error;
pub mod orchestrator;
pub mod session;
pub mod stats;
pub mod threading;
pub mod timing;
pub mod workload;

pub use config::{BurstPattern, EventRate, ProducerConfig, ReaderKind, SweepConfig, ThreadCount};
pub use consumer::{ConsumerReport, ConsumerStrategy};
pub use error::{Error, Result};
pub use orchestrator::{run_sweep, CancelHandle, Cancellation, ProcessTrialExecutor, TrialExecutor};
pub use stats::{SweepReport, SweepSummary, TrialResult, TrialStatus};
