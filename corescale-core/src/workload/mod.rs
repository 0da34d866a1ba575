//! Workload generation

pub mod burst;

// Re-export main types
pub use burst::{BurstScheduler, BurstShape, HEAVY_DRIP_SUB_BURSTS};
