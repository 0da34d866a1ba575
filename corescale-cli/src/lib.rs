//! Corescale CLI library
//!
//! This library exposes configuration and output types for testing.

pub mod config;
pub mod output;
