//! Core mirror engine module
//!
//! Provides the run orchestration: phase sequencing, error tagging and the
//! final report.

mod mirror;

pub use mirror::*;
