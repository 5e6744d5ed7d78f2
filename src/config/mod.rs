//! Configuration module for Blobshare
//!
//! Provides the CLI arguments, environment fallbacks and the runtime
//! configuration of a mirror run.

mod settings;

pub use settings::*;
