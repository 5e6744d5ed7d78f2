//! Progress reporting module
//!
//! Observers receive mirror run events (objects discovered, bytes written,
//! orphans scheduled for deletion) and render them as text lines or
//! progress bars.

mod reporter;

pub use reporter::*;
