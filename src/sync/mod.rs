//! Mirror phases over the two stores
//!
//! Provides the building blocks of a mirror run:
//! - Paged enumeration of the source container and destination share
//! - Per-object transfer with overwrite
//! - The mirror set of names transferred during the run
//! - Pruning of destination files absent from the mirror set

mod enumerate;
mod names;
mod reconcile;
mod transfer;

pub use enumerate::*;
pub use names::*;
pub use reconcile::*;
pub use transfer::*;
