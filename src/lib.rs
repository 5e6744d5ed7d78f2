//! # Blobshare - One-Way Container to Share Mirror
//!
//! Blobshare makes a destination file share an exact mirror of a source
//! object container. Every source object is written to the share under the
//! same name, overwriting what is there, and every share file with no source
//! object of the same name is deleted afterwards.
//!
//! ## Features
//!
//! - **Paged Enumeration**: Both stores are listed lazily with their own continuation markers
//! - **Streaming Transfer**: Object bodies flow straight into chunked, parallel destination writes
//! - **Safe Pruning**: Deletion starts only after every transfer has succeeded
//! - **Configurable Scope**: Prune the share root only, or the whole tree
//! - **Fail-Fast**: The first store error aborts the run, tagged with its phase
//!
//! ## Quick Start
//!
//! ```no_run
//! use blobshare::config::MirrorOptions;
//! use blobshare::core::MirrorEngine;
//! use blobshare::storage::local::{LocalShare, LocalSource};
//! use std::sync::Arc;
//!
//! # async fn example() -> blobshare::Result<()> {
//! let engine = MirrorEngine::new(
//!     Arc::new(LocalSource::new("/data/export")),
//!     Arc::new(LocalShare::new("/mnt/share")),
//!     MirrorOptions::default(),
//! );
//!
//! let report = engine.execute().await?;
//! report.print_summary();
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom Stores
//!
//! Any backend implementing [`storage::SourceStore`] or
//! [`storage::DestinationStore`] can take part in a run. The in-memory
//! stores in [`storage::memory`] record every call and support fault
//! injection, which makes them the usual choice for tests.
//!
//! ```no_run
//! use blobshare::prelude::*;
//! use blobshare::storage::memory::{MemoryDestination, MemorySource};
//! use std::sync::Arc;
//!
//! # async fn example() -> blobshare::Result<()> {
//! let source = Arc::new(MemorySource::with_objects([("a.txt", "hello")]));
//! let share = Arc::new(MemoryDestination::with_files([("stale.txt", "old")]));
//!
//! let report = MirrorEngine::new(source, share.clone(), MirrorOptions::default())
//!     .with_observer(Arc::new(LineReporter::stdout()))
//!     .execute()
//!     .await?;
//!
//! assert_eq!(report.deleted, vec!["stale.txt"]);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod error;
pub mod progress;
pub mod storage;
pub mod sync;

// Re-export commonly used types
pub use crate::config::{MirrorConfig, MirrorOptions, PruneScope, TransferStrategy};
pub use crate::core::{MirrorEngine, MirrorPhase, MirrorReport};
pub use crate::error::{MirrorError, Result};
pub use crate::progress::MirrorObserver;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use blobshare::prelude::*;
    //! ```

    pub use crate::config::{MirrorConfig, MirrorOptions, PruneScope, TransferStrategy};
    pub use crate::core::{MirrorEngine, MirrorPhase, MirrorReport};
    pub use crate::error::{MirrorError, Result};
    pub use crate::progress::{LineReporter, MirrorObserver, NullObserver, ProgressReporter};
    pub use crate::storage::{DestinationStore, ObjectRef, SourceStore, WriteOptions};
    pub use crate::sync::{MirrorSet, NameNormalizer, Reconciler, TransferEngine};
}
