//! Error types for Blobshare
//!
//! Every store failure is fatal to a mirror run. Errors are returned as
//! values and only the top-level handler in `main` turns them into an exit
//! code, so library callers and tests can inspect where a run stopped.

use crate::core::MirrorPhase;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Blobshare operations
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Missing or invalid configuration, detected before any store call
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error on a local path
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Listing a page of the source container failed
    #[error("Failed to list source container: {message}")]
    SourceList { message: String },

    /// Opening or reading a source object failed
    #[error("Failed to read source object '{name}': {message}")]
    SourceRead { name: String, message: String },

    /// Writing a destination file failed
    #[error("Failed to write destination file '{name}': {message}")]
    DestinationWrite { name: String, message: String },

    /// Listing a page of the destination share failed
    #[error("Failed to list destination directory '{directory}': {message}")]
    DestinationList { directory: String, message: String },

    /// Deleting a destination file failed
    #[error("Failed to delete destination file '{name}': {message}")]
    DestinationDelete { name: String, message: String },

    /// Object name that cannot be mapped onto the destination
    #[error("Invalid object name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Report serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Fault injected by a test store
    #[error("Injected failure: {0}")]
    Injected(String),

    /// The run was aborted while in the given phase
    #[error("Mirror aborted during {phase}: {source}")]
    Aborted {
        phase: MirrorPhase,
        #[source]
        source: Box<MirrorError>,
    },
}

impl MirrorError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a source listing error
    pub fn source_list(message: impl ToString) -> Self {
        Self::SourceList {
            message: message.to_string(),
        }
    }

    /// Create a source read error
    pub fn source_read(name: impl Into<String>, message: impl ToString) -> Self {
        Self::SourceRead {
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// Create a destination write error
    pub fn destination_write(name: impl Into<String>, message: impl ToString) -> Self {
        Self::DestinationWrite {
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// Create a destination listing error
    pub fn destination_list(directory: impl Into<String>, message: impl ToString) -> Self {
        Self::DestinationList {
            directory: directory.into(),
            message: message.to_string(),
        }
    }

    /// Create a destination delete error
    pub fn destination_delete(name: impl Into<String>, message: impl ToString) -> Self {
        Self::DestinationDelete {
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// Create an invalid name error
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Tag this error with the phase the run was in.
    ///
    /// Already-tagged errors keep their original phase.
    pub fn in_phase(self, phase: MirrorPhase) -> Self {
        match self {
            Self::Aborted { .. } => self,
            other => Self::Aborted {
                phase,
                source: Box::new(other),
            },
        }
    }

    /// Phase the run was aborted in, if this error came out of a run
    pub fn phase(&self) -> Option<MirrorPhase> {
        match self {
            Self::Aborted { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// The underlying error, unwrapping any phase tag
    pub fn root(&self) -> &MirrorError {
        match self {
            Self::Aborted { source, .. } => source.root(),
            other => other,
        }
    }

    /// Object or file name associated with this error, if any
    pub fn name(&self) -> Option<&str> {
        match self.root() {
            Self::SourceRead { name, .. }
            | Self::DestinationWrite { name, .. }
            | Self::DestinationDelete { name, .. }
            | Self::InvalidName { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Check if this is a startup configuration problem
    pub fn is_config(&self) -> bool {
        matches!(self.root(), Self::Config(_))
    }
}

/// Result type alias for Blobshare operations
pub type Result<T> = std::result::Result<T, MirrorError>;

impl From<std::io::Error> for MirrorError {
    fn from(err: std::io::Error) -> Self {
        MirrorError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| MirrorError::io(path, e))
    }
}
