//! Object transfer from source to destination
//!
//! One object at a time: open the source stream, hand it to the destination
//! write (which chunks and parallelizes internally), and record the name in
//! the mirror set only once the write has succeeded.

use crate::config::TransferStrategy;
use crate::error::{MirrorError, Result};
use crate::progress::MirrorObserver;
use crate::storage::{DestinationStore, ObjectRef, ObjectStream, SourceStore, WriteOptions, WriteProgress};
use crate::sync::{MirrorSet, NameNormalizer};
use serde::{Deserialize, Serialize};

/// Outcome of a single object transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    /// Object name
    pub name: String,
    /// Bytes written to the destination
    pub bytes: u64,
}

/// Forwards destination write progress to the observer for one object
struct ObjectProgress<'a> {
    name: &'a str,
    total: Option<u64>,
    observer: &'a dyn MirrorObserver,
}

impl WriteProgress for ObjectProgress<'_> {
    fn bytes_written(&self, cumulative: u64) {
        self.observer
            .on_bytes_written(self.name, cumulative, self.total);
    }
}

/// Copies source objects into the destination and accumulates the mirror set
pub struct TransferEngine<'a> {
    source: &'a dyn SourceStore,
    destination: &'a dyn DestinationStore,
    options: WriteOptions,
    strategy: TransferStrategy,
    observer: &'a dyn MirrorObserver,
    mirrored: MirrorSet,
    objects: usize,
    bytes_total: u64,
}

impl<'a> TransferEngine<'a> {
    /// Create a new transfer engine
    pub fn new(
        source: &'a dyn SourceStore,
        destination: &'a dyn DestinationStore,
        observer: &'a dyn MirrorObserver,
    ) -> Self {
        Self {
            source,
            destination,
            options: WriteOptions::default(),
            strategy: TransferStrategy::default(),
            observer,
            mirrored: MirrorSet::default(),
            objects: 0,
            bytes_total: 0,
        }
    }

    /// Set destination write attributes and tuning
    pub fn with_write_options(mut self, options: WriteOptions) -> Self {
        self.options = options;
        self
    }

    /// Set how content moves between the stores
    pub fn with_strategy(mut self, strategy: TransferStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the normalizer used for the mirror set
    pub fn with_normalizer(mut self, normalizer: NameNormalizer) -> Self {
        self.mirrored = MirrorSet::new(normalizer);
        self
    }

    /// Transfer one object, overwriting the destination entry of the same name
    pub async fn transfer(&mut self, object: &ObjectRef) -> Result<TransferResult> {
        let stream = self.source.open_read(object).await?;
        let total = stream.size().or(object.size);

        let content = match self.strategy {
            TransferStrategy::Streaming => stream,
            TransferStrategy::Buffered => {
                let data = stream
                    .read_to_end()
                    .await
                    .map_err(|e| MirrorError::source_read(&object.name, e))?;
                ObjectStream::from_bytes(data)
            }
        };

        let progress = ObjectProgress {
            name: &object.name,
            total,
            observer: self.observer,
        };
        let bytes = self
            .destination
            .write_overwrite(&object.name, content, &self.options, &progress)
            .await?;

        self.mirrored.insert(&object.name);
        self.objects += 1;
        self.bytes_total += bytes;

        let result = TransferResult {
            name: object.name.clone(),
            bytes,
        };
        self.observer.on_transfer_complete(&result);
        Ok(result)
    }

    /// Objects transferred so far
    pub fn transferred(&self) -> usize {
        self.objects
    }

    /// Bytes transferred so far
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_total
    }

    /// Finish the transfer phase and hand over the completed mirror set
    pub fn into_mirror_set(self) -> MirrorSet {
        self.mirrored
    }
}
