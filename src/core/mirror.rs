//! Mirror engine
//!
//! Drives one run through its phases:
//! `EnumerateSource -> Transfer -> EnumerateDestination -> Prune -> Done`.
//! Any error moves the run to `Aborted`; the error carries the phase it
//! happened in and nothing further is attempted.

use crate::config::MirrorOptions;
use crate::error::Result;
use crate::progress::{MirrorObserver, NullObserver};
use crate::storage::{DestinationStore, SourceStore};
use crate::sync::{Reconciler, SourceEnumerator, TransferEngine};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Phase of a mirror run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorPhase {
    /// Listing the source container
    EnumerateSource,
    /// Copying objects into the destination
    Transfer,
    /// Listing the destination share
    EnumerateDestination,
    /// Deleting orphans
    Prune,
    /// Run completed
    Done,
    /// Run stopped on an error
    Aborted,
}

impl fmt::Display for MirrorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::EnumerateSource => "source enumeration",
            Self::Transfer => "transfer",
            Self::EnumerateDestination => "destination enumeration",
            Self::Prune => "prune",
            Self::Done => "done",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Mirror run result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorReport {
    /// Objects transferred
    pub objects_transferred: u64,
    /// Bytes transferred
    pub bytes_transferred: u64,
    /// Source listing pages fetched
    pub source_pages: usize,
    /// Destination entries listed
    pub entries_scanned: usize,
    /// Destination files kept
    pub entries_kept: usize,
    /// Destination directories skipped
    pub directories_skipped: usize,
    /// Files deleted
    pub deleted: Vec<String>,
    /// Total duration
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

impl MirrorReport {
    /// Average throughput in bytes/second
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.bytes_transferred as f64 / secs
        } else {
            0.0
        }
    }

    /// Print summary to console
    pub fn print_summary(&self) {
        println!("\n=== Mirror Summary ===");
        println!("Objects copied:  {}", self.objects_transferred);
        println!(
            "Bytes copied:    {}",
            humansize::format_size(self.bytes_transferred, humansize::BINARY)
        );
        println!("Entries scanned: {}", self.entries_scanned);
        println!("Files deleted:   {}", self.deleted.len());
        println!(
            "Duration:        {}",
            humantime::format_duration(Duration::from_millis(self.duration.as_millis() as u64))
        );
        println!(
            "Throughput:      {}/s",
            humansize::format_size(self.throughput() as u64, humansize::BINARY)
        );

        if !self.deleted.is_empty() {
            println!("\nDeleted:");
            for name in &self.deleted {
                println!("  {}", name);
            }
        }
    }
}

/// Main mirror engine
pub struct MirrorEngine {
    source: Arc<dyn SourceStore>,
    destination: Arc<dyn DestinationStore>,
    options: MirrorOptions,
    observer: Arc<dyn MirrorObserver>,
}

impl MirrorEngine {
    /// Create a new mirror engine
    pub fn new(
        source: Arc<dyn SourceStore>,
        destination: Arc<dyn DestinationStore>,
        options: MirrorOptions,
    ) -> Self {
        Self {
            source,
            destination,
            options,
            observer: Arc::new(NullObserver),
        }
    }

    /// Set the progress observer
    pub fn with_observer(mut self, observer: Arc<dyn MirrorObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Options this engine runs with
    pub fn options(&self) -> &MirrorOptions {
        &self.options
    }

    /// Execute one mirror run
    pub async fn execute(&self) -> Result<MirrorReport> {
        let start_time = Instant::now();
        let observer = self.observer.as_ref();
        let mut report = MirrorReport::default();

        match self.run(&mut report).await {
            Ok(()) => {
                report.duration = start_time.elapsed();
                observer.on_phase(MirrorPhase::Done);
                observer.on_finish(&report);
                tracing::info!(
                    "Mirror complete: {} objects, {} deleted in {:.2?}",
                    report.objects_transferred,
                    report.deleted.len(),
                    report.duration
                );
                Ok(report)
            }
            Err(e) => {
                observer.on_phase(MirrorPhase::Aborted);
                tracing::error!("Mirror aborted: {}", e);
                Err(e)
            }
        }
    }

    async fn run(&self, report: &mut MirrorReport) -> Result<()> {
        let source = self.source.as_ref();
        let destination = self.destination.as_ref();
        let observer = self.observer.as_ref();

        // Source listing and transfer alternate page by page; each object is
        // written before the next one is opened.
        observer.on_phase(MirrorPhase::EnumerateSource);
        tracing::info!("Enumerating {}", source.describe());

        let mut transfer = TransferEngine::new(source, destination, observer)
            .with_write_options(self.options.write.clone())
            .with_strategy(self.options.strategy)
            .with_normalizer(self.options.normalizer);
        let mut objects = SourceEnumerator::new(source);
        let mut transferring = false;

        while let Some(page) = objects
            .next_page()
            .await
            .map_err(|e| e.in_phase(MirrorPhase::EnumerateSource))?
        {
            if !transferring && !page.is_empty() {
                transferring = true;
                observer.on_phase(MirrorPhase::Transfer);
            }
            for object in page {
                observer.on_object_discovered(&object);
                transfer
                    .transfer(&object)
                    .await
                    .map_err(|e| e.in_phase(MirrorPhase::Transfer))?;
            }
        }

        report.source_pages = objects.pages_fetched();
        report.objects_transferred = transfer.transferred() as u64;
        report.bytes_transferred = transfer.bytes_transferred();
        tracing::info!(
            "Transferred {} objects ({}) from {} pages",
            report.objects_transferred,
            humansize::format_size(report.bytes_transferred, humansize::BINARY),
            report.source_pages
        );

        // Every transfer has completed; the set is frozen from here on.
        let keep = transfer.into_mirror_set();

        observer.on_phase(MirrorPhase::EnumerateDestination);
        tracing::info!("Enumerating {}", destination.describe());
        let reconciler = Reconciler::new(destination, self.options.prune_scope, observer);
        let mut summary = reconciler
            .scan(&keep)
            .await
            .map_err(|e| e.in_phase(MirrorPhase::EnumerateDestination))?;

        report.entries_scanned = summary.scanned;
        report.entries_kept = summary.kept;
        report.directories_skipped = summary.skipped_directories;

        observer.on_phase(MirrorPhase::Prune);
        let pruned = reconciler.delete_orphans(&mut summary).await;
        report.deleted = summary.deleted;
        pruned.map_err(|e| e.in_phase(MirrorPhase::Prune))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{MemoryDestination, MemorySource};

    fn engine(source: &Arc<MemorySource>, share: &Arc<MemoryDestination>) -> MirrorEngine {
        MirrorEngine::new(
            Arc::clone(source) as Arc<dyn SourceStore>,
            Arc::clone(share) as Arc<dyn DestinationStore>,
            MirrorOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_reference_scenario() {
        let source = Arc::new(MemorySource::with_objects([("a.txt", "hello"), ("b.txt", "world")]));
        let share = Arc::new(MemoryDestination::with_files([("b.txt", "old"), ("c.txt", "stale")]));

        let report = engine(&source, &share).execute().await.unwrap();

        let files = share.snapshot();
        assert_eq!(files.len(), 2);
        assert_eq!(files["a.txt"], b"hello");
        assert_eq!(files["b.txt"], b"world");
        assert_eq!(report.objects_transferred, 2);
        assert_eq!(report.bytes_transferred, 10);
        assert_eq!(report.deleted, vec!["c.txt"]);
    }

    #[tokio::test]
    async fn test_no_delete_before_all_transfers() {
        let source = Arc::new(MemorySource::with_objects([("a", "1"), ("b", "2")]).with_page_size(1));
        let share = Arc::new(MemoryDestination::with_files([("z", "stale")]));

        engine(&source, &share).execute().await.unwrap();

        let writes = share.writes();
        let last_write = share
            .calls()
            .iter()
            .rposition(|c| matches!(c, crate::storage::memory::StoreCall::Write(_)))
            .unwrap();
        let first_delete = share
            .calls()
            .iter()
            .position(|c| matches!(c, crate::storage::memory::StoreCall::Delete(_)))
            .unwrap();
        assert_eq!(writes, vec!["a", "b"]);
        assert!(last_write < first_delete);
    }

    #[tokio::test]
    async fn test_read_failure_aborts_in_transfer() {
        let source = Arc::new(MemorySource::with_objects([
            ("o1", "1"),
            ("o2", "2"),
            ("o3", "3"),
            ("o4", "4"),
            ("o5", "5"),
        ]));
        source.fail_read("o3");
        let share = Arc::new(MemoryDestination::with_files([("stale", "x")]));

        let err = engine(&source, &share).execute().await.unwrap_err();

        assert_eq!(err.phase(), Some(MirrorPhase::Transfer));
        assert_eq!(err.name(), Some("o3"));
        assert_eq!(source.reads(), vec!["o1", "o2", "o3"]);
        assert!(share.get("o4").is_none());
        assert!(share.deletes().is_empty());
        assert!(share.get("stale").is_some());
    }

    #[tokio::test]
    async fn test_list_failure_aborts_in_source_enumeration() {
        let source = Arc::new(MemorySource::with_objects([("a", "1"), ("b", "2")]).with_page_size(1));
        source.fail_list_page(1);
        let share = Arc::new(MemoryDestination::new());

        let err = engine(&source, &share).execute().await.unwrap_err();

        assert_eq!(err.phase(), Some(MirrorPhase::EnumerateSource));
        assert_eq!(share.writes(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_destination_failures_are_tagged() {
        let source = Arc::new(MemorySource::new());
        let share = Arc::new(MemoryDestination::with_files([("x", "1")]));
        share.fail_list_page(0);
        let err = engine(&source, &share).execute().await.unwrap_err();
        assert_eq!(err.phase(), Some(MirrorPhase::EnumerateDestination));

        let share = Arc::new(MemoryDestination::with_files([("x", "1")]));
        share.fail_delete("x");
        let err = engine(&source, &share).execute().await.unwrap_err();
        assert_eq!(err.phase(), Some(MirrorPhase::Prune));
    }

    #[test]
    fn test_report_json() {
        let report = MirrorReport {
            objects_transferred: 2,
            deleted: vec!["c.txt".into()],
            duration: Duration::from_millis(1500),
            ..Default::default()
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["objects_transferred"], 2);
        assert_eq!(json["deleted"][0], "c.txt");
        assert_eq!(json["duration"], 1.5);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(MirrorPhase::EnumerateSource.to_string(), "source enumeration");
        assert_eq!(MirrorPhase::Prune.to_string(), "prune");
    }
}
