//! Orphan pruning
//!
//! Walks the destination share and deletes every file whose name is not in
//! the mirror set built by the transfer phase. Directories are never deleted.

use crate::config::PruneScope;
use crate::error::Result;
use crate::progress::MirrorObserver;
use crate::storage::DestinationStore;
use crate::sync::{DestinationEnumerator, MirrorSet};
use serde::{Deserialize, Serialize};

/// What a prune pass saw and did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneSummary {
    /// Destination entries listed
    pub scanned: usize,
    /// Files kept because a source object of the same name was transferred
    pub kept: usize,
    /// Directory entries skipped
    pub skipped_directories: usize,
    /// Files with no source counterpart, in listing order
    pub orphans: Vec<String>,
    /// Files deleted, in deletion order
    pub deleted: Vec<String>,
}

/// Deletes destination files absent from the mirror set
pub struct Reconciler<'a> {
    store: &'a dyn DestinationStore,
    scope: PruneScope,
    observer: &'a dyn MirrorObserver,
}

impl<'a> Reconciler<'a> {
    /// Create a reconciler over the destination share
    pub fn new(
        store: &'a dyn DestinationStore,
        scope: PruneScope,
        observer: &'a dyn MirrorObserver,
    ) -> Self {
        Self {
            store,
            scope,
            observer,
        }
    }

    /// Enumerate the destination and collect every orphan file.
    ///
    /// Nothing is deleted here, so listing markers stay valid for the whole
    /// enumeration.
    pub async fn scan(&self, keep: &MirrorSet) -> Result<PruneSummary> {
        let mut summary = PruneSummary::default();
        let mut entries = DestinationEnumerator::new(self.store, self.scope);

        while let Some(page) = entries.next_page().await? {
            for entry in page {
                summary.scanned += 1;

                if !entry.is_file() {
                    summary.skipped_directories += 1;
                    continue;
                }
                if keep.contains(&entry.name) {
                    summary.kept += 1;
                    continue;
                }

                self.observer.on_orphan(&entry.name);
                summary.orphans.push(entry.name);
            }
        }

        tracing::info!(
            "Scanned {} destination entries in {} pages, {} orphans",
            summary.scanned,
            entries.pages_fetched(),
            summary.orphans.len()
        );
        Ok(summary)
    }

    /// Delete the orphans found by [`scan`](Self::scan).
    ///
    /// Stops at the first failed delete; files already deleted stay deleted.
    pub async fn delete_orphans(&self, summary: &mut PruneSummary) -> Result<()> {
        for name in &summary.orphans {
            self.store.delete(name).await?;
            tracing::debug!("Deleted orphan {}", name);
            self.observer.on_deleted(name);
            summary.deleted.push(name.clone());
        }
        Ok(())
    }

    /// Scan the destination and delete every orphan file
    pub async fn prune(&self, keep: &MirrorSet) -> Result<PruneSummary> {
        let mut summary = self.scan(keep).await?;
        self.delete_orphans(&mut summary).await?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MirrorError;
    use crate::progress::NullObserver;
    use crate::storage::memory::MemoryDestination;
    use crate::sync::NameNormalizer;

    fn keep(names: &[&str]) -> MirrorSet {
        let mut set = MirrorSet::new(NameNormalizer::default());
        for name in names {
            set.insert(name);
        }
        set
    }

    #[tokio::test]
    async fn test_prune_deletes_only_orphans() {
        let share = MemoryDestination::with_files([("a.txt", "1"), ("b.txt", "2"), ("old.log", "3")]);
        let reconciler = Reconciler::new(&share, PruneScope::Root, &NullObserver);

        let summary = reconciler.prune(&keep(&["a.txt", "b.txt"])).await.unwrap();

        assert_eq!(summary.deleted, vec!["old.log"]);
        assert_eq!(summary.kept, 2);
        assert_eq!(share.get("old.log"), None);
        assert!(share.get("a.txt").is_some());
    }

    #[tokio::test]
    async fn test_prune_skips_directories() {
        let share = MemoryDestination::with_files([("dir/inner.txt", "x")]);
        share.mkdir("empty");
        let reconciler = Reconciler::new(&share, PruneScope::Root, &NullObserver);

        let summary = reconciler.prune(&keep(&[])).await.unwrap();

        assert_eq!(summary.skipped_directories, 2);
        assert!(summary.deleted.is_empty());
        assert!(share.get("dir/inner.txt").is_some());
    }

    #[tokio::test]
    async fn test_recursive_prune_reaches_nested_files() {
        let share = MemoryDestination::with_files([("dir/keep.txt", "k"), ("dir/stale.txt", "s")]);
        let reconciler = Reconciler::new(&share, PruneScope::Recursive, &NullObserver);

        let summary = reconciler.prune(&keep(&["dir/keep.txt"])).await.unwrap();

        assert_eq!(summary.deleted, vec!["dir/stale.txt"]);
        assert!(share.get("dir/keep.txt").is_some());
    }

    #[tokio::test]
    async fn test_prune_survives_deletes_across_pages() {
        let share = MemoryDestination::with_files((0..6).map(|i| (format!("f{i}"), "x")))
            .with_page_size(2);
        let reconciler = Reconciler::new(&share, PruneScope::Root, &NullObserver);

        let summary = reconciler.prune(&keep(&["f2"])).await.unwrap();

        assert_eq!(summary.scanned, 6);
        assert_eq!(summary.deleted.len(), 5);
        assert_eq!(share.snapshot().keys().collect::<Vec<_>>(), vec!["f2"]);
    }

    #[tokio::test]
    async fn test_scan_deletes_nothing() {
        let share = MemoryDestination::with_files([("a", "1"), ("b", "2")]);
        let reconciler = Reconciler::new(&share, PruneScope::Root, &NullObserver);

        let summary = reconciler.scan(&keep(&["a"])).await.unwrap();

        assert_eq!(summary.orphans, vec!["b"]);
        assert!(summary.deleted.is_empty());
        assert!(share.deletes().is_empty());
    }

    #[tokio::test]
    async fn test_prune_stops_at_first_failed_delete() {
        let share = MemoryDestination::with_files([("a", "1"), ("b", "2"), ("c", "3")]);
        share.fail_delete("b");
        let reconciler = Reconciler::new(&share, PruneScope::Root, &NullObserver);

        let err = reconciler.prune(&keep(&[])).await.unwrap_err();

        assert!(matches!(err, MirrorError::DestinationDelete { .. }));
        assert_eq!(share.deletes(), vec!["a", "b"]);
        assert!(share.get("c").is_some());
    }
}
