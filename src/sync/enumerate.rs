//! Paged enumeration of both stores
//!
//! Both enumerators follow the same rule: the next request always carries
//! the marker the store returned, and enumeration stops on the store's
//! done sentinel. Each one can be driven page by page or consumed as a lazy
//! stream of items.

use crate::config::PruneScope;
use crate::error::{MirrorError, Result};
use crate::storage::{
    DestinationEntry, DestinationStore, ObjectRef, ShareMarker, SourceMarker, SourceStore,
};
use futures::stream::{self, Stream};
use std::collections::VecDeque;

/// Lazy listing of the source container
pub struct SourceEnumerator<'a> {
    store: &'a dyn SourceStore,
    marker: SourceMarker,
    pages: usize,
}

impl<'a> SourceEnumerator<'a> {
    /// Start a listing from the first page
    pub fn new(store: &'a dyn SourceStore) -> Self {
        Self::resume(store, SourceMarker::start())
    }

    /// Resume a listing from a marker the store returned earlier
    pub fn resume(store: &'a dyn SourceStore, marker: SourceMarker) -> Self {
        Self {
            store,
            marker,
            pages: 0,
        }
    }

    /// Marker the next page will be requested with
    pub fn marker(&self) -> &SourceMarker {
        &self.marker
    }

    /// Pages fetched so far
    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    /// Fetch the next page, or `None` once the listing is exhausted
    pub async fn next_page(&mut self) -> Result<Option<Vec<ObjectRef>>> {
        if self.marker.is_done() {
            return Ok(None);
        }

        let page = self.store.list_page(&self.marker).await?;
        self.pages += 1;
        tracing::debug!(
            "Source page {}: {} objects, more: {}",
            self.pages,
            page.items.len(),
            !page.next_marker.is_done()
        );
        self.marker = page.next_marker;
        Ok(Some(page.items))
    }

    /// Consume the enumerator as a stream of object references
    pub fn into_stream(self) -> impl Stream<Item = Result<ObjectRef>> + Send + 'a {
        stream::try_unfold(
            (self, VecDeque::new()),
            |(mut this, mut buffered)| async move {
                loop {
                    if let Some(object) = buffered.pop_front() {
                        return Ok::<_, MirrorError>(Some((object, (this, buffered))));
                    }
                    match this.next_page().await? {
                        Some(items) => buffered.extend(items),
                        None => return Ok(None),
                    }
                }
            },
        )
    }
}

/// Lazy listing of the destination share
///
/// With [`PruneScope::Root`] only the share root is listed. With
/// [`PruneScope::Recursive`] every directory found is queued and listed
/// after the current one is exhausted, each with its own marker.
pub struct DestinationEnumerator<'a> {
    store: &'a dyn DestinationStore,
    scope: PruneScope,
    pending: VecDeque<(String, ShareMarker)>,
    pages: usize,
}

impl<'a> DestinationEnumerator<'a> {
    /// Start listing at the share root
    pub fn new(store: &'a dyn DestinationStore, scope: PruneScope) -> Self {
        let mut pending = VecDeque::new();
        pending.push_back((String::new(), ShareMarker::start()));
        Self {
            store,
            scope,
            pending,
            pages: 0,
        }
    }

    /// Pages fetched so far, across all directories
    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    /// Fetch the next page, or `None` once every directory is exhausted
    pub async fn next_page(&mut self) -> Result<Option<Vec<DestinationEntry>>> {
        let Some((directory, marker)) = self.pending.pop_front() else {
            return Ok(None);
        };

        let page = self.store.list_page(&directory, &marker).await?;
        self.pages += 1;
        tracing::debug!(
            "Share page {} of '{}': {} entries",
            self.pages,
            directory,
            page.items.len()
        );

        if !page.next_marker.is_done() {
            self.pending.push_front((directory, page.next_marker));
        }

        if self.scope == PruneScope::Recursive {
            for entry in page.items.iter().filter(|e| !e.is_file()) {
                self.pending
                    .push_back((entry.name.clone(), ShareMarker::start()));
            }
        }

        Ok(Some(page.items))
    }

    /// Consume the enumerator as a stream of entries
    pub fn into_stream(self) -> impl Stream<Item = Result<DestinationEntry>> + Send + 'a {
        stream::try_unfold(
            (self, VecDeque::new()),
            |(mut this, mut buffered)| async move {
                loop {
                    if let Some(entry) = buffered.pop_front() {
                        return Ok::<_, MirrorError>(Some((entry, (this, buffered))));
                    }
                    match this.next_page().await? {
                        Some(items) => buffered.extend(items),
                        None => return Ok(None),
                    }
                }
            },
        )
    }
}
