//! In-memory stores
//!
//! A source container and a destination share held entirely in memory, with
//! configurable page sizes, a log of every call made against them and
//! per-operation fault injection. Continuation tokens are the name of the
//! next entry, so they stay valid while earlier entries are deleted.

use crate::error::{MirrorError, Result};
use crate::storage::{
    page_bounds, ChunkedUploader, DestinationEntry, DestinationStore, ObjectRef, ObjectStream, Page,
    ShareMarker, ShareSide, SourceMarker, SourceSide, SourceStore, WriteOptions, WriteProgress,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Default number of entries per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// A call made against an in-memory store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    /// Source listing with the token that was sent
    ListSource(Option<String>),
    /// Source object opened
    Read(String),
    /// Destination write started
    Write(String),
    /// Destination listing of a directory with the token that was sent
    ListShare(String, Option<String>),
    /// Destination delete
    Delete(String),
}

/// Operation kinds faults can be injected into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultOp {
    /// Opening an object
    Read,
    /// Writing a file
    Write,
    /// Deleting a file
    Delete,
}

#[derive(Debug, Default)]
struct Faults {
    list_pages: HashSet<usize>,
    names: HashSet<(FaultOp, String)>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory source container
#[derive(Debug)]
pub struct MemorySource {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    page_size: usize,
    calls: Mutex<Vec<StoreCall>>,
    faults: Mutex<Faults>,
    pages_served: AtomicUsize,
}

impl MemorySource {
    /// Create an empty container
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
            calls: Mutex::new(Vec::new()),
            faults: Mutex::new(Faults::default()),
            pages_served: AtomicUsize::new(0),
        }
    }

    /// Create a container holding the given objects
    pub fn with_objects<I, N, C>(objects: I) -> Self
    where
        I: IntoIterator<Item = (N, C)>,
        N: Into<String>,
        C: Into<Vec<u8>>,
    {
        let source = Self::new();
        for (name, content) in objects {
            source.put(name, content);
        }
        source
    }

    /// Set the listing page size
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Add or replace an object
    pub fn put(&self, name: impl Into<String>, content: impl Into<Vec<u8>>) {
        lock(&self.objects).insert(name.into(), content.into());
    }

    /// Remove an object
    pub fn remove(&self, name: &str) -> Option<Vec<u8>> {
        lock(&self.objects).remove(name)
    }

    /// Fail the listing call for the given zero-based page number
    pub fn fail_list_page(&self, page: usize) {
        lock(&self.faults).list_pages.insert(page);
    }

    /// Fail opening the named object
    pub fn fail_read(&self, name: impl Into<String>) {
        lock(&self.faults).names.insert((FaultOp::Read, name.into()));
    }

    /// Every call made so far
    pub fn calls(&self) -> Vec<StoreCall> {
        lock(&self.calls).clone()
    }

    /// Names opened for reading, in call order
    pub fn reads(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                StoreCall::Read(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: StoreCall) {
        lock(&self.calls).push(call);
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceStore for MemorySource {
    fn describe(&self) -> String {
        format!("memory container ({} objects)", lock(&self.objects).len())
    }

    async fn list_page(&self, marker: &SourceMarker) -> Result<Page<ObjectRef, SourceSide>> {
        self.record(StoreCall::ListSource(marker.token().map(str::to_string)));

        let page_number = self.pages_served.fetch_add(1, Ordering::SeqCst);
        if lock(&self.faults).list_pages.contains(&page_number) {
            return Err(MirrorError::source_list(MirrorError::Injected(format!(
                "list page {}",
                page_number
            ))));
        }

        let objects = lock(&self.objects);
        let listed: Vec<(&String, &Vec<u8>)> = objects.iter().collect();
        let (range, next) = page_bounds(
            &listed,
            |(name, _)| name.as_str(),
            marker.token(),
            self.page_size,
        );
        let items = listed[range]
            .iter()
            .map(|(name, data)| ObjectRef::new(name.as_str()).sized(Some(data.len() as u64)))
            .collect();

        Ok(Page {
            items,
            next_marker: SourceMarker::from_token(next),
        })
    }

    async fn open_read(&self, object: &ObjectRef) -> Result<ObjectStream> {
        self.record(StoreCall::Read(object.name.clone()));

        if lock(&self.faults)
            .names
            .contains(&(FaultOp::Read, object.name.clone()))
        {
            return Err(MirrorError::source_read(
                &object.name,
                MirrorError::Injected("read".into()),
            ));
        }

        let data = lock(&self.objects)
            .get(&object.key)
            .cloned()
            .ok_or_else(|| MirrorError::source_read(&object.name, "object not found"))?;

        Ok(ObjectStream::from_bytes(data))
    }
}

/// A file held by [`MemoryDestination`]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoredFile {
    /// File content
    pub content: Vec<u8>,
    /// Cache-control attribute from the last write
    pub cache_control: Option<String>,
    /// Metadata from the last write
    pub metadata: BTreeMap<String, String>,
}

/// In-memory hierarchical share
#[derive(Debug)]
pub struct MemoryDestination {
    files: Mutex<BTreeMap<String, StoredFile>>,
    directories: Mutex<BTreeSet<String>>,
    page_size: usize,
    calls: Mutex<Vec<StoreCall>>,
    faults: Mutex<Faults>,
    active_parts: AtomicUsize,
    peak_parts: AtomicUsize,
    pages_served: AtomicUsize,
}

impl MemoryDestination {
    /// Create an empty share
    pub fn new() -> Self {
        Self {
            files: Mutex::new(BTreeMap::new()),
            directories: Mutex::new(BTreeSet::new()),
            page_size: DEFAULT_PAGE_SIZE,
            calls: Mutex::new(Vec::new()),
            faults: Mutex::new(Faults::default()),
            active_parts: AtomicUsize::new(0),
            peak_parts: AtomicUsize::new(0),
            pages_served: AtomicUsize::new(0),
        }
    }

    /// Create a share holding the given files
    pub fn with_files<I, N, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (N, C)>,
        N: Into<String>,
        C: Into<Vec<u8>>,
    {
        let share = Self::new();
        for (name, content) in files {
            share.put(name, content);
        }
        share
    }

    /// Set the listing page size
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Place a file directly, bypassing the write path
    pub fn put(&self, name: impl Into<String>, content: impl Into<Vec<u8>>) {
        let name = name.into();
        self.add_parents(&name);
        lock(&self.files).insert(
            name,
            StoredFile {
                content: content.into(),
                ..Default::default()
            },
        );
    }

    /// Create an empty directory
    pub fn mkdir(&self, name: impl Into<String>) {
        let name = name.into();
        self.add_parents(&name);
        lock(&self.directories).insert(name);
    }

    /// Content of a file, if present
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        lock(&self.files).get(name).map(|f| f.content.clone())
    }

    /// Full stored record of a file, if present
    pub fn file(&self, name: &str) -> Option<StoredFile> {
        lock(&self.files).get(name).cloned()
    }

    /// All files and their content
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        lock(&self.files)
            .iter()
            .map(|(name, file)| (name.clone(), file.content.clone()))
            .collect()
    }

    /// Fail the listing call for the given zero-based page number
    pub fn fail_list_page(&self, page: usize) {
        lock(&self.faults).list_pages.insert(page);
    }

    /// Fail writing the named file
    pub fn fail_write(&self, name: impl Into<String>) {
        lock(&self.faults).names.insert((FaultOp::Write, name.into()));
    }

    /// Fail deleting the named file
    pub fn fail_delete(&self, name: impl Into<String>) {
        lock(&self.faults).names.insert((FaultOp::Delete, name.into()));
    }

    /// Every call made so far
    pub fn calls(&self) -> Vec<StoreCall> {
        lock(&self.calls).clone()
    }

    /// Names written, in call order
    pub fn writes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                StoreCall::Write(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    /// Names deleted, in call order
    pub fn deletes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                StoreCall::Delete(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    /// Highest number of part writes observed in flight at once
    pub fn peak_parallel_parts(&self) -> usize {
        self.peak_parts.load(Ordering::SeqCst)
    }

    fn record(&self, call: StoreCall) {
        lock(&self.calls).push(call);
    }

    fn injected(&self, op: FaultOp, name: &str) -> bool {
        lock(&self.faults).names.contains(&(op, name.to_string()))
    }

    fn add_parents(&self, name: &str) {
        let mut directories = lock(&self.directories);
        let mut end = 0;
        while let Some(pos) = name[end..].find('/') {
            end += pos;
            directories.insert(name[..end].to_string());
            end += 1;
        }
    }

    /// Immediate children of `directory`, sorted by name
    fn children(&self, directory: &str) -> Vec<DestinationEntry> {
        let prefix = if directory.is_empty() {
            String::new()
        } else {
            format!("{}/", directory.trim_end_matches('/'))
        };
        let direct = |name: &str| {
            name.strip_prefix(prefix.as_str())
                .map_or(false, |rest| !rest.is_empty() && !rest.contains('/'))
        };

        let mut entries: Vec<DestinationEntry> = lock(&self.directories)
            .iter()
            .filter(|d| direct(d.as_str()))
            .map(|d| DestinationEntry::directory(d.clone()))
            .collect();
        entries.extend(
            lock(&self.files)
                .iter()
                .filter(|(name, _)| direct(name.as_str()))
                .map(|(name, file)| {
                    DestinationEntry::file(name.clone(), Some(file.content.len() as u64))
                }),
        );
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }
}

impl Default for MemoryDestination {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DestinationStore for MemoryDestination {
    fn describe(&self) -> String {
        format!("memory share ({} files)", lock(&self.files).len())
    }

    async fn write_overwrite(
        &self,
        name: &str,
        content: ObjectStream,
        options: &WriteOptions,
        progress: &dyn WriteProgress,
    ) -> Result<u64> {
        self.record(StoreCall::Write(name.to_string()));

        if self.injected(FaultOp::Write, name) {
            return Err(MirrorError::destination_write(
                name,
                MirrorError::Injected("write".into()),
            ));
        }

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let uploader = ChunkedUploader::new(options.chunk_size, options.parallelism);
        let upload = uploader
            .upload(name, content.into_reader(), progress, |part| {
                let buffer = Arc::clone(&buffer);
                let active = &self.active_parts;
                let peak = &self.peak_parts;
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    {
                        let mut buffer = lock(&buffer);
                        let end = part.offset as usize + part.data.len();
                        if buffer.len() < end {
                            buffer.resize(end, 0);
                        }
                        buffer[part.offset as usize..end].copy_from_slice(&part.data);
                    }
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await?;

        let content = std::mem::take(&mut *lock(&buffer));
        self.add_parents(name);
        lock(&self.files).insert(
            name.to_string(),
            StoredFile {
                content,
                cache_control: options.cache_control.clone(),
                metadata: options.metadata.clone(),
            },
        );

        Ok(upload.bytes_written)
    }

    async fn list_page(
        &self,
        directory: &str,
        marker: &ShareMarker,
    ) -> Result<Page<DestinationEntry, ShareSide>> {
        self.record(StoreCall::ListShare(
            directory.to_string(),
            marker.token().map(str::to_string),
        ));

        let page_number = self.pages_served.fetch_add(1, Ordering::SeqCst);
        if lock(&self.faults).list_pages.contains(&page_number) {
            return Err(MirrorError::destination_list(
                directory,
                MirrorError::Injected(format!("list page {}", page_number)),
            ));
        }

        let entries = self.children(directory);
        let (range, next) =
            page_bounds(&entries, |e| e.name.as_str(), marker.token(), self.page_size);
        let items = entries[range].to_vec();

        Ok(Page {
            items,
            next_marker: ShareMarker::from_token(next),
        })
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.record(StoreCall::Delete(name.to_string()));

        if self.injected(FaultOp::Delete, name) {
            return Err(MirrorError::destination_delete(
                name,
                MirrorError::Injected("delete".into()),
            ));
        }

        lock(&self.files)
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| MirrorError::destination_delete(name, "no such file"))
    }
}
