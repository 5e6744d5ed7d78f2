//! Local filesystem stores
//!
//! [`LocalSource`] treats a directory tree as an object container: every
//! regular file is an object named by its `/`-separated path relative to the
//! root. [`LocalShare`] is a mounted file share: files are written in
//! parallel chunks at their offsets, listed one directory at a time and
//! deleted in place.

use crate::error::{IoResultExt, MirrorError, Result};
use crate::storage::{
    page_bounds, ChunkedUploader, DestinationEntry, DestinationStore, ObjectRef, ObjectStream, Page,
    ShareMarker, ShareSide, SourceMarker, SourceSide, SourceStore, WriteOptions, WriteProgress,
};
use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use walkdir::WalkDir;

/// Default number of entries per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 5000;

/// Map a `/`-separated relative name onto a path below `root`
pub fn resolve_name(root: &Path, name: &str) -> Result<PathBuf> {
    if name.is_empty() {
        return Err(MirrorError::invalid_name(name, "empty name"));
    }
    let relative = Path::new(name);
    let mut path = root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => {
                return Err(MirrorError::invalid_name(
                    name,
                    "must be a relative path without '..'",
                ))
            }
        }
    }
    if path == root {
        return Err(MirrorError::invalid_name(name, "resolves to the share root"));
    }
    Ok(path)
}

/// `/`-separated name of `path` relative to `root`.
///
/// `None` when a component is not valid UTF-8, since such a name could not
/// be mapped back onto the same path.
fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts = relative
        .components()
        .map(|c| c.as_os_str().to_str().map(str::to_owned))
        .collect::<Option<Vec<String>>>()?;
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Directory tree read as an object container
#[derive(Debug)]
pub struct LocalSource {
    root: PathBuf,
    page_size: usize,
    snapshot: Mutex<Option<Arc<Vec<ObjectRef>>>>,
}

impl LocalSource {
    /// Create a source rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            page_size: DEFAULT_PAGE_SIZE,
            snapshot: Mutex::new(None),
        }
    }

    /// Set the listing page size
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the tree and collect every regular file, sorted by name
    fn scan(root: &Path) -> Result<Vec<ObjectRef>> {
        let mut objects = Vec::new();
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(MirrorError::source_list)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = relative_name(root, entry.path()) else {
                tracing::warn!(
                    "Skipping {}: name is not valid UTF-8",
                    entry.path().display()
                );
                continue;
            };
            let size = entry.metadata().ok().map(|m| m.len());
            objects.push(ObjectRef::new(name).sized(size));
        }
        objects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(objects)
    }
}

#[async_trait]
impl SourceStore for LocalSource {
    fn describe(&self) -> String {
        format!("directory {}", self.root.display())
    }

    async fn list_page(&self, marker: &SourceMarker) -> Result<Page<ObjectRef, SourceSide>> {
        let cached = if marker.is_start() {
            None
        } else {
            self.snapshot
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .clone()
        };

        let objects = match cached {
            Some(objects) => objects,
            None => {
                let root = self.root.clone();
                let scanned = tokio::task::spawn_blocking(move || Self::scan(&root))
                    .await
                    .map_err(|e| MirrorError::source_list(format!("scan task failed: {}", e)))??;
                let scanned = Arc::new(scanned);
                *self.snapshot.lock().unwrap_or_else(|p| p.into_inner()) =
                    Some(Arc::clone(&scanned));
                scanned
            }
        };

        let (range, next) = page_bounds(
            &objects,
            |o| o.name.as_str(),
            marker.token(),
            self.page_size,
        );
        let items = objects[range].to_vec();
        tracing::debug!("Listed {} objects from {}", items.len(), self.root.display());

        Ok(Page {
            items,
            next_marker: SourceMarker::from_token(next),
        })
    }

    async fn open_read(&self, object: &ObjectRef) -> Result<ObjectStream> {
        let path = resolve_name(&self.root, &object.key)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| MirrorError::source_read(&object.name, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| MirrorError::source_read(&object.name, e))?
            .len();
        Ok(ObjectStream::new(file, Some(size)))
    }
}

/// Mounted file share used as the mirror destination
#[derive(Debug, Clone)]
pub struct LocalShare {
    root: PathBuf,
    page_size: usize,
    persist_attributes: bool,
}

impl LocalShare {
    /// Create a share rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            page_size: DEFAULT_PAGE_SIZE,
            persist_attributes: false,
        }
    }

    /// Set the listing page size
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Store cache-control and metadata as extended attributes
    pub fn persist_attributes(mut self, enable: bool) -> Self {
        self.persist_attributes = enable;
        self
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_directory(root: &Path, directory: &str) -> Result<Vec<DestinationEntry>> {
        let dir_path = if directory.is_empty() {
            root.to_path_buf()
        } else {
            resolve_name(root, directory)?
        };

        let read_dir = std::fs::read_dir(&dir_path)
            .map_err(|e| MirrorError::destination_list(directory, e))?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| MirrorError::destination_list(directory, e))?;
            let file_type = entry
                .file_type()
                .map_err(|e| MirrorError::destination_list(directory, e))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                tracing::warn!(
                    "Skipping {}: name is not valid UTF-8",
                    entry.path().display()
                );
                continue;
            };
            let name = if directory.is_empty() {
                file_name.to_string()
            } else {
                format!("{}/{}", directory.trim_end_matches('/'), file_name)
            };

            if file_type.is_dir() {
                entries.push(DestinationEntry::directory(name));
            } else {
                let size = entry.metadata().ok().map(|m| m.len());
                entries.push(DestinationEntry::file(name, size));
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

#[async_trait]
impl DestinationStore for LocalShare {
    fn describe(&self) -> String {
        format!("share {}", self.root.display())
    }

    async fn write_overwrite(
        &self,
        name: &str,
        content: ObjectStream,
        options: &WriteOptions,
        progress: &dyn WriteProgress,
    ) -> Result<u64> {
        let path = resolve_name(&self.root, name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MirrorError::destination_write(name, e))?;
        }

        let size = content.size();
        let target = path.clone();
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&target)?;
            if let Some(size) = size {
                file.set_len(size)?;
            }
            Ok(file)
        })
        .await
        .map_err(|e| MirrorError::destination_write(name, e))?
        .map_err(|e| MirrorError::destination_write(name, e))?;
        let file = Arc::new(file);

        let uploader = ChunkedUploader::new(options.chunk_size, options.parallelism);
        let upload = uploader
            .upload(name, content.into_reader(), progress, |part| {
                let file = Arc::clone(&file);
                let name = name.to_string();
                async move {
                    tokio::task::spawn_blocking(move || write_at(&file, &part.data, part.offset))
                        .await
                        .map_err(|e| MirrorError::destination_write(&name, e))?
                        .map_err(|e| MirrorError::destination_write(&name, e))
                }
            })
            .await?;

        // A stream shorter than its advertised size must not leave a zero tail.
        let len = upload.bytes_written;
        tokio::task::spawn_blocking(move || file.set_len(len))
            .await
            .map_err(|e| MirrorError::destination_write(name, e))?
            .map_err(|e| MirrorError::destination_write(name, e))?;

        if self.persist_attributes {
            let target = path.clone();
            let options = options.clone();
            tokio::task::spawn_blocking(move || store_attributes(&target, &options))
                .await
                .map_err(|e| MirrorError::destination_write(name, e))??;
        }

        tracing::debug!(
            "Wrote {} ({} bytes in {} parts)",
            path.display(),
            upload.bytes_written,
            upload.parts
        );
        Ok(upload.bytes_written)
    }

    async fn list_page(
        &self,
        directory: &str,
        marker: &ShareMarker,
    ) -> Result<Page<DestinationEntry, ShareSide>> {
        let root = self.root.clone();
        let dir = directory.to_string();
        let entries = tokio::task::spawn_blocking(move || Self::read_directory(&root, &dir))
            .await
            .map_err(|e| MirrorError::destination_list(directory, e))??;

        let (range, next) = page_bounds(
            &entries,
            |e| e.name.as_str(),
            marker.token(),
            self.page_size,
        );
        let items = entries[range].to_vec();

        Ok(Page {
            items,
            next_marker: ShareMarker::from_token(next),
        })
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let path = resolve_name(&self.root, name)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| MirrorError::destination_delete(name, e))
    }
}

#[cfg(unix)]
fn write_at(file: &File, data: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(data, offset)
}

#[cfg(windows)]
fn write_at(file: &File, data: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut written = 0;
    while written < data.len() {
        let n = file.seek_write(&data[written..], offset + written as u64)?;
        if n == 0 {
            return Err(std::io::ErrorKind::WriteZero.into());
        }
        written += n;
    }
    Ok(())
}

/// Extended attribute holding the cache-control value.
pub const CACHE_CONTROL_XATTR: &str = "user.cache_control";

/// Prefix of extended attributes holding user metadata.
pub const METADATA_XATTR_PREFIX: &str = "user.meta.";

#[cfg(unix)]
fn store_attributes(path: &Path, options: &WriteOptions) -> Result<()> {
    if let Some(cache_control) = &options.cache_control {
        xattr::set(path, CACHE_CONTROL_XATTR, cache_control.as_bytes()).with_path(path)?;
    }
    for (key, value) in &options.metadata {
        let attr = format!("{}{}", METADATA_XATTR_PREFIX, key);
        xattr::set(path, &attr, value.as_bytes()).with_path(path)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn store_attributes(_path: &Path, _options: &WriteOptions) -> Result<()> {
    // Extended attributes not supported on this platform
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, content: &[u8]) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_resolve_name_rejects_escapes() {
        let root = Path::new("/share");
        assert_eq!(
            resolve_name(root, "a/b.txt").unwrap(),
            PathBuf::from("/share/a/b.txt")
        );
        assert!(resolve_name(root, "../etc/passwd").is_err());
        assert!(resolve_name(root, "/abs").is_err());
        assert!(resolve_name(root, "").is_err());
        assert!(resolve_name(root, ".").is_err());
    }

    #[tokio::test]
    async fn test_local_source_lists_nested_files() {
        let src = TempDir::new().unwrap();
        create_test_file(src.path(), "b.txt", b"b");
        create_test_file(src.path(), "a.txt", b"a");
        create_test_file(src.path(), "dir/c.txt", b"c");

        let source = LocalSource::new(src.path()).with_page_size(2);
        let first = source.list_page(&SourceMarker::start()).await.unwrap();
        let names: Vec<_> = first.items.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);

        let second = source.list_page(&first.next_marker).await.unwrap();
        assert_eq!(second.items[0].name, "dir/c.txt");
        assert_eq!(second.items[0].size, Some(1));
        assert!(second.next_marker.is_done());
    }

    #[tokio::test]
    async fn test_share_write_overwrites_longer_file() {
        let dst = TempDir::new().unwrap();
        create_test_file(dst.path(), "b.txt", b"a much longer old body");

        let share = LocalShare::new(dst.path());
        let options = WriteOptions {
            chunk_size: 2,
            ..Default::default()
        };
        let written = share
            .write_overwrite(
                "b.txt",
                ObjectStream::from_bytes(b"world".to_vec()),
                &options,
                &|_: u64| {},
            )
            .await
            .unwrap();

        assert_eq!(written, 5);
        assert_eq!(std::fs::read(dst.path().join("b.txt")).unwrap(), b"world");
    }

    #[tokio::test]
    async fn test_share_write_truncates_short_stream() {
        let dst = TempDir::new().unwrap();
        let share = LocalShare::new(dst.path());

        let written = share
            .write_overwrite(
                "short.bin",
                ObjectStream::new(std::io::Cursor::new(b"abc".to_vec()), Some(10)),
                &WriteOptions::default(),
                &|_: u64| {},
            )
            .await
            .unwrap();

        assert_eq!(written, 3);
        assert_eq!(std::fs::read(dst.path().join("short.bin")).unwrap(), b"abc");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_share_write_on_single_thread_runtime() {
        let dst = TempDir::new().unwrap();
        let share = LocalShare::new(dst.path());
        let options = WriteOptions {
            chunk_size: 3,
            ..Default::default()
        };

        share
            .write_overwrite(
                "a.txt",
                ObjectStream::from_bytes(b"hello world".to_vec()),
                &options,
                &|_: u64| {},
            )
            .await
            .unwrap();

        assert_eq!(std::fs::read(dst.path().join("a.txt")).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_share_write_creates_parents() {
        let dst = TempDir::new().unwrap();
        let share = LocalShare::new(dst.path());

        share
            .write_overwrite(
                "x/y/z.bin",
                ObjectStream::from_bytes(vec![1, 2, 3]),
                &WriteOptions::default(),
                &|_: u64| {},
            )
            .await
            .unwrap();

        assert_eq!(
            std::fs::read(dst.path().join("x/y/z.bin")).unwrap(),
            vec![1, 2, 3]
        );
    }

    #[tokio::test]
    async fn test_share_lists_one_directory() {
        let dst = TempDir::new().unwrap();
        create_test_file(dst.path(), "top.txt", b"t");
        create_test_file(dst.path(), "sub/inner.txt", b"i");

        let share = LocalShare::new(dst.path());
        let root = share.list_page("", &ShareMarker::start()).await.unwrap();
        assert_eq!(
            root.items,
            vec![
                DestinationEntry::directory("sub"),
                DestinationEntry::file("top.txt", Some(1)),
            ]
        );

        let sub = share.list_page("sub", &ShareMarker::start()).await.unwrap();
        assert_eq!(sub.items, vec![DestinationEntry::file("sub/inner.txt", Some(1))]);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_non_utf8_names_are_skipped() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        create_test_file(src.path(), "a.txt", b"a");
        std::fs::write(src.path().join(OsStr::from_bytes(b"bad-\xff.txt")), b"x").unwrap();
        std::fs::write(dst.path().join(OsStr::from_bytes(b"stale-\xff.bin")), b"x").unwrap();

        let source = LocalSource::new(src.path());
        let listed = source.list_page(&SourceMarker::start()).await.unwrap();
        assert_eq!(listed.items, vec![ObjectRef::new("a.txt").sized(Some(1))]);

        let share = LocalShare::new(dst.path());
        let entries = share.list_page("", &ShareMarker::start()).await.unwrap();
        assert!(entries.items.is_empty());
    }

    #[tokio::test]
    async fn test_share_delete_missing_file_fails() {
        let dst = TempDir::new().unwrap();
        let share = LocalShare::new(dst.path());
        let err = share.delete("ghost.txt").await.unwrap_err();
        assert!(matches!(err, MirrorError::DestinationDelete { .. }));
    }
}
