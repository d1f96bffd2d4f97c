//! The two bounded caches: open volume handles and enqueued resources
//!
//! The file cache amortizes `open()` across the many small reads a
//! scan performs on the same volume; capacity eviction and shutdown
//! both close handles deterministically, and at most one handle exists
//! per path. The resource list only tracks ordering and byte totals;
//! the bytes themselves live in the index's `Resource` objects.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use lru::LruCache;
use tracing::debug;

use crate::types::ResourceId;

/// Open OS file handles kept across reads.
const FILE_CACHE_CAPACITY: usize = 5;

#[derive(Debug)]
pub(crate) struct FileCache {
    handles: LruCache<PathBuf, File>,
}

impl FileCache {
    pub(crate) fn new() -> Self {
        Self {
            handles: LruCache::new(
                NonZeroUsize::new(FILE_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            ),
        }
    }

    fn handle(&mut self, path: &Path) -> io::Result<&mut File> {
        if !self.handles.contains(path) {
            let file = File::open(path)?;
            debug!(path = %path.display(), "caching volume handle");
            if let Some((evicted, _)) = self.handles.push(path.to_path_buf(), file) {
                debug!(path = %evicted.display(), "closing evicted volume handle");
            }
        }
        self.handles
            .get_mut(path)
            .ok_or_else(|| io::Error::other("file handle cache lost a just-inserted entry"))
    }

    pub(crate) fn file_len(&mut self, path: &Path) -> io::Result<u64> {
        self.handle(path)?.metadata().map(|m| m.len())
    }

    /// Read exactly `len` bytes at `offset`.
    pub(crate) fn read_range(&mut self, path: &Path, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let file = self.handle(path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read up to `len` bytes at `offset`, short at end of file.
    pub(crate) fn read_up_to(&mut self, path: &Path, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let file = self.handle(path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::new();
        file.take(len as u64).read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Drop every cached handle.
    pub(crate) fn clear(&mut self) {
        self.handles.clear();
    }

    #[cfg(test)]
    pub(crate) fn cached_handles(&self) -> usize {
        self.handles.len()
    }
}

/// Ordering and byte accounting for Enqueued resources. Insertion is
/// at the head; eviction candidates come off the tail.
#[derive(Debug)]
pub(crate) struct LruList {
    order: LruCache<ResourceId, usize>,
    bytes: usize,
}

impl LruList {
    pub(crate) fn new() -> Self {
        Self {
            order: LruCache::unbounded(),
            bytes: 0,
        }
    }

    pub(crate) fn insert(&mut self, id: ResourceId, size: usize) {
        debug_assert!(!self.order.contains(&id), "{id} enqueued twice");
        self.order.push(id, size);
        self.bytes += size;
    }

    pub(crate) fn remove(&mut self, id: &ResourceId) -> bool {
        match self.order.pop(id) {
            Some(size) => {
                self.bytes -= size;
                true
            }
            None => false,
        }
    }

    /// Least-recently-used entry, removed.
    pub(crate) fn pop_tail(&mut self) -> Option<(ResourceId, usize)> {
        let (id, size) = self.order.pop_lru()?;
        self.bytes -= size;
        Some((id, size))
    }

    pub(crate) fn contains(&self, id: &ResourceId) -> bool {
        self.order.contains(id)
    }

    pub(crate) fn bytes(&self) -> usize {
        self.bytes
    }
}
