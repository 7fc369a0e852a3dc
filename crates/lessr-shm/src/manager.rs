//! The per-process shared-memory manager.

use std::fs::OpenOptions;
use std::sync::Arc;

use dashmap::DashMap;
use lessr_core::{Error, Result};
use memmap2::MmapMut;
use tempfile::TempDir;
use uuid::Uuid;

use crate::segment::ShmSegment;

/// Allocates and tracks file-backed segments. One manager per host process.
///
/// Segments live in a private temp directory; keys are 32 hex characters of
/// random data so another process cannot guess them. Dropping the manager
/// destroys every remaining segment and removes the directory.
pub struct ShmManager {
    dir: TempDir,
    segments: DashMap<String, Arc<ShmSegment>>,
}

impl ShmManager {
    /// Create a manager with a fresh backing directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the temp directory cannot be created.
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("lessr-shm-")
            .tempdir()
            .map_err(|e| Error::resource(format!("Failed to create shm directory: {}", e)))?;
        tracing::debug!("Shared-memory directory at {:?}", dir.path());
        Ok(Self {
            dir,
            segments: DashMap::new(),
        })
    }

    /// Allocate a segment of `size` bytes, mapped read-write.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero size or if the backing file cannot be
    /// created, sized, or mapped.
    pub fn create(&self, size: usize) -> Result<Arc<ShmSegment>> {
        if size == 0 {
            return Err(Error::resource("Segment size must be greater than zero"));
        }

        let key = Uuid::new_v4().simple().to_string();
        let path = self.dir.path().join(format!("{}.buf", key));

        let mut options = OpenOptions::new();
        options.read(true).write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options.open(&path)?;
        file.set_len(size as u64)?;

        // SAFETY: the file was just created by this process, is sized to
        // `size`, and stays open for the life of the mapping.
        let mapping = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| Error::resource(format!("Failed to map segment: {}", e)))?;

        let segment = Arc::new(ShmSegment::new(key.clone(), path, size, mapping));
        self.segments.insert(key.clone(), Arc::clone(&segment));
        tracing::debug!("Created shared-memory segment {} ({} bytes)", key, size);
        Ok(segment)
    }

    /// Look up a live segment by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<ShmSegment>> {
        self.segments.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Destroy one segment: unmap, delete the backing file, forget the key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BufferNotFound`] when the key is not tracked.
    pub fn destroy(&self, key: &str) -> Result<()> {
        let (_, segment) = self
            .segments
            .remove(key)
            .ok_or_else(|| Error::BufferNotFound(key.to_string()))?;
        segment.close();
        Ok(())
    }

    /// Destroy every tracked segment.
    pub fn destroy_all(&self) {
        let keys: Vec<String> = self.segments.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, segment)) = self.segments.remove(&key) {
                segment.close();
            }
        }
    }

    /// Number of live segments.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// The manager's backing directory.
    #[must_use]
    pub fn dir_path(&self) -> &std::path::Path {
        self.dir.path()
    }
}

impl Drop for ShmManager {
    fn drop(&mut self) {
        self.destroy_all();
    }
}

impl std::fmt::Debug for ShmManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmManager")
            .field("dir", &self.dir.path())
            .field("segments", &self.segments.len())
            .finish()
    }
}
