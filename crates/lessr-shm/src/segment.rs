//! A single file-backed, memory-mapped segment.

use std::path::{Path, PathBuf};

use lessr_core::{Error, Result};
use memmap2::MmapMut;
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};

/// A fixed-size byte region backed by a file the scripting child can read.
///
/// The mapping is alive from creation until [`ShmSegment::close`]. Reads are
/// safe to run concurrently; concurrent writes need external synchronization
/// (the bridge serializes them per buffer key).
pub struct ShmSegment {
    key: String,
    path: PathBuf,
    size: usize,
    mapping: RwLock<Option<MmapMut>>,
}

impl ShmSegment {
    pub(crate) fn new(key: String, path: PathBuf, size: usize, mapping: MmapMut) -> Self {
        Self {
            key,
            path,
            size,
            mapping: RwLock::new(Some(mapping)),
        }
    }

    /// Process-unique segment key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Segment size in bytes, fixed at creation.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Whether the segment has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.mapping.read().is_none()
    }

    /// Borrow the whole mapped region. Returns `None` once closed.
    #[must_use]
    pub fn data(&self) -> Option<MappedRwLockReadGuard<'_, [u8]>> {
        RwLockReadGuard::try_map(self.mapping.read(), |mapping| {
            mapping.as_ref().map(|m| &m[..])
        })
        .ok()
    }

    /// Write bytes at an offset.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfBounds`] when the range exceeds the segment,
    /// [`Error::SegmentClosed`] after [`ShmSegment::close`].
    pub fn write(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.check_bounds(offset, bytes.len())?;
        let mut guard = self.mapping.write();
        let mapping = guard.as_mut().ok_or(Error::SegmentClosed)?;
        mapping[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Write bytes starting at offset 0.
    ///
    /// # Errors
    ///
    /// Same conditions as [`ShmSegment::write`].
    pub fn write_all(&self, bytes: &[u8]) -> Result<()> {
        self.write(0, bytes)
    }

    /// Read `length` bytes at an offset.
    ///
    /// # Errors
    ///
    /// Same conditions as [`ShmSegment::write`].
    pub fn read(&self, offset: usize, length: usize) -> Result<Vec<u8>> {
        self.check_bounds(offset, length)?;
        let guard = self.mapping.read();
        let mapping = guard.as_ref().ok_or(Error::SegmentClosed)?;
        Ok(mapping[offset..offset + length].to_vec())
    }

    /// Read the whole segment.
    ///
    /// # Errors
    ///
    /// [`Error::SegmentClosed`] after [`ShmSegment::close`].
    pub fn read_all(&self) -> Result<Vec<u8>> {
        self.read(0, self.size)
    }

    /// Flush the mapping to the backing file so another process sees the
    /// current contents.
    ///
    /// # Errors
    ///
    /// [`Error::SegmentClosed`] after close, [`Error::Io`] if the flush fails.
    pub fn sync(&self) -> Result<()> {
        let guard = self.mapping.read();
        let mapping = guard.as_ref().ok_or(Error::SegmentClosed)?;
        mapping.flush()?;
        Ok(())
    }

    /// Unmap the region and delete the backing file. Idempotent; every later
    /// read or write fails with [`Error::SegmentClosed`].
    pub fn close(&self) {
        let mut guard = self.mapping.write();
        if guard.take().is_some() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!("Failed to remove segment file {:?}: {}", self.path, e);
            }
            tracing::debug!("Closed shared-memory segment {}", self.key);
        }
    }

    fn check_bounds(&self, offset: usize, length: usize) -> Result<()> {
        let end = offset.checked_add(length);
        match end {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(Error::OutOfBounds {
                offset,
                length,
                size: self.size,
            }),
        }
    }
}

impl std::fmt::Debug for ShmSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmSegment")
            .field("key", &self.key)
            .field("path", &self.path)
            .field("size", &self.size)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        self.close();
    }
}
