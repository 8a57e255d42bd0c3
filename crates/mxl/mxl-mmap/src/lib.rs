//! Memory-mapped, advisory-locked shared segments.
//!
//! Generalizes a plain mmap wrapper into the three open modes the flow
//! plane needs: create-exclusive (a flow's producer), open-shared (a
//! flow's consumer), and lock-upgrade (garbage collection deciding
//! whether a flow is still in use).

use std::fs::{File, OpenOptions};
use std::path::Path;

use fs2::FileExt;
use memmap2::{Mmap, MmapMut};
use mxl_status::{MxlError, Result, StatusCode};

/// A read-write memory-mapped file holding a shared, exclusive advisory
/// lock for as long as it's open. Dropping releases the lock, unmaps, and
/// closes the file, in that order.
pub struct SharedSegment {
    file: File,
    mmap: MmapMut,
    exclusive: bool,
}

impl SharedSegment {
    /// Creates a new file of `size_bytes`, taking an exclusive lock. Fails
    /// with `Exists` if the file is already present (O_EXCL semantics),
    /// matching a flow producer's create-once contract.
    pub fn create_exclusive<P: AsRef<Path>>(path: P, size_bytes: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(MxlError::from)?;
        file.try_lock_exclusive().map_err(|_| {
            MxlError::new(StatusCode::Conflict, "segment already locked by another writer")
        })?;
        file.set_len(size_bytes).map_err(MxlError::from)?;
        let mmap = unsafe { MmapMut::map_mut(&file).map_err(MxlError::from)? };
        Ok(Self { file, mmap, exclusive: true })
    }

    /// Opens an existing file read-write with a shared advisory lock,
    /// the mode a reader or a garbage collector probing liveness uses.
    pub fn open_shared<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path).map_err(MxlError::from)?;
        file.try_lock_shared().map_err(|_| {
            MxlError::new(StatusCode::Conflict, "segment exclusively locked")
        })?;
        let mmap = unsafe { MmapMut::map_mut(&file).map_err(MxlError::from)? };
        Ok(Self { file, mmap, exclusive: false })
    }

    /// Opens an existing, already-created file for read-write access
    /// without taking a new lock — the mode a writer that previously
    /// created the segment uses when reattaching within the same process.
    pub fn open_rw_unlocked<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path).map_err(MxlError::from)?;
        let mmap = unsafe { MmapMut::map_mut(&file).map_err(MxlError::from)? };
        Ok(Self { file, mmap, exclusive: false })
    }

    /// Attempts to upgrade a shared lock to exclusive without blocking.
    /// Used by garbage collection to decide whether a flow has any other
    /// open reader or writer left.
    pub fn make_exclusive(&mut self) -> Result<()> {
        if self.exclusive {
            return Ok(());
        }
        self.file.try_lock_exclusive().map_err(|_| {
            MxlError::new(StatusCode::Conflict, "segment still in use")
        })?;
        self.exclusive = true;
        Ok(())
    }

    /// Updates the file's mtime to now, the sentinel writers/readers use
    /// to mark a flow as recently active for garbage collection.
    pub fn touch(&self) -> Result<()> {
        filetime::set_file_handle_times(&self.file, None, Some(filetime::FileTime::now()))
            .map_err(MxlError::from)
    }

    pub fn inode(&self) -> Result<u64> {
        use std::os::unix::fs::MetadataExt;
        Ok(self.file.metadata().map_err(MxlError::from)?.ino())
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::warn!(%err, "failed to unlock shared segment");
        }
    }
}

/// A read-only memory-mapped view, used when a reader only needs to
/// observe a segment it does not own the writable mapping for.
pub struct ReadOnlySegment {
    _file: File,
    mmap: Mmap,
}

impl ReadOnlySegment {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(path).map_err(MxlError::from)?;
        let mmap = unsafe { Mmap::map(&file).map_err(MxlError::from)? };
        Ok(Self { _file: file, mmap })
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_exclusive_rejects_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg");
        let _first = SharedSegment::create_exclusive(&path, 4096).unwrap();
        let second = SharedSegment::create_exclusive(&path, 4096);
        assert!(second.is_err());
    }

    #[test]
    fn open_shared_rejects_against_exclusive_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg");
        let _writer = SharedSegment::create_exclusive(&path, 4096).unwrap();
        let reader = SharedSegment::open_shared(&path);
        assert!(reader.is_err());
    }

    #[test]
    fn mmap_roundtrip_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg");
        {
            let mut seg = SharedSegment::create_exclusive(&path, 4096).unwrap();
            unsafe {
                let p = seg.as_mut_ptr();
                *p.add(0) = 0xAB;
            }
        }
        // Exclusive lock is released once the writer above drops.
        let seg = SharedSegment::open_shared(&path).unwrap();
        unsafe {
            assert_eq!(*seg.as_ptr().add(0), 0xAB);
        }
    }
}
