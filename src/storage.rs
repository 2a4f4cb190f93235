use crate::error::{Error, Result};
use crate::layout::{Layout, TRAILER_LENGTH};
use crate::mmap::{
    map_shared_memory, open_shared_memory, resize_shared_memory, shared_memory_size,
    unlink_shared_memory, unmap_shared_memory,
};
use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::AtomicU64;

/// Backing memory for a broadcast region.
///
/// A region does not care where its bytes live: heap, POSIX shared memory
/// or a memory-mapped file all work, as long as the memory supports atomic
/// 64-bit loads and stores.
///
/// # Safety
///
/// Implementors must guarantee that [`Storage::as_ptr`] returns the same
/// pointer for the lifetime of the storage, that it is valid for reads and
/// writes of [`Storage::len`] bytes, that it is 8-byte aligned, and that
/// the memory is not freed or remapped until the storage is dropped.
/// Mutation through the pointer must be permitted even though it is
/// obtained from `&self`.
pub unsafe trait Storage: Send + Sync {
    /// Base address of the region.
    fn as_ptr(&self) -> NonNull<u8>;

    /// Length of the region in bytes (`capacity + TRAILER_LENGTH`).
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Zero-initialized heap storage for in-process broadcast.
///
/// The memory is allocated as atomic words, which gives both the required
/// alignment and interior mutability.
#[derive(Debug)]
pub struct HeapStorage {
    words: Box<[AtomicU64]>,
    len: usize,
}

impl HeapStorage {
    /// Allocates `len` zeroed bytes, rounded up to a multiple of 8.
    pub fn new(len: usize) -> Self {
        let n = len.div_ceil(size_of::<u64>()).max(1);
        let words: Box<[AtomicU64]> = (0..n).map(|_| AtomicU64::new(0)).collect();
        Self {
            words,
            len: n * size_of::<u64>(),
        }
    }
}

unsafe impl Storage for HeapStorage {
    #[inline]
    fn as_ptr(&self) -> NonNull<u8> {
        NonNull::from(&*self.words).cast()
    }

    #[inline]
    fn len(&self) -> usize {
        self.len
    }
}

/// Rejects an existing region whose length differs from the requested one.
///
/// Resizing a region in place would fault every process that has it
/// mapped, so a mismatch is an error rather than a resize.
fn check_existing_length(existing: usize, len: usize) -> Result<()> {
    if existing != len {
        return Err(Error::InvalidCapacity {
            capacity: existing.saturating_sub(TRAILER_LENGTH),
            reason: "existing region has a different capacity",
        });
    }
    Ok(())
}

/// Storage backed by a POSIX shared memory object (`/dev/shm` on Linux).
///
/// Reopening an existing object reuses it, so counters published by an
/// earlier process are visible to the next one. Only a newly created object
/// is ever sized. The mapping is removed when the storage is dropped; the
/// object itself persists until [`ShmStorage::unlink`].
#[derive(Debug)]
pub struct ShmStorage {
    ptr: NonNull<u8>,
    len: usize,
}

unsafe impl Send for ShmStorage {}
unsafe impl Sync for ShmStorage {}

impl ShmStorage {
    /// Creates the shared memory object `name` with `len` bytes, or reopens
    /// it if it already exists with exactly that length. Writer side.
    ///
    /// `name` must follow POSIX rules: it starts with `'/'` and contains no
    /// other `'/'`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidCapacity`] if the object exists with another length,
    /// [`Error::Io`] if it cannot be opened, sized or mapped.
    pub fn create(name: &str, len: usize) -> Result<Self> {
        let fd = open_shared_memory(name, true)?;
        let existing = shared_memory_size(&fd)?;
        if existing == 0 {
            resize_shared_memory(&fd, len)?;
        } else {
            check_existing_length(existing, len)?;
        }
        let ptr = map_shared_memory(&fd, len)?;
        Ok(Self { ptr, len })
    }

    /// Maps the existing shared memory object `name` at its current length.
    /// Reader side: never creates or resizes the object.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] if the object does not exist or cannot be mapped,
    /// [`Error::InvalidCapacity`] if its length is not a valid region
    /// length.
    pub fn open(name: &str) -> Result<Self> {
        let fd = open_shared_memory(name, false)?;
        let len = shared_memory_size(&fd)?;
        Layout::for_region_length(len)?;
        let ptr = map_shared_memory(&fd, len)?;
        Ok(Self { ptr, len })
    }

    /// Removes the shared memory object `name`.
    pub fn unlink(name: &str) -> io::Result<()> {
        unlink_shared_memory(name)
    }
}

unsafe impl Storage for ShmStorage {
    #[inline]
    fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    #[inline]
    fn len(&self) -> usize {
        self.len
    }
}

impl Drop for ShmStorage {
    fn drop(&mut self) {
        if let Err(err) = unsafe { unmap_shared_memory(self.ptr, self.len) } {
            tracing::error!(%err, len = self.len, "failed to unmap shared memory region");
        }
    }
}

/// Storage backed by a memory-mapped file, e.g. `/dev/shm/feed.dat`.
#[derive(Debug)]
pub struct MmapStorage {
    mmap: MmapMut,
    ptr: NonNull<u8>,
}

unsafe impl Send for MmapStorage {}
unsafe impl Sync for MmapStorage {}

impl MmapStorage {
    /// Opens `path`, creating it if missing, and maps it shared. A new
    /// (empty) file is sized to `len`; an existing one must already have
    /// that length and keeps its contents.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidCapacity`] if the file exists with another length.
    pub fn create(path: impl AsRef<Path>, len: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let existing = usize::try_from(file.metadata()?.len()).map_err(io::Error::other)?;
        if existing == 0 {
            file.set_len(len as u64)?;
        } else {
            check_existing_length(existing, len)?;
        }
        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        Ok(Self::from_mmap(mmap))
    }

    /// Maps an existing file at its current length. Never resizes it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        Ok(Self::from_mmap(mmap))
    }

    fn from_mmap(mut mmap: MmapMut) -> Self {
        let ptr = NonNull::new(mmap.as_mut_ptr()).unwrap_or(NonNull::dangling());
        Self { mmap, ptr }
    }

    /// Flushes outstanding changes to the underlying file.
    pub fn flush(&self) -> io::Result<()> {
        self.mmap.flush()
    }
}

unsafe impl Storage for MmapStorage {
    #[inline]
    fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    #[inline]
    fn len(&self) -> usize {
        self.mmap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn heap_storage_is_zeroed_and_aligned() {
        let storage = HeapStorage::new(1024 + 128);
        assert_eq!(storage.len(), 1152);
        assert_eq!(storage.as_ptr().as_ptr().align_offset(8), 0);
        let bytes = unsafe { std::slice::from_raw_parts(storage.as_ptr().as_ptr(), storage.len()) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn heap_storage_rounds_length_up_to_words() {
        assert_eq!(HeapStorage::new(13).len(), 16);
        assert_eq!(HeapStorage::new(0).len(), 8);
    }

    #[test]
    fn heap_storage_pointer_aliases_words() {
        let storage = HeapStorage::new(16);
        storage.words[1].store(0xFF, Ordering::Relaxed);
        let byte = unsafe { storage.as_ptr().as_ptr().add(8).read() };
        assert_eq!(byte, 0xFF);
    }

    #[test]
    fn mmap_storage_persists_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region.dat");

        let storage = MmapStorage::create(&path, 256).unwrap();
        assert_eq!(storage.len(), 256);
        assert_eq!(storage.as_ptr().as_ptr().align_offset(8), 0);
        unsafe { storage.as_ptr().as_ptr().add(42).write(7) };
        storage.flush().unwrap();
        drop(storage);

        let storage = MmapStorage::open(&path).unwrap();
        assert_eq!(storage.len(), 256);
        assert_eq!(unsafe { storage.as_ptr().as_ptr().add(42).read() }, 7);

        // Re-creating with the same length keeps the data.
        drop(storage);
        let storage = MmapStorage::create(&path, 256).unwrap();
        assert_eq!(unsafe { storage.as_ptr().as_ptr().add(42).read() }, 7);
    }

    #[test]
    fn mmap_storage_refuses_to_resize_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region.dat");
        let _writer = MmapStorage::create(&path, 1024 + 128).unwrap();

        let err = MmapStorage::create(&path, 64 + 128).unwrap_err();
        assert!(matches!(err, Error::InvalidCapacity { capacity: 1024, .. }));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 1152);
    }

    #[test]
    fn shm_storage_create_open_and_unlink() {
        let name = format!("/hft-broadcast-storage-test-{}", std::process::id());
        let storage = ShmStorage::create(&name, 1024 + 128).unwrap();
        assert_eq!(storage.len(), 1152);
        assert_eq!(storage.as_ptr().as_ptr().align_offset(8), 0);
        unsafe { storage.as_ptr().as_ptr().add(16).write(9) };

        let reader = ShmStorage::open(&name).unwrap();
        assert_eq!(reader.len(), 1152);
        assert_eq!(unsafe { reader.as_ptr().as_ptr().add(16).read() }, 9);

        // Reopening as writer with the same length is fine, another is not.
        drop(ShmStorage::create(&name, 1024 + 128).unwrap());
        let err = ShmStorage::create(&name, 64 + 128).unwrap_err();
        assert!(matches!(err, Error::InvalidCapacity { capacity: 1024, .. }));
        assert_eq!(ShmStorage::open(&name).unwrap().len(), 1152);

        drop(reader);
        drop(storage);
        ShmStorage::unlink(&name).unwrap();
        assert!(matches!(ShmStorage::open(&name), Err(Error::Io(_))));
    }
}
