use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::receiver::Receiver;
use crate::region::Region;
use crate::storage::{HeapStorage, ShmStorage};
use crate::transmitter::Transmitter;

/// Creates an in-process broadcast region on the heap.
///
/// Returns the region's only [`Transmitter`] and a [`Receiver`] positioned
/// at the start. Clone the receiver (or call [`Receiver::region`] and
/// [`Region::receiver`]) for additional consumers; each keeps its own
/// cursor.
///
/// # Errors
///
/// [`Error::InvalidCapacity`] if `capacity`
/// is not a power of two of at least
/// [`MIN_CAPACITY`](crate::MIN_CAPACITY) bytes.
pub fn local_channel(
    capacity: usize,
) -> Result<(Transmitter<HeapStorage>, Receiver<HeapStorage>)> {
    let layout = Layout::new(capacity)?;
    let (tx, region) = Region::create(HeapStorage::new(layout.region_length()))?;
    Ok((tx, region.receiver()))
}

/// Creates (or reopens) a broadcast region in POSIX shared memory and takes
/// the writer role.
///
/// `shm_name` must start with `'/'` and contain no other `'/'`. Opening an
/// existing object reuses it: the transmitter resumes at the stored tail
/// and the returned receiver starts there too.
///
/// # Errors
///
/// [`Error::InvalidCapacity`] for a bad `capacity`, or if the object
/// already exists with a different one. [`Error::Io`] if the object cannot
/// be opened, sized or mapped.
pub fn channel(
    shm_name: impl AsRef<str>,
    capacity: usize,
) -> Result<(Transmitter<ShmStorage>, Receiver<ShmStorage>)> {
    let layout = Layout::new(capacity)?;
    let storage = ShmStorage::create(shm_name.as_ref(), layout.region_length())?;
    let (tx, region) = Region::create(storage)?;
    Ok((tx, region.receiver()))
}

/// Attaches a receiver to the shared memory region `shm_name`, typically
/// from another process than the transmitter.
///
/// The object must already exist; it is never created or resized here.
/// The receiver starts at the current tail.
///
/// # Errors
///
/// [`Error::InvalidCapacity`] if `capacity` differs from the region's,
/// [`Error::Io`] if the object does not exist or cannot be mapped.
pub fn subscribe(shm_name: impl AsRef<str>, capacity: usize) -> Result<Receiver<ShmStorage>> {
    let layout = Layout::new(capacity)?;
    let region = Region::attach(ShmStorage::open(shm_name.as_ref())?)?;
    if region.layout() != layout {
        return Err(Error::InvalidCapacity {
            capacity,
            reason: "does not match the shared memory region",
        });
    }
    Ok(region.receiver())
}
