use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::receiver::{Receiver, StartPosition};
use crate::storage::Storage;
use crate::transmitter::Transmitter;
use crate::view::RegionView;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// A broadcast region: a power-of-two data area plus a trailer holding the
/// `tail_intent`, `tail` and `latest` counters.
///
/// ```text
/// 0                      capacity                          capacity + 128
/// | data (records)       | tail_intent | tail | latest | reserved      |
/// ```
///
/// A `Region` is a cheap, clonable handle to shared storage. It can spawn
/// any number of [`Receiver`]s but never a [`Transmitter`]: the single
/// transmitter is handed out once, by [`Region::create`].
pub struct Region<S: Storage> {
    storage: Arc<S>,
    layout: Layout,
}

impl<S: Storage> Clone for Region<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            layout: self.layout,
        }
    }
}

impl<S: Storage> Debug for Region<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("capacity", &self.layout.capacity())
            .field("tail", &self.tail_position())
            .field("latest", &self.latest_position())
            .finish()
    }
}

impl<S: Storage> Region<S> {
    fn new(storage: S) -> Result<Self> {
        let layout = Layout::for_region_length(storage.len())?;
        if storage.as_ptr().as_ptr().align_offset(align_of::<AtomicU64>()) != 0 {
            return Err(Error::MisalignedRegion);
        }
        Ok(Self {
            storage: Arc::new(storage),
            layout,
        })
    }

    /// Takes the writer role over `storage`.
    ///
    /// Returns the region's only [`Transmitter`] together with a handle for
    /// spawning receivers. A non-zero `tail` left in the storage by an
    /// earlier writer is picked up, not reset.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidCapacity`] if `storage.len() - TRAILER_LENGTH` is not
    /// a valid capacity, [`Error::MisalignedRegion`] if the storage is not
    /// 8-byte aligned.
    pub fn create(storage: S) -> Result<(Transmitter<S>, Self)> {
        let region = Self::new(storage)?;
        debug!(
            capacity = region.capacity(),
            tail = region.tail_position(),
            "created broadcast region"
        );
        Ok((Transmitter::new(region.clone()), region))
    }

    /// Takes the reader role over `storage`.
    pub fn attach(storage: S) -> Result<Self> {
        let region = Self::new(storage)?;
        debug!(
            capacity = region.capacity(),
            tail = region.tail_position(),
            "attached to broadcast region"
        );
        Ok(region)
    }

    /// New receiver positioned at the current tail: it sees only records
    /// published from now on.
    pub fn receiver(&self) -> Receiver<S> {
        Receiver::new(self.clone(), StartPosition::Tail)
    }

    pub fn receiver_from(&self, start: StartPosition) -> Receiver<S> {
        Receiver::new(self.clone(), start)
    }

    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.layout.capacity()
    }

    /// Total bytes ever appended (acquire load).
    #[inline]
    pub fn tail_position(&self) -> u64 {
        self.tail_counter().load(Ordering::Acquire)
    }

    /// Start of the most recently published record (acquire load).
    #[inline]
    pub fn latest_position(&self) -> u64 {
        self.latest_counter().load(Ordering::Acquire)
    }

    /// The whole region as atomic words.
    #[inline]
    pub(crate) fn words(&self) -> &[AtomicU64] {
        let ptr = self.storage.as_ptr().cast::<AtomicU64>();
        let len = self.layout.region_length() / size_of::<u64>();
        // Alignment and length were checked in `new`, and `Storage`
        // guarantees the memory lives as long as `self.storage`.
        unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) }
    }

    /// Read-only view over the data area (trailer excluded).
    #[inline]
    pub(crate) fn data(&self) -> RegionView<'_> {
        RegionView::new(self.words(), 0, self.layout.capacity())
    }

    #[inline]
    fn counter(&self, offset: usize) -> &AtomicU64 {
        &self.words()[offset / size_of::<u64>()]
    }

    #[inline]
    pub(crate) fn tail_intent_counter(&self) -> &AtomicU64 {
        self.counter(self.layout.tail_intent_counter_offset())
    }

    #[inline]
    pub(crate) fn tail_counter(&self) -> &AtomicU64 {
        self.counter(self.layout.tail_counter_offset())
    }

    #[inline]
    pub(crate) fn latest_counter(&self) -> &AtomicU64 {
        self.counter(self.layout.latest_counter_offset())
    }

    /// Record header word at physical `offset` in the data area.
    #[inline]
    pub(crate) fn header_word(&self, offset: usize) -> &AtomicU64 {
        debug_assert!(offset % size_of::<u64>() == 0 && offset < self.capacity());
        &self.words()[offset / size_of::<u64>()]
    }
}
