use crate::error::{Error, Result};
use crate::layout::{HEADER_LENGTH, Layout, MsgTypeId, pack_header};
use crate::region::Region;
use crate::storage::Storage;
use crate::view::RecordWriter;
use std::sync::atomic::{self, Ordering};
use tracing::{debug, warn};

/// The region's sole writer.
///
/// Appends framed records into the data area and publishes them through
/// the trailer counters. Transmitting never blocks and never waits for
/// receivers: once the data area is full the oldest records are simply
/// overwritten, and receivers that have fallen behind detect it on their
/// own.
///
/// # Protocol
///
/// For every record the transmitter:
///
/// 1. stores `tail_intent = tail + record_length` (release) and fences, so
///    that a receiver validating bytes about to be overwritten sees the new
///    intent;
/// 2. writes the header and payload;
/// 3. stores `latest = tail`, then `tail += record_length` (both release).
///    The store to `tail` is what makes the record visible.
///
/// A record that would straddle the end of the data area is preceded by a
/// padding record filling the rest of the lap, published the same way.
///
/// A `Transmitter` is obtained only from [`Region::create`] and is not
/// `Clone`, so a region has at most one writer per process. Running two
/// writers over the same shared memory from different processes is a
/// contract violation the type system cannot catch.
#[derive(Debug)]
pub struct Transmitter<S: Storage> {
    region: Region<S>,

    /// Writer-local copy of `tail`; the writer is the only mutator.
    tail: u64,

    /// Intent left behind by a writer that died mid-record. Intents below
    /// it are never published, so receivers keep treating those bytes as
    /// overwritten.
    intent_floor: u64,

    max_record_length: usize,
}

impl<S: Storage> Transmitter<S> {
    pub(crate) fn new(region: Region<S>) -> Self {
        let tail = region.tail_counter().load(Ordering::Acquire);
        let intent = region.tail_intent_counter().load(Ordering::Acquire);
        if intent > tail {
            warn!(
                tail,
                intent, "previous transmitter stopped mid-record, resuming at tail"
            );
        }
        let max_record_length = region.layout().default_max_record_length();
        debug!(tail, max_record_length, "transmitter ready");
        Self {
            region,
            tail,
            intent_floor: intent.max(tail),
            max_record_length,
        }
    }

    /// Overrides the maximum record length (header included).
    ///
    /// The default is `capacity / 8`. Values are rounded down to the record
    /// alignment.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidMaxRecordLength`] unless
    /// `HEADER_LENGTH <= length <= capacity / 2`.
    pub fn with_max_record_length(mut self, length: usize) -> Result<Self> {
        self.max_record_length = self.region.layout().check_max_record_length(length)?;
        Ok(self)
    }

    #[inline]
    pub fn max_record_length(&self) -> usize {
        self.max_record_length
    }

    /// Largest payload accepted by [`Transmitter::transmit`].
    #[inline]
    pub fn max_payload_length(&self) -> usize {
        self.max_record_length - HEADER_LENGTH
    }

    #[inline]
    pub fn region(&self) -> &Region<S> {
        &self.region
    }

    /// Logical position the next record will be written at (before any
    /// padding).
    #[inline]
    pub fn position(&self) -> u64 {
        self.tail
    }

    /// Publishes one record carrying a copy of `payload`.
    ///
    /// Returns the record's logical position.
    ///
    /// # Errors
    ///
    /// [`Error::MessageTooLarge`] if the framed record exceeds
    /// [`Transmitter::max_record_length`]. Nothing is written in that case.
    pub fn transmit(&mut self, type_id: MsgTypeId, payload: &[u8]) -> Result<u64> {
        self.transmit_with(type_id, payload.len(), |record| {
            record.put_slice(0, payload)
        })
    }

    /// Publishes one record of `length` payload bytes written in place by
    /// `fill`.
    ///
    /// `fill` receives a [`RecordWriter`] over the reserved payload. Bytes
    /// it leaves untouched keep whatever the data area held before.
    pub fn transmit_with<F>(&mut self, type_id: MsgTypeId, length: usize, fill: F) -> Result<u64>
    where
        F: FnOnce(&mut RecordWriter<'_>),
    {
        if length > self.max_payload_length() {
            return Err(Error::MessageTooLarge {
                length,
                max: self.max_payload_length(),
            });
        }
        let record_length = Layout::record_length(length);

        let layout = self.region.layout();
        let offset = layout.offset_of(self.tail);
        if offset + record_length > layout.capacity() {
            let padding_length = layout.capacity() - offset;
            self.publish(MsgTypeId::PADDING, padding_length - HEADER_LENGTH, |_| {});
        }

        let position = self.tail;
        self.publish(type_id, length, fill);
        Ok(position)
    }

    fn publish<F>(&mut self, type_id: MsgTypeId, length: usize, fill: F)
    where
        F: FnOnce(&mut RecordWriter<'_>),
    {
        let position = self.tail;
        let record_length = Layout::record_length(length);
        let next = position + record_length as u64;
        let offset = self.region.layout().offset_of(position);
        debug_assert!(offset + record_length <= self.region.capacity());

        self.region
            .tail_intent_counter()
            .store(next.max(self.intent_floor), Ordering::Release);
        // Orders the intent before every data store below.
        atomic::fence(Ordering::Release);

        self.region
            .header_word(offset)
            .store(pack_header(length as u32, type_id.get()), Ordering::Relaxed);
        let mut record = RecordWriter::new(self.region.words(), offset + HEADER_LENGTH, length);
        fill(&mut record);

        if !type_id.is_padding() {
            self.region
                .latest_counter()
                .store(position, Ordering::Release);
        }
        self.region.tail_counter().store(next, Ordering::Release);
        self.tail = next;
    }
}
