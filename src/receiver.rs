use crate::error::{Error, Result};
use crate::layout::{HEADER_LENGTH, Layout, MsgTypeId, unpack_header};
use crate::region::Region;
use crate::storage::Storage;
use crate::view::RegionView;
use crossbeam_utils::Backoff;
use std::sync::atomic::{self, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Where a new [`Receiver`] starts reading.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum StartPosition {
    /// Only records published after the receiver is created.
    #[default]
    Tail,
    /// The most recently published record, then everything after it.
    Latest,
}

/// The record surfaced by the last successful `receive_next`.
#[derive(Copy, Clone, Debug)]
struct Candidate {
    position: u64,
    type_id: MsgTypeId,
    /// Physical offset of the payload in the data area.
    offset: usize,
    length: usize,
}

impl Candidate {
    fn record_length(&self) -> u64 {
        Layout::record_length(self.length) as u64
    }
}

/// One independent reader of a broadcast region.
///
/// Reading is a two-step cycle:
///
/// ```text
/// while rx.receive_next() {
///     let value = decode(rx.payload()?);   // speculative
///     if rx.validate() {
///         consume(value);                  // bytes were not overwritten
///     }
/// }
/// ```
///
/// `receive_next` surfaces the next record without copying it. The payload
/// may be overwritten by the transmitter at any moment, so whatever was read
/// from it is only trustworthy once `validate` returns `true`.
///
/// A receiver that falls more than one capacity behind the transmitter has
/// been lapped: the records it missed are gone. It then skips ahead to the
/// most recent record and bumps [`Receiver::lapped_count`].
///
/// Receivers never write to the region and never coordinate with each
/// other or with the transmitter.
#[derive(Debug)]
pub struct Receiver<S: Storage> {
    region: Region<S>,
    cursor: u64,
    lapped_count: u64,
    current: Option<Candidate>,
}

impl<S: Storage> Clone for Receiver<S> {
    fn clone(&self) -> Self {
        Self {
            region: self.region.clone(),
            cursor: self.cursor,
            lapped_count: self.lapped_count,
            current: self.current,
        }
    }
}

impl<S: Storage> Receiver<S> {
    pub(crate) fn new(region: Region<S>, start: StartPosition) -> Self {
        let cursor = match start {
            StartPosition::Tail => region.tail_position(),
            StartPosition::Latest => {
                let tail = region.tail_position();
                let latest = region.latest_position();
                // `latest` is meaningless until something was published.
                if tail == 0 { 0 } else { latest.min(tail) }
            }
        };
        Self {
            region,
            cursor,
            lapped_count: 0,
            current: None,
        }
    }

    /// Surfaces the next record, skipping padding.
    ///
    /// Returns `false` when nothing new has been published. Any previous
    /// candidate is dropped first, so the accessors fail until this returns
    /// `true` again.
    pub fn receive_next(&mut self) -> bool {
        self.current = None;
        let layout = self.region.layout();
        let capacity = layout.capacity() as u64;

        loop {
            let tail = self.region.tail_counter().load(Ordering::Acquire);
            if self.cursor == tail {
                return false;
            }
            if self.cursor > tail {
                warn!(
                    cursor = self.cursor,
                    tail, "receiver is ahead of the region tail, resetting to tail"
                );
                self.cursor = tail;
                return false;
            }

            let intent = self.region.tail_intent_counter().load(Ordering::Acquire);
            if intent.saturating_sub(self.cursor) > capacity {
                self.resync(tail);
                continue;
            }

            let offset = layout.offset_of(self.cursor);
            let header = self.region.header_word(offset).load(Ordering::Relaxed);
            atomic::fence(Ordering::Acquire);
            let intent = self.region.tail_intent_counter().load(Ordering::Acquire);
            if intent.saturating_sub(self.cursor) > capacity {
                self.resync(tail);
                continue;
            }

            let (length, type_id) = unpack_header(header);
            let length = length as usize;
            let record_length = Layout::record_length(length);
            if offset + record_length > layout.capacity()
                || self.cursor + record_length as u64 > tail
                || type_id < MsgTypeId::PADDING.get()
            {
                warn!(
                    cursor = self.cursor,
                    tail, length, type_id, "malformed record header"
                );
                self.resync(tail);
                continue;
            }

            if type_id == MsgTypeId::PADDING.get() {
                self.cursor += record_length as u64;
                continue;
            }

            self.current = Some(Candidate {
                position: self.cursor,
                type_id: MsgTypeId::from_raw(type_id),
                offset: offset + HEADER_LENGTH,
                length,
            });
            return true;
        }
    }

    /// Skips ahead after being lapped.
    fn resync(&mut self, tail: u64) {
        let latest = self.region.latest_counter().load(Ordering::Acquire);
        let from = self.cursor;
        // Never step backwards: that would redeliver records.
        self.cursor = if latest > self.cursor && latest <= tail {
            latest
        } else {
            tail
        };
        self.lapped_count += 1;
        debug!(
            from,
            to = self.cursor,
            lapped_count = self.lapped_count,
            "receiver lapped"
        );
    }

    /// Confirms that the current record was not overwritten while it was
    /// being read.
    ///
    /// On success the cursor moves past the record. On failure it stays
    /// put and the next [`Receiver::receive_next`] notices the lap. Either
    /// way the candidate is consumed; without one this returns `false`.
    pub fn validate(&mut self) -> bool {
        let Some(current) = self.current.take() else {
            return false;
        };
        // Orders the caller's payload reads before the intent reload.
        atomic::fence(Ordering::Acquire);
        let intent = self.region.tail_intent_counter().load(Ordering::Acquire);
        if intent.saturating_sub(current.position) > self.region.capacity() as u64 {
            trace!(
                position = current.position,
                intent, "record overwritten while being read"
            );
            return false;
        }
        self.cursor = current.position + current.record_length();
        true
    }

    fn current(&self) -> Result<&Candidate> {
        self.current.as_ref().ok_or(Error::NoCurrentRecord)
    }

    pub fn type_id(&self) -> Result<MsgTypeId> {
        Ok(self.current()?.type_id)
    }

    /// Payload offset within [`Receiver::buffer`].
    pub fn offset(&self) -> Result<usize> {
        Ok(self.current()?.offset)
    }

    /// Payload length in bytes.
    pub fn length(&self) -> Result<usize> {
        Ok(self.current()?.length)
    }

    /// Logical position of the current record.
    pub fn position(&self) -> Result<u64> {
        Ok(self.current()?.position)
    }

    /// The whole data area. The current payload is at
    /// `offset()..offset() + length()`.
    pub fn buffer(&self) -> Result<RegionView<'_>> {
        self.current()?;
        Ok(self.region.data())
    }

    /// The current payload.
    pub fn payload(&self) -> Result<RegionView<'_>> {
        let current = self.current()?;
        Ok(self.region.data().sub_view(current.offset, current.length))
    }

    /// Number of times this receiver was lapped and skipped ahead.
    #[inline]
    pub fn lapped_count(&self) -> u64 {
        self.lapped_count
    }

    /// Logical position of the next record to read.
    #[inline]
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    #[inline]
    pub fn region(&self) -> &Region<S> {
        &self.region
    }

    /// Runs a full `receive_next` / read / `validate` cycle.
    ///
    /// `read` gets the record's type and payload and may be called several
    /// times: reads that fail validation are discarded and the next record
    /// is tried. Returns `None` once nothing new is published.
    pub fn try_recv<R, F>(&mut self, mut read: F) -> Option<R>
    where
        F: FnMut(MsgTypeId, RegionView<'_>) -> R,
    {
        while self.receive_next() {
            let current = self.current?;
            let payload = self.region.data().sub_view(current.offset, current.length);
            let value = read(current.type_id, payload);
            if self.validate() {
                return Some(value);
            }
        }
        None
    }

    /// Polls [`Receiver::receive_next`] until it succeeds or `timeout`
    /// elapses.
    ///
    /// Spins briefly, then yields the thread between polls.
    pub fn receive_next_timeout(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let backoff = Backoff::new();
        loop {
            if self.receive_next() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            backoff.snooze();
        }
    }
}
