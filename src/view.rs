//! Byte views over the shared data area.
//!
//! The data area is only ever touched through 64-bit atomic words, so a
//! reader racing the transmitter observes stale or torn *values* but never
//! performs a data race. Detecting torn values is the job of
//! [`Receiver::validate`](crate::Receiver::validate).

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

const WORD: usize = size_of::<u64>();

/// Copies `dst.len()` bytes starting at byte `offset` of `words` into `dst`.
fn load_bytes(words: &[AtomicU64], offset: usize, dst: &mut [u8]) {
    let end = offset + dst.len();
    let mut pos = offset;
    let mut out = 0;
    while pos < end {
        let word = words[pos / WORD].load(Ordering::Relaxed).to_ne_bytes();
        let start = pos % WORD;
        let n = (WORD - start).min(end - pos);
        dst[out..out + n].copy_from_slice(&word[start..start + n]);
        pos += n;
        out += n;
    }
}

/// Copies `src` into `words` starting at byte `offset`.
///
/// Partially covered words are read, spliced and written back, which is
/// only sound because the transmitter is the sole writer.
fn store_bytes(words: &[AtomicU64], offset: usize, src: &[u8]) {
    let end = offset + src.len();
    let mut pos = offset;
    let mut inp = 0;
    while pos < end {
        let slot = &words[pos / WORD];
        let start = pos % WORD;
        let n = (WORD - start).min(end - pos);
        let mut word = if n == WORD {
            [0u8; WORD]
        } else {
            slot.load(Ordering::Relaxed).to_ne_bytes()
        };
        word[start..start + n].copy_from_slice(&src[inp..inp + n]);
        slot.store(u64::from_ne_bytes(word), Ordering::Relaxed);
        pos += n;
        inp += n;
    }
}

/// Read-only view over a range of the region's data area.
///
/// A `RegionView` handed out by a [`Receiver`](crate::Receiver) borrows the
/// receiver, so it cannot outlive the window between `receive_next()` and
/// the following `validate()`. Bytes read through it are only trustworthy
/// once `validate()` returns `true`.
#[derive(Clone, Copy)]
pub struct RegionView<'a> {
    words: &'a [AtomicU64],
    offset: usize,
    len: usize,
}

impl<'a> RegionView<'a> {
    pub(crate) fn new(words: &'a [AtomicU64], offset: usize, len: usize) -> Self {
        debug_assert!(offset + len <= words.len() * WORD);
        Self { words, offset, len }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns a view over `len` bytes starting at `offset` within this view.
    ///
    /// # Panics
    ///
    /// Panics if `offset + len` exceeds the length of this view.
    pub fn sub_view(&self, offset: usize, len: usize) -> RegionView<'a> {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.len),
            "sub_view out of bounds: offset={} len={} view_len={}",
            offset,
            len,
            self.len
        );
        RegionView::new(self.words, self.offset + offset, len)
    }

    /// Copies the viewed bytes into `dst`.
    ///
    /// # Panics
    ///
    /// Panics if `dst.len()` differs from the view length.
    pub fn copy_to_slice(&self, dst: &mut [u8]) {
        assert_eq!(dst.len(), self.len, "destination length mismatch");
        load_bytes(self.words, self.offset, dst);
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.len];
        self.copy_to_slice(&mut out);
        out
    }

    pub fn read_u8(&self, offset: usize) -> u8 {
        let mut b = [0u8; 1];
        self.sub_view(offset, 1).copy_to_slice(&mut b);
        b[0]
    }

    pub fn read_u32_le(&self, offset: usize) -> u32 {
        let mut b = [0u8; 4];
        self.sub_view(offset, 4).copy_to_slice(&mut b);
        u32::from_le_bytes(b)
    }

    pub fn read_u64_le(&self, offset: usize) -> u64 {
        let mut b = [0u8; 8];
        self.sub_view(offset, 8).copy_to_slice(&mut b);
        u64::from_le_bytes(b)
    }
}

impl Debug for RegionView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionView")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

/// Writable payload slot handed to the fill closure of
/// [`Transmitter::transmit_with`](crate::Transmitter::transmit_with).
pub struct RecordWriter<'a> {
    words: &'a [AtomicU64],
    offset: usize,
    len: usize,
}

impl<'a> RecordWriter<'a> {
    pub(crate) fn new(words: &'a [AtomicU64], offset: usize, len: usize) -> Self {
        debug_assert!(offset + len <= words.len() * WORD);
        Self { words, offset, len }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Writes `src` at `offset` within the payload.
    ///
    /// # Panics
    ///
    /// Panics if the write would run past the end of the payload.
    pub fn put_slice(&mut self, offset: usize, src: &[u8]) {
        assert!(
            offset
                .checked_add(src.len())
                .is_some_and(|end| end <= self.len),
            "put_slice out of bounds: offset={} len={} payload_len={}",
            offset,
            src.len(),
            self.len
        );
        store_bytes(self.words, self.offset + offset, src);
    }

    pub fn put_u32_le(&mut self, offset: usize, value: u32) {
        self.put_slice(offset, &value.to_le_bytes());
    }

    pub fn put_u64_le(&mut self, offset: usize, value: u64) {
        self.put_slice(offset, &value.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> Vec<AtomicU64> {
        (0..n).map(|_| AtomicU64::new(0)).collect()
    }

    #[test]
    fn store_and_load_across_word_boundaries() {
        let words = words(4);
        let src: Vec<u8> = (1..=19).collect();
        store_bytes(&words, 3, &src);

        let mut dst = vec![0u8; 19];
        load_bytes(&words, 3, &mut dst);
        assert_eq!(dst, src);

        // Bytes around the written range stay untouched.
        let view = RegionView::new(&words, 0, 32);
        assert_eq!(view.read_u8(0), 0);
        assert_eq!(view.read_u8(2), 0);
        assert_eq!(view.read_u8(3), 1);
        assert_eq!(view.read_u8(21), 19);
        assert_eq!(view.read_u8(22), 0);
    }

    #[test]
    fn writer_and_view_agree_on_little_endian_words() {
        let words = words(4);
        let mut writer = RecordWriter::new(&words, 8, 16);
        writer.put_u64_le(0, 0x0102_0304_0506_0708);
        writer.put_u32_le(8, 0xAABB_CCDD);

        let view = RegionView::new(&words, 8, 16);
        assert_eq!(view.read_u64_le(0), 0x0102_0304_0506_0708);
        assert_eq!(view.read_u32_le(8), 0xAABB_CCDD);
        assert_eq!(view.read_u8(0), 0x08);
    }

    #[test]
    fn sub_view_is_relative_to_parent() {
        let words = words(2);
        store_bytes(&words, 0, &[10, 11, 12, 13, 14, 15, 16, 17, 18, 19]);
        let view = RegionView::new(&words, 2, 8);
        let sub = view.sub_view(3, 4);
        assert_eq!(sub.len(), 4);
        assert_eq!(sub.to_vec(), vec![15, 16, 17, 18]);
    }

    #[test]
    #[should_panic(expected = "sub_view out of bounds")]
    fn sub_view_out_of_bounds_panics() {
        let words = words(2);
        let view = RegionView::new(&words, 0, 16);
        let _ = view.sub_view(12, 8);
    }

    #[test]
    #[should_panic(expected = "sub_view out of bounds")]
    fn sub_view_with_overflowing_offset_panics() {
        let words = words(2);
        let view = RegionView::new(&words, 0, 16);
        let _ = view.sub_view(usize::MAX, 2);
    }

    #[test]
    #[should_panic(expected = "put_slice out of bounds")]
    fn put_slice_with_overflowing_offset_panics() {
        let words = words(2);
        let mut writer = RecordWriter::new(&words, 0, 16);
        writer.put_slice(usize::MAX - 1, &[1, 2, 3]);
    }

    #[test]
    #[should_panic(expected = "put_slice out of bounds")]
    fn put_slice_past_payload_panics() {
        let words = words(2);
        let mut writer = RecordWriter::new(&words, 0, 4);
        writer.put_slice(2, &[1, 2, 3]);
    }

    #[test]
    fn empty_views() {
        let words = words(1);
        let view = RegionView::new(&words, 8, 0);
        assert!(view.is_empty());
        assert!(view.to_vec().is_empty());
    }
}
