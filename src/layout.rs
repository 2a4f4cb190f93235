use crate::error::{Error, Result};

/// Length of the record header: `length: u32` followed by `type_id: i32`.
pub const HEADER_LENGTH: usize = 8;

/// Every record starts (and ends) on a multiple of this many bytes.
pub const RECORD_ALIGNMENT: usize = 8;

/// Length of the trailer holding the atomic counters after the data area.
pub const TRAILER_LENGTH: usize = 128;

/// Smallest data area accepted by [`Layout::new`].
pub const MIN_CAPACITY: usize = 64;

/// Byte offset of the tail-intent counter inside the trailer.
pub const TAIL_INTENT_COUNTER_OFFSET: usize = 0;

/// Byte offset of the tail counter inside the trailer.
pub const TAIL_COUNTER_OFFSET: usize = TAIL_INTENT_COUNTER_OFFSET + size_of::<u64>();

/// Byte offset of the latest-record counter inside the trailer.
pub const LATEST_COUNTER_OFFSET: usize = TAIL_COUNTER_OFFSET + size_of::<u64>();

const PADDING_TYPE_ID: i32 = -1;

/// Largest record whose payload length still fits the header's `u32`.
const RECORD_LENGTH_LIMIT: usize = (u32::MAX as usize) & !(RECORD_ALIGNMENT - 1);

/// Application-defined record discriminator.
///
/// Always non-negative; the negative range is reserved for framing
/// (`-1` marks padding records inserted at the wrap boundary).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct MsgTypeId(i32);

impl MsgTypeId {
    pub(crate) const PADDING: MsgTypeId = MsgTypeId(PADDING_TYPE_ID);

    /// Creates a type id, rejecting negative values.
    pub fn new(id: i32) -> Result<Self> {
        if id < 0 {
            return Err(Error::InvalidMsgType(id));
        }
        Ok(Self(id))
    }

    /// Wraps an id read back from a record header.
    #[inline]
    pub(crate) const fn from_raw(id: i32) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn get(self) -> i32 {
        self.0
    }

    #[inline]
    pub(crate) const fn is_padding(self) -> bool {
        self.0 == PADDING_TYPE_ID
    }
}

impl TryFrom<i32> for MsgTypeId {
    type Error = Error;

    fn try_from(id: i32) -> Result<Self> {
        Self::new(id)
    }
}

impl From<MsgTypeId> for i32 {
    fn from(id: MsgTypeId) -> i32 {
        id.0
    }
}

/// Rounds `value` up to the next multiple of `alignment` (a power of two).
#[inline]
pub const fn align(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Packs a record header into the word written at the record's start.
///
/// `length` lands in bytes `0..4` and `type_id` in bytes `4..8`, both in
/// native byte order, regardless of platform endianness.
#[inline]
pub(crate) fn pack_header(length: u32, type_id: i32) -> u64 {
    let mut bytes = [0u8; 8];
    bytes[..4].copy_from_slice(&length.to_ne_bytes());
    bytes[4..].copy_from_slice(&type_id.to_ne_bytes());
    u64::from_ne_bytes(bytes)
}

/// Inverse of [`pack_header`]. Returns `(length, type_id)`.
#[inline]
pub(crate) fn unpack_header(word: u64) -> (u32, i32) {
    let bytes = word.to_ne_bytes();
    let length = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let type_id = i32::from_ne_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    (length, type_id)
}

/// Byte layout of a broadcast region: a power-of-two data area followed by
/// a [`TRAILER_LENGTH`]-byte trailer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Layout {
    capacity: usize,
}

impl Layout {
    /// Validates `capacity` (the data area size, trailer excluded).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidCapacity`] if `capacity` is zero, not a power of two,
    /// or smaller than [`MIN_CAPACITY`].
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidCapacity {
                capacity,
                reason: "capacity must be non-zero",
            });
        }
        if !capacity.is_power_of_two() {
            return Err(Error::InvalidCapacity {
                capacity,
                reason: "capacity must be a power of two",
            });
        }
        if capacity < MIN_CAPACITY {
            return Err(Error::InvalidCapacity {
                capacity,
                reason: "capacity is below the minimum of 64 bytes",
            });
        }
        Ok(Self { capacity })
    }

    /// Derives the layout from the total length of a region
    /// (`capacity + TRAILER_LENGTH`).
    pub fn for_region_length(length: usize) -> Result<Self> {
        if length <= TRAILER_LENGTH {
            return Err(Error::InvalidCapacity {
                capacity: 0,
                reason: "region is not larger than the trailer",
            });
        }
        Self::new(length - TRAILER_LENGTH)
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total bytes needed to back this layout.
    #[inline]
    pub const fn region_length(&self) -> usize {
        self.capacity + TRAILER_LENGTH
    }

    /// Maps a logical position to its physical offset in the data area.
    #[inline]
    pub const fn offset_of(&self, position: u64) -> usize {
        (position & (self.capacity as u64 - 1)) as usize
    }

    /// Aligned length of a record carrying `payload_length` bytes.
    #[inline]
    pub const fn record_length(payload_length: usize) -> usize {
        align(HEADER_LENGTH + payload_length, RECORD_ALIGNMENT)
    }

    /// Default cap on a single record: one eighth of the data area, and
    /// never more than the header's length field can describe.
    #[inline]
    pub const fn default_max_record_length(&self) -> usize {
        let length = self.capacity / 8;
        if length > RECORD_LENGTH_LIMIT {
            RECORD_LENGTH_LIMIT
        } else {
            length
        }
    }

    /// Checks a transmitter's record length limit against this layout.
    pub(crate) fn check_max_record_length(&self, length: usize) -> Result<usize> {
        if length < HEADER_LENGTH || length > self.capacity / 2 || length > RECORD_LENGTH_LIMIT {
            return Err(Error::InvalidMaxRecordLength {
                length,
                capacity: self.capacity,
            });
        }
        Ok(length - length % RECORD_ALIGNMENT)
    }

    #[inline]
    pub(crate) const fn tail_intent_counter_offset(&self) -> usize {
        self.capacity + TAIL_INTENT_COUNTER_OFFSET
    }

    #[inline]
    pub(crate) const fn tail_counter_offset(&self) -> usize {
        self.capacity + TAIL_COUNTER_OFFSET
    }

    #[inline]
    pub(crate) const fn latest_counter_offset(&self) -> usize {
        self.capacity + LATEST_COUNTER_OFFSET
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_rounds_up_to_alignment() {
        assert_eq!(align(12, 8), 16);
        assert_eq!(align(16, 8), 16);
        assert_eq!(align(6, 8), 8);
        assert_eq!(align(0, 8), 0);
    }

    #[test]
    fn record_length_includes_header_and_alignment() {
        assert_eq!(Layout::record_length(0), 8);
        assert_eq!(Layout::record_length(1), 16);
        assert_eq!(Layout::record_length(16), 24);
        assert_eq!(Layout::record_length(25), 40);
    }

    #[test]
    fn layout_rejects_invalid_capacities() {
        for capacity in [0, 100, 1000, 32, 8] {
            assert!(
                matches!(Layout::new(capacity), Err(Error::InvalidCapacity { .. })),
                "capacity {} must be rejected",
                capacity
            );
        }
        assert!(Layout::new(64).is_ok());
        assert!(Layout::new(1024).is_ok());
    }

    #[test]
    fn layout_from_region_length_strips_trailer() {
        let layout = Layout::for_region_length(1024 + TRAILER_LENGTH).unwrap();
        assert_eq!(layout.capacity(), 1024);
        assert_eq!(layout.region_length(), 1024 + TRAILER_LENGTH);

        assert!(Layout::for_region_length(TRAILER_LENGTH).is_err());
        assert!(Layout::for_region_length(1000 + TRAILER_LENGTH).is_err());
    }

    #[test]
    fn offset_of_wraps_with_mask() {
        let layout = Layout::new(1024).unwrap();
        assert_eq!(layout.offset_of(0), 0);
        assert_eq!(layout.offset_of(1023), 1023);
        assert_eq!(layout.offset_of(1024), 0);
        assert_eq!(layout.offset_of(5 * 1024 + 24), 24);
    }

    #[test]
    fn counters_sit_in_the_trailer() {
        let layout = Layout::new(1024).unwrap();
        assert_eq!(layout.tail_intent_counter_offset(), 1024);
        assert_eq!(layout.tail_counter_offset(), 1032);
        assert_eq!(layout.latest_counter_offset(), 1040);
        assert!(layout.latest_counter_offset() + 8 <= layout.region_length());
    }

    #[test]
    fn max_record_length_bounds() {
        let layout = Layout::new(1024).unwrap();
        assert_eq!(layout.default_max_record_length(), 128);
        assert_eq!(layout.check_max_record_length(512).unwrap(), 512);
        assert_eq!(layout.check_max_record_length(30).unwrap(), 24);
        assert!(layout.check_max_record_length(4).is_err());
        assert!(layout.check_max_record_length(513).is_err());
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn max_record_length_fits_header_length_field() {
        // 64 GiB data area: capacity / 2 and capacity / 8 both exceed u32.
        let layout = Layout::new(1 << 36).unwrap();
        assert_eq!(layout.default_max_record_length(), RECORD_LENGTH_LIMIT);
        assert_eq!(RECORD_LENGTH_LIMIT, (u32::MAX - 7) as usize);
        assert!(matches!(
            layout.check_max_record_length(1 << 33),
            Err(Error::InvalidMaxRecordLength { .. })
        ));
        assert_eq!(
            layout.check_max_record_length(RECORD_LENGTH_LIMIT).unwrap(),
            RECORD_LENGTH_LIMIT
        );
    }

    #[test]
    fn header_packs_length_then_type_id() {
        let word = pack_header(16, 7);
        let bytes = word.to_ne_bytes();
        assert_eq!(u32::from_ne_bytes(bytes[..4].try_into().unwrap()), 16);
        assert_eq!(i32::from_ne_bytes(bytes[4..].try_into().unwrap()), 7);
        assert_eq!(unpack_header(word), (16, 7));
        assert_eq!(unpack_header(pack_header(8, -1)), (8, -1));
    }

    #[test]
    fn msg_type_id_rejects_negative_values() {
        assert_eq!(MsgTypeId::new(0).unwrap().get(), 0);
        assert_eq!(MsgTypeId::try_from(42).unwrap().get(), 42);
        assert!(matches!(MsgTypeId::new(-1), Err(Error::InvalidMsgType(-1))));
        assert!(MsgTypeId::PADDING.is_padding());
        assert!(!MsgTypeId::new(1).unwrap().is_padding());
    }
}
