use thiserror::Error;

/// Errors returned by region construction, configuration and transmission.
///
/// Lapping and torn reads are not errors: they are reported through
/// [`Receiver::lapped_count`](crate::Receiver::lapped_count) and
/// [`Receiver::validate`](crate::Receiver::validate).
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid capacity {capacity}: {reason}")]
    InvalidCapacity { capacity: usize, reason: &'static str },

    #[error("region base address is not 8-byte aligned")]
    MisalignedRegion,

    #[error("invalid max record length {length} for capacity {capacity}")]
    InvalidMaxRecordLength { length: usize, capacity: usize },

    #[error("message too large: {length} bytes (max {max} bytes)")]
    MessageTooLarge { length: usize, max: usize },

    #[error("invalid message type id {0}: must be non-negative")]
    InvalidMsgType(i32),

    #[error("no current record: call receive_next() first")]
    NoCurrentRecord,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
