//! # HFT Broadcast
//!
//! A single-writer, multi-reader broadcast buffer for variable-length
//! records, designed for market-data style fan-out in high-frequency
//! trading (HFT) and other low-latency systems.
//!
//! One [`Transmitter`] appends framed records (`length`, `type_id`,
//! payload) into a fixed-size, power-of-two data area. Any number of
//! [`Receiver`]s read them independently, each with its own cursor. The
//! writer never waits for readers: when the area is full the oldest
//! records are overwritten, and a reader that fell behind notices it was
//! lapped and skips ahead to the most recent record.
//!
//! The region may live on the heap for **intra-process** broadcast, or in
//! POSIX shared memory or a memory-mapped file for **inter-process**
//! broadcast. Its byte layout is the same in all cases:
//!
//! ```text
//! | data area (capacity bytes) | tail_intent | tail | latest | reserved |
//!                              |<-------- trailer, 128 bytes --------->|
//! ```
//!
//! ## Reading
//!
//! Records are read in place, without copying, through a two-step cycle:
//!
//! ```
//! use hft_broadcast::{MsgTypeId, local_channel};
//!
//! let (mut tx, mut rx) = local_channel(1024)?;
//! tx.transmit(MsgTypeId::new(1)?, b"quote")?;
//!
//! while rx.receive_next() {
//!     let bytes = rx.payload()?.to_vec();
//!     if rx.validate() {
//!         assert_eq!(bytes, b"quote");
//!     }
//! }
//! # Ok::<(), hft_broadcast::Error>(())
//! ```
//!
//! Anything read between `receive_next` and `validate` is speculative: the
//! transmitter may overwrite it at any time. `validate` tells whether it
//! did. All shared bytes are accessed through atomic words, so such a race
//! yields stale values, never undefined behavior.
//!
//! ## Polling Behavior
//!
//! Nothing in this crate blocks. `receive_next` returns `false` when there
//! is nothing new and the caller decides whether to spin, yield or sleep.
//!
//! - **Ultra-low latency:**
//!   A receiver that busy-polls sees a record as soon as the writer's
//!   store to the tail counter reaches its cache.
//!
//! - **CPU usage:**
//!   A busy-polling receiver **consumes a full logical core**.
//!   [`Receiver::receive_next_timeout`] backs off to yielding the thread
//!   when it has been idle for a while.
//!
//! - **No backpressure:**
//!   Slow receivers never slow the writer down. They lose records instead,
//!   and [`Receiver::lapped_count`] tells how often that happened.
//!
//! ## Modules
//!
//! - [`Region`], [`Transmitter`], [`Receiver`]: the broadcast protocol.
//! - [`Storage`] with [`HeapStorage`], [`ShmStorage`] and [`MmapStorage`]:
//!   where the region's bytes live.
//! - [`local_channel`], [`channel`], [`subscribe`]: convenience
//!   constructors.
//! - [`utils`]: benchmarking helpers.
//!
//! ## License
//!
//! Copyright © 2005–2025
//! IKH Software, Inc.
//!
//! Licensed under the terms of the **GNU Lesser General Public License**,
//! version 3.0, or (at your option) any later version.
//!
//! See <https://www.gnu.org/licenses/lgpl-3.0.html> for details.

#[cfg(not(unix))]
compile_error!("This crate only supports Unix-like operating systems.");

mod broadcast;
mod error;
mod layout;
mod mmap;
mod receiver;
mod region;
mod storage;
mod transmitter;
pub mod utils;
mod view;

pub use broadcast::{channel, local_channel, subscribe};
pub use error::{Error, Result};
pub use layout::{
    HEADER_LENGTH, LATEST_COUNTER_OFFSET, Layout, MIN_CAPACITY, MsgTypeId, RECORD_ALIGNMENT,
    TAIL_COUNTER_OFFSET, TAIL_INTENT_COUNTER_OFFSET, TRAILER_LENGTH, align,
};
pub use receiver::{Receiver, StartPosition};
pub use region::Region;
pub use storage::{HeapStorage, MmapStorage, ShmStorage, Storage};
pub use transmitter::Transmitter;
pub use utils::{Samples, Summary, mono_time_ns};
pub use view::{RecordWriter, RegionView};
