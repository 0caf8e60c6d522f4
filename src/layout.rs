//! Wire layout of a ring block
//!
//! Both sides of a channel address the same bytes, so this layout is the
//! contract between them and must not change:
//!
//! ```text
//! offset  0  read_index      u32   written by the consumer
//! offset  4  write_index     u32   written by the producer
//! offset  8  data_available  i32   written by both, futex word
//! offset 12  eof             i32   written by the producer
//! offset 16  body            capacity bytes
//! ```
//!
//! The indices are monotonically increasing counters, never pre-masked to the
//! capacity. The physical body offset of logical index `i` is `i % capacity`.

use std::sync::atomic::{AtomicI32, AtomicU32};

/// Size of the header and state regions in bytes
pub const HEADER_LEN: usize = 2 * 4 + 2 * 4;

/// Largest supported capacity
///
/// Keeps the capacity strictly below the counter period so an empty ring and a
/// full ring never share an index difference.
pub const MAX_CAPACITY: usize = 1 << 31;

/// Smallest block that can hold a ring (header plus one body byte)
pub const MIN_BLOCK_LEN: usize = HEADER_LEN + 1;

/// Total block size for a ring of `capacity` bytes
#[inline(always)]
pub const fn block_len(capacity: usize) -> usize {
    capacity + HEADER_LEN
}

/// Header and state regions at the start of every ring block
#[repr(C)]
pub(crate) struct RingHeader {
    pub(crate) read_index: AtomicU32,
    pub(crate) write_index: AtomicU32,
    pub(crate) data_available: AtomicI32,
    pub(crate) eof: AtomicI32,
}

const _: () = assert!(std::mem::size_of::<RingHeader>() == HEADER_LEN);
const _: () = assert!(std::mem::align_of::<RingHeader>() == 4);

impl RingHeader {
    /// The `data_available` flag viewed as the futex word
    #[inline(always)]
    pub(crate) fn data_available_word(&self) -> &AtomicU32 {
        // SAFETY: AtomicI32 and AtomicU32 have the same size, alignment and
        // bit validity; the futex only compares the raw 32 bits.
        unsafe { &*(&self.data_available as *const AtomicI32).cast::<AtomicU32>() }
    }
}

/// Index arithmetic for one ring
///
/// Counters wrap at `period`, the largest multiple of the capacity that fits in
/// 2^32. For power-of-two capacities that is plain `u32` wrapping; for any
/// other capacity the fold keeps `i % capacity` continuous across the wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IndexSpace {
    capacity: u32,
    period: u64,
}

const COUNTER_RANGE: u64 = 1 << 32;

impl IndexSpace {
    /// `capacity` must already be validated to lie in `1..=MAX_CAPACITY`
    pub(crate) fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0 && capacity <= MAX_CAPACITY);
        let capacity = capacity as u32;
        let period = COUNTER_RANGE - COUNTER_RANGE % u64::from(capacity);
        Self { capacity, period }
    }

    #[inline(always)]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Physical body offset of a logical index
    #[inline(always)]
    pub(crate) fn offset(&self, index: u32) -> usize {
        (index % self.capacity) as usize
    }

    /// Number of unread bytes between `read` and `write`
    #[inline(always)]
    pub(crate) fn distance(&self, write: u32, read: u32) -> usize {
        if write >= read {
            (write - read) as usize
        } else {
            (u64::from(write) + self.period - u64::from(read)) as usize
        }
    }

    /// Index `by` positions after `index`, and whether the counter folded
    #[inline(always)]
    pub(crate) fn advance(&self, index: u32, by: u32) -> (u32, bool) {
        let next = u64::from(index) + u64::from(by);
        if next < self.period {
            (next as u32, false)
        } else {
            ((next - self.period) as u32, true)
        }
    }
}
