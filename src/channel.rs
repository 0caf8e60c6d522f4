//! Ring channel: a single-producer/single-consumer byte ring over a shared block
//!
//! A [`RingChannel`] is a role-less view of a block. It becomes a [`Producer`]
//! or a [`Consumer`]; neither role handle can be cloned, and every mutating
//! operation takes `&mut self`. Creating a second producer or consumer for the
//! same block through [`RingChannel::attach`] or [`RingChannel::open_shm`] is
//! not prevented and is a logic error.
//!
//! # Wakeups
//!
//! The consumer parks on the `data_available` word with a futex. The producer
//! publishes `write_index` before raising the flag and waking; the consumer
//! lowers the flag itself before its last emptiness check and only then
//! waits on `data_available == 0`. All protocol accesses are `SeqCst`, so an
//! append that lands between the check and the wait either shows up in the
//! check or raises the flag the futex compares against.

use crate::block::SharedBlock;
use crate::error::{Result, RingError};
use crate::futex;
use crate::layout::{
    block_len, IndexSpace, RingHeader, HEADER_LEN, MAX_CAPACITY, MIN_BLOCK_LEN,
};
use crate::trace;
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};

/// Default ring capacity (64KB)
pub const DEFAULT_CAPACITY: usize = 64 * 1024;

/// Ring configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingConfig {
    /// Size of the body region in bytes
    pub capacity: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl RingConfig {
    /// Configuration for a ring of `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity }
    }

    /// Check the capacity fits the index space
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 || self.capacity > MAX_CAPACITY {
            return Err(RingError::InvalidCapacity {
                capacity: self.capacity,
                max: MAX_CAPACITY,
            });
        }
        Ok(())
    }

    /// Total block size this configuration needs
    pub fn block_len(&self) -> usize {
        block_len(self.capacity)
    }
}

/// Create an in-process channel and split it into its two roles
pub fn channel(capacity: usize) -> Result<(Producer, Consumer)> {
    Ok(RingChannel::create(capacity)?.split())
}

/// View of a ring block that has not claimed a role
pub struct RingChannel {
    block: SharedBlock,
    space: IndexSpace,
}

impl RingChannel {
    /// Allocate a ring of `capacity` bytes on the heap
    pub fn create(capacity: usize) -> Result<Self> {
        Self::with_config(&RingConfig::with_capacity(capacity))
    }

    /// Allocate a heap ring sized by `config`
    pub fn with_config(config: &RingConfig) -> Result<Self> {
        config.validate()?;
        let block = SharedBlock::allocate(config.block_len())?;
        trace::debug!(capacity = config.capacity, "ring created");
        Ok(Self::from_block(block, config.capacity))
    }

    /// Create a ring of `capacity` bytes in named POSIX shared memory
    pub fn create_shm(name: &str, capacity: usize) -> Result<Self> {
        Self::create_shm_with_config(name, &RingConfig::with_capacity(capacity))
    }

    /// Create a shared memory ring sized by `config`
    pub fn create_shm_with_config(name: &str, config: &RingConfig) -> Result<Self> {
        config.validate()?;
        let block = SharedBlock::create_shm(name, config.block_len())?;
        trace::debug!(name, capacity = config.capacity, "shared ring created");
        Ok(Self::from_block(block, config.capacity))
    }

    /// Attach to a ring created in named POSIX shared memory
    pub fn open_shm(name: &str) -> Result<Self> {
        Self::attach(SharedBlock::open_shm(name)?)
    }

    /// Wrap an existing block
    ///
    /// The capacity is everything after the header. Fails if the block cannot
    /// be a ring.
    pub fn attach(block: SharedBlock) -> Result<Self> {
        let size = block.len();
        if size < MIN_BLOCK_LEN {
            return Err(RingError::BlockTooSmall {
                size,
                min: MIN_BLOCK_LEN,
            });
        }

        let capacity = size - HEADER_LEN;
        if capacity > MAX_CAPACITY {
            return Err(RingError::BlockTooLarge {
                size,
                max: MAX_CAPACITY,
            });
        }

        debug_assert_eq!(block.as_ptr() as usize % std::mem::align_of::<RingHeader>(), 0);
        trace::debug!(capacity, "ring attached");
        Ok(Self::from_block(block, capacity))
    }

    fn from_block(block: SharedBlock, capacity: usize) -> Self {
        Self {
            block,
            space: IndexSpace::new(capacity),
        }
    }

    #[inline(always)]
    fn header(&self) -> &RingHeader {
        // SAFETY: the block is at least MIN_BLOCK_LEN bytes, suitably aligned,
        // and outlives `self`
        unsafe { &*(self.block.as_ptr() as *const RingHeader) }
    }

    #[inline(always)]
    fn body(&self) -> *mut u8 {
        // SAFETY: the body starts right after the header inside the block
        unsafe { self.block.as_ptr().add(HEADER_LEN) }
    }

    /// Number of unread bytes
    ///
    /// A view that owns neither index can load a stale `read_index`, which only
    /// ever overstates the distance, so the result is capped at the capacity.
    #[inline]
    pub fn length(&self) -> usize {
        let header = self.header();
        let read = header.read_index.load(Ordering::SeqCst);
        let write = header.write_index.load(Ordering::SeqCst);
        self.space.distance(write, read).min(self.size())
    }

    /// Number of bytes that can be appended right now
    #[inline]
    pub fn remaining(&self) -> usize {
        self.size().saturating_sub(self.length())
    }

    /// Capacity in bytes
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.space.capacity()
    }

    /// True once the producer has set EOF and every byte has been read
    #[inline]
    pub fn is_eof(&self) -> bool {
        self.header().eof.load(Ordering::SeqCst) != 0 && self.length() == 0
    }

    /// Handle to transfer to the other side
    pub fn handle(&self) -> SharedBlock {
        self.block.clone()
    }

    /// Split into both roles, for use from two threads of one process
    pub fn split(self) -> (Producer, Consumer) {
        let consumer = RingChannel {
            block: self.block.clone(),
            space: self.space,
        };
        (self.into_producer(), consumer.into_consumer())
    }

    /// Claim the producer role
    pub fn into_producer(self) -> Producer {
        Producer { ring: self }
    }

    /// Claim the consumer role
    pub fn into_consumer(self) -> Consumer {
        Consumer { ring: self }
    }

    /// Publish a new value of an index this side owns
    #[inline(always)]
    fn advance(&self, index: &AtomicU32, current: u32, by: u32) -> u32 {
        let (next, folded) = self.space.advance(current, by);
        if folded {
            index.store(next, Ordering::SeqCst);
        } else {
            index.fetch_add(by, Ordering::SeqCst);
        }
        next
    }

    fn raise_data_available(&self) {
        let header = self.header();
        header.data_available.store(1, Ordering::SeqCst);
        futex::wake(header.data_available_word());
    }
}

impl fmt::Debug for RingChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = self.header();
        f.debug_struct("RingChannel")
            .field("capacity", &self.size())
            .field("read_index", &header.read_index.load(Ordering::SeqCst))
            .field("write_index", &header.write_index.load(Ordering::SeqCst))
            .field("data_available", &header.data_available.load(Ordering::SeqCst))
            .field("eof", &header.eof.load(Ordering::SeqCst))
            .field("block", &self.block)
            .finish()
    }
}

/// Writer side of a ring
///
/// Only this side advances `write_index`, which is what makes the
/// check-then-write in [`Producer::append`] safe without a lock: free space
/// can only grow between the check and the copy.
#[derive(Debug)]
pub struct Producer {
    ring: RingChannel,
}

impl Producer {
    /// Allocate a heap ring and claim the producer role
    pub fn create(capacity: usize) -> Result<Self> {
        RingChannel::create(capacity).map(RingChannel::into_producer)
    }

    /// Create a shared memory ring and claim the producer role
    pub fn create_shm(name: &str, capacity: usize) -> Result<Self> {
        RingChannel::create_shm(name, capacity).map(RingChannel::into_producer)
    }

    /// Claim the producer role on an existing block
    pub fn attach(block: SharedBlock) -> Result<Self> {
        RingChannel::attach(block).map(RingChannel::into_producer)
    }

    /// Role-less view of the same ring
    pub fn ring(&self) -> &RingChannel {
        &self.ring
    }

    /// Handle to transfer to the consumer side
    pub fn handle(&self) -> SharedBlock {
        self.ring.handle()
    }

    /// Number of unread bytes
    #[inline]
    pub fn length(&self) -> usize {
        self.ring.length()
    }

    /// Number of bytes that can be appended right now
    #[inline]
    pub fn remaining(&self) -> usize {
        self.ring.remaining()
    }

    /// Capacity in bytes
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.ring.size()
    }

    /// Append all of `data`, or nothing
    ///
    /// Fails with [`RingError::Overflow`] if `data` is longer than
    /// [`remaining`](Self::remaining).
    #[inline]
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        let (write, remaining) = self.free_space();
        if data.len() > remaining {
            trace::debug!(requested = data.len(), remaining, "append would overflow");
            return Err(RingError::Overflow {
                requested: data.len(),
                remaining,
            });
        }

        self.write_at(write, data);
        Ok(())
    }

    /// Append as much of `data` as fits
    ///
    /// Returns the suffix that did not fit, or `None` if everything was written.
    #[inline]
    pub fn append_fill<'a>(&mut self, data: &'a [u8]) -> Option<&'a [u8]> {
        let (write, remaining) = self.free_space();
        let written = data.len().min(remaining);
        self.write_at(write, &data[..written]);

        if written < data.len() {
            Some(&data[written..])
        } else {
            None
        }
    }

    /// Append a sequence of integers that must each be a byte
    ///
    /// Every value is checked before anything is written; a value outside
    /// `0..=255` fails with [`RingError::InvalidByte`].
    pub fn append_values<T>(&mut self, values: &[T]) -> Result<()>
    where
        T: Copy + TryInto<u8> + fmt::Display,
    {
        let bytes = values
            .iter()
            .enumerate()
            .map(|(index, &value)| {
                value.try_into().map_err(|_| RingError::InvalidByte {
                    index,
                    value: value.to_string(),
                })
            })
            .collect::<Result<Vec<u8>>>()?;
        self.append(&bytes)
    }

    /// Current `write_index` and the free space behind it
    fn free_space(&self) -> (u32, usize) {
        let ring = &self.ring;
        let header = ring.header();

        let read = header.read_index.load(Ordering::SeqCst);
        let write = header.write_index.load(Ordering::Acquire);
        (write, ring.space.capacity() - ring.space.distance(write, read))
    }

    /// Copy `data` in at `write` and publish it
    ///
    /// `data` must fit in the free space measured for `write`.
    fn write_at(&mut self, write: u32, data: &[u8]) {
        let len = data.len();
        if len == 0 {
            return;
        }

        let ring = &self.ring;
        let header = ring.header();
        let capacity = ring.space.capacity();

        // At most two copies: up to the end of the body, then from the start
        let start = ring.space.offset(write);
        let first = len.min(capacity - start);
        unsafe {
            let body = ring.body();
            ptr::copy_nonoverlapping(data.as_ptr(), body.add(start), first);
            if first < len {
                ptr::copy_nonoverlapping(data.as_ptr().add(first), body, len - first);
            }
        }

        let _next = ring.advance(&header.write_index, write, len as u32);
        ring.raise_data_available();

        trace::trace!(bytes = len, write_index = _next, "appended");
    }

    /// Signal that no more bytes will be appended
    ///
    /// Consumes the producer. If the ring is already empty, a consumer parked
    /// in [`Consumer::blocking_read`] is woken and sees EOF.
    pub fn set_eof(self) -> RingChannel {
        let ring = self.ring;
        ring.header().eof.store(1, Ordering::SeqCst);

        if ring.length() == 0 {
            ring.raise_data_available();
        }

        trace::debug!(unread = ring.length(), "eof set");
        ring
    }

    /// Reset both indices to zero, discarding unread bytes
    ///
    /// # Safety
    /// No append or read may run concurrently on this ring, from any thread
    /// or process, for the duration of the call.
    pub unsafe fn clear(&mut self) {
        let header = self.ring.header();
        header.read_index.store(0, Ordering::SeqCst);
        header.write_index.store(0, Ordering::SeqCst);
    }
}

/// Reader side of a ring
#[derive(Debug)]
pub struct Consumer {
    ring: RingChannel,
}

impl Consumer {
    /// Claim the consumer role on an existing block
    pub fn attach(block: SharedBlock) -> Result<Self> {
        RingChannel::attach(block).map(RingChannel::into_consumer)
    }

    /// Attach to a shared memory ring and claim the consumer role
    pub fn open_shm(name: &str) -> Result<Self> {
        RingChannel::open_shm(name).map(RingChannel::into_consumer)
    }

    /// Role-less view of the same ring
    pub fn ring(&self) -> &RingChannel {
        &self.ring
    }

    /// Number of unread bytes
    #[inline]
    pub fn length(&self) -> usize {
        self.ring.length()
    }

    /// Number of bytes the producer can append right now
    #[inline]
    pub fn remaining(&self) -> usize {
        self.ring.remaining()
    }

    /// Capacity in bytes
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.ring.size()
    }

    /// True once EOF is set and every byte has been read
    #[inline]
    pub fn is_eof(&self) -> bool {
        self.ring.is_eof()
    }

    /// Read the next byte, or `None` if the ring is empty
    #[inline]
    pub fn read(&mut self) -> Option<u8> {
        let ring = &self.ring;
        let header = ring.header();

        let read = header.read_index.load(Ordering::Acquire);
        let write = header.write_index.load(Ordering::SeqCst);
        if read == write {
            return None;
        }

        let value = unsafe { ring.body().add(ring.space.offset(read)).read() };
        self.consume(read, 1);
        Some(value)
    }

    /// Copy as many unread bytes as fit into `buf`
    ///
    /// Returns the number of bytes copied; zero when the ring is empty.
    pub fn read_into(&mut self, buf: &mut [u8]) -> usize {
        let ring = &self.ring;
        let header = ring.header();

        let read = header.read_index.load(Ordering::Acquire);
        let write = header.write_index.load(Ordering::SeqCst);
        let len = ring.space.distance(write, read).min(buf.len());
        if len == 0 {
            return 0;
        }

        let capacity = ring.space.capacity();
        let start = ring.space.offset(read);
        let first = len.min(capacity - start);
        unsafe {
            let body = ring.body();
            ptr::copy_nonoverlapping(body.add(start), buf.as_mut_ptr(), first);
            if first < len {
                ptr::copy_nonoverlapping(body, buf.as_mut_ptr().add(first), len - first);
            }
        }

        self.consume(read, len as u32);
        len
    }

    fn consume(&self, read: u32, count: u32) {
        let ring = &self.ring;
        let header = ring.header();
        let next = ring.advance(&header.read_index, read, count);

        // Drained: lower the flag so the next blocking read parks instead of
        // spinning on a stale "available"
        if next == header.write_index.load(Ordering::SeqCst) {
            header.data_available.store(0, Ordering::SeqCst);
        }
    }

    /// Read the next byte, parking until one is appended
    ///
    /// Returns `None` once EOF is set and the ring is drained; from then on
    /// every call returns `None` immediately. Without EOF this waits forever.
    pub fn blocking_read(&mut self) -> Option<u8> {
        if self.ring.is_eof() {
            return None;
        }

        loop {
            if let Some(value) = self.read() {
                return Some(value);
            }
            if self.eof_flag() {
                // Anything still unread was appended before EOF
                return self.read();
            }

            let header = self.ring.header();
            header.data_available.store(0, Ordering::SeqCst);

            if let Some(value) = self.read() {
                return Some(value);
            }
            if self.eof_flag() {
                return self.read();
            }

            trace::trace!("parking on data_available");
            futex::wait(self.ring.header().data_available_word(), 0);
        }
    }

    #[inline(always)]
    fn eof_flag(&self) -> bool {
        self.ring.header().eof.load(Ordering::SeqCst) != 0
    }

    /// Drain every byte available right now
    ///
    /// The iterator ends when the ring is empty; calling this again after
    /// more appends yields the new bytes.
    pub fn read_to_head(&mut self) -> Drain<'_> {
        Drain { consumer: self }
    }
}

/// Iterator returned by [`Consumer::read_to_head`]
#[derive(Debug)]
pub struct Drain<'a> {
    consumer: &'a mut Consumer,
}

impl Iterator for Drain<'_> {
    type Item = u8;

    #[inline]
    fn next(&mut self) -> Option<u8> {
        self.consumer.read()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.consumer.length(), None)
    }
}
