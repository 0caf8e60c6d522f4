//! Shared memory blocks
//!
//! A [`SharedBlock`] is the handle both sides of a channel hold. Cloning it
//! clones a reference, never the bytes; the memory is released when the last
//! clone is dropped.

use crate::error::{Result, RingError};
use crate::layout::MIN_BLOCK_LEN;
use crate::shm::ShmRegion;
use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

/// Alignment of heap blocks (one cache line)
const BLOCK_ALIGN: usize = 64;

/// Reference-counted handle to a block of memory shared by producer and consumer
#[derive(Clone)]
pub struct SharedBlock {
    inner: Arc<Backing>,
}

enum Backing {
    Heap(HeapRegion),
    Shm(ShmRegion),
}

struct HeapRegion {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the allocation is owned by the region and freed exactly once on
// drop; access to the bytes is coordinated by the ring header atomics
unsafe impl Send for HeapRegion {}
unsafe impl Sync for HeapRegion {}

impl Drop for HeapRegion {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl SharedBlock {
    /// Allocate a zeroed block on the heap, for sharing between threads
    pub fn allocate(size: usize) -> Result<Self> {
        if size < MIN_BLOCK_LEN {
            return Err(RingError::BlockTooSmall {
                size,
                min: MIN_BLOCK_LEN,
            });
        }

        let layout =
            Layout::from_size_align(size, BLOCK_ALIGN).map_err(|_| RingError::Alloc { size })?;
        // SAFETY: layout has a non-zero size
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or(RingError::Alloc { size })?;

        Ok(Self {
            inner: Arc::new(Backing::Heap(HeapRegion { ptr, layout })),
        })
    }

    /// Create a zeroed, named POSIX shared memory block, for sharing between processes
    ///
    /// The name is unlinked when the last clone of this handle is dropped.
    pub fn create_shm(name: &str, size: usize) -> Result<Self> {
        if size < MIN_BLOCK_LEN {
            return Err(RingError::BlockTooSmall {
                size,
                min: MIN_BLOCK_LEN,
            });
        }

        let region = ShmRegion::create(name, size)?;
        Ok(Self {
            inner: Arc::new(Backing::Shm(region)),
        })
    }

    /// Map a named POSIX shared memory block created elsewhere
    pub fn open_shm(name: &str) -> Result<Self> {
        let region = ShmRegion::open(name)?;
        Ok(Self {
            inner: Arc::new(Backing::Shm(region)),
        })
    }

    /// Size of the block in bytes
    #[inline(always)]
    pub fn len(&self) -> usize {
        match &*self.inner {
            Backing::Heap(heap) => heap.layout.size(),
            Backing::Shm(shm) => shm.size(),
        }
    }

    /// Always false: blocks hold at least a header and one body byte
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw pointer to the first byte of the block
    #[inline(always)]
    pub fn as_ptr(&self) -> *mut u8 {
        match &*self.inner {
            Backing::Heap(heap) => heap.ptr.as_ptr(),
            Backing::Shm(shm) => shm.as_ptr(),
        }
    }

    /// Name of the shared memory object, if this block is one
    pub fn shm_name(&self) -> Option<&str> {
        match &*self.inner {
            Backing::Heap(_) => None,
            Backing::Shm(shm) => Some(shm.name()),
        }
    }

    /// Whether two handles refer to the same mapping
    pub fn ptr_eq(&self, other: &SharedBlock) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for SharedBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBlock")
            .field("len", &self.len())
            .field("shm_name", &self.shm_name())
            .finish()
    }
}
