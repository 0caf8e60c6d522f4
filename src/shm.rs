//! Low-level POSIX shared memory operations

use crate::error::{Result, RingError};
use crate::layout::MIN_BLOCK_LEN;
use rustix::fd::OwnedFd;
use rustix::fs::{fstat, ftruncate, Mode};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use rustix::shm;
use std::io;
use std::ptr::NonNull;

const RING_SHM_PREFIX: &str = "/ring_";
const MAX_NAME_LEN: usize = 255 - RING_SHM_PREFIX.len();

/// Handle to a mapped shared memory region
pub struct ShmRegion {
    #[allow(dead_code)]
    fd: OwnedFd,
    addr: NonNull<u8>,
    size: usize,
    name: String,
    is_owner: bool,
}

// SAFETY: the mapping stays valid until drop; concurrent access to the bytes
// is coordinated by the ring header atomics
unsafe impl Send for ShmRegion {}
unsafe impl Sync for ShmRegion {}

impl ShmRegion {
    /// Create a new shared memory region
    ///
    /// # Arguments
    /// * `name` - Unique name for the shared memory (will be prefixed with "/ring_")
    /// * `size` - Size in bytes
    ///
    /// The region is zero-filled. An existing object with the same name (left
    /// behind by a crashed creator) is reused and reset.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        if name.len() > MAX_NAME_LEN {
            return Err(RingError::NamespaceTooLong {
                max: MAX_NAME_LEN,
                got: name.len(),
            });
        }

        let full_name = full_name(name);

        let fd = match shm::open(
            full_name.as_str(),
            shm::OFlags::CREATE | shm::OFlags::EXCL | shm::OFlags::RDWR,
            Mode::RUSR | Mode::WUSR | Mode::RGRP | Mode::WGRP,
        ) {
            Ok(fd) => fd,
            Err(_) => {
                // Already exists, try to open
                shm::open(full_name.as_str(), shm::OFlags::RDWR, Mode::empty()).map_err(|e| {
                    RingError::ShmCreate {
                        name: name.to_string(),
                        source: e.into(),
                    }
                })?
            }
        };

        // This handle owns the name from here on, so a failure must not leave it linked
        let sized = ftruncate(&fd, size as u64).map_err(|e| RingError::Truncate(e.into()));
        let addr = match sized.and_then(|()| map(&fd, size)) {
            Ok(addr) => addr,
            Err(err) => {
                let _ = shm::unlink(full_name.as_str());
                return Err(err);
            }
        };

        // Zero initialize
        unsafe {
            std::ptr::write_bytes(addr.as_ptr(), 0, size);
        }

        Ok(Self {
            fd,
            addr,
            size,
            name: name.to_string(),
            is_owner: true,
        })
    }

    /// Open an existing shared memory region
    pub fn open(name: &str) -> Result<Self> {
        let full_name = full_name(name);

        let fd = shm::open(full_name.as_str(), shm::OFlags::RDWR, Mode::empty()).map_err(|e| {
            RingError::ShmOpen {
                name: name.to_string(),
                source: e.into(),
            }
        })?;

        let stat = fstat(&fd).map_err(|e| RingError::ShmOpen {
            name: name.to_string(),
            source: e.into(),
        })?;
        let size = usize::try_from(stat.st_size).unwrap_or(0);
        if size == 0 {
            return Err(RingError::BlockTooSmall {
                size,
                min: MIN_BLOCK_LEN,
            });
        }

        let addr = map(&fd, size)?;

        Ok(Self {
            fd,
            addr,
            size,
            name: name.to_string(),
            is_owner: false,
        })
    }

    /// Get raw pointer to shared memory
    #[inline(always)]
    pub fn as_ptr(&self) -> *mut u8 {
        self.addr.as_ptr()
    }

    /// Get size of shared memory region
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the name of shared memory
    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if this handle owns the shared memory
    #[inline(always)]
    pub fn is_owner(&self) -> bool {
        self.is_owner
    }
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(self.addr.as_ptr().cast(), self.size);
        }

        // Only the creator unlinks; openers elsewhere keep their mapping
        if self.is_owner {
            let _ = shm::unlink(full_name(&self.name).as_str());
        }
    }
}

fn full_name(name: &str) -> String {
    format!("{}{}", RING_SHM_PREFIX, name)
}

fn map(fd: &OwnedFd, size: usize) -> Result<NonNull<u8>> {
    let addr = unsafe {
        mmap(
            std::ptr::null_mut(),
            size,
            ProtFlags::READ | ProtFlags::WRITE,
            MapFlags::SHARED,
            fd,
            0,
        )
        .map_err(|e| RingError::Mmap(e.into()))?
    };

    NonNull::new(addr.cast::<u8>())
        .ok_or_else(|| RingError::Mmap(io::Error::other("mmap returned null")))
}
