//! Error types for RingChannel

use std::io;
use thiserror::Error;

/// Result type for RingChannel operations
pub type Result<T> = std::result::Result<T, RingError>;

/// Coarse classification of a [`RingError`]
///
/// Callers that only care about what to do next (fix the handle, fix the
/// input, or send less) can match on this instead of the full error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The memory block or handle could not be created or attached
    Construction,
    /// The data handed to `append` is not a byte sequence
    InvalidInput,
    /// The data does not fit and partial fill was not requested
    Overflow,
}

/// Errors that can occur in RingChannel operations
#[derive(Debug, Error)]
pub enum RingError {
    /// Failed to create shared memory
    #[error("Failed to create shared memory '{name}': {source}")]
    ShmCreate {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to open shared memory
    #[error("Failed to open shared memory '{name}': {source}")]
    ShmOpen {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to map memory
    #[error("Failed to map memory: {0}")]
    Mmap(#[source] io::Error),

    /// Failed to truncate shared memory
    #[error("Failed to set shared memory size: {0}")]
    Truncate(#[source] io::Error),

    /// Namespace too long
    #[error("Namespace too long: max {max} chars, got {got}")]
    NamespaceTooLong { max: usize, got: usize },

    /// Heap allocation of the block failed
    #[error("Failed to allocate a {size} byte block")]
    Alloc { size: usize },

    /// Requested capacity is zero or too large for the u32 index space
    #[error("Invalid capacity {capacity}: must be between 1 and {max}")]
    InvalidCapacity { capacity: usize, max: usize },

    /// The block cannot hold a header plus at least one body byte
    #[error("Block of {size} bytes is not a ring block: need at least {min} bytes")]
    BlockTooSmall { size: usize, min: usize },

    /// The block body exceeds the largest supported capacity
    #[error("Block of {size} bytes is not a ring block: body exceeds {max} bytes")]
    BlockTooLarge { size: usize, max: usize },

    /// A value handed to `append_values` does not fit in a byte
    #[error("Value {value} at position {index} is not a byte")]
    InvalidByte { index: usize, value: String },

    /// Data would overflow the ring
    #[error("Data being appended will overflow the ring: {requested} bytes, {remaining} remaining")]
    Overflow { requested: usize, remaining: usize },
}

impl RingError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            RingError::InvalidByte { .. } => ErrorKind::InvalidInput,
            RingError::Overflow { .. } => ErrorKind::Overflow,
            RingError::ShmCreate { .. }
            | RingError::ShmOpen { .. }
            | RingError::Mmap(_)
            | RingError::Truncate(_)
            | RingError::NamespaceTooLong { .. }
            | RingError::Alloc { .. }
            | RingError::InvalidCapacity { .. }
            | RingError::BlockTooSmall { .. }
            | RingError::BlockTooLarge { .. } => ErrorKind::Construction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        let overflow = RingError::Overflow {
            requested: 3,
            remaining: 2,
        };
        assert_eq!(overflow.kind(), ErrorKind::Overflow);
        assert_eq!(
            overflow.to_string(),
            "Data being appended will overflow the ring: 3 bytes, 2 remaining"
        );

        let bad = RingError::InvalidByte {
            index: 1,
            value: "300".to_string(),
        };
        assert_eq!(bad.to_string(), "Value 300 at position 1 is not a byte");
        assert_eq!(bad.kind(), ErrorKind::InvalidInput);

        let open = RingError::ShmOpen {
            name: "missing".to_string(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert_eq!(open.kind(), ErrorKind::Construction);
    }
}
