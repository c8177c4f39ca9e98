//! Error Module - Heap Manager Error Types
//!
//! Defines all error types used by the collector and the BigInt support
//! layer. Allocation failure is fatal unless the allocation site opted into
//! the `MayFail` large-allocation mode.

use thiserror::Error;

/// Main error type for heap-manager operations.
#[derive(Debug, Error)]
pub enum GcError {
    #[error("out of memory: requested {requested} bytes, max heap size {max_heap} bytes")]
    OutOfMemory { requested: usize, max_heap: usize },

    #[error("allocation of {0} bytes can never fit in a heap segment")]
    SuperSegmentAlloc(usize),

    #[error("storage provider failed: {0}")]
    StorageProvider(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl GcError {
    /// True for errors a caller could recover from by freeing memory.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, GcError::OutOfMemory { .. } | GcError::StorageProvider(_))
    }

    /// True for errors that indicate a bug in the VM rather than resource
    /// exhaustion.
    pub fn is_bug(&self) -> bool {
        matches!(self, GcError::SuperSegmentAlloc(_))
    }
}

/// Result alias for heap-manager operations.
pub type Result<T> = std::result::Result<T, GcError>;

/// Errors from the BigInt digit layer. These are propagated as typed results
/// rather than being fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BigIntError {
    #[error("destination digit buffer is too small for the input")]
    DestTooSmall,

    #[error("operand requires more digits than the implementation allows")]
    TooManyDigits,
}
