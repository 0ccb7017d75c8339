//! Errors raised by the array pool and conversion.

use thiserror::Error;

/// Errors from array allocation and conversion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// All buffers are in use and the pool is at its buffer limit.
    #[error("array pool exhausted: {max_buffers} buffers in use")]
    TooManyBuffers { max_buffers: usize },

    /// Allocating would exceed the pool's memory limit.
    #[error("array pool memory limit reached: {requested} bytes requested, {in_use} of {limit} in use")]
    MemoryLimit {
        requested: usize,
        in_use: usize,
        limit: usize,
    },

    /// The system allocator refused the request.
    #[error("failed to allocate {bytes} bytes")]
    AllocationFailed { bytes: usize },

    #[error("requested length {requested} exceeds buffer capacity {capacity}")]
    CapacityExceeded { requested: usize, capacity: usize },

    #[error("array size overflows usize")]
    SizeOverflow,

    #[error("unknown data type code {0}")]
    UnknownDataType(i32),

    #[error("unknown data type name '{0}'")]
    UnknownDataTypeName(String),

    /// Conversion request does not fit the source array.
    #[error("invalid conversion: {0}")]
    InvalidConversion(String),
}
