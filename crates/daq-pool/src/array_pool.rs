//! Bounded allocator for [`NdArray`]s.
//!
//! `ArrayPool` hands out typed arrays whose sample buffers come back to the
//! pool's free list when the last reference is dropped.
//!
//! ## Memory Flow
//!
//! ```text
//! 1. alloc() reuses a free buffer with enough capacity, or allocates one
//! 2. producer fills the array, wraps it in Arc, publishes it
//! 3. consumers clone the Arc, hold it as long as they need
//! 4. last Arc dropped -> NdArray::drop() returns the buffer to the free list
//! ```
//!
//! Limits:
//! - `max_buffers` bounds the number of buffers alive at once (in use + free)
//! - `max_memory` bounds the bytes held by those buffers; `0` means unlimited
//!
//! When the buffer limit is reached and nothing on the free list fits, one
//! free buffer is discarded to make room. Allocation fails only when every
//! buffer is in use.

use crate::array::{ArrayInfo, DataType, Dimension, NdArray, SampleBuffer};
use crate::error::PoolError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Shared pool state, owned jointly by the pool handle and every array.
pub(crate) struct ArrayPoolInner {
    /// Buffers not currently owned by an array
    free: Mutex<Vec<SampleBuffer>>,
    /// Maximum buffers alive at once
    max_buffers: usize,
    /// Maximum bytes held by alive buffers; 0 = unlimited
    max_memory: usize,
    /// Buffers alive (in use + free)
    num_buffers: AtomicUsize,
    /// Bytes held by alive buffers
    memory_size: AtomicUsize,
    /// Buffers currently owned by arrays
    in_use: AtomicUsize,
    /// Metrics: total successful allocations
    total_allocs: AtomicU64,
    /// Metrics: allocations satisfied from the free list
    total_reuses: AtomicU64,
    /// Metrics: total returns
    total_returns: AtomicU64,
}

impl ArrayPoolInner {
    /// Put a buffer back on the free list.
    pub(crate) fn release(&self, buffer: SampleBuffer) {
        self.free.lock().push(buffer);
        self.in_use.fetch_sub(1, Ordering::AcqRel);
        self.total_returns.fetch_add(1, Ordering::Relaxed);
    }

    fn discard(&self, buffer: SampleBuffer) {
        self.num_buffers.fetch_sub(1, Ordering::AcqRel);
        self.memory_size
            .fetch_sub(buffer.byte_capacity(), Ordering::AcqRel);
    }
}

/// Bounded pool of reusable array buffers.
///
/// Cheap to clone; all clones share one free list and one set of limits.
#[derive(Clone)]
pub struct ArrayPool {
    inner: Arc<ArrayPoolInner>,
}

impl ArrayPool {
    /// Create a pool with the given limits. `max_memory == 0` disables the
    /// memory limit.
    #[must_use]
    pub fn new(max_buffers: usize, max_memory: usize) -> Self {
        info!(
            max_buffers,
            max_memory_mb = max_memory as f64 / (1024.0 * 1024.0),
            "ArrayPool created"
        );

        Self {
            inner: Arc::new(ArrayPoolInner {
                free: Mutex::new(Vec::new()),
                max_buffers,
                max_memory,
                num_buffers: AtomicUsize::new(0),
                memory_size: AtomicUsize::new(0),
                in_use: AtomicUsize::new(0),
                total_allocs: AtomicU64::new(0),
                total_reuses: AtomicU64::new(0),
                total_returns: AtomicU64::new(0),
            }),
        }
    }

    /// Allocate a zero-filled array with the given dimensions and type.
    ///
    /// The returned array's buffer holds exactly the bytes the dimensions
    /// require. `unique_id` and `timestamp` start unset.
    pub fn alloc(&self, dims: &[Dimension], data_type: DataType) -> Result<NdArray, PoolError> {
        let info = ArrayInfo::compute(dims, data_type)?;
        let buffer = self.take_buffer(info.total_bytes)?;

        self.inner.in_use.fetch_add(1, Ordering::AcqRel);
        self.inner.total_allocs.fetch_add(1, Ordering::Relaxed);

        Ok(NdArray::from_pool(
            dims.to_vec(),
            data_type,
            buffer,
            Arc::clone(&self.inner),
        ))
    }

    fn take_buffer(&self, bytes: usize) -> Result<SampleBuffer, PoolError> {
        let inner = &self.inner;
        let mut free = inner.free.lock();

        if let Some(idx) = free.iter().position(|b| b.byte_capacity() >= bytes) {
            let mut buffer = free.swap_remove(idx);
            buffer.set_len(bytes)?;
            buffer.as_bytes_mut().fill(0);
            inner.total_reuses.fetch_add(1, Ordering::Relaxed);
            return Ok(buffer);
        }

        if inner.num_buffers.load(Ordering::Acquire) >= inner.max_buffers {
            match free.pop() {
                Some(old) => {
                    debug!(
                        capacity = old.byte_capacity(),
                        requested = bytes,
                        "Discarding free buffer too small for request"
                    );
                    inner.discard(old);
                }
                None => {
                    return Err(PoolError::TooManyBuffers {
                        max_buffers: inner.max_buffers,
                    });
                }
            }
        }

        let in_use = inner.memory_size.load(Ordering::Acquire);
        if inner.max_memory > 0 && in_use.saturating_add(bytes) > inner.max_memory {
            // Free buffers are dead weight against the limit; release them first.
            for old in free.drain(..) {
                inner.discard(old);
            }
            let in_use = inner.memory_size.load(Ordering::Acquire);
            if in_use.saturating_add(bytes) > inner.max_memory {
                return Err(PoolError::MemoryLimit {
                    requested: bytes,
                    in_use,
                    limit: inner.max_memory,
                });
            }
        }
        drop(free);

        let buffer = SampleBuffer::try_with_len(bytes)?;
        inner.num_buffers.fetch_add(1, Ordering::AcqRel);
        inner
            .memory_size
            .fetch_add(buffer.byte_capacity(), Ordering::AcqRel);
        Ok(buffer)
    }

    /// Buffers alive (in use + free).
    #[must_use]
    pub fn num_buffers(&self) -> usize {
        self.inner.num_buffers.load(Ordering::Acquire)
    }

    /// Buffers on the free list.
    #[must_use]
    pub fn num_free(&self) -> usize {
        self.inner.free.lock().len()
    }

    /// Arrays currently alive.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::Acquire)
    }

    /// Bytes held by alive buffers.
    #[must_use]
    pub fn memory_size(&self) -> usize {
        self.inner.memory_size.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn max_buffers(&self) -> usize {
        self.inner.max_buffers
    }

    #[must_use]
    pub fn max_memory(&self) -> usize {
        self.inner.max_memory
    }

    /// Total successful allocations (metrics).
    #[must_use]
    pub fn total_allocs(&self) -> u64 {
        self.inner.total_allocs.load(Ordering::Relaxed)
    }

    /// Allocations satisfied from the free list (metrics).
    #[must_use]
    pub fn total_reuses(&self) -> u64 {
        self.inner.total_reuses.load(Ordering::Relaxed)
    }

    /// Total returns (metrics).
    #[must_use]
    pub fn total_returns(&self) -> u64 {
        self.inner.total_returns.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ArrayPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArrayPool")
            .field("max_buffers", &self.max_buffers())
            .field("max_memory", &self.max_memory())
            .field("num_buffers", &self.num_buffers())
            .field("in_use", &self.in_use())
            .field("memory_size", &self.memory_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims_2d(x: usize, y: usize) -> [Dimension; 2] {
        [Dimension::new(x), Dimension::new(y)]
    }

    #[test]
    fn test_alloc_exact_size_zeroed() {
        let pool = ArrayPool::new(4, 0);
        let array = pool.alloc(&dims_2d(3, 2), DataType::UInt16).unwrap();
        assert_eq!(array.data().len(), 12);
        assert!(array.data().as_bytes().iter().all(|&b| b == 0));
        assert_eq!(array.unique_id, 0);
        assert!(array.timestamp.is_none());
        assert_eq!(pool.in_use(), 1);
    }

    #[test]
    fn test_drop_returns_buffer() {
        let pool = ArrayPool::new(4, 0);
        let array = pool.alloc(&dims_2d(8, 8), DataType::UInt8).unwrap();
        assert_eq!(pool.num_free(), 0);
        drop(array);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.num_free(), 1);
        assert_eq!(pool.total_returns(), 1);
    }

    #[test]
    fn test_free_buffer_reused_and_cleared() {
        let pool = ArrayPool::new(4, 0);
        let mut array = pool.alloc(&dims_2d(4, 4), DataType::UInt8).unwrap();
        array.data_mut().as_bytes_mut().fill(0xAB);
        drop(array);

        let again = pool.alloc(&dims_2d(2, 2), DataType::UInt8).unwrap();
        assert_eq!(pool.total_reuses(), 1);
        assert_eq!(pool.num_buffers(), 1);
        assert_eq!(again.data().len(), 4);
        assert!(again.data().as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_buffer_limit() {
        let pool = ArrayPool::new(2, 0);
        let a = pool.alloc(&dims_2d(4, 4), DataType::UInt8).unwrap();
        let _b = pool.alloc(&dims_2d(4, 4), DataType::UInt8).unwrap();
        assert_eq!(
            pool.alloc(&dims_2d(4, 4), DataType::UInt8).unwrap_err(),
            PoolError::TooManyBuffers { max_buffers: 2 }
        );

        drop(a);
        assert!(pool.alloc(&dims_2d(4, 4), DataType::UInt8).is_ok());
    }

    #[test]
    fn test_small_free_buffer_discarded_at_limit() {
        let pool = ArrayPool::new(1, 0);
        drop(pool.alloc(&dims_2d(2, 2), DataType::UInt8).unwrap());
        let big = pool.alloc(&dims_2d(64, 64), DataType::UInt8).unwrap();
        assert_eq!(pool.num_buffers(), 1);
        assert_eq!(big.data().len(), 64 * 64);
        assert_eq!(pool.memory_size(), 64 * 64);
    }

    #[test]
    fn test_memory_limit() {
        let pool = ArrayPool::new(10, 1000);
        let _a = pool.alloc(&dims_2d(20, 20), DataType::UInt8).unwrap();
        let err = pool.alloc(&dims_2d(30, 30), DataType::UInt8).unwrap_err();
        assert!(matches!(err, PoolError::MemoryLimit { limit: 1000, .. }));
    }

    #[test]
    fn test_arc_shared_array_returns_on_last_drop() {
        let pool = ArrayPool::new(2, 0);
        let array = Arc::new(pool.alloc(&dims_2d(2, 2), DataType::Float64).unwrap());
        let clone = Arc::clone(&array);
        drop(array);
        assert_eq!(pool.in_use(), 1);
        drop(clone);
        assert_eq!(pool.in_use(), 0);
    }
}
