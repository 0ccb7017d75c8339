//! Typed N-dimensional sample arrays.
//!
//! An [`NdArray`] is a block of samples of one [`DataType`] plus a
//! [`Dimension`] descriptor per axis. Axis 0 is the fastest varying (X),
//! axis 1 is Y. Sample storage is a [`SampleBuffer`], which is backed by
//! 64-bit words so that any element type can be viewed in place without
//! alignment failures.

use crate::error::PoolError;
use crate::array_pool::ArrayPoolInner;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

// =============================================================================
// DataType
// =============================================================================

/// Element type of an array.
///
/// The discriminants are the integer codes stored in the `DataType`
/// parameter and must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Int8 = 0,
    UInt8 = 1,
    Int16 = 2,
    UInt16 = 3,
    Int32 = 4,
    UInt32 = 5,
    Float32 = 6,
    Float64 = 7,
}

impl DataType {
    /// All element types in code order.
    pub const ALL: [DataType; 8] = [
        DataType::Int8,
        DataType::UInt8,
        DataType::Int16,
        DataType::UInt16,
        DataType::Int32,
        DataType::UInt32,
        DataType::Float32,
        DataType::Float64,
    ];

    /// Size of one element in bytes.
    #[must_use]
    pub const fn element_size(self) -> usize {
        match self {
            DataType::Int8 | DataType::UInt8 => 1,
            DataType::Int16 | DataType::UInt16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 4,
            DataType::Float64 => 8,
        }
    }

    /// Integer code as stored in the parameter table.
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Decode a parameter-table integer code.
    pub fn from_code(code: i32) -> Result<Self, PoolError> {
        Self::ALL
            .get(usize::try_from(code).map_err(|_| PoolError::UnknownDataType(code))?)
            .copied()
            .ok_or(PoolError::UnknownDataType(code))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DataType::Int8 => "Int8",
            DataType::UInt8 => "UInt8",
            DataType::Int16 => "Int16",
            DataType::UInt16 => "UInt16",
            DataType::Int32 => "Int32",
            DataType::UInt32 => "UInt32",
            DataType::Float32 => "Float32",
            DataType::Float64 => "Float64",
        };
        write!(f, "{}", label)
    }
}

impl FromStr for DataType {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|dt| dt.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| PoolError::UnknownDataTypeName(s.to_string()))
    }
}

// =============================================================================
// Element - fixed-width numeric sample types
// =============================================================================

/// A fixed-width numeric sample type that can live in a [`SampleBuffer`].
///
/// Conversions from `f64` follow Rust `as` semantics: floats truncate toward
/// zero and saturate at the target range, NaN becomes zero for integers.
/// Integer accumulation wraps.
pub trait Element: bytemuck::Pod + PartialEq + fmt::Debug + Send + Sync + 'static {
    const DATA_TYPE: DataType;

    fn from_f64(value: f64) -> Self;

    fn to_f64(self) -> f64;

    /// Add `inc` in the element's own arithmetic.
    fn accumulate(self, inc: Self) -> Self;
}

macro_rules! impl_int_element {
    ($($t:ty => $dt:ident),* $(,)?) => {$(
        impl Element for $t {
            const DATA_TYPE: DataType = DataType::$dt;

            #[inline]
            fn from_f64(value: f64) -> Self {
                value as $t
            }

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn accumulate(self, inc: Self) -> Self {
                self.wrapping_add(inc)
            }
        }
    )*};
}

macro_rules! impl_float_element {
    ($($t:ty => $dt:ident),* $(,)?) => {$(
        impl Element for $t {
            const DATA_TYPE: DataType = DataType::$dt;

            #[inline]
            fn from_f64(value: f64) -> Self {
                value as $t
            }

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn accumulate(self, inc: Self) -> Self {
                self + inc
            }
        }
    )*};
}

impl_int_element!(
    i8 => Int8,
    u8 => UInt8,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
);
impl_float_element!(f32 => Float32, f64 => Float64);

/// Run `$body` with `$t` bound to the Rust type for a runtime [`DataType`].
///
/// This is the single dispatch point from a configured element type to
/// monomorphised code.
#[macro_export]
macro_rules! with_element_type {
    ($data_type:expr, $t:ident => $body:expr) => {
        match $data_type {
            $crate::DataType::Int8 => {
                type $t = i8;
                $body
            }
            $crate::DataType::UInt8 => {
                type $t = u8;
                $body
            }
            $crate::DataType::Int16 => {
                type $t = i16;
                $body
            }
            $crate::DataType::UInt16 => {
                type $t = u16;
                $body
            }
            $crate::DataType::Int32 => {
                type $t = i32;
                $body
            }
            $crate::DataType::UInt32 => {
                type $t = u32;
                $body
            }
            $crate::DataType::Float32 => {
                type $t = f32;
                $body
            }
            $crate::DataType::Float64 => {
                type $t = f64;
                $body
            }
        }
    };
}

// =============================================================================
// Dimension
// =============================================================================

/// Size and region-of-interest description of one array axis.
///
/// For an array `size` is the number of elements along the axis and
/// `offset`/`binning`/`reverse` record how it was derived from its source.
/// For a conversion request `size` is the extent of the source region to
/// read, starting at `offset`, and the output holds `size / binning`
/// elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub size: usize,
    pub offset: usize,
    pub binning: usize,
    pub reverse: bool,
}

impl Dimension {
    /// A full, unbinned axis of `size` elements.
    #[must_use]
    pub const fn new(size: usize) -> Self {
        Self {
            size,
            offset: 0,
            binning: 1,
            reverse: false,
        }
    }
}

/// Summary of an array's storage requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayInfo {
    pub n_elements: usize,
    pub bytes_per_element: usize,
    pub total_bytes: usize,
}

impl ArrayInfo {
    /// Compute storage for `dims` of `data_type`, failing on overflow.
    pub fn compute(dims: &[Dimension], data_type: DataType) -> Result<Self, PoolError> {
        let n_elements = dims
            .iter()
            .try_fold(1usize, |acc, d| acc.checked_mul(d.size))
            .ok_or(PoolError::SizeOverflow)?;
        let bytes_per_element = data_type.element_size();
        let total_bytes = n_elements
            .checked_mul(bytes_per_element)
            .ok_or(PoolError::SizeOverflow)?;
        Ok(Self {
            n_elements,
            bytes_per_element,
            total_bytes,
        })
    }
}

// =============================================================================
// SampleBuffer
// =============================================================================

/// Word-aligned byte storage with a logical length.
///
/// The backing allocation is a `Vec<u64>`, so typed views of every
/// [`Element`] are always correctly aligned. `len()` is the number of valid
/// bytes; `byte_capacity()` is the size of the allocation.
#[derive(Default)]
pub struct SampleBuffer {
    words: Vec<u64>,
    len: usize,
}

impl SampleBuffer {
    /// An empty buffer with no allocation.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            words: Vec::new(),
            len: 0,
        }
    }

    /// Allocate a zero-filled buffer of `len` valid bytes. The allocation is
    /// rounded up to whole 8-byte words.
    ///
    /// Returns [`PoolError::AllocationFailed`] instead of aborting when the
    /// allocator refuses the request.
    pub fn try_with_len(len: usize) -> Result<Self, PoolError> {
        let n_words = len.div_ceil(8);
        let mut words = Vec::new();
        words
            .try_reserve_exact(n_words)
            .map_err(|_| PoolError::AllocationFailed { bytes: len })?;
        words.resize(n_words, 0);
        Ok(Self { words, len })
    }

    /// Number of valid bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes available in the allocation.
    #[inline]
    #[must_use]
    pub fn byte_capacity(&self) -> usize {
        self.words.len() * 8
    }

    /// Change the number of valid bytes without reallocating.
    pub fn set_len(&mut self, len: usize) -> Result<(), PoolError> {
        if len > self.byte_capacity() {
            return Err(PoolError::CapacityExceeded {
                requested: len,
                capacity: self.byte_capacity(),
            });
        }
        self.len = len;
        Ok(())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..self.len]
    }

    #[must_use]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..len]
    }

    /// View the valid bytes as elements of `T`.
    #[must_use]
    pub fn as_slice<T: Element>(&self) -> &[T] {
        let n = self.len / std::mem::size_of::<T>();
        &bytemuck::cast_slice::<u64, T>(&self.words)[..n]
    }

    /// View the valid bytes as mutable elements of `T`.
    #[must_use]
    pub fn as_mut_slice<T: Element>(&mut self) -> &mut [T] {
        let n = self.len / std::mem::size_of::<T>();
        &mut bytemuck::cast_slice_mut::<u64, T>(&mut self.words)[..n]
    }
}

impl fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleBuffer")
            .field("len", &self.len)
            .field("byte_capacity", &self.byte_capacity())
            .finish()
    }
}

// =============================================================================
// ArrayView
// =============================================================================

/// Borrowed description of a source array for conversion.
#[derive(Debug, Clone, Copy)]
pub struct ArrayView<'a> {
    pub dims: &'a [Dimension],
    pub data_type: DataType,
    pub data: &'a SampleBuffer,
}

// =============================================================================
// NdArray
// =============================================================================

/// A typed array handed out by [`ArrayPool`](crate::ArrayPool).
///
/// The sample buffer goes back to the owning pool's free list when the
/// array is dropped. Share published arrays as `Arc<NdArray>`; the buffer
/// is recycled once the last clone is gone.
pub struct NdArray {
    pub dims: Vec<Dimension>,
    pub data_type: DataType,
    /// Frame identifier assigned by the producer.
    pub unique_id: i32,
    /// Capture time assigned by the producer.
    pub timestamp: Option<DateTime<Utc>>,
    data: SampleBuffer,
    pool: Option<Arc<ArrayPoolInner>>,
}

impl NdArray {
    pub(crate) fn from_pool(
        dims: Vec<Dimension>,
        data_type: DataType,
        data: SampleBuffer,
        pool: Arc<ArrayPoolInner>,
    ) -> Self {
        Self {
            dims,
            data_type,
            unique_id: 0,
            timestamp: None,
            data,
            pool: Some(pool),
        }
    }

    /// Storage summary for this array.
    pub fn info(&self) -> Result<ArrayInfo, PoolError> {
        ArrayInfo::compute(&self.dims, self.data_type)
    }

    #[must_use]
    pub fn data(&self) -> &SampleBuffer {
        &self.data
    }

    #[must_use]
    pub fn data_mut(&mut self) -> &mut SampleBuffer {
        &mut self.data
    }

    /// Typed sample view; `None` if `T` does not match the array's type.
    #[must_use]
    pub fn pixels<T: Element>(&self) -> Option<&[T]> {
        (T::DATA_TYPE == self.data_type).then(|| self.data.as_slice::<T>())
    }

    /// Sample at `(x, y)` widened to `f64`.
    #[must_use]
    pub fn get_f64(&self, x: usize, y: usize) -> Option<f64> {
        let width = self.dims.first()?.size;
        let height = self.dims.get(1).map_or(1, |d| d.size);
        if x >= width || y >= height {
            return None;
        }
        let idx = y * width + x;
        with_element_type!(self.data_type, T => {
            self.data.as_slice::<T>().get(idx).map(|v| v.to_f64())
        })
    }

    #[must_use]
    pub fn view(&self) -> ArrayView<'_> {
        ArrayView {
            dims: &self.dims,
            data_type: self.data_type,
            data: &self.data,
        }
    }
}

impl fmt::Debug for NdArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NdArray")
            .field("dims", &self.dims)
            .field("data_type", &self.data_type)
            .field("unique_id", &self.unique_id)
            .field("timestamp", &self.timestamp)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Drop for NdArray {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.release(std::mem::take(&mut self.data));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_codes_round_trip() {
        for dt in DataType::ALL {
            assert_eq!(DataType::from_code(dt.code()).unwrap(), dt);
        }
        assert!(DataType::from_code(8).is_err());
        assert!(DataType::from_code(-1).is_err());
    }

    #[test]
    fn test_data_type_parse_is_case_insensitive() {
        assert_eq!("uint16".parse::<DataType>().unwrap(), DataType::UInt16);
        assert_eq!("Float64".parse::<DataType>().unwrap(), DataType::Float64);
        assert!("complex".parse::<DataType>().is_err());
    }

    #[test]
    fn test_element_conversion_truncates_and_saturates() {
        assert_eq!(u8::from_f64(2.9), 2);
        assert_eq!(u8::from_f64(300.0), 255);
        assert_eq!(u8::from_f64(-4.0), 0);
        assert_eq!(i16::from_f64(-2.7), -2);
        assert_eq!(f32::from_f64(1.5), 1.5);
    }

    #[test]
    fn test_integer_accumulate_wraps() {
        assert_eq!(250u8.accumulate(10), 4);
        assert_eq!(i8::MAX.accumulate(1), i8::MIN);
        assert_eq!(1.5f64.accumulate(2.0), 3.5);
    }

    #[test]
    fn test_array_info_overflow() {
        let dims = [Dimension::new(usize::MAX), Dimension::new(2)];
        assert!(matches!(
            ArrayInfo::compute(&dims, DataType::UInt8),
            Err(PoolError::SizeOverflow)
        ));
    }

    #[test]
    fn test_sample_buffer_typed_views() {
        let mut buf = SampleBuffer::try_with_len(12).unwrap();
        assert_eq!(buf.len(), 12);
        assert_eq!(buf.byte_capacity(), 16);
        buf.as_mut_slice::<f32>().copy_from_slice(&[1.0, 2.0, 3.0]);
        assert_eq!(buf.as_slice::<f32>(), &[1.0, 2.0, 3.0]);
        assert_eq!(buf.as_slice::<u16>().len(), 6);
    }

    #[test]
    fn test_sample_buffer_set_len_bounds() {
        let mut buf = SampleBuffer::try_with_len(5).unwrap();
        assert!(buf.set_len(8).is_ok());
        assert!(matches!(
            buf.set_len(9),
            Err(PoolError::CapacityExceeded { .. })
        ));
    }
}
