//! Typed frame arrays and the bounded pool that allocates them.
//!
//! - [`NdArray`]: an N-dimensional array of one [`DataType`] with a
//!   [`Dimension`] per axis, a frame id and a timestamp
//! - [`ArrayPool`]: allocates arrays under buffer-count and memory limits and
//!   recycles their storage when the last reference is dropped
//! - [`ArrayPool::convert`]: region-of-interest, binning, reversal and type
//!   conversion of a source array into a new pooled array
//!
//! # Example
//!
//! ```
//! use daq_pool::{ArrayPool, DataType, Dimension};
//!
//! let pool = ArrayPool::new(4, 0);
//! let mut full = pool
//!     .alloc(&[Dimension::new(4), Dimension::new(4)], DataType::UInt8)
//!     .unwrap();
//! full.data_mut().as_mut_slice::<u8>().fill(1);
//!
//! // 2x2 binning of the whole image
//! let binned = pool
//!     .convert(
//!         full.view(),
//!         DataType::UInt16,
//!         &[
//!             Dimension { size: 4, offset: 0, binning: 2, reverse: false },
//!             Dimension { size: 4, offset: 0, binning: 2, reverse: false },
//!         ],
//!     )
//!     .unwrap();
//! assert_eq!(binned.pixels::<u16>().unwrap(), &[4, 4, 4, 4]);
//! ```

pub mod array;
pub mod array_pool;
pub mod convert;
pub mod error;

pub use array::{ArrayInfo, ArrayView, DataType, Dimension, Element, NdArray, SampleBuffer};
pub use array_pool::ArrayPool;
pub use error::PoolError;
