//! The worker's full-sensor working image.
//!
//! Only the acquisition worker holds a [`RawFrame`]; it is never shared, so
//! synthesis into it needs no lock.

use daq_core::error::DaqError;
use daq_pool::{ArrayInfo, ArrayView, DataType, Dimension, Element, SampleBuffer};
use tracing::{debug, error};

/// Full-sensor working image owned by the acquisition worker.
///
/// The backing store only grows: [`RawFrame::ensure_capacity`] reallocates
/// when a frame needs more bytes than the current allocation and otherwise
/// reuses it in place.
#[derive(Debug)]
pub struct RawFrame {
    dims: [Dimension; 2],
    data_type: DataType,
    data: SampleBuffer,
}

impl RawFrame {
    /// Allocate a frame of `width x height` elements of `data_type`.
    pub fn new(width: usize, height: usize, data_type: DataType) -> Result<Self, DaqError> {
        let mut frame = Self {
            dims: [Dimension::new(width), Dimension::new(height)],
            data_type,
            data: SampleBuffer::new(),
        };
        let required = frame.required_bytes()?;
        frame.ensure_capacity(required)?;
        Ok(frame)
    }

    /// `(width, height)` in elements.
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.dims[0].size, self.dims[1].size)
    }

    /// Element type of the current contents.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Bytes in the current allocation.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.byte_capacity()
    }

    /// Bytes the current shape and element type occupy.
    pub fn required_bytes(&self) -> Result<usize, DaqError> {
        Ok(ArrayInfo::compute(&self.dims, self.data_type)?.total_bytes)
    }

    /// Change shape and element type and make room for them.
    ///
    /// Returns `true` when the previous contents can no longer be
    /// accumulated onto: the shape or type changed, or the buffer was
    /// reallocated.
    pub fn reshape(
        &mut self,
        width: usize,
        height: usize,
        data_type: DataType,
    ) -> Result<bool, DaqError> {
        let dims = [Dimension::new(width), Dimension::new(height)];
        let reshaped = dims != self.dims || data_type != self.data_type;
        self.dims = dims;
        self.data_type = data_type;
        let required = self.required_bytes()?;
        let reallocated = self.ensure_capacity(required)?;
        Ok(reshaped || reallocated)
    }

    /// Make the buffer hold at least `required` bytes.
    ///
    /// When the allocation is too small it is released and a new one sized
    /// for `required` bytes is obtained; the old contents are lost and
    /// `true` is returned. If that allocation fails the frame is left empty
    /// and unusable until a later call succeeds.
    ///
    /// Storage is kept in 8-byte words so every element type is aligned, so
    /// [`capacity`](Self::capacity) is `required` rounded up to a multiple
    /// of 8.
    pub fn ensure_capacity(&mut self, required: usize) -> Result<bool, DaqError> {
        if self.data.byte_capacity() >= required {
            self.data.set_len(required)?;
            return Ok(false);
        }

        let old = self.data.byte_capacity();
        self.data = SampleBuffer::new();
        match SampleBuffer::try_with_len(required) {
            Ok(buffer) => {
                debug!(old_bytes = old, bytes = required, "Raw frame reallocated");
                self.data = buffer;
                Ok(true)
            }
            Err(e) => {
                error!(bytes = required, error = %e, "Raw frame allocation failed");
                Err(DaqError::Allocation { bytes: required })
            }
        }
    }

    /// Typed pixels. Empty if the frame is unusable.
    pub fn pixels_mut<T: Element>(&mut self) -> &mut [T] {
        self.data.as_mut_slice::<T>()
    }

    /// Typed pixels, read-only.
    pub fn pixels<T: Element>(&self) -> &[T] {
        self.data.as_slice::<T>()
    }

    /// Source view for conversion into an output frame.
    #[must_use]
    pub fn view(&self) -> ArrayView<'_> {
        ArrayView {
            dims: &self.dims,
            data_type: self.data_type,
            data: &self.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_allocates_full_frame() {
        let frame = RawFrame::new(8, 4, DataType::UInt16).unwrap();
        assert_eq!(frame.shape(), (8, 4));
        assert_eq!(frame.required_bytes().unwrap(), 64);
        assert_eq!(frame.capacity(), 64);
        assert_eq!(frame.pixels::<u16>().len(), 32);
    }

    #[test]
    fn test_capacity_grows_never_shrinks() {
        let mut frame = RawFrame::new(4, 4, DataType::UInt8).unwrap();
        assert!(frame.ensure_capacity(64).unwrap());
        assert_eq!(frame.capacity(), 64);

        assert!(!frame.ensure_capacity(16).unwrap());
        assert_eq!(frame.capacity(), 64);
        assert_eq!(frame.view().data.len(), 16);
    }

    #[test]
    fn test_reshape_reports_invalidated_contents() {
        let mut frame = RawFrame::new(4, 4, DataType::UInt16).unwrap();
        assert!(!frame.reshape(4, 4, DataType::UInt16).unwrap());
        // same byte count, different element type
        assert!(frame.reshape(4, 4, DataType::Int16).unwrap());
        assert!(frame.reshape(4, 4, DataType::Float64).unwrap());
        assert_eq!(frame.capacity(), 128);
        assert!(frame.reshape(2, 2, DataType::UInt8).unwrap());
        assert_eq!(frame.capacity(), 128);
    }

    #[test]
    fn test_contents_survive_in_place_reuse() {
        let mut frame = RawFrame::new(2, 2, DataType::UInt8).unwrap();
        frame.pixels_mut::<u8>().copy_from_slice(&[1, 2, 3, 4]);
        assert!(!frame.reshape(2, 2, DataType::UInt8).unwrap());
        assert_eq!(frame.pixels::<u8>(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_capacity_rounds_up_to_whole_words() {
        let mut frame = RawFrame::new(3, 1, DataType::UInt8).unwrap();
        assert_eq!(frame.required_bytes().unwrap(), 3);
        assert!(frame.capacity() >= 3);
        assert_eq!(frame.capacity() % 8, 0);
        assert_eq!(frame.pixels::<u8>().len(), 3);

        assert!(frame.ensure_capacity(13).unwrap());
        assert_eq!(frame.capacity(), 16);
        assert!(!frame.ensure_capacity(16).unwrap());
    }
}
