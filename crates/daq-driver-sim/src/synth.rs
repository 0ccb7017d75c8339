//! Synthetic image generation.
//!
//! Each frame is either recomputed from scratch as a raster ramp or
//! incremented in place, depending on the reset flag:
//!
//! ```text
//! inc = T(gain * exposure * 1000)
//!
//! reset:     pixel[i][j] = T(sx_j + sy_i + inc)
//!            sx_0 = 0, sx_{j+1} = sx_j + gain_x   (restarted every row)
//!            sy_0 = 0, sy_{i+1} = sy_i + gain_y
//! no reset:  pixel[i][j] += inc
//! ```
//!
//! `T(v)` is the element type's `as` cast. The ramp is accumulated by
//! repeated addition, row by row, so non-integer gains round the same way
//! on every run.

use crate::frame_buffer::RawFrame;
use daq_core::params::{ParamId, ParamStatus, ParamTable};
use daq_pool::{with_element_type, Element};

/// Inputs of one synthesis pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynthParams {
    /// Scales the exposure-dependent increment.
    pub gain: f64,
    /// Ramp step between columns.
    pub gain_x: f64,
    /// Ramp step between rows.
    pub gain_y: f64,
    /// Exposure time in seconds.
    pub exposure: f64,
    /// Recompute the base image instead of accumulating.
    pub reset: bool,
}

impl SynthParams {
    /// Snapshot synthesis inputs from the parameter table.
    ///
    /// A failed reset-flag read forces a reset.
    pub fn read(params: &ParamTable, status: &mut ParamStatus) -> Self {
        Self {
            gain: status.take(params.get_float(ParamId::Gain), 0.0),
            gain_x: status.take(params.get_float(ParamId::GainX), 0.0),
            gain_y: status.take(params.get_float(ParamId::GainY), 0.0),
            exposure: status.take(params.get_float(ParamId::AcquireTime), 0.0),
            reset: status.take(params.get_int(ParamId::ResetImage), 1) != 0,
        }
    }

    /// Per-frame increment before conversion to the element type.
    #[must_use]
    pub fn increment(&self) -> f64 {
        self.gain * self.exposure * 1000.0
    }
}

/// Fill `frame` for its current shape and element type.
pub fn synthesize(frame: &mut RawFrame, params: &SynthParams) {
    let (width, height) = frame.shape();
    with_element_type!(frame.data_type(), T => {
        compute_array::<T>(frame.pixels_mut::<T>(), width, height, params)
    })
}

/// Typed synthesis over a row-major `width x height` image.
pub fn compute_array<T: Element>(pixels: &mut [T], width: usize, height: usize, params: &SynthParams) {
    let inc = T::from_f64(params.increment());
    let n = width.saturating_mul(height).min(pixels.len());
    let pixels = &mut pixels[..n];

    if params.reset {
        let inc = inc.to_f64();
        let mut scale_y = 0.0f64;
        for row in pixels.chunks_exact_mut(width.max(1)) {
            let mut scale_x = 0.0f64;
            for px in row {
                *px = T::from_f64(scale_x + scale_y + inc);
                scale_x += params.gain_x;
            }
            scale_y += params.gain_y;
        }
    } else {
        for px in pixels {
            *px = px.accumulate(inc);
        }
    }
}
