//! Region-of-interest resolution against the sensor extent.
//!
//! Requested binning, offset and size are clamped per axis, in order:
//! 1. binning >= 1
//! 2. offset into `[0, max - 1]`
//! 3. size so that `offset + size <= max`
//!
//! Correction is always possible, so resolution never fails. Corrected
//! values are written back to the parameter table.

use daq_core::params::{ParamId, ParamStatus, ParamTable};
use daq_pool::{Dimension, PoolError};
use tracing::warn;

/// Binning, offset and size of one axis, as stored in the parameter table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisGeometry {
    /// Sensor pixels summed into one output pixel.
    pub binning: i32,
    /// First sensor pixel of the region.
    pub offset: i32,
    /// Region width in sensor pixels, before binning.
    pub size: i32,
    /// Output order is reversed along this axis.
    pub reverse: bool,
}

impl AxisGeometry {
    /// Clamp against a sensor axis of `max` pixels.
    ///
    /// A non-positive `max` leaves no valid region; the result then has a
    /// non-positive size and the frame is rejected later.
    #[must_use]
    pub fn resolve(self, max: i32) -> Self {
        let mut axis = self;
        if axis.binning < 1 {
            axis.binning = 1;
        }
        if axis.offset < 0 {
            axis.offset = 0;
        }
        let last = max.saturating_sub(1);
        if axis.offset > last {
            axis.offset = last;
        }
        if axis.offset.saturating_add(axis.size) > max {
            axis.size = max.saturating_sub(axis.offset);
        }
        axis
    }

    /// Conversion request for this axis.
    pub fn to_dimension(self) -> Result<Dimension, PoolError> {
        let field = |name: &str, v: i32| {
            usize::try_from(v).map_err(|_| {
                PoolError::InvalidConversion(format!("region {name} {v} is negative"))
            })
        };
        Ok(Dimension {
            size: field("size", self.size)?,
            offset: field("offset", self.offset)?,
            binning: field("binning", self.binning)?,
            reverse: self.reverse,
        })
    }
}

/// Parameter ids backing one axis.
struct AxisParams {
    binning: ParamId,
    offset: ParamId,
    size: ParamId,
    reverse: ParamId,
    max: ParamId,
}

const X_PARAMS: AxisParams = AxisParams {
    binning: ParamId::BinX,
    offset: ParamId::MinX,
    size: ParamId::SizeX,
    reverse: ParamId::ReverseX,
    max: ParamId::MaxSizeX,
};

const Y_PARAMS: AxisParams = AxisParams {
    binning: ParamId::BinY,
    offset: ParamId::MinY,
    size: ParamId::SizeY,
    reverse: ParamId::ReverseY,
    max: ParamId::MaxSizeY,
};

/// Resolved region of interest for both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Horizontal axis.
    pub x: AxisGeometry,
    /// Vertical axis.
    pub y: AxisGeometry,
    /// Sensor extent the region was clamped against.
    pub max_x: i32,
    /// See `max_x`.
    pub max_y: i32,
}

impl Geometry {
    /// Read the requested region from `params`, clamp it to the sensor and
    /// write any corrections back.
    ///
    /// Read failures fall back to the full unbinned sensor and are recorded
    /// in `status`.
    pub fn resolve(params: &mut ParamTable, status: &mut ParamStatus) -> Self {
        let (x, max_x) = resolve_axis(params, status, &X_PARAMS);
        let (y, max_y) = resolve_axis(params, status, &Y_PARAMS);
        Self { x, y, max_x, max_y }
    }

    /// Conversion request extracting this region from a full sensor frame.
    pub fn request(&self) -> Result<[Dimension; 2], PoolError> {
        Ok([self.x.to_dimension()?, self.y.to_dimension()?])
    }
}

fn resolve_axis(
    params: &mut ParamTable,
    status: &mut ParamStatus,
    ids: &AxisParams,
) -> (AxisGeometry, i32) {
    let max = status.take(params.get_int(ids.max), 0);
    let requested = AxisGeometry {
        binning: status.take(params.get_int(ids.binning), 1),
        offset: status.take(params.get_int(ids.offset), 0),
        size: status.take(params.get_int(ids.size), max),
        reverse: status.take(params.get_int(ids.reverse), 0) != 0,
    };

    let resolved = requested.resolve(max);

    for (id, before, after) in [
        (ids.binning, requested.binning, resolved.binning),
        (ids.offset, requested.offset, resolved.offset),
        (ids.size, requested.size, resolved.size),
    ] {
        if before != after {
            warn!(param = %id, requested = before, resolved = after, max, "Clamped region parameter");
            status.check(params.set_int(id, after));
        }
    }

    (resolved, max)
}
