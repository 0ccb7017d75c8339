//! Region-of-interest extraction, binning, reversal and type conversion.

use crate::array::{ArrayInfo, ArrayView, DataType, Dimension, Element, NdArray};
use crate::array_pool::ArrayPool;
use crate::error::PoolError;

/// Resolved 2D plan for one conversion.
#[derive(Debug, Clone, Copy)]
struct Plan {
    src_width: usize,
    offset: [usize; 2],
    binning: [usize; 2],
    reverse: [bool; 2],
    out_size: [usize; 2],
}

impl ArrayPool {
    /// Convert `src` into a new array of `data_type` described by `request`.
    ///
    /// Each request axis reads `size` source elements starting at `offset`,
    /// sums them in blocks of `binning` and optionally reverses the result,
    /// so the output axis has `size / binning` elements. Values are
    /// converted with saturating casts. The output dimensions accumulate
    /// offset, binning and reverse from the source dimensions.
    ///
    /// `unique_id` and `timestamp` of the result are left unset.
    pub fn convert(
        &self,
        src: ArrayView<'_>,
        data_type: DataType,
        request: &[Dimension],
    ) -> Result<NdArray, PoolError> {
        let plan = plan(src.dims, request)?;
        let src_info = ArrayInfo::compute(src.dims, src.data_type)?;
        if src.data.len() < src_info.total_bytes {
            return Err(PoolError::InvalidConversion(format!(
                "source holds {} bytes, dimensions need {}",
                src.data.len(),
                src_info.total_bytes
            )));
        }

        let out_dims: Vec<Dimension> = src
            .dims
            .iter()
            .zip(request)
            .enumerate()
            .map(|(axis, (s, r))| Dimension {
                size: plan.out_size[axis],
                offset: s.offset + r.offset,
                binning: s.binning * r.binning,
                reverse: s.reverse ^ r.reverse,
            })
            .collect();

        let mut out = self.alloc(&out_dims, data_type)?;

        if data_type == src.data_type && is_identity(src.dims, request) {
            let dst = out.data_mut().as_bytes_mut();
            let n = dst.len();
            dst.copy_from_slice(&src.data.as_bytes()[..n]);
            return Ok(out);
        }

        crate::with_element_type!(src.data_type, S => {
            crate::with_element_type!(data_type, D => {
                convert_typed::<S, D>(src.data.as_slice::<S>(), out.data_mut().as_mut_slice::<D>(), &plan)
            })
        });
        Ok(out)
    }
}

fn is_identity(src: &[Dimension], request: &[Dimension]) -> bool {
    src.iter()
        .zip(request)
        .all(|(s, r)| r.offset == 0 && r.size == s.size && r.binning == 1 && !r.reverse)
}

fn plan(src: &[Dimension], request: &[Dimension]) -> Result<Plan, PoolError> {
    if src.is_empty() || src.len() > 2 {
        return Err(PoolError::InvalidConversion(format!(
            "{} dimensions not supported",
            src.len()
        )));
    }
    if request.len() != src.len() {
        return Err(PoolError::InvalidConversion(format!(
            "request has {} dimensions, source has {}",
            request.len(),
            src.len()
        )));
    }

    let mut plan = Plan {
        src_width: src[0].size,
        offset: [0; 2],
        binning: [1; 2],
        reverse: [false; 2],
        out_size: [1; 2],
    };

    for (axis, (s, r)) in src.iter().zip(request).enumerate() {
        if r.binning == 0 {
            return Err(PoolError::InvalidConversion(format!(
                "axis {axis}: binning must be >= 1"
            )));
        }
        if r.size == 0 {
            return Err(PoolError::InvalidConversion(format!(
                "axis {axis}: size must be >= 1"
            )));
        }
        if r.offset.saturating_add(r.size) > s.size {
            return Err(PoolError::InvalidConversion(format!(
                "axis {axis}: region {}+{} exceeds source size {}",
                r.offset, r.size, s.size
            )));
        }
        let out = r.size / r.binning;
        if out == 0 {
            return Err(PoolError::InvalidConversion(format!(
                "axis {axis}: size {} smaller than binning {}",
                r.size, r.binning
            )));
        }
        plan.offset[axis] = r.offset;
        plan.binning[axis] = r.binning;
        plan.reverse[axis] = r.reverse;
        plan.out_size[axis] = out;
    }

    Ok(plan)
}

fn convert_typed<S: Element, D: Element>(src: &[S], dst: &mut [D], plan: &Plan) {
    let [out_w, out_h] = plan.out_size;
    let [bin_x, bin_y] = plan.binning;
    let [off_x, off_y] = plan.offset;

    for y in 0..out_h {
        let dst_y = if plan.reverse[1] { out_h - 1 - y } else { y };
        let src_y0 = off_y + y * bin_y;
        for x in 0..out_w {
            let dst_x = if plan.reverse[0] { out_w - 1 - x } else { x };
            let src_x0 = off_x + x * bin_x;

            let mut sum = 0.0f64;
            for j in 0..bin_y {
                let row = (src_y0 + j) * plan.src_width;
                for i in 0..bin_x {
                    sum += src[row + src_x0 + i].to_f64();
                }
            }
            dst[dst_y * out_w + dst_x] = D::from_f64(sum);
        }
    }
}
