//! Parameter writes from the control interface.
//!
//! Every write stores the value and notifies subscribers, changed or not.
//! Some writes have side effects on the acquisition:
//!
//! | Parameter | Effect |
//! |---|---|
//! | `Acquire` = 1 while Idle | compute frames remaining, signal start |
//! | `Acquire` = 0 while not Idle | signal stop |
//! | `ImageMode` | recompute frames remaining immediately |
//! | region, binning, `DataType` | force the next image to be recomputed |
//! | `AcquireTime`, `Gain`, `GainX`, `GainY` | force the next image to be recomputed |

use crate::state::{DetectorState, Shared};
use daq_core::detector::{DetectorStatus, ImageMode};
use daq_core::error::DaqError;
use daq_core::params::{ParamId, ParamStatus, ParamValue};
use tracing::{debug, info, warn};

impl Shared {
    /// Write an integer parameter.
    pub(crate) fn write_int(&self, id: ParamId, value: i32) -> Result<(), DaqError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut status = ParamStatus::new();

        state.params.set_int(id, value)?;
        state.params.mark_changed(id);

        match id {
            ParamId::Acquire => {
                let code = status.take(
                    state.params.get_int(ParamId::Status),
                    DetectorStatus::Idle.code(),
                );
                let idle = code == DetectorStatus::Idle.code();
                if value != 0 && idle {
                    if let Some(remaining) = frames_for_new_acquisition(state, &mut status) {
                        state.images_remaining = remaining;
                    }
                    info!(port = %self.port_name, images = state.images_remaining, "Acquisition start requested");
                    self.signal_start(state);
                }
                if value == 0 && !idle {
                    info!(port = %self.port_name, "Acquisition stop requested");
                    self.signal_stop(state);
                }
            }
            ParamId::BinX
            | ParamId::BinY
            | ParamId::MinX
            | ParamId::MinY
            | ParamId::SizeX
            | ParamId::SizeY
            | ParamId::DataType => {
                status.check(state.params.set_int(ParamId::ResetImage, 1));
            }
            ParamId::ImageMode => match ImageMode::from_code(value) {
                Ok(mode) => {
                    let num_images = status.take(state.params.get_int(ParamId::NumImages), 0);
                    state.images_remaining = mode.frames_remaining(num_images);
                }
                Err(e) => warn!(error = %e, "Frames remaining left unchanged"),
            },
            _ => {}
        }

        self.flush(state);
        status.report("write_int");
        debug!(param = %id, value, "Wrote integer parameter");
        Ok(())
    }

    /// Write a floating-point parameter.
    pub(crate) fn write_float(&self, id: ParamId, value: f64) -> Result<(), DaqError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut status = ParamStatus::new();

        state.params.set_float(id, value)?;
        state.params.mark_changed(id);

        if matches!(
            id,
            ParamId::AcquireTime | ParamId::Gain | ParamId::GainX | ParamId::GainY
        ) {
            status.check(state.params.set_int(ParamId::ResetImage, 1));
        }

        self.flush(state);
        status.report("write_float");
        debug!(param = %id, value, "Wrote float parameter");
        Ok(())
    }

    /// Write a string parameter.
    pub(crate) fn write_str(&self, id: ParamId, value: &str) -> Result<(), DaqError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        state.params.set_str(id, value)?;
        state.params.mark_changed(id);

        self.flush(state);
        debug!(param = %id, value, "Wrote string parameter");
        Ok(())
    }

    /// Write any parameter, dispatching on the value kind.
    pub(crate) fn write(&self, id: ParamId, value: ParamValue) -> Result<(), DaqError> {
        match value {
            ParamValue::Int(v) => self.write_int(id, v),
            ParamValue::Float(v) => self.write_float(id, v),
            ParamValue::Str(v) => self.write_str(id, &v),
        }
    }
}

/// Frames remaining for an acquisition started now, or `None` if the image
/// mode is not a known code.
fn frames_for_new_acquisition(state: &DetectorState, status: &mut ParamStatus) -> Option<i32> {
    let mode = status.take(
        state.params.get_int(ParamId::ImageMode),
        ImageMode::Single.code(),
    );
    let num_images = status.take(state.params.get_int(ParamId::NumImages), 0);
    match ImageMode::from_code(mode) {
        Ok(mode) => Some(mode.frames_remaining(num_images)),
        Err(e) => {
            warn!(error = %e, "Frames remaining left unchanged");
            None
        }
    }
}
