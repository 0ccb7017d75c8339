//! Acquisition worker.
//!
//! One long-lived thread per detector runs this loop:
//!
//! ```text
//!        ┌─────────────── Acquire == 0 ──────────────┐
//!        ▼                                           │
//!      Idle ── start ──► Acquire (exposure wait) ──► compute + publish
//!                          ▲                         │
//!                          │                  frames remaining != 0
//!                          │                         ▼
//!                          └──────────────── Readout (period wait)
//! ```
//!
//! Parameters for a frame are read, and region corrections written back, with
//! the detector lock held. The lock is then released while the image is
//! synthesized and converted, for every wait and while observers run, so
//! parameter writers never wait on frame computation. A reset request is
//! consumed when its frame's parameters are read; a reset-forcing write that
//! lands while the frame is being computed applies to the next frame.
//!
//! A stop request cuts the current wait short; a frame already being exposed
//! is still computed and published.
//!
//! A cycle that fails to produce a frame publishes nothing and advances no
//! counters. If acquisition is still requested the worker waits out the
//! frame period, at least [`FAILED_CYCLE_MIN_DELAY`], before the next try.

use crate::frame_buffer::RawFrame;
use crate::geometry::Geometry;
use crate::state::{DetectorState, Shared, WaitOutcome};
use crate::synth::{synthesize, SynthParams};
use chrono::Utc;
use daq_core::detector::DetectorStatus;
use daq_core::error::DaqError;
use daq_core::params::{ParamId, ParamStatus};
use daq_pool::{ArrayPool, DataType, NdArray};
use parking_lot::MutexGuard;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Lower bound on the pause after a failed cycle.
pub const FAILED_CYCLE_MIN_DELAY: Duration = Duration::from_millis(1);

pub(crate) struct AcquisitionWorker {
    shared: Arc<Shared>,
    raw: RawFrame,
    pool: ArrayPool,
    sleep_quantum: Duration,
    addr: usize,
}

impl AcquisitionWorker {
    pub(crate) fn new(
        shared: Arc<Shared>,
        raw: RawFrame,
        pool: ArrayPool,
        sleep_quantum: Duration,
    ) -> Self {
        Self {
            shared,
            raw,
            pool,
            sleep_quantum,
            addr: 0,
        }
    }

    /// Run until the detector shuts down.
    pub(crate) fn run(mut self) {
        let shared = Arc::clone(&self.shared);
        let quantum = self.sleep_quantum.as_secs_f64();
        info!(port = %shared.port_name, "Acquisition worker started");

        let mut guard = shared.state.lock();
        loop {
            if guard.shutdown {
                break;
            }
            let mut status = ParamStatus::new();

            let acquire = status.take(guard.params.get_int(ParamId::Acquire), 0);
            if acquire == 0 {
                set_status(&mut guard, &mut status, DetectorStatus::Idle);
                shared.flush(&mut guard);
                debug!("Waiting for acquire to start");
                if !shared.wait_for_start(&mut guard) {
                    break;
                }
                // A stop aimed at the previous acquisition must not cut this one short.
                guard.stop_pending = false;
            }

            let start_time = Utc::now();
            let started = Instant::now();
            let acquire_time = status.take(guard.params.get_float(ParamId::AcquireTime), 0.0);
            let acquire_period = status.take(guard.params.get_float(ParamId::AcquirePeriod), 0.0);

            set_status(&mut guard, &mut status, DetectorStatus::Acquire);
            shared.flush(&mut guard);

            if acquire_time >= quantum
                && shared.wait_for_stop(&mut guard, seconds(acquire_time)) == WaitOutcome::Shutdown
            {
                break;
            }

            let mut image = match self.produce_frame(&mut guard, &mut status) {
                Ok(image) => image,
                Err(e) => {
                    error!(port = %shared.port_name, error = %e, "Failed to compute image, frame skipped");
                    status.report("acquisition cycle");
                    shared.flush(&mut guard);
                    if self.pace_failed_cycle(&mut guard, &mut status, acquire_period, started)
                        == WaitOutcome::Shutdown
                    {
                        break;
                    }
                    continue;
                }
            };
            let elapsed = started.elapsed().as_secs_f64();

            let counter = status
                .take(guard.params.get_int(ParamId::ImageCounter), 0)
                .wrapping_add(1);
            status.check(guard.params.set_int(ParamId::ImageCounter, counter));
            image.unique_id = counter;
            image.timestamp = Some(start_time);

            let frame = Arc::new(image);
            guard.last_frame = Some(Arc::downgrade(&frame));

            let addr = self.addr;
            MutexGuard::unlocked(&mut guard, || {
                debug!(frame = counter, "Calling image data callback");
                shared.publish(&frame, addr);
                drop(frame);
            });

            if guard.images_remaining > 0 {
                guard.images_remaining -= 1;
            }
            let acquiring = guard.images_remaining != 0;
            if !acquiring {
                status.check(guard.params.set_int(ParamId::Acquire, 0));
                info!(port = %shared.port_name, last_frame = counter, "Acquisition completed");
            }
            shared.flush(&mut guard);
            status.report("acquisition cycle");

            if acquiring {
                set_status(&mut guard, &mut status, DetectorStatus::Readout);
                shared.flush(&mut guard);
                let delay = acquire_period - elapsed;
                debug!(delay, "Waiting out frame period");
                if delay >= quantum
                    && shared.wait_for_stop(&mut guard, seconds(delay)) == WaitOutcome::Shutdown
                {
                    break;
                }
            }
        }
        drop(guard);

        info!(port = %shared.port_name, "Acquisition worker stopped");
    }

    /// Produce the output frame for the current parameters.
    ///
    /// Takes the parameter snapshot under the lock, computes the image with
    /// the lock released, then records the output size. A reset request
    /// consumed by a frame that fails is put back.
    fn produce_frame(
        &mut self,
        guard: &mut MutexGuard<'_, DetectorState>,
        status: &mut ParamStatus,
    ) -> Result<NdArray, DaqError> {
        let mut plan = FramePlan::take(guard, status, self.raw.data_type())?;
        let produced = MutexGuard::unlocked(guard, || self.render(&mut plan))
            .and_then(|image| {
                record_output_size(guard, status, &image)?;
                Ok(image)
            });
        if produced.is_err() && plan.reset_requested {
            status.check(guard.params.set_int(ParamId::ResetImage, 1));
        }
        produced
    }

    /// Synthesize the full sensor image into the raw frame and extract the
    /// region. Runs without the detector lock.
    fn render(&mut self, plan: &mut FramePlan) -> Result<NdArray, DaqError> {
        if self.raw.reshape(plan.width, plan.height, plan.data_type)? {
            plan.synth.reset = true;
        }
        synthesize(&mut self.raw, &plan.synth);
        let request = plan.geometry.request()?;
        Ok(self.pool.convert(self.raw.view(), plan.data_type, &request)?)
    }

    fn pace_failed_cycle(
        &self,
        guard: &mut MutexGuard<'_, DetectorState>,
        status: &mut ParamStatus,
        acquire_period: f64,
        started: Instant,
    ) -> WaitOutcome {
        let acquire = status.take(guard.params.get_int(ParamId::Acquire), 0);
        if acquire == 0 {
            return WaitOutcome::TimedOut;
        }
        let remaining = seconds(acquire_period - started.elapsed().as_secs_f64());
        let delay = remaining
            .max(self.sleep_quantum)
            .max(FAILED_CYCLE_MIN_DELAY);
        self.shared.wait_for_stop(guard, delay)
    }
}

/// Parameter snapshot for one frame.
struct FramePlan {
    geometry: Geometry,
    data_type: DataType,
    synth: SynthParams,
    width: usize,
    height: usize,
    /// ResetImage was set when the snapshot was taken.
    reset_requested: bool,
}

impl FramePlan {
    /// Resolve the region (writing corrections back), read the synthesis
    /// inputs and consume the reset request.
    fn take(
        state: &mut DetectorState,
        status: &mut ParamStatus,
        current_type: DataType,
    ) -> Result<Self, DaqError> {
        let geometry = Geometry::resolve(&mut state.params, status);
        let type_code = status.take(state.params.get_int(ParamId::DataType), current_type.code());
        let data_type = DataType::from_code(type_code)?;
        let synth = SynthParams::read(&state.params, status);

        let (width, height) = match (
            usize::try_from(geometry.max_x),
            usize::try_from(geometry.max_y),
        ) {
            (Ok(w), Ok(h)) if w > 0 && h > 0 => (w, h),
            _ => {
                return Err(DaqError::Configuration(format!(
                    "sensor size {}x{} is not positive",
                    geometry.max_x, geometry.max_y
                )))
            }
        };

        state.last_frame = None;
        if synth.reset {
            status.check(state.params.set_int(ParamId::ResetImage, 0));
        }
        Ok(Self {
            geometry,
            data_type,
            synth,
            width,
            height,
            reset_requested: synth.reset,
        })
    }
}

/// Write ImageSize, ImageSizeX and ImageSizeY for a finished frame.
fn record_output_size(
    state: &mut DetectorState,
    status: &mut ParamStatus,
    image: &NdArray,
) -> Result<(), DaqError> {
    let info = image.info()?;
    let size_x = image.dims.first().map_or(0, |d| d.size);
    let size_y = image.dims.get(1).map_or(0, |d| d.size);
    for (id, value) in [
        (ParamId::ImageSize, info.total_bytes),
        (ParamId::ImageSizeX, size_x),
        (ParamId::ImageSizeY, size_y),
    ] {
        status.check(state.params.set_int(id, saturate_i32(value)));
    }
    Ok(())
}

fn set_status(state: &mut DetectorState, status: &mut ParamStatus, value: DetectorStatus) {
    status.check(state.params.set_int(ParamId::Status, value.code()));
}

/// Wait duration for a non-negative number of seconds. Negative and NaN
/// map to zero, values too large to represent wait forever.
fn seconds(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

fn saturate_i32(value: usize) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}
