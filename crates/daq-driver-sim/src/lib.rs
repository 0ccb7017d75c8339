//! Simulated area detector driver
//!
//! A detector that synthesizes images instead of reading a sensor, driven
//! entirely through parameter writes the way a hardware camera driver is.
//!
//! # Components
//!
//! - [`RawFrame`] - full-sensor working image, grow-only, owned by the worker
//! - [`synth`] - ramp / accumulate image synthesis for every element type
//! - [`geometry`] - region-of-interest clamping with write-back
//! - [`acquisition`] - the worker thread's Idle / Acquire / Readout loop
//! - [`command`] - side effects of parameter writes (start, stop, reset)
//! - [`SimDetector`] - owns all of the above
//!
//! # Frame Flow
//!
//! ```text
//! write_int(Acquire, 1) ──► start signal ──► worker wakes
//!   ──► exposure wait ──► resolve region ──► synthesize into RawFrame
//!   ──► ArrayPool::convert (crop / bin / reverse / cast)
//!   ──► FrameObserver::on_frame(Arc<NdArray>, addr)
//! ```

pub mod acquisition;
pub mod command;
pub mod config;
pub mod detector;
pub mod frame_buffer;
pub mod geometry;
mod state;
pub mod synth;

pub use config::{ConfigLoadError, SimDetectorConfig};
pub use detector::SimDetector;
pub use frame_buffer::RawFrame;
pub use geometry::{AxisGeometry, Geometry};
pub use synth::SynthParams;
