//! `daq-core`
//!
//! Shared types for the simulated-detector stack.
//!
//! ## Key Types
//!
//! - [`ParamTable`]: the detector's parameter store, keyed by [`ParamId`],
//!   with batched change notification ([`ParamUpdate`])
//! - [`DetectorStatus`] / [`ImageMode`]: acquisition enumerations stored in
//!   the table as integer codes
//! - [`FrameObserver`]: receiver of published frames
//! - [`DaqError`]: error type for detector construction and control

pub mod capabilities;
pub mod detector;
pub mod error;
pub mod params;

pub use capabilities::{FrameObserver, ObserverHandle};
pub use detector::{DetectorStatus, ImageMode};
pub use error::{AppResult, DaqError, ParamError};
pub use params::{ParamId, ParamKind, ParamStatus, ParamTable, ParamUpdate, ParamValue};
