//! Error types for the detector stack.
//!
//! - [`ParamError`]: a parameter-store access failed (wrong kind, undefined
//!   value, unknown name, out-of-range code)
//! - [`DaqError`]: the umbrella error returned by detector construction and
//!   control operations. Pool and parameter errors convert into it with `?`.
//!
//! Errors raised on the acquisition worker never propagate out of it; the
//! worker logs them and skips the cycle.

use crate::params::{ParamId, ParamKind};
use daq_pool::PoolError;
use thiserror::Error;

/// Parameter-store access failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    /// The value kind does not match the parameter's declared kind.
    #[error("parameter {id} holds {expected}, accessed as {actual}")]
    WrongType {
        id: ParamId,
        expected: ParamKind,
        actual: ParamKind,
    },

    /// The parameter has never been set.
    #[error("parameter {0} is undefined")]
    Undefined(ParamId),

    /// No parameter has this driver-info name.
    #[error("unknown parameter name '{0}'")]
    UnknownName(String),

    /// An enumerated parameter holds a code outside its enumeration.
    #[error("parameter {id} value {value} is out of range")]
    OutOfRange { id: ParamId, value: i32 },
}

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Primary error type for detector construction and control.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration validation failed.
    ///
    /// Occurs when configuration values parse correctly but fail semantic
    /// validation (zero sensor extent, zero buffer count, negative sleep
    /// quantum).
    ///
    /// **Error Type**: Permanent - requires fixing the configuration values.
    ///
    /// **Recovery Strategy**: Abort startup, display validation error message.
    ///
    /// # Example
    ///
    /// ```rust
    /// use daq_core::error::DaqError;
    ///
    /// fn validate_extent(max_size_x: u32) -> Result<(), DaqError> {
    ///     if max_size_x == 0 {
    ///         return Err(DaqError::Configuration(
    ///             "max_size_x must be > 0".into()
    ///         ));
    ///     }
    ///     Ok(())
    /// }
    /// ```
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// A parameter-store access failed.
    ///
    /// **Error Type**: Permanent for the current request. Control writes with
    /// the wrong value kind or to an unknown name fail here.
    ///
    /// **Recovery Strategy**: Correct the request; the detector state is
    /// unchanged.
    #[error("Parameter error: {0}")]
    Param(#[from] ParamError),

    /// Frame memory could not be obtained.
    ///
    /// Occurs when the raw frame buffer cannot grow to the sensor size or the
    /// system allocator refuses the request.
    ///
    /// **Error Type**: Usually transient - frames in flight still hold memory.
    ///
    /// **Recovery Strategy**: The acquisition worker skips the cycle and
    /// retries on the next one.
    #[error("Failed to allocate {bytes} bytes of frame memory")]
    Allocation { bytes: usize },

    /// The frame pool refused an allocation or conversion.
    ///
    /// **Error Type**: Transient when caused by pool limits, permanent for an
    /// invalid conversion request.
    ///
    /// **Recovery Strategy**: The acquisition worker skips the cycle; raise
    /// `max_buffers` or `max_memory` if it persists.
    #[error("Frame pool error: {0}")]
    Pool(#[from] PoolError),

    /// Standard I/O operation failed.
    ///
    /// Covers spawning the acquisition thread.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The detector has been shut down.
    #[error("Detector '{0}' has been shut down")]
    ShutDown(String),
}
