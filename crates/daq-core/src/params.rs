//! Detector parameter store.
//!
//! A fixed, enumerated namespace of detector parameters ([`ParamId`]), each
//! with a fixed value kind, held in one owned [`ParamTable`]. The table is
//! not synchronised; owners put it behind their own lock.
//!
//! # Change notification
//!
//! Setters record the id as pending when the stored value changes.
//! [`ParamTable::flush`] drains pending ids in first-touched order and
//! returns one [`ParamUpdate`] per id carrying the current value. Callers
//! that must notify on every write, changed or not, use
//! [`ParamTable::mark_changed`].
//!
//! # Name lookup
//!
//! Every id has a driver-info name (`"ACQ_TIME"`, `"SIM_GAINX"`, ...) that
//! control surfaces use to address it:
//!
//! ```
//! use daq_core::params::ParamId;
//!
//! let id: ParamId = "SIM_GAINX".parse().unwrap();
//! assert_eq!(id, ParamId::GainX);
//! assert_eq!(id.name(), "SIM_GAINX");
//! ```

use crate::error::ParamError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::error;

// =============================================================================
// ParamKind / ParamValue
// =============================================================================

/// Value kind of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamKind {
    Int,
    Float,
    Str,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ParamKind::Int => "int32",
            ParamKind::Float => "float64",
            ParamKind::Str => "string",
        };
        write!(f, "{}", label)
    }
}

/// A stored parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Int(i32),
    Float(f64),
    Str(String),
}

impl ParamValue {
    #[must_use]
    pub fn kind(&self) -> ParamKind {
        match self {
            ParamValue::Int(_) => ParamKind::Int,
            ParamValue::Float(_) => ParamKind::Float,
            ParamValue::Str(_) => ParamKind::Str,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Str(v) => write!(f, "{v}"),
        }
    }
}

// =============================================================================
// ParamId
// =============================================================================

macro_rules! param_ids {
    ($($(#[$meta:meta])* $id:ident => ($name:literal, $kind:ident)),* $(,)?) => {
        /// Identifier of a detector parameter.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum ParamId {
            $($(#[$meta])* $id,)*
        }

        impl ParamId {
            /// Every parameter, in table order.
            pub const ALL: &'static [ParamId] = &[$(ParamId::$id,)*];

            /// Driver-info name used by control surfaces.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $(ParamId::$id => $name,)*
                }
            }

            /// Value kind this parameter holds.
            #[must_use]
            pub const fn kind(self) -> ParamKind {
                match self {
                    $(ParamId::$id => ParamKind::$kind,)*
                }
            }
        }
    };
}

param_ids! {
    Manufacturer => ("MANUFACTURER", Str),
    Model => ("MODEL", Str),
    /// Sensor width in pixels.
    MaxSizeX => ("MAX_SIZE_X", Int),
    /// Sensor height in pixels.
    MaxSizeY => ("MAX_SIZE_Y", Int),
    /// Requested region width, in unbinned pixels.
    SizeX => ("SIZE_X", Int),
    SizeY => ("SIZE_Y", Int),
    /// Region start column.
    MinX => ("MIN_X", Int),
    MinY => ("MIN_Y", Int),
    BinX => ("BIN_X", Int),
    BinY => ("BIN_Y", Int),
    ReverseX => ("REVERSE_X", Int),
    ReverseY => ("REVERSE_Y", Int),
    /// Element type code, see `daq_pool::DataType`.
    DataType => ("DATA_TYPE", Int),
    /// Code of [`ImageMode`](crate::detector::ImageMode).
    ImageMode => ("IMAGE_MODE", Int),
    NumImages => ("NIMAGES", Int),
    /// Acquisition requested (1) or not (0).
    Acquire => ("ACQUIRE", Int),
    /// Code of [`DetectorStatus`](crate::detector::DetectorStatus).
    Status => ("STATUS", Int),
    ImageCounter => ("IMAGE_COUNTER", Int),
    ImageSizeX => ("IMAGE_SIZE_X", Int),
    ImageSizeY => ("IMAGE_SIZE_Y", Int),
    /// Bytes in the most recent output frame.
    ImageSize => ("IMAGE_SIZE", Int),
    /// Exposure time in seconds.
    AcquireTime => ("ACQ_TIME", Float),
    /// Frame period in seconds.
    AcquirePeriod => ("ACQ_PERIOD", Float),
    Gain => ("GAIN", Float),
    /// Per-column ramp of the synthetic image.
    GainX => ("SIM_GAINX", Float),
    /// Per-row ramp of the synthetic image.
    GainY => ("SIM_GAINY", Float),
    /// Non-zero forces the next frame to be recomputed from scratch.
    ResetImage => ("RESET_IMAGE", Int),
}

impl ParamId {
    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ParamId {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ParamId::ALL
            .iter()
            .copied()
            .find(|id| id.name() == s)
            .ok_or_else(|| ParamError::UnknownName(s.to_string()))
    }
}

// =============================================================================
// ParamUpdate
// =============================================================================

/// Change notification for one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamUpdate {
    pub id: ParamId,
    pub value: ParamValue,
}

// =============================================================================
// ParamTable
// =============================================================================

/// Owned table of every [`ParamId`]'s current value.
///
/// Values start undefined; reading an undefined value is an error.
#[derive(Debug, Clone)]
pub struct ParamTable {
    values: Vec<Option<ParamValue>>,
    pending: Vec<ParamId>,
}

impl Default for ParamTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ParamTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: vec![None; ParamId::ALL.len()],
            pending: Vec::new(),
        }
    }

    /// Current value, if defined.
    #[must_use]
    pub fn get(&self, id: ParamId) -> Option<&ParamValue> {
        self.values[id.index()].as_ref()
    }

    /// Store `value`, returning whether the stored value changed.
    pub fn set(&mut self, id: ParamId, value: ParamValue) -> Result<bool, ParamError> {
        if value.kind() != id.kind() {
            return Err(ParamError::WrongType {
                id,
                expected: id.kind(),
                actual: value.kind(),
            });
        }
        let slot = &mut self.values[id.index()];
        if slot.as_ref() == Some(&value) {
            return Ok(false);
        }
        *slot = Some(value);
        self.mark_changed(id);
        Ok(true)
    }

    /// Integer value of `id`.
    ///
    /// Fails with [`ParamError::Undefined`] if never set and
    /// [`ParamError::WrongType`] if `id` is not an integer parameter.
    pub fn get_int(&self, id: ParamId) -> Result<i32, ParamError> {
        match self.typed(id, ParamKind::Int)? {
            ParamValue::Int(v) => Ok(*v),
            other => Err(wrong_type(id, ParamKind::Int, other)),
        }
    }

    /// Floating-point value of `id`.
    pub fn get_float(&self, id: ParamId) -> Result<f64, ParamError> {
        match self.typed(id, ParamKind::Float)? {
            ParamValue::Float(v) => Ok(*v),
            other => Err(wrong_type(id, ParamKind::Float, other)),
        }
    }

    /// String value of `id`.
    pub fn get_str(&self, id: ParamId) -> Result<&str, ParamError> {
        match self.typed(id, ParamKind::Str)? {
            ParamValue::Str(v) => Ok(v),
            other => Err(wrong_type(id, ParamKind::Str, other)),
        }
    }

    /// Store an integer; see [`ParamTable::set`].
    pub fn set_int(&mut self, id: ParamId, value: i32) -> Result<bool, ParamError> {
        self.set(id, ParamValue::Int(value))
    }

    /// Store a float; see [`ParamTable::set`].
    pub fn set_float(&mut self, id: ParamId, value: f64) -> Result<bool, ParamError> {
        self.set(id, ParamValue::Float(value))
    }

    /// Store a string; see [`ParamTable::set`].
    pub fn set_str(&mut self, id: ParamId, value: impl Into<String>) -> Result<bool, ParamError> {
        self.set(id, ParamValue::Str(value.into()))
    }

    /// Queue a notification for `id` even if its value did not change.
    pub fn mark_changed(&mut self, id: ParamId) {
        if !self.pending.contains(&id) {
            self.pending.push(id);
        }
    }

    /// Whether any notification is queued.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drain queued notifications.
    pub fn flush(&mut self) -> Vec<ParamUpdate> {
        let pending = std::mem::take(&mut self.pending);
        pending
            .into_iter()
            .filter_map(|id| {
                self.get(id).map(|value| ParamUpdate {
                    id,
                    value: value.clone(),
                })
            })
            .collect()
    }

    fn typed(&self, id: ParamId, expected: ParamKind) -> Result<&ParamValue, ParamError> {
        if id.kind() != expected {
            return Err(ParamError::WrongType {
                id,
                expected: id.kind(),
                actual: expected,
            });
        }
        self.get(id).ok_or(ParamError::Undefined(id))
    }
}

fn wrong_type(id: ParamId, expected: ParamKind, actual: &ParamValue) -> ParamError {
    ParamError::WrongType {
        id,
        expected,
        actual: actual.kind(),
    }
}

// =============================================================================
// ParamStatus
// =============================================================================

/// Accumulates parameter-store failures across a batch of reads or writes.
///
/// Each failed access is recorded and a fallback value substituted, so the
/// batch completes with best-effort values. [`ParamStatus::report`] logs the
/// batch once.
#[derive(Debug, Default)]
pub struct ParamStatus {
    failures: Vec<ParamError>,
}

impl ParamStatus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Unwrap `result`, recording the error and returning `fallback` on failure.
    pub fn take<T>(&mut self, result: Result<T, ParamError>, fallback: T) -> T {
        match result {
            Ok(v) => v,
            Err(e) => {
                self.failures.push(e);
                fallback
            }
        }
    }

    /// Record the outcome of a write.
    pub fn check<T>(&mut self, result: Result<T, ParamError>) {
        if let Err(e) = result {
            self.failures.push(e);
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    #[must_use]
    pub fn failures(&self) -> &[ParamError] {
        &self.failures
    }

    /// Log accumulated failures, if any, as a single error event.
    pub fn report(&self, context: &str) {
        if let Some(first) = self.failures.first() {
            error!(
                context,
                failures = self.failures.len(),
                first = %first,
                "Parameter store access failed"
            );
        }
    }
}
