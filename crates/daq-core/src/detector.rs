//! Acquisition status and image-mode enumerations.
//!
//! Both are stored in the parameter table as their integer codes
//! ([`ParamId::Status`](crate::params::ParamId::Status) and
//! [`ParamId::ImageMode`](crate::params::ParamId::ImageMode)).

use crate::error::ParamError;
use crate::params::ParamId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Detector acquisition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetectorStatus {
    /// Waiting for a start request.
    Idle = 0,
    /// Exposing or producing a frame.
    Acquire = 1,
    /// Waiting out the remainder of the frame period.
    Readout = 2,
}

impl DetectorStatus {
    /// Integer code stored in the parameter table.
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Decode a stored value. Unknown codes are [`ParamError::OutOfRange`].
    pub fn from_code(code: i32) -> Result<Self, ParamError> {
        match code {
            0 => Ok(DetectorStatus::Idle),
            1 => Ok(DetectorStatus::Acquire),
            2 => Ok(DetectorStatus::Readout),
            _ => Err(ParamError::OutOfRange {
                id: ParamId::Status,
                value: code,
            }),
        }
    }
}

impl fmt::Display for DetectorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DetectorStatus::Idle => "Idle",
            DetectorStatus::Acquire => "Acquire",
            DetectorStatus::Readout => "Readout",
        };
        write!(f, "{}", label)
    }
}

/// How many frames one acquisition produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageMode {
    /// One frame.
    Single = 0,
    /// `NumImages` frames.
    Multiple = 1,
    /// Until stopped.
    Continuous = 2,
}

impl ImageMode {
    /// Integer code stored in the parameter table.
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Decode a stored value. Unknown codes are [`ParamError::OutOfRange`].
    pub fn from_code(code: i32) -> Result<Self, ParamError> {
        match code {
            0 => Ok(ImageMode::Single),
            1 => Ok(ImageMode::Multiple),
            2 => Ok(ImageMode::Continuous),
            _ => Err(ParamError::OutOfRange {
                id: ParamId::ImageMode,
                value: code,
            }),
        }
    }

    /// Frames-remaining count for a new acquisition in this mode.
    ///
    /// `-1` means unbounded.
    #[must_use]
    pub const fn frames_remaining(self, num_images: i32) -> i32 {
        match self {
            ImageMode::Single => 1,
            ImageMode::Multiple => num_images,
            ImageMode::Continuous => -1,
        }
    }
}

impl fmt::Display for ImageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ImageMode::Single => "Single",
            ImageMode::Multiple => "Multiple",
            ImageMode::Continuous => "Continuous",
        };
        write!(f, "{}", label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_remaining_per_mode() {
        assert_eq!(ImageMode::Single.frames_remaining(100), 1);
        assert_eq!(ImageMode::Multiple.frames_remaining(3), 3);
        assert_eq!(ImageMode::Continuous.frames_remaining(3), -1);
    }

    #[test]
    fn test_codes_round_trip() {
        for mode in [ImageMode::Single, ImageMode::Multiple, ImageMode::Continuous] {
            assert_eq!(ImageMode::from_code(mode.code()).unwrap(), mode);
        }
        assert!(DetectorStatus::from_code(3).is_err());
        assert_eq!(DetectorStatus::from_code(2).unwrap(), DetectorStatus::Readout);
    }
}
