//! Outward frame delivery.
//!
//! A detector publishes each completed frame to every registered
//! [`FrameObserver`]. Observers are called synchronously on the detector's
//! worker thread with no detector lock held, so an observer may call back
//! into the detector's command interface.

use daq_pool::NdArray;
use std::sync::Arc;

/// Handle returned when registering a frame observer, used for unregistration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(pub u64);

impl ObserverHandle {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the internal ID (for debugging/logging).
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Receiver of published frames.
///
/// # Contract
///
/// - `on_frame()` runs on the acquisition thread; a slow observer delays the
///   next frame, it does not drop it
/// - The frame is shared: clone the `Arc` to keep it beyond the call. Its
///   buffer returns to the pool when the last clone is dropped
/// - Unregistering from inside `on_frame()` is allowed; the removal takes
///   effect from the next frame
///
/// # Example
///
/// ```
/// use daq_core::capabilities::FrameObserver;
/// use daq_pool::NdArray;
/// use std::sync::atomic::{AtomicI32, Ordering};
/// use std::sync::Arc;
///
/// struct LastId(AtomicI32);
///
/// impl FrameObserver for LastId {
///     fn on_frame(&self, frame: &Arc<NdArray>, _addr: usize) {
///         self.0.store(frame.unique_id, Ordering::Relaxed);
///     }
///
///     fn name(&self) -> &'static str {
///         "last_id"
///     }
/// }
/// ```
pub trait FrameObserver: Send + Sync {
    /// Called once per published frame with the detector address it came from.
    fn on_frame(&self, frame: &Arc<NdArray>, addr: usize);

    /// Optional: Return a descriptive name for this observer (for debugging/logging).
    fn name(&self) -> &'static str {
        "unnamed_observer"
    }
}
