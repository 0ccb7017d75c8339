//! State shared between the command handler and the acquisition worker.
//!
//! One mutex guards the parameter table and acquisition bookkeeping. Start
//! and stop requests are flags in that state paired with condition
//! variables, so a request raised before the worker starts waiting is not
//! lost. Each flag is consumed by the wait that observes it.

use daq_core::capabilities::{FrameObserver, ObserverHandle};
use daq_core::params::{ParamTable, ParamUpdate};
use daq_pool::NdArray;
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Capacity of the parameter change channel.
pub(crate) const UPDATE_CHANNEL_CAPACITY: usize = 1024;

/// Fields protected by the detector lock.
#[derive(Debug)]
pub(crate) struct DetectorState {
    pub(crate) params: ParamTable,
    /// Frames left in the current acquisition; -1 is unbounded.
    pub(crate) images_remaining: i32,
    pub(crate) start_pending: bool,
    pub(crate) stop_pending: bool,
    pub(crate) shutdown: bool,
    /// Most recently published frame, not kept alive by the detector.
    pub(crate) last_frame: Option<Weak<NdArray>>,
}

/// How a timed wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    TimedOut,
    Stopped,
    Shutdown,
}

type ObserverList = Vec<(ObserverHandle, Arc<dyn FrameObserver>)>;

pub(crate) struct Shared {
    pub(crate) port_name: String,
    pub(crate) state: Mutex<DetectorState>,
    start_cv: Condvar,
    stop_cv: Condvar,
    updates: broadcast::Sender<ParamUpdate>,
    observers: RwLock<ObserverList>,
    next_observer_id: AtomicU64,
}

impl Shared {
    pub(crate) fn new(port_name: String, params: ParamTable) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            port_name,
            state: Mutex::new(DetectorState {
                params,
                images_remaining: 0,
                start_pending: false,
                stop_pending: false,
                shutdown: false,
                last_frame: None,
            }),
            start_cv: Condvar::new(),
            stop_cv: Condvar::new(),
            updates,
            observers: RwLock::new(Vec::new()),
            next_observer_id: AtomicU64::new(1),
        }
    }

    // -------------------------------------------------------------------------
    // Change notification
    // -------------------------------------------------------------------------

    /// Send queued parameter notifications. Called with the lock held so
    /// notifications leave in the order the changes were made.
    pub(crate) fn flush(&self, state: &mut DetectorState) {
        for update in state.params.flush() {
            // No subscribers is not an error.
            let _ = self.updates.send(update);
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ParamUpdate> {
        self.updates.subscribe()
    }

    // -------------------------------------------------------------------------
    // Signals
    // -------------------------------------------------------------------------

    pub(crate) fn signal_start(&self, state: &mut DetectorState) {
        state.start_pending = true;
        self.start_cv.notify_one();
    }

    pub(crate) fn signal_stop(&self, state: &mut DetectorState) {
        state.stop_pending = true;
        self.stop_cv.notify_one();
    }

    pub(crate) fn signal_shutdown(&self, state: &mut DetectorState) {
        state.shutdown = true;
        self.start_cv.notify_all();
        self.stop_cv.notify_all();
    }

    /// Block until a start request arrives. Returns `false` on shutdown.
    pub(crate) fn wait_for_start(&self, guard: &mut MutexGuard<'_, DetectorState>) -> bool {
        self.start_cv
            .wait_while(guard, |s| !s.start_pending && !s.shutdown);
        if guard.shutdown {
            return false;
        }
        guard.start_pending = false;
        true
    }

    /// Block for up to `timeout` or until a stop request arrives.
    pub(crate) fn wait_for_stop(
        &self,
        guard: &mut MutexGuard<'_, DetectorState>,
        timeout: Duration,
    ) -> WaitOutcome {
        let _ = self
            .stop_cv
            .wait_while_for(guard, |s| !s.stop_pending && !s.shutdown, timeout);
        if guard.shutdown {
            WaitOutcome::Shutdown
        } else if guard.stop_pending {
            guard.stop_pending = false;
            WaitOutcome::Stopped
        } else {
            WaitOutcome::TimedOut
        }
    }

    // -------------------------------------------------------------------------
    // Observers
    // -------------------------------------------------------------------------

    pub(crate) fn register_observer(&self, observer: Arc<dyn FrameObserver>) -> ObserverHandle {
        let handle = ObserverHandle::new(self.next_observer_id.fetch_add(1, Ordering::Relaxed));
        debug!(observer = observer.name(), handle = handle.id(), "Registered frame observer");
        self.observers.write().push((handle, observer));
        handle
    }

    pub(crate) fn unregister_observer(&self, handle: ObserverHandle) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(h, _)| *h != handle);
        let removed = observers.len() != before;
        if !removed {
            warn!(handle = handle.id(), "Unregister of unknown frame observer");
        }
        removed
    }

    /// Deliver `frame` to every observer. Must be called without the
    /// detector lock held.
    pub(crate) fn publish(&self, frame: &Arc<NdArray>, addr: usize) {
        let snapshot: ObserverList = self.observers.read().clone();
        for (_, observer) in &snapshot {
            observer.on_frame(frame, addr);
        }
    }
}
