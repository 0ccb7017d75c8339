//! `SimDetector` - the simulated area detector.
//!
//! Owns the shared parameter state, the output frame pool and the
//! acquisition worker thread. All control goes through parameter writes:
//!
//! ```no_run
//! use daq_core::params::ParamId;
//! use daq_driver_sim::{SimDetector, SimDetectorConfig};
//!
//! # fn main() -> Result<(), daq_core::DaqError> {
//! let detector = SimDetector::new(SimDetectorConfig::default())?;
//! detector.write_int(ParamId::ImageMode, 0)?; // Single
//! detector.write_float(ParamId::AcquireTime, 0.01)?;
//! detector.write_int(ParamId::Acquire, 1)?;
//! # Ok(())
//! # }
//! ```

use crate::acquisition::AcquisitionWorker;
use crate::config::SimDetectorConfig;
use crate::frame_buffer::RawFrame;
use crate::state::Shared;
use daq_core::capabilities::{FrameObserver, ObserverHandle};
use daq_core::detector::{DetectorStatus, ImageMode};
use daq_core::error::{DaqError, ParamError};
use daq_core::params::{ParamId, ParamTable, ParamUpdate, ParamValue};
use daq_pool::{ArrayPool, NdArray};
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Value of the Manufacturer parameter.
pub const MANUFACTURER: &str = "Simulated detector";
/// Value of the Model parameter.
pub const MODEL: &str = "Basic simulator";

/// Start-up parameter values for `config`.
pub fn initial_params(config: &SimDetectorConfig) -> Result<ParamTable, DaqError> {
    let max_x = sensor_extent(config.max_size_x)?;
    let max_y = sensor_extent(config.max_size_y)?;

    let mut params = ParamTable::new();
    params.set_str(ParamId::Manufacturer, MANUFACTURER)?;
    params.set_str(ParamId::Model, MODEL)?;

    let ints = [
        (ParamId::MaxSizeX, max_x),
        (ParamId::MaxSizeY, max_y),
        (ParamId::SizeX, max_x),
        (ParamId::SizeY, max_y),
        (ParamId::MinX, 0),
        (ParamId::MinY, 0),
        (ParamId::BinX, 1),
        (ParamId::BinY, 1),
        (ParamId::ReverseX, 0),
        (ParamId::ReverseY, 0),
        (ParamId::ImageSizeX, max_x),
        (ParamId::ImageSizeY, max_y),
        (ParamId::ImageSize, 0),
        (ParamId::DataType, config.data_type.code()),
        (ParamId::ImageMode, ImageMode::Continuous.code()),
        (ParamId::NumImages, 100),
        (ParamId::Acquire, 0),
        (ParamId::Status, DetectorStatus::Idle.code()),
        (ParamId::ImageCounter, 0),
        (ParamId::ResetImage, 1),
    ];
    for (id, value) in ints {
        params.set_int(id, value)?;
    }

    let floats = [
        (ParamId::AcquireTime, 0.001),
        (ParamId::AcquirePeriod, 0.005),
        (ParamId::Gain, 0.0),
        (ParamId::GainX, 1.0),
        (ParamId::GainY, 1.0),
    ];
    for (id, value) in floats {
        params.set_float(id, value)?;
    }

    Ok(params)
}

fn sensor_extent(size: u32) -> Result<i32, DaqError> {
    i32::try_from(size)
        .map_err(|_| DaqError::Configuration(format!("sensor extent {size} out of range")))
}

/// A simulated area detector with its acquisition thread.
///
/// Dropping the detector stops and joins the thread.
pub struct SimDetector {
    config: SimDetectorConfig,
    shared: Arc<Shared>,
    pool: ArrayPool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SimDetector {
    /// Validate `config`, allocate the sensor frame and start the worker.
    pub fn new(config: SimDetectorConfig) -> Result<Self, DaqError> {
        config.validate()?;

        let mut params = initial_params(&config)?;
        // Start-up values are not changes.
        params.flush();
        let raw = RawFrame::new(
            config.max_size_x as usize,
            config.max_size_y as usize,
            config.data_type,
        )?;
        let pool = ArrayPool::new(config.max_buffers, config.max_memory);
        let shared = Arc::new(Shared::new(config.port_name.clone(), params));

        let worker = AcquisitionWorker::new(
            Arc::clone(&shared),
            raw,
            pool.clone(),
            config.sleep_quantum(),
        );
        let handle = std::thread::Builder::new()
            .name(format!("{}-acq", config.port_name))
            .spawn(move || worker.run())?;

        info!(
            port = %config.port_name,
            max_size_x = config.max_size_x,
            max_size_y = config.max_size_y,
            data_type = %config.data_type,
            "Simulated detector created"
        );

        Ok(Self {
            config,
            shared,
            pool,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Port name from the configuration.
    #[must_use]
    pub fn port_name(&self) -> &str {
        &self.config.port_name
    }

    /// Configuration the detector was created with.
    #[must_use]
    pub fn config(&self) -> &SimDetectorConfig {
        &self.config
    }

    /// The pool output frames are allocated from.
    #[must_use]
    pub fn pool(&self) -> &ArrayPool {
        &self.pool
    }

    // -------------------------------------------------------------------------
    // Parameter access
    // -------------------------------------------------------------------------

    /// Write an integer parameter and apply its side effects.
    ///
    /// Subscribers are notified even if the value is unchanged. Writing
    /// `Acquire` starts or stops acquisition.
    pub fn write_int(&self, id: ParamId, value: i32) -> Result<(), DaqError> {
        self.ensure_running()?;
        self.shared.write_int(id, value)
    }

    /// Write a floating-point parameter. Exposure and gain writes force
    /// the next image to be rebuilt.
    pub fn write_float(&self, id: ParamId, value: f64) -> Result<(), DaqError> {
        self.ensure_running()?;
        self.shared.write_float(id, value)
    }

    /// Write a string parameter.
    pub fn write_str(&self, id: ParamId, value: &str) -> Result<(), DaqError> {
        self.ensure_running()?;
        self.shared.write_str(id, value)
    }

    /// Write a parameter of any kind.
    pub fn write(&self, id: ParamId, value: ParamValue) -> Result<(), DaqError> {
        self.ensure_running()?;
        self.shared.write(id, value)
    }

    /// Write a parameter addressed by its driver-info name (`"SIM_GAINX"`).
    pub fn write_by_name(&self, name: &str, value: ParamValue) -> Result<(), DaqError> {
        let id: ParamId = name.parse()?;
        self.write(id, value)
    }

    /// Current value, `None` if never set.
    #[must_use]
    pub fn read(&self, id: ParamId) -> Option<ParamValue> {
        self.shared.state.lock().params.get(id).cloned()
    }

    /// Current integer value.
    pub fn read_int(&self, id: ParamId) -> Result<i32, DaqError> {
        Ok(self.shared.state.lock().params.get_int(id)?)
    }

    /// Current floating-point value.
    pub fn read_float(&self, id: ParamId) -> Result<f64, DaqError> {
        Ok(self.shared.state.lock().params.get_float(id)?)
    }

    /// Current string value.
    pub fn read_str(&self, id: ParamId) -> Result<String, DaqError> {
        Ok(self.shared.state.lock().params.get_str(id)?.to_string())
    }

    /// Acquisition status as last published by the worker.
    pub fn status(&self) -> Result<DetectorStatus, DaqError> {
        let code = self.read_int(ParamId::Status)?;
        Ok(DetectorStatus::from_code(code)?)
    }

    /// Subscribe to parameter change notifications.
    ///
    /// A receiver that falls more than the channel capacity behind skips
    /// the oldest notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ParamUpdate> {
        self.shared.subscribe()
    }

    // -------------------------------------------------------------------------
    // Acquisition shortcuts
    // -------------------------------------------------------------------------

    /// Request acquisition (`Acquire = 1`).
    pub fn start(&self) -> Result<(), DaqError> {
        self.write_int(ParamId::Acquire, 1)
    }

    /// Request stop (`Acquire = 0`).
    pub fn stop(&self) -> Result<(), DaqError> {
        self.write_int(ParamId::Acquire, 0)
    }

    // -------------------------------------------------------------------------
    // Frames
    // -------------------------------------------------------------------------

    /// Deliver every published frame to `observer` until unregistered.
    pub fn register_observer(&self, observer: Arc<dyn FrameObserver>) -> ObserverHandle {
        self.shared.register_observer(observer)
    }

    /// Returns `false` if the handle was not registered.
    pub fn unregister_observer(&self, handle: ObserverHandle) -> bool {
        self.shared.unregister_observer(handle)
    }

    /// Most recently published frame, if anything still holds it.
    #[must_use]
    pub fn last_frame(&self) -> Option<Arc<NdArray>> {
        self.shared
            .state
            .lock()
            .last_frame
            .as_ref()
            .and_then(std::sync::Weak::upgrade)
    }

    // -------------------------------------------------------------------------
    // Reporting and lifecycle
    // -------------------------------------------------------------------------

    /// Human-readable summary. `details > 0` adds geometry and pool state.
    #[must_use]
    pub fn report(&self, details: i32) -> String {
        let mut out = format!("Simulation detector {}\n", self.config.port_name);
        if details > 0 {
            let state = self.shared.state.lock();
            let int = |id| {
                state
                    .params
                    .get_int(id)
                    .map_or_else(|e: ParamError| e.to_string(), |v| v.to_string())
            };
            let data_type = state
                .params
                .get_int(ParamId::DataType)
                .ok()
                .and_then(|code| daq_pool::DataType::from_code(code).ok())
                .map_or_else(|| "unknown".to_string(), |dt| dt.to_string());
            let status = state
                .params
                .get_int(ParamId::Status)
                .ok()
                .and_then(|code| DetectorStatus::from_code(code).ok())
                .map_or_else(|| "unknown".to_string(), |s| s.to_string());

            let _ = writeln!(out, "  NX, NY:            {}  {}", int(ParamId::SizeX), int(ParamId::SizeY));
            let _ = writeln!(out, "  Data type:         {data_type}");
            let _ = writeln!(out, "  Status:            {status}");
            let _ = writeln!(out, "  Image counter:     {}", int(ParamId::ImageCounter));
            drop(state);

            let memory_limit = match self.pool.max_memory() {
                0 => "unlimited".to_string(),
                bytes => format!("{bytes} bytes"),
            };
            let _ = writeln!(
                out,
                "  Array pool:        {} buffers ({} free, max {}), {} bytes, limit {}",
                self.pool.num_buffers(),
                self.pool.num_free(),
                self.pool.max_buffers(),
                self.pool.memory_size(),
                memory_limit
            );
        }
        out
    }

    /// Stop the worker thread and wait for it to exit. Idempotent.
    pub fn shutdown(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        {
            let mut state = self.shared.state.lock();
            self.shared.signal_shutdown(&mut state);
        }
        if handle.join().is_err() {
            error!(port = %self.config.port_name, "Acquisition worker panicked");
        }
        info!(port = %self.config.port_name, "Simulated detector shut down");
    }

    fn ensure_running(&self) -> Result<(), DaqError> {
        if self.shared.state.lock().shutdown {
            return Err(DaqError::ShutDown(self.config.port_name.clone()));
        }
        Ok(())
    }
}

impl Drop for SimDetector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SimDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimDetector")
            .field("port_name", &self.config.port_name)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}
