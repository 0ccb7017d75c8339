//! Integration tests for the simulated detector's acquisition loop.
//!
//! Each test runs a real worker thread with short exposures and polls the
//! detector against a deadline.

use chrono::{DateTime, Utc};
use daq_core::capabilities::FrameObserver;
use daq_core::detector::{DetectorStatus, ImageMode};
use daq_core::params::{ParamId, ParamUpdate, ParamValue};
use daq_driver_sim::{SimDetector, SimDetectorConfig};
use daq_pool::{DataType, Dimension, NdArray};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

const DEADLINE: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn detector(width: u32, height: u32) -> SimDetector {
    init_tracing();
    SimDetector::new(SimDetectorConfig {
        port_name: "SIMTEST".into(),
        max_size_x: width,
        max_size_y: height,
        ..Default::default()
    })
    .unwrap()
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + DEADLINE;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

fn status(detector: &SimDetector) -> DetectorStatus {
    detector.status().unwrap()
}

/// What an observer saw of one frame.
#[derive(Debug, Clone)]
struct Seen {
    unique_id: i32,
    timestamp: Option<DateTime<Utc>>,
    dims: Vec<Dimension>,
    data_type: DataType,
    pixels: Vec<f64>,
}

#[derive(Default)]
struct Recorder {
    frames: Mutex<Vec<Seen>>,
}

impl Recorder {
    fn count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    fn frames(&self) -> Vec<Seen> {
        self.frames.lock().unwrap().clone()
    }
}

impl FrameObserver for Recorder {
    fn on_frame(&self, frame: &Arc<NdArray>, addr: usize) {
        assert_eq!(addr, 0);
        let width = frame.dims[0].size;
        let height = frame.dims[1].size;
        let mut pixels = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                pixels.push(frame.get_f64(x, y).unwrap());
            }
        }
        self.frames.lock().unwrap().push(Seen {
            unique_id: frame.unique_id,
            timestamp: frame.timestamp,
            dims: frame.dims.clone(),
            data_type: frame.data_type,
            pixels,
        });
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

fn recorder(detector: &SimDetector) -> Arc<Recorder> {
    let recorder = Arc::new(Recorder::default());
    detector.register_observer(recorder.clone());
    recorder
}

fn wait_idle_after(detector: &SimDetector, recorder: &Recorder, frames: usize) {
    assert!(
        wait_until(|| recorder.count() >= frames && status(detector) == DetectorStatus::Idle),
        "expected {frames} frames and Idle, saw {} frames, status {}",
        recorder.count(),
        status(detector)
    );
}

#[test]
fn test_single_shot_publishes_one_frame() {
    let detector = detector(16, 8);
    let recorder = recorder(&detector);
    detector.write_int(ParamId::ImageMode, ImageMode::Single.code()).unwrap();
    detector.start().unwrap();

    wait_idle_after(&detector, &recorder, 1);
    std::thread::sleep(Duration::from_millis(50));

    let frames = recorder.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].unique_id, 1);
    assert!(frames[0].timestamp.is_some());
    assert_eq!(detector.read_int(ParamId::Acquire).unwrap(), 0);
    assert_eq!(detector.read_int(ParamId::ImageCounter).unwrap(), 1);
    assert_eq!(detector.read_int(ParamId::ResetImage).unwrap(), 0);
}

#[test]
fn test_multiple_mode_publishes_count_frames() {
    let detector = detector(16, 8);
    let recorder = recorder(&detector);
    detector.write_int(ParamId::ImageMode, ImageMode::Multiple.code()).unwrap();
    detector.write_int(ParamId::NumImages, 3).unwrap();
    detector.write_float(ParamId::AcquirePeriod, 0.0).unwrap();
    detector.start().unwrap();

    wait_idle_after(&detector, &recorder, 3);
    std::thread::sleep(Duration::from_millis(50));

    let frames = recorder.frames();
    let ids: Vec<_> = frames.iter().map(|f| f.unique_id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    for pair in frames.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
}

#[test]
fn test_stop_mid_exposure_still_publishes_one_frame() {
    let detector = detector(16, 8);
    let recorder = recorder(&detector);
    detector.write_float(ParamId::AcquireTime, 10.0).unwrap();
    detector.write_float(ParamId::AcquirePeriod, 0.0).unwrap();
    detector.start().unwrap();

    assert!(wait_until(|| status(&detector) == DetectorStatus::Acquire));
    let stopped_at = Instant::now();
    detector.stop().unwrap();

    wait_idle_after(&detector, &recorder, 1);
    assert!(stopped_at.elapsed() < Duration::from_secs(5));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(recorder.count(), 1);
}

#[test]
fn test_stop_during_readout_ends_period_wait() {
    let detector = detector(16, 8);
    let recorder = recorder(&detector);
    detector.write_float(ParamId::AcquireTime, 0.0).unwrap();
    detector.write_float(ParamId::AcquirePeriod, 30.0).unwrap();
    detector.start().unwrap();

    assert!(wait_until(|| status(&detector) == DetectorStatus::Readout));
    detector.stop().unwrap();

    wait_idle_after(&detector, &recorder, 1);
    assert_eq!(recorder.count(), 1);
}

#[test]
fn test_accumulation_across_frames() {
    let detector = detector(4, 4);
    let recorder = recorder(&detector);
    detector.write_int(ParamId::DataType, DataType::UInt16.code()).unwrap();
    detector.write_float(ParamId::GainX, 0.0).unwrap();
    detector.write_float(ParamId::GainY, 0.0).unwrap();
    detector.write_float(ParamId::Gain, 2.0).unwrap();
    detector.write_float(ParamId::AcquireTime, 0.001).unwrap();
    detector.write_float(ParamId::AcquirePeriod, 0.0).unwrap();
    detector.write_int(ParamId::ImageMode, ImageMode::Multiple.code()).unwrap();
    detector.write_int(ParamId::NumImages, 2).unwrap();
    detector.start().unwrap();

    wait_idle_after(&detector, &recorder, 2);
    let frames = recorder.frames();
    assert_eq!(frames[0].data_type, DataType::UInt16);
    assert_eq!(frames[0].pixels[0], 2.0);
    assert_eq!(frames[1].pixels[0], 4.0);
}

#[test]
fn test_region_binning_and_reverse() {
    let detector = detector(8, 4);
    let recorder = recorder(&detector);
    for (id, value) in [
        (ParamId::DataType, DataType::UInt16.code()),
        (ParamId::MinX, 2),
        (ParamId::SizeX, 4),
        (ParamId::BinX, 2),
        (ParamId::ReverseX, 1),
        (ParamId::MinY, 1),
        (ParamId::SizeY, 2),
        (ParamId::ImageMode, ImageMode::Single.code()),
    ] {
        detector.write_int(id, value).unwrap();
    }
    detector.write_float(ParamId::GainX, 1.0).unwrap();
    detector.write_float(ParamId::GainY, 10.0).unwrap();
    detector.write_float(ParamId::AcquireTime, 0.0).unwrap();
    detector.start().unwrap();

    wait_idle_after(&detector, &recorder, 1);
    let frame = &recorder.frames()[0];
    // raw pixel (x, y) = x + 10y; row 1 cols 2..6 = 12..15, row 2 = 22..25
    assert_eq!(frame.pixels, vec![29.0, 25.0, 49.0, 45.0]);
    assert_eq!(frame.dims[0].size, 2);
    assert_eq!(frame.dims[0].offset, 2);
    assert_eq!(frame.dims[0].binning, 2);
    assert!(frame.dims[0].reverse);
    assert_eq!(frame.dims[1].offset, 1);

    assert_eq!(detector.read_int(ParamId::ImageSizeX).unwrap(), 2);
    assert_eq!(detector.read_int(ParamId::ImageSizeY).unwrap(), 2);
    assert_eq!(detector.read_int(ParamId::ImageSize).unwrap(), 8);
}

#[test]
fn test_out_of_range_region_clamped_and_written_back() {
    let detector = detector(16, 8);
    let recorder = recorder(&detector);
    detector.write_int(ParamId::MinX, -5).unwrap();
    detector.write_int(ParamId::SizeX, 10_000).unwrap();
    detector.write_int(ParamId::BinY, 0).unwrap();
    detector.write_int(ParamId::ImageMode, ImageMode::Single.code()).unwrap();
    detector.start().unwrap();

    wait_idle_after(&detector, &recorder, 1);
    assert_eq!(detector.read_int(ParamId::MinX).unwrap(), 0);
    assert_eq!(detector.read_int(ParamId::SizeX).unwrap(), 16);
    assert_eq!(detector.read_int(ParamId::BinY).unwrap(), 1);
    assert_eq!(recorder.frames()[0].dims[0].size, 16);
}

#[test]
fn test_image_mode_change_finishes_running_acquisition() {
    let detector = detector(16, 8);
    let recorder = recorder(&detector);
    detector.write_float(ParamId::AcquirePeriod, 0.01).unwrap();
    detector.start().unwrap();

    assert!(wait_until(|| recorder.count() >= 2));
    detector.write_int(ParamId::ImageMode, ImageMode::Single.code()).unwrap();

    assert!(wait_until(|| status(&detector) == DetectorStatus::Idle));
    assert_eq!(detector.read_int(ParamId::Acquire).unwrap(), 0);
}

#[test]
fn test_parameter_notifications_from_worker() {
    let detector = detector(16, 8);
    let recorder = recorder(&detector);
    let mut rx = detector.subscribe();
    detector.write_int(ParamId::ImageMode, ImageMode::Single.code()).unwrap();
    detector.start().unwrap();
    wait_idle_after(&detector, &recorder, 1);

    let mut updates: Vec<ParamUpdate> = Vec::new();
    while let Ok(update) = rx.try_recv() {
        updates.push(update);
    }
    let has = |id: ParamId, value: ParamValue| {
        updates.iter().any(|u| u.id == id && u.value == value)
    };
    assert!(has(ParamId::Status, ParamValue::Int(DetectorStatus::Acquire.code())));
    assert!(has(ParamId::ImageCounter, ParamValue::Int(1)));
    assert!(has(ParamId::ResetImage, ParamValue::Int(0)));
    assert!(has(ParamId::Acquire, ParamValue::Int(0)));
}

/// Stops acquisition from inside the frame callback.
struct StopAfter {
    detector: Weak<SimDetector>,
    frame: i32,
}

impl FrameObserver for StopAfter {
    fn on_frame(&self, frame: &Arc<NdArray>, _addr: usize) {
        if frame.unique_id == self.frame {
            if let Some(detector) = self.detector.upgrade() {
                detector.stop().unwrap();
            }
        }
    }
}

#[test]
fn test_observer_can_call_back_into_detector() {
    let detector = Arc::new(detector(16, 8));
    let recorder = recorder(&detector);
    detector.register_observer(Arc::new(StopAfter {
        detector: Arc::downgrade(&detector),
        frame: 3,
    }));
    detector.write_float(ParamId::AcquirePeriod, 0.0).unwrap();
    detector.start().unwrap();

    wait_idle_after(&detector, &recorder, 3);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(recorder.count(), 3);
}

#[test]
fn test_unregistered_observer_receives_nothing() {
    let detector = detector(16, 8);
    let recorder = Arc::new(Recorder::default());
    let handle = detector.register_observer(recorder.clone());
    assert!(detector.unregister_observer(handle));
    assert!(!detector.unregister_observer(handle));

    let counter = self::recorder(&detector);
    detector.write_int(ParamId::ImageMode, ImageMode::Single.code()).unwrap();
    detector.start().unwrap();
    wait_idle_after(&detector, &counter, 1);
    assert_eq!(recorder.count(), 0);
}

/// Keeps every published frame alive.
#[derive(Default)]
struct Hoarder {
    frames: Mutex<Vec<Arc<NdArray>>>,
}

impl FrameObserver for Hoarder {
    fn on_frame(&self, frame: &Arc<NdArray>, _addr: usize) {
        self.frames.lock().unwrap().push(Arc::clone(frame));
    }
}

#[test]
fn test_last_frame_is_weak() {
    let detector = detector(16, 8);
    let hoarder = Arc::new(Hoarder::default());
    let handle = detector.register_observer(hoarder.clone());
    let recorder = recorder(&detector);
    detector.write_int(ParamId::ImageMode, ImageMode::Single.code()).unwrap();
    detector.start().unwrap();
    wait_idle_after(&detector, &recorder, 1);

    assert_eq!(detector.last_frame().map(|f| f.unique_id), Some(1));
    detector.unregister_observer(handle);
    hoarder.frames.lock().unwrap().clear();
    assert!(detector.last_frame().is_none());
    assert_eq!(detector.pool().in_use(), 0);
}

#[test]
fn test_pool_exhaustion_skips_frames_without_advancing_counter() {
    init_tracing();
    let detector = SimDetector::new(SimDetectorConfig {
        max_size_x: 16,
        max_size_y: 8,
        max_buffers: 1,
        ..Default::default()
    })
    .unwrap();
    let hoarder = Arc::new(Hoarder::default());
    detector.register_observer(hoarder.clone());
    detector.write_float(ParamId::AcquirePeriod, 0.005).unwrap();
    detector.start().unwrap();

    assert!(wait_until(|| hoarder.frames.lock().unwrap().len() == 1));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(hoarder.frames.lock().unwrap().len(), 1);
    assert_eq!(detector.read_int(ParamId::ImageCounter).unwrap(), 1);
    assert_eq!(detector.read_int(ParamId::Acquire).unwrap(), 1);

    // Releasing the held frame lets acquisition resume.
    hoarder.frames.lock().unwrap().clear();
    assert!(wait_until(|| detector.read_int(ParamId::ImageCounter).unwrap() >= 2));

    detector.stop().unwrap();
    assert!(wait_until(|| status(&detector) == DetectorStatus::Idle));
}

#[test]
fn test_drop_during_exposure_joins_worker() {
    let detector = detector(16, 8);
    detector.write_float(ParamId::AcquireTime, 30.0).unwrap();
    detector.start().unwrap();
    assert!(wait_until(|| status(&detector) == DetectorStatus::Acquire));

    let started = Instant::now();
    drop(detector);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_writes_not_blocked_by_frame_computation() {
    init_tracing();
    let detector = SimDetector::new(SimDetectorConfig {
        max_size_x: 2048,
        max_size_y: 2048,
        data_type: DataType::Float64,
        ..Default::default()
    })
    .unwrap();
    // Binning takes the summing conversion path rather than a plain copy.
    detector.write_int(ParamId::BinX, 2).unwrap();
    detector.write_float(ParamId::AcquireTime, 0.0).unwrap();
    detector.write_float(ParamId::AcquirePeriod, 0.0).unwrap();
    detector.start().unwrap();

    let deadline = Instant::now() + Duration::from_secs(60);
    let mut worst = Duration::ZERO;
    let mut gain = 1.0;
    while detector.read_int(ParamId::ImageCounter).unwrap() < 3 {
        assert!(Instant::now() < deadline, "acquisition made no progress");
        let started = Instant::now();
        detector.write_float(ParamId::GainX, gain).unwrap();
        worst = worst.max(started.elapsed());
        gain += 1.0;
        std::thread::sleep(Duration::from_millis(2));
    }
    detector.stop().unwrap();

    assert!(
        worst < Duration::from_millis(20),
        "worst write latency while acquiring: {worst:?}"
    );
}

#[test]
fn test_wait_below_sleep_quantum_is_skipped() {
    init_tracing();
    let detector = SimDetector::new(SimDetectorConfig {
        max_size_x: 16,
        max_size_y: 8,
        sleep_quantum_s: 10.0,
        ..Default::default()
    })
    .unwrap();
    let recorder = recorder(&detector);
    detector.write_float(ParamId::AcquireTime, 3.0).unwrap();
    detector.write_int(ParamId::ImageMode, ImageMode::Single.code()).unwrap();

    let started = Instant::now();
    detector.start().unwrap();
    wait_idle_after(&detector, &recorder, 1);
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "exposure shorter than the quantum was waited out: {:?}",
        started.elapsed()
    );
}

#[test]
fn test_single_mode_completes_exactly_once() {
    let detector = detector(16, 8);
    let recorder = recorder(&detector);
    detector.write_int(ParamId::ImageMode, ImageMode::Single.code()).unwrap();
    let mut rx = detector.subscribe();
    detector.start().unwrap();

    wait_idle_after(&detector, &recorder, 1);
    std::thread::sleep(Duration::from_millis(50));

    let mut acquire_writes = Vec::new();
    let mut idle_transitions = 0;
    while let Ok(update) = rx.try_recv() {
        match (update.id, update.value) {
            (ParamId::Acquire, ParamValue::Int(v)) => acquire_writes.push(v),
            (ParamId::Status, ParamValue::Int(v)) if v == DetectorStatus::Idle.code() => {
                idle_transitions += 1;
            }
            _ => {}
        }
    }
    assert_eq!(acquire_writes, vec![1, 0]);
    assert_eq!(idle_transitions, 1);
    assert_eq!(recorder.count(), 1);
}

#[test]
fn test_sensor_reshape_mid_acquisition_rebuilds_image() {
    let detector = detector(4, 2);
    let recorder = recorder(&detector);
    detector.write_int(ParamId::DataType, DataType::UInt16.code()).unwrap();
    detector.write_float(ParamId::Gain, 2.0).unwrap();
    detector.write_float(ParamId::AcquireTime, 0.001).unwrap();
    detector.write_float(ParamId::AcquirePeriod, 0.01).unwrap();
    detector.start().unwrap();

    assert!(wait_until(|| recorder.count() >= 3));
    // Frames counted before the write were built on the old shape.
    let changed_at = detector.read_int(ParamId::ImageCounter).unwrap();
    // MaxSizeX does not raise ResetImage; the new raw shape alone must.
    detector.write_int(ParamId::MaxSizeX, 6).unwrap();

    assert!(wait_until(|| recorder
        .frames()
        .iter()
        .any(|f| f.unique_id > 1 && f.pixels[0] == 2.0)));
    detector.stop().unwrap();

    for frame in recorder.frames() {
        if frame.unique_id <= changed_at {
            assert_eq!(frame.pixels[0], 2.0 * f64::from(frame.unique_id));
        }
    }
}

#[test]
fn test_degenerate_sensor_extent_does_not_kill_worker() {
    let detector = detector(16, 8);
    let recorder = recorder(&detector);
    detector.write_int(ParamId::MaxSizeX, i32::MIN).unwrap();
    detector.write_float(ParamId::AcquirePeriod, 0.005).unwrap();
    detector.start().unwrap();

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(recorder.count(), 0);
    assert_eq!(detector.read_int(ParamId::Acquire).unwrap(), 1);

    detector.write_int(ParamId::MaxSizeX, 16).unwrap();
    detector.write_int(ParamId::MinX, 0).unwrap();
    detector.write_int(ParamId::SizeX, 16).unwrap();
    assert!(wait_until(|| recorder.count() >= 1));
    assert_eq!(recorder.frames()[0].dims[0].size, 16);
}
