//! CLI Entry Point for sim-daq
//!
//! Drives a simulated area detector from the command line:
//! - `run`: acquire frames and print per-frame statistics
//! - `report`: print the detector report for a configuration
//! - `params`: list the parameter names accepted by `--set`
//!
//! # Usage
//!
//! ```bash
//! sim-daq run --mode multiple --frames 5 --set SIM_GAINX=2 --set BIN_X=4
//! SIM_DAQ_MAX_SIZE_X=256 sim-daq --log-format json run --mode continuous --duration 2
//! ```

mod logging;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use daq_core::capabilities::FrameObserver;
use daq_core::detector::ImageMode;
use daq_core::params::{ParamId, ParamKind, ParamUpdate, ParamValue};
use daq_driver_sim::{SimDetector, SimDetectorConfig};
use daq_pool::{DataType, NdArray};
use logging::OutputFormat;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "sim-daq")]
#[command(about = "Simulated area detector acquisition runner", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Compact, global = true)]
    log_format: OutputFormat,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one acquisition and print a line per frame
    Run {
        /// Detector config file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Image mode
        #[arg(long, value_enum, default_value_t = Mode::Multiple)]
        mode: Mode,

        /// Frames to acquire in multiple mode
        #[arg(long, default_value_t = 10)]
        frames: i32,

        /// Exposure time in seconds
        #[arg(long)]
        exposure: Option<f64>,

        /// Frame period in seconds
        #[arg(long)]
        period: Option<f64>,

        /// Output element type (Int8, UInt8, ... Float64)
        #[arg(long)]
        data_type: Option<DataType>,

        /// How long to run in continuous mode, in seconds
        #[arg(long, default_value_t = 1.0)]
        duration: f64,

        /// Extra parameter writes, NAME=VALUE (see `sim-daq params`)
        #[arg(long = "set", value_name = "NAME=VALUE")]
        sets: Vec<String>,
    },

    /// Print the detector report
    Report {
        /// Detector config file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// List parameter names and their value kinds
    Params,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Single,
    Multiple,
    Continuous,
}

impl From<Mode> for ImageMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Single => ImageMode::Single,
            Mode::Multiple => ImageMode::Multiple,
            Mode::Continuous => ImageMode::Continuous,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format, &cli.log_level)?;

    match cli.command {
        Commands::Run {
            config,
            mode,
            frames,
            exposure,
            period,
            data_type,
            duration,
            sets,
        } => {
            let detector = open_detector(config)?;
            let settings = RunSettings {
                mode: mode.into(),
                frames,
                exposure,
                period,
                data_type,
                duration,
                sets,
            };
            let result = run_acquisition(&detector, settings).await;
            println!("{}", detector.report(1));
            detector.shutdown();
            result
        }
        Commands::Report { config } => {
            let detector = open_detector(config)?;
            print!("{}", detector.report(1));
            Ok(())
        }
        Commands::Params => {
            for id in ParamId::ALL {
                println!("{:<16} {}", id.name(), id.kind());
            }
            Ok(())
        }
    }
}

fn open_detector(config: Option<PathBuf>) -> Result<SimDetector> {
    let config = SimDetectorConfig::load(config.as_deref())
        .context("Failed to load detector configuration")?;
    info!(
        port = %config.port_name,
        max_size_x = config.max_size_x,
        max_size_y = config.max_size_y,
        data_type = %config.data_type,
        "Configuration loaded"
    );
    SimDetector::new(config).context("Failed to create simulated detector")
}

struct RunSettings {
    mode: ImageMode,
    frames: i32,
    exposure: Option<f64>,
    period: Option<f64>,
    data_type: Option<DataType>,
    duration: f64,
    sets: Vec<String>,
}

async fn run_acquisition(detector: &SimDetector, settings: RunSettings) -> Result<()> {
    detector.write_int(ParamId::ImageMode, settings.mode.code())?;
    detector.write_int(ParamId::NumImages, settings.frames)?;
    if let Some(exposure) = settings.exposure {
        detector.write_float(ParamId::AcquireTime, exposure)?;
    }
    if let Some(period) = settings.period {
        detector.write_float(ParamId::AcquirePeriod, period)?;
    }
    if let Some(data_type) = settings.data_type {
        detector.write_int(ParamId::DataType, data_type.code())?;
    }
    for assignment in &settings.sets {
        let (name, value) = parse_assignment(assignment)?;
        detector
            .write_by_name(name, value)
            .with_context(|| format!("Failed to write {assignment}"))?;
    }

    let (frame_tx, mut frames) = mpsc::unbounded_channel();
    let handle = detector.register_observer(Arc::new(FrameStats { tx: frame_tx }));
    let mut updates = detector.subscribe();

    info!(mode = %settings.mode, "Starting acquisition");
    detector.start()?;

    let deadline = tokio::time::sleep(run_limit(&settings));
    tokio::pin!(deadline);
    let mut received = 0u64;
    loop {
        tokio::select! {
            Some(summary) = frames.recv() => {
                received += 1;
                println!("{summary}");
            }
            update = updates.recv() => match update {
                Ok(ParamUpdate { id: ParamId::Acquire, value: ParamValue::Int(0) }) => break,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Parameter updates dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            () = &mut deadline => {
                if settings.mode != ImageMode::Continuous {
                    warn!("Acquisition did not finish in time, stopping");
                }
                detector.stop()?;
                break;
            }
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                info!("Interrupted, stopping acquisition");
                detector.stop()?;
                break;
            }
        }
    }

    detector.unregister_observer(handle);
    while let Ok(summary) = frames.try_recv() {
        received += 1;
        println!("{summary}");
    }
    info!(frames = received, "Acquisition finished");
    Ok(())
}

/// Wall-clock limit for the run. Bounded modes get generous headroom over
/// their nominal duration.
fn run_limit(settings: &RunSettings) -> Duration {
    if settings.mode == ImageMode::Continuous {
        return Duration::try_from_secs_f64(settings.duration.max(0.0)).unwrap_or(Duration::MAX);
    }
    let frames = match settings.mode {
        ImageMode::Single => 1.0,
        _ => f64::from(settings.frames.max(1)),
    };
    let per_frame = settings
        .exposure
        .unwrap_or(0.0)
        .max(settings.period.unwrap_or(0.0))
        .max(0.005);
    Duration::try_from_secs_f64(frames * per_frame * 4.0 + 5.0).unwrap_or(Duration::MAX)
}

/// Parse `NAME=VALUE` using the value kind of the named parameter.
fn parse_assignment(assignment: &str) -> Result<(&str, ParamValue)> {
    let Some((name, raw)) = assignment.split_once('=') else {
        bail!("Expected NAME=VALUE, got '{assignment}'");
    };
    let name = name.trim();
    let raw = raw.trim();
    let id: ParamId = name.parse()?;
    let value = match id.kind() {
        ParamKind::Int => ParamValue::Int(
            raw.parse()
                .with_context(|| format!("{name} expects an integer, got '{raw}'"))?,
        ),
        ParamKind::Float => ParamValue::Float(
            raw.parse()
                .with_context(|| format!("{name} expects a number, got '{raw}'"))?,
        ),
        ParamKind::Str => ParamValue::Str(raw.to_string()),
    };
    Ok((name, value))
}

/// One printed line per frame.
struct FrameSummary {
    unique_id: i32,
    width: usize,
    height: usize,
    data_type: DataType,
    min: f64,
    max: f64,
    mean: f64,
}

impl std::fmt::Display for FrameSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "frame {:>6}  {}x{} {:<7}  min {:>12.3}  max {:>12.3}  mean {:>12.3}",
            self.unique_id, self.width, self.height, self.data_type, self.min, self.max, self.mean
        )
    }
}

/// Observer that summarises each frame and hands it to the async side.
struct FrameStats {
    tx: mpsc::UnboundedSender<FrameSummary>,
}

impl FrameStats {
    fn summarize(frame: &NdArray) -> FrameSummary {
        let width = frame.dims.first().map_or(0, |d| d.size);
        let height = frame.dims.get(1).map_or(1, |d| d.size);
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut count = 0usize;
        for y in 0..height {
            for x in 0..width {
                if let Some(v) = frame.get_f64(x, y) {
                    min = min.min(v);
                    max = max.max(v);
                    sum += v;
                    count += 1;
                }
            }
        }
        let mean = if count == 0 { 0.0 } else { sum / count as f64 };
        if count == 0 {
            min = 0.0;
            max = 0.0;
        }
        FrameSummary {
            unique_id: frame.unique_id,
            width,
            height,
            data_type: frame.data_type,
            min,
            max,
            mean,
        }
    }
}

impl FrameObserver for FrameStats {
    fn on_frame(&self, frame: &Arc<NdArray>, _addr: usize) {
        // The receiver is gone once the run loop has returned.
        let _ = self.tx.send(Self::summarize(frame));
    }

    fn name(&self) -> &'static str {
        "frame_stats"
    }
}
