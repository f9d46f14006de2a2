//! Command-line front end for the USB4000 spectrometer
//!
//! # Usage Examples
//!
//! ## Device report
//! ```bash
//! usb4000 info
//! usb4000 info --json
//! ```
//!
//! ## Scanning
//! ```bash
//! usb4000 scan                                 # one frame
//! usb4000 scan --rate 5 --count 20 -v          # 20 frames at 5 Hz
//! usb4000 scan --output scan.csv               # save usable range
//! ```
//!
//! ## Calibration fit from (pixel, nm) pairs
//! ```bash
//! usb4000 fit lines.csv --degree 3
//! ```
//!
//! Add `--simulate` to any device command to run against the built-in
//! emulator instead of hardware.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};
use crossbeam::channel::{Receiver, RecvTimeoutError};
use serde::Serialize;
use tracing::{debug, info, warn};

use spectrascan::record::{export_csv, load_pairs};
use spectrascan::regression::fit;
use spectrascan::{
    wavelength_to_rgb, Acquisition, CalibrationCoefficients, DeviceProfile, Error, IntensityFrame,
    PolynomialFit, Result, ScanConfig, SimulatedDevice, Transport, Usb4000,
};

type BoxedTransport = Box<dyn Transport + Send>;

#[derive(Parser, Debug)]
#[command(author, version, about = "Ocean Optics USB4000 spectrometer tool", long_about = None)]
struct Args {
    /// Verbosity level (-v=info, -vv=debug, -vvv=trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Print results as JSON (one object per line)
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Use the simulated device instead of USB hardware
    #[arg(long, default_value_t = false, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serial number, bench configuration, bus speed, temperature and calibration
    Info,

    /// Capture spectra and report the strongest line
    Scan {
        /// Frames per second (0 for a single frame)
        #[arg(short, long, default_value_t = 0)]
        rate: u32,

        /// Number of frames to capture when repeating
        #[arg(short, long, default_value_t = 1)]
        count: usize,

        /// Write the usable range of the last frame as CSV
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Read the PCB temperature
    Temperature,

    /// Fit a calibration polynomial to (pixel, nm) pairs from a CSV file
    Fit {
        /// Two-column CSV file; lines starting with '#' are ignored
        file: PathBuf,

        /// Polynomial degree
        #[arg(short, long, default_value_t = 3)]
        degree: usize,
    },
}

#[derive(Debug, Serialize)]
struct PeakReport {
    frame: usize,
    pixel: usize,
    counts: u16,
    nanometers: f64,
    color: String,
}

#[derive(Debug, Serialize)]
struct TemperatureReport {
    pcb_temperature_c: f64,
}

#[derive(Debug, Serialize)]
struct FitReport<'a> {
    points: usize,
    fit: &'a PolynomialFit,
    calibration: Option<CalibrationCoefficients>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // 0 = WARN (quiet), 1 = INFO, 2 = DEBUG, 3+ = TRACE
    let log_level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    let _ = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .try_init();

    match &args.command {
        Command::Info => run_info(&args),
        Command::Scan {
            rate,
            count,
            output,
        } => run_scan(&args, *rate, *count, output.as_deref()),
        Command::Temperature => run_temperature(&args),
        Command::Fit { file, degree } => run_fit(&args, file, *degree),
    }
}

fn open_device(simulate: bool) -> Result<Usb4000<BoxedTransport>> {
    let profile = DeviceProfile::usb4000();
    let transport: BoxedTransport = if simulate {
        info!("Using simulated {}", profile.name);
        Box::new(SimulatedDevice::new(profile.clone()))
    } else {
        open_usb(&profile)?
    };
    Ok(Usb4000::new(transport, profile))
}

#[cfg(feature = "usb")]
fn open_usb(profile: &DeviceProfile) -> Result<BoxedTransport> {
    let transport = spectrascan::UsbTransport::open(profile)?;
    info!(
        "Opened {} ({:04x}:{:04x})",
        profile.name, profile.vendor_id, profile.product_id
    );
    Ok(Box::new(transport))
}

#[cfg(not(feature = "usb"))]
fn open_usb(_profile: &DeviceProfile) -> Result<BoxedTransport> {
    Err(Error::format("built without USB support, use --simulate"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let line = serde_json::to_string(value)
        .map_err(|e| Error::format(format!("JSON encoding failed: {}", e)))?;
    println!("{}", line);
    Ok(())
}

fn run_info(args: &Args) -> Result<()> {
    let mut acquisition = Acquisition::new(open_device(args.simulate)?);
    acquisition.start(ScanConfig::info_query());
    acquisition.wait()?;

    let info = acquisition
        .device_info()
        .ok_or_else(|| Error::format("info query produced no report"))?;

    if args.json {
        return print_json(&info);
    }

    println!("Model:        {}", info.model);
    println!("Serial Num:   {}", info.serial_number);
    println!("Grating:      {}", info.bench.grating);
    println!("Filter:       {}", info.bench.filter);
    println!("Slit size:    {} \u{00B5}m", info.bench.slit);
    println!("Pixel Count:  {}", info.pixel_count);
    println!();
    println!("Firmware cfg: {}", info.firmware_config);
    println!("USB Speed:    {}", info.bus_speed());
    println!("PCB Temp:     {:.2} \u{00B0}C", info.pcb_temperature_c);
    println!();
    for (order, c) in info.calibration.to_array().iter().enumerate() {
        println!("Cal Coeff {}:  {:e}", order, c);
    }
    Ok(())
}

fn run_scan(args: &Args, rate: u32, count: usize, output: Option<&Path>) -> Result<()> {
    let mut acquisition = Acquisition::new(open_device(args.simulate)?);
    let usable = acquisition
        .with_device(|device| device.profile().usable_pixels.clone())?;

    let count = if rate == 0 {
        if count > 1 {
            warn!("--count {} ignored without --rate", count);
        }
        1
    } else {
        count.max(1)
    };

    let frames = acquisition.subscribe(count);
    let config = if rate == 0 {
        ScanConfig::single_shot()
    } else {
        ScanConfig::repeating(rate)
    };
    acquisition.start(config);

    let mut received = 0;
    while received < count {
        let Some(frame) = recv_or_finished(&frames, &acquisition) else {
            break;
        };

        let calibration = acquisition.calibration().unwrap_or_default();
        if let Some((pixel, counts)) = frame.peak(usable.clone()) {
            let nanometers = calibration.to_wavelength(pixel);
            let report = PeakReport {
                frame: received,
                pixel,
                counts,
                nanometers,
                color: wavelength_to_rgb(nanometers).hex(),
            };
            if args.json {
                print_json(&report)?;
            } else {
                println!(
                    "frame {:>4}  peak {:>5} counts at pixel {:>4}  {:8.2} nm  {}",
                    report.frame, report.counts, report.pixel, report.nanometers, report.color
                );
            }
        }
        received += 1;
    }

    acquisition.stop();
    acquisition.wait()?;
    debug!("Received {} frame(s)", received);

    if let Some(path) = output {
        let frame = acquisition
            .latest_frame()
            .ok_or_else(|| Error::format("no frame captured"))?;
        export_csv(path, &frame, usable)?;
    }
    Ok(())
}

/// Next frame, or `None` once the run has ended and nothing is queued.
fn recv_or_finished(
    frames: &Receiver<Arc<IntensityFrame>>,
    acquisition: &Acquisition<BoxedTransport>,
) -> Option<Arc<IntensityFrame>> {
    loop {
        match frames.recv_timeout(Duration::from_millis(100)) {
            Ok(frame) => return Some(frame),
            Err(RecvTimeoutError::Timeout) => {
                if !acquisition.is_running() {
                    return frames.try_recv().ok();
                }
            }
            Err(RecvTimeoutError::Disconnected) => return None,
        }
    }
}

fn run_temperature(args: &Args) -> Result<()> {
    let mut device = open_device(args.simulate)?;
    device.initialize()?;
    let pcb_temperature_c = device.pcb_temperature()?;

    if args.json {
        print_json(&TemperatureReport { pcb_temperature_c })
    } else {
        println!("PCB Temp: {:.2} \u{00B0}C", pcb_temperature_c);
        Ok(())
    }
}

fn run_fit(args: &Args, file: &Path, degree: usize) -> Result<()> {
    let points = load_pairs(file)?;
    info!("Loaded {} points from {}", points.len(), file.display());

    let result = fit(&points, degree)?;
    if result.was_reduced() {
        warn!(
            "Degree lowered from {} to {}: not enough distinct pixel values",
            result.requested_degree(),
            result.degree()
        );
    }
    let calibration = result.to_calibration().ok();

    if args.json {
        return print_json(&FitReport {
            points: points.len(),
            fit: &result,
            calibration,
        });
    }

    println!("Points:  {}", points.len());
    println!("Degree:  {}", result.degree());
    println!("R\u{00B2}:      {:.9}", result.r_squared());
    for (order, c) in result.coefficients().iter().enumerate() {
        println!("Coeff {}: {:e}", order, c);
    }
    Ok(())
}
