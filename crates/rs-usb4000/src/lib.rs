//! Pure-Rust driver for the Ocean Optics USB4000 spectrometer.
//!
//! # Overview
//!
//! `rs-usb4000` speaks the USB4000 command set over bulk endpoints and
//! reassembles the multi-packet spectrum transfers into a pixel array. The USB
//! layer is abstracted behind [`Transport`]; the `usb` feature (on by default)
//! provides a `rusb` implementation, and [`SimulatedDevice`] provides an
//! in-memory one for tests and offline use.
//!
//! # Frame layout
//!
//! A spectrum is 16-bit little-endian per pixel. At 480 Mbps it arrives as
//! 4 × 512 bytes on endpoint 0x86 followed by 12 × 512 bytes on 0x82 (4096
//! pixels); at 12 Mbps as 121 × 64 bytes on 0x82 (3872 pixels).
//!
//! # Example
//!
//! ```no_run
//! use rs_usb4000::{DeviceProfile, Usb4000};
//!
//! let mut device = Usb4000::open(DeviceProfile::usb4000())?;
//! device.initialize()?;
//! let status = device.status()?;
//! let calibration = device.fetch_calibration()?;
//! let frame = device.capture_frame(status.high_speed)?;
//! let (pixel, value) = frame.peak(22..3670).unwrap_or_default();
//! println!("peak {} at {:.1} nm", value, calibration.to_wavelength(pixel));
//! # Ok::<(), rs_usb4000::Error>(())
//! ```

pub mod calibration;
pub mod device;
pub mod error;
pub mod frame;
pub mod profile;
pub mod protocol;
pub mod sim;
pub mod transport;

pub use calibration::{to_wavelength, CalibrationCoefficients, WavelengthTick};
pub use device::{DeviceInfo, Usb4000};
pub use error::{Error, ErrorKind, Result};
pub use frame::{capture_frame, FrameAssembler, IntensityFrame};
pub use profile::{DeviceProfile, Endpoint, EndpointRole, ReadStep};
pub use protocol::{BenchConfig, Command, InfoSlot, Status};
pub use sim::SimulatedDevice;
pub use transport::Transport;
#[cfg(feature = "usb")]
pub use transport::UsbTransport;
