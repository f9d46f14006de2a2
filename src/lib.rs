#![doc = include_str!("../readme.md")]

pub mod acquisition;
pub mod color;
pub mod error;
pub mod record;
pub mod regression;

pub use acquisition::{Acquisition, RunMode, RunState, RunStateObserver, ScanConfig};
pub use color::{wavelength_to_rgb, Rgb};
pub use error::{Error, Result};
pub use regression::{fit, PolynomialFit};

pub use rs_usb4000::{
    to_wavelength, CalibrationCoefficients, DeviceInfo, DeviceProfile, IntensityFrame,
    SimulatedDevice, Transport, Usb4000,
};
#[cfg(feature = "usb")]
pub use rs_usb4000::UsbTransport;
