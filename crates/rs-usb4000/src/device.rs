//! Device session.

use serde::Serialize;

use crate::calibration::CalibrationCoefficients;
use crate::error::Result;
use crate::frame::{capture_frame, IntensityFrame};
use crate::profile::DeviceProfile;
use crate::protocol::{
    self, decode_info_string, decode_status, decode_temperature, parse_bench_config,
    parse_coefficient, BenchConfig, Command, InfoSlot, Status,
};
use crate::transport::Transport;

/// Everything the info query reports about a device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub model: &'static str,
    pub serial_number: String,
    pub bench: BenchConfig,
    pub pixel_count: u16,
    pub firmware_config: String,
    pub high_speed: bool,
    pub pcb_temperature_c: f64,
    pub calibration: CalibrationCoefficients,
}

impl DeviceInfo {
    pub fn bus_speed(&self) -> &'static str {
        if self.high_speed {
            "480 Mbps"
        } else {
            "12 Mbps"
        }
    }
}

/// An open USB4000 session over some [`Transport`].
///
/// The session owns the transport, so all transfers for one device are
/// serialized through whoever holds it. Wavelength coefficients are read from
/// the device at most once and cached until the session is closed.
pub struct Usb4000<T: Transport> {
    transport: T,
    profile: DeviceProfile,
    calibration: Option<CalibrationCoefficients>,
}

impl<T: Transport> Usb4000<T> {
    pub fn new(transport: T, profile: DeviceProfile) -> Self {
        Self {
            transport,
            profile,
            calibration: None,
        }
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// Send a command and return its raw reply.
    pub fn query(&mut self, command: Command) -> Result<Vec<u8>> {
        protocol::query(&mut self.transport, &self.profile, command)
    }

    /// Reset the device to its power-on acquisition state.
    pub fn initialize(&mut self) -> Result<()> {
        protocol::send_command(&mut self.transport, &self.profile, Command::Initialize)
    }

    pub fn status(&mut self) -> Result<Status> {
        let reply = self.query(Command::QueryStatus)?;
        decode_status(&reply)
    }

    pub fn info_string(&mut self, slot: InfoSlot) -> Result<String> {
        let reply = self.query(Command::QueryInfo(slot))?;
        decode_info_string(&reply)
    }

    pub fn serial_number(&mut self) -> Result<String> {
        self.info_string(InfoSlot::SerialNumber)
    }

    pub fn bench_config(&mut self) -> Result<BenchConfig> {
        let text = self.info_string(InfoSlot::BenchConfig)?;
        parse_bench_config(&text)
    }

    pub fn firmware_config(&mut self) -> Result<String> {
        self.info_string(InfoSlot::FirmwareConfig)
    }

    /// PCB temperature in degrees Celsius.
    pub fn pcb_temperature(&mut self) -> Result<f64> {
        let reply = self.query(Command::PcbTemperature)?;
        decode_temperature(&reply)
    }

    /// Wavelength calibration, read from the device on first use.
    pub fn fetch_calibration(&mut self) -> Result<CalibrationCoefficients> {
        if let Some(calibration) = self.calibration {
            return Ok(calibration);
        }
        let mut c = [0.0; 4];
        for (order, slot) in c.iter_mut().enumerate() {
            let text = self.info_string(InfoSlot::WavelengthCoefficient(order as u8))?;
            *slot = parse_coefficient(&text)?;
        }
        let calibration = CalibrationCoefficients::from(c);
        tracing::debug!("Loaded wavelength calibration {:?}", calibration);
        self.calibration = Some(calibration);
        Ok(calibration)
    }

    /// Cached calibration, if it has been fetched.
    pub fn calibration(&self) -> Option<CalibrationCoefficients> {
        self.calibration
    }

    /// Capture one spectrum using the read plan for the given bus speed.
    pub fn capture_frame(&mut self, high_speed: bool) -> Result<IntensityFrame> {
        capture_frame(&mut self.transport, &self.profile, high_speed)
    }

    /// Gather the full device report.
    pub fn device_info(&mut self) -> Result<DeviceInfo> {
        let status = self.status()?;
        let calibration = self.fetch_calibration()?;
        Ok(DeviceInfo {
            model: self.profile.name,
            serial_number: self.serial_number()?,
            bench: self.bench_config()?,
            pixel_count: status.pixel_count,
            firmware_config: self.firmware_config()?,
            high_speed: status.high_speed,
            pcb_temperature_c: self.pcb_temperature()?,
            calibration,
        })
    }

    /// Close the session, handing the transport back.
    pub fn into_transport(self) -> T {
        self.transport
    }
}

#[cfg(feature = "usb")]
impl Usb4000<crate::transport::UsbTransport> {
    /// Open the first device matching `profile` over USB.
    pub fn open(profile: DeviceProfile) -> Result<Self> {
        let transport = crate::transport::UsbTransport::open(&profile)?;
        Ok(Self::new(transport, profile))
    }
}
