//! Command encoding and reply decoding.
//!
//! Every exchange is one bulk OUT on the command endpoint followed, for
//! queries, by exactly one bulk IN on the command-response endpoint. Nothing
//! here retries: a short or malformed reply is returned as
//! [`Error::InvalidResponse`].

use crate::error::{Error, Result};
use crate::profile::DeviceProfile;
use crate::transport::Transport;

// USB4000 command codes
const CMD_INITIALIZE: u8 = 0x01;
const CMD_QUERY_INFO: u8 = 0x05;
const CMD_REQUEST_SPECTRA: u8 = 0x09;
const CMD_PCB_TEMPERATURE: u8 = 0x6C;
const CMD_QUERY_STATUS: u8 = 0xFE;

/// Minimum length of a status reply (speed flag lives in byte 14).
pub const STATUS_MIN_LENGTH: usize = 15;
/// Byte 14 of the status block when the device enumerated at 480 Mbps.
pub const HIGH_SPEED_FLAG: u8 = 0x80;
/// Degrees Celsius per ADC count of the PCB temperature sensor.
pub const TEMPERATURE_SCALE: f64 = 0.003906;
/// Bytes preceding the text of an info-string reply.
const INFO_HEADER_LENGTH: usize = 2;

/// Numbered EEPROM slots readable with the info command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoSlot {
    SerialNumber,
    /// Wavelength calibration coefficient of the given order (0..=3).
    WavelengthCoefficient(u8),
    /// "grating filter slit" triple.
    BenchConfig,
    FirmwareConfig,
    /// Any other slot, by raw index.
    Raw(u8),
}

impl InfoSlot {
    pub fn index(self) -> u8 {
        match self {
            InfoSlot::SerialNumber => 0,
            InfoSlot::WavelengthCoefficient(order) => 1 + order,
            InfoSlot::BenchConfig => 15,
            InfoSlot::FirmwareConfig => 16,
            InfoSlot::Raw(index) => index,
        }
    }
}

/// A request understood by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Initialize,
    QueryStatus,
    QueryInfo(InfoSlot),
    PcbTemperature,
    /// Begin a high-speed capture; data follows on the bulk endpoints.
    RequestSpectra,
}

impl Command {
    /// Encode the command into its wire form.
    pub fn encode(self) -> CommandFrame {
        match self {
            Command::Initialize => CommandFrame::single(CMD_INITIALIZE),
            Command::QueryStatus => CommandFrame::single(CMD_QUERY_STATUS),
            Command::QueryInfo(slot) => CommandFrame::pair(CMD_QUERY_INFO, slot.index()),
            Command::PcbTemperature => CommandFrame::single(CMD_PCB_TEMPERATURE),
            Command::RequestSpectra => CommandFrame::single(CMD_REQUEST_SPECTRA),
        }
    }
}

/// One- or two-byte encoded command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    bytes: [u8; 2],
    len: usize,
}

impl CommandFrame {
    fn single(opcode: u8) -> Self {
        Self {
            bytes: [opcode, 0],
            len: 1,
        }
    }

    fn pair(opcode: u8, arg: u8) -> Self {
        Self {
            bytes: [opcode, arg],
            len: 2,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

/// Parsed status block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub pixel_count: u16,
    /// Device enumerated at 480 Mbps.
    pub high_speed: bool,
}

/// Bench configuration decoded from info slot 15.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BenchConfig {
    pub grating: String,
    pub filter: String,
    /// Slit width in micrometres, as reported.
    pub slit: String,
}

/// Send a command that has no reply.
pub fn send_command<T: Transport>(
    transport: &mut T,
    profile: &DeviceProfile,
    command: Command,
) -> Result<()> {
    tracing::trace!("send {:?}", command);
    transport.send(profile.command_out, command.encode().as_bytes())
}

/// Send a command and read its reply.
///
/// Performs exactly one write and one read; the raw reply is returned
/// undecoded.
pub fn query<T: Transport>(
    transport: &mut T,
    profile: &DeviceProfile,
    command: Command,
) -> Result<Vec<u8>> {
    send_command(transport, profile, command)?;
    let reply = transport.receive(profile.command_in, profile.response_length)?;
    tracing::trace!("{:?} reply: {:02X?}", command, reply);
    Ok(reply)
}

/// Decode a status block.
pub fn decode_status(reply: &[u8]) -> Result<Status> {
    if reply.len() < STATUS_MIN_LENGTH {
        return Err(Error::invalid(format!(
            "Status response incomplete: got {} bytes, expected at least {}",
            reply.len(),
            STATUS_MIN_LENGTH
        )));
    }
    Ok(Status {
        pixel_count: u16::from_le_bytes([reply[0], reply[1]]),
        high_speed: reply[14] == HIGH_SPEED_FLAG,
    })
}

/// Decode a NUL-terminated info string following the 2-byte header.
///
/// A missing terminator is not an error; the text then runs to the end of the
/// buffer.
pub fn decode_info_string(reply: &[u8]) -> Result<String> {
    let body = reply.get(INFO_HEADER_LENGTH..).ok_or_else(|| {
        Error::invalid(format!(
            "Info response too short: got {} bytes, expected at least {}",
            reply.len(),
            INFO_HEADER_LENGTH
        ))
    })?;
    Ok(body
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect())
}

/// Decode the PCB temperature reply into degrees Celsius.
pub fn decode_temperature(reply: &[u8]) -> Result<f64> {
    if reply.len() < 3 {
        return Err(Error::invalid(format!(
            "Temperature response incomplete: got {} bytes, expected 3",
            reply.len()
        )));
    }
    let raw = u16::from_le_bytes([reply[1], reply[2]]);
    Ok(raw as f64 * TEMPERATURE_SCALE)
}

/// Parse a wavelength coefficient stored as decimal text.
pub fn parse_coefficient(text: &str) -> Result<f64> {
    text.trim().parse::<f64>().map_err(|_| {
        Error::invalid(format!(
            "Calibration coefficient is not a number: {:?}",
            text
        ))
    })
}

/// Split the bench configuration string into its three fields.
pub fn parse_bench_config(text: &str) -> Result<BenchConfig> {
    let mut parts = text.split_whitespace();
    let mut next = |field: &str| {
        parts
            .next()
            .map(str::to_string)
            .ok_or_else(|| Error::invalid(format!("Bench config {:?} has no {}", text, field)))
    };
    Ok(BenchConfig {
        grating: next("grating")?,
        filter: next("filter")?,
        slit: next("slit size")?,
    })
}
