//! Device profiles: USB identifiers, endpoint roles and read plans.
//!
//! Everything that differs between spectrometer variants is collected in a
//! [`DeviceProfile`] so sessions never consult process-wide constants.

use std::ops::Range;
use std::time::Duration;

/// Default timeout for USB bulk transfers.
pub const USB_TIMEOUT: Duration = Duration::from_millis(1000);

/// A USB endpoint address. Bit 7 encodes the direction (set = IN).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint(u8);

impl Endpoint {
    pub const fn new(address: u8) -> Self {
        Endpoint(address)
    }

    pub const fn address(self) -> u8 {
        self.0
    }

    pub const fn is_in(self) -> bool {
        self.0 & 0x80 != 0
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let dir = if self.is_in() { "IN" } else { "OUT" };
        write!(f, "{:#04x} ({})", self.0, dir)
    }
}

/// The part an endpoint plays in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointRole {
    /// Commands from host to device.
    CommandOut,
    /// Replies to commands.
    CommandIn,
    /// Spectral data (full-speed path, and the tail of a high-speed frame).
    DataPrimary,
    /// Spectral data (head of a high-speed frame).
    DataSecondary,
}

/// One run of identical bulk reads within a frame capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadStep {
    pub role: EndpointRole,
    pub reads: usize,
    pub block_size: usize,
}

impl ReadStep {
    pub const fn new(role: EndpointRole, reads: usize, block_size: usize) -> Self {
        Self {
            role,
            reads,
            block_size,
        }
    }

    pub const fn bytes(&self) -> usize {
        self.reads * self.block_size
    }
}

/// Immutable description of a spectrometer model.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceProfile {
    /// Human-readable model name
    pub name: &'static str,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Interface claimed on open
    pub interface: u8,
    pub command_out: Endpoint,
    pub command_in: Endpoint,
    pub data_primary: Endpoint,
    pub data_secondary: Endpoint,
    /// Buffer size for a single command reply
    pub response_length: usize,
    /// Per-transfer timeout handed to the transport
    pub timeout: Duration,
    /// Read sequence on a 480 Mbps bus. Order matters: it tracks firmware timing.
    pub high_speed_plan: Vec<ReadStep>,
    /// Read sequence on a 12 Mbps bus.
    pub full_speed_plan: Vec<ReadStep>,
    /// Sensor pixels carrying optical signal; the rest are dark/shielded.
    pub usable_pixels: Range<usize>,
}

impl DeviceProfile {
    /// Ocean Optics USB4000.
    ///
    /// ```text
    /// interface 0
    ///   0x01 OUT  pkt 512   commands
    ///   0x81 IN   pkt 512   command responses
    ///   0x82 IN   pkt 512   spectral data
    ///   0x86 IN   pkt 512   spectral data (first 2 KiB at high speed)
    /// ```
    pub fn usb4000() -> Self {
        Self {
            name: "USB4000",
            vendor_id: 0x2457,
            product_id: 0x1022,
            interface: 0,
            command_out: Endpoint::new(0x01),
            command_in: Endpoint::new(0x81),
            data_primary: Endpoint::new(0x82),
            data_secondary: Endpoint::new(0x86),
            response_length: 512,
            timeout: USB_TIMEOUT,
            high_speed_plan: vec![
                ReadStep::new(EndpointRole::DataSecondary, 4, 512),
                ReadStep::new(EndpointRole::DataPrimary, 12, 512),
            ],
            full_speed_plan: vec![ReadStep::new(EndpointRole::DataPrimary, 121, 64)],
            usable_pixels: 22..3670,
        }
    }

    /// Resolve a role to the endpoint bound to it.
    pub fn endpoint(&self, role: EndpointRole) -> Endpoint {
        match role {
            EndpointRole::CommandOut => self.command_out,
            EndpointRole::CommandIn => self.command_in,
            EndpointRole::DataPrimary => self.data_primary,
            EndpointRole::DataSecondary => self.data_secondary,
        }
    }

    /// Read plan for the given bus speed.
    pub fn read_plan(&self, high_speed: bool) -> &[ReadStep] {
        if high_speed {
            &self.high_speed_plan
        } else {
            &self.full_speed_plan
        }
    }

    /// Total bytes in one frame for the given bus speed.
    pub fn frame_bytes(&self, high_speed: bool) -> usize {
        self.read_plan(high_speed).iter().map(ReadStep::bytes).sum()
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::usb4000()
    }
}
