//! Error types for rs-usb4000 operations.

use thiserror::Error;

/// Result type for rs-usb4000 operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of a failure.
///
/// Both kinds are fatal to the scan iteration that raised them; the split only
/// tells the caller whether the bus or the payload was at fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Disconnect, timeout, short read or write.
    Transport,
    /// The device answered, but the reply could not be decoded.
    ProtocolDecode,
}

impl ErrorKind {
    /// Get a human-readable name for the error kind.
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Transport => "TransportError",
            ErrorKind::ProtocolDecode => "ProtocolDecodeError",
        }
    }
}

/// Errors that can occur during USB4000 operations.
#[derive(Debug, Error)]
pub enum Error {
    /// USB operation failed.
    #[cfg(feature = "usb")]
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// No device matching the profile's vendor/product IDs.
    #[error("No USB4000 device found (VID {vendor_id:#06x}, PID {product_id:#06x})")]
    DeviceNotFound { vendor_id: u16, product_id: u16 },

    /// Device went away mid-transfer.
    #[error("Device disconnected")]
    Disconnected,

    /// Timeout waiting for device response.
    #[error("Device timeout")]
    Timeout,

    /// A bulk read returned fewer bytes than the read plan requires.
    #[error("Short read on endpoint {endpoint:#04x}: expected {expected} bytes, got {actual}")]
    ShortRead {
        endpoint: u8,
        expected: usize,
        actual: usize,
    },

    /// A bulk write did not transfer the whole command.
    #[error("Short write on endpoint {endpoint:#04x}: sent {actual} of {expected} bytes")]
    ShortWrite {
        endpoint: u8,
        expected: usize,
        actual: usize,
    },

    /// Invalid response from device.
    #[error("Invalid device response: {0}")]
    InvalidResponse(String),

    /// Reassembled spectrum cannot be split into 16-bit pixels.
    #[error("Spectrum buffer has odd length ({0} bytes)")]
    OddLength(usize),
}

impl Error {
    /// Classify the error according to the transport/decode taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            #[cfg(feature = "usb")]
            Error::Usb(_) => ErrorKind::Transport,
            Error::DeviceNotFound { .. }
            | Error::Disconnected
            | Error::Timeout
            | Error::ShortRead { .. }
            | Error::ShortWrite { .. } => ErrorKind::Transport,
            Error::InvalidResponse(_) | Error::OddLength(_) => ErrorKind::ProtocolDecode,
        }
    }

    pub(crate) fn invalid<S: Into<String>>(msg: S) -> Self {
        Error::InvalidResponse(msg.into())
    }
}
