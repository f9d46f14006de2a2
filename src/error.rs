//! Error handling for the spectrascan library
//!
//! This module provides a unified error type for acquisition, calibration
//! fitting and scan export.

use std::io;

use thiserror::Error;

/// A specialized Result type for spectrascan operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for spectrascan operations
#[derive(Debug, Error)]
pub enum Error {
    /// Transport or protocol failure reported by the device driver
    #[error("Device error: {0}")]
    Device(#[from] rs_usb4000::Error),

    /// Not enough samples for the requested polynomial degree
    #[error("Dimensionality error: degree {degree} needs at least {} points, got {points}", .degree + 1)]
    Dimensionality { points: usize, degree: usize },

    /// Degree reduction reached zero without a full-rank system
    #[error("Rank deficiency: no full-rank fit found at or below degree {requested}")]
    RankDeficiencyExhausted { requested: usize },

    /// The device is owned by a running acquisition
    #[error("Acquisition already running")]
    Busy,

    /// The acquisition worker thread panicked before finishing its run
    #[error("Acquisition worker panicked")]
    WorkerPanicked,

    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// CSV reader/writer error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Malformed input data
    #[error("Format error: {0}")]
    Format(String),
}

impl Error {
    /// Create a format error with a custom message
    pub fn format<S: Into<String>>(msg: S) -> Self {
        Error::Format(msg.into())
    }

    /// Whether the failure came from the USB transport or the wire protocol.
    pub fn device_kind(&self) -> Option<rs_usb4000::ErrorKind> {
        match self {
            Error::Device(e) => Some(e.kind()),
            _ => None,
        }
    }
}
