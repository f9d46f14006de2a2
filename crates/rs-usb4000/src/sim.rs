//! In-memory USB4000 emulator.
//!
//! [`SimulatedDevice`] implements [`Transport`] by answering the command set
//! the way the firmware does and streaming a synthetic spectrum on the data
//! endpoints. Every transfer is appended to a shared [`TransferLog`], so tests
//! can assert on exact endpoint order even after the transport has been moved
//! into a worker thread.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::profile::{DeviceProfile, Endpoint};
use crate::transport::Transport;

/// Length of an info-string reply (header + 15 characters incl. NUL).
const INFO_REPLY_LENGTH: usize = 17;
const STATUS_REPLY_LENGTH: usize = 16;

/// A single bulk transfer as seen by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    Send { endpoint: u8, data: Vec<u8> },
    Receive { endpoint: u8, length: usize },
}

/// Shared, clonable record of transfers.
#[derive(Debug, Clone, Default)]
pub struct TransferLog(Arc<Mutex<Vec<Transfer>>>);

impl TransferLog {
    fn lock(&self) -> MutexGuard<'_, Vec<Transfer>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, transfer: Transfer) {
        self.lock().push(transfer);
    }

    pub fn snapshot(&self) -> Vec<Transfer> {
        self.lock().clone()
    }

    /// Commands sent, in order.
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.lock()
            .iter()
            .filter_map(|t| match t {
                Transfer::Send { data, .. } => Some(data.clone()),
                Transfer::Receive { .. } => None,
            })
            .collect()
    }

    /// Endpoint addresses of data reads, in order.
    pub fn data_reads(&self, command_in: u8) -> Vec<u8> {
        self.lock()
            .iter()
            .filter_map(|t| match t {
                Transfer::Receive { endpoint, .. } if *endpoint != command_in => Some(*endpoint),
                _ => None,
            })
            .collect()
    }

    pub fn count_commands(&self, opcode: u8) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.first() == Some(&opcode))
            .count()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// Emulated spectrometer.
pub struct SimulatedDevice {
    profile: DeviceProfile,
    high_speed: bool,
    serial_number: String,
    coefficients: [String; 4],
    bench_config: String,
    firmware_config: String,
    temperature_raw: u16,
    spectrum: Vec<u16>,
    pending: VecDeque<Vec<u8>>,
    cursor: usize,
    receives: usize,
    fail_at_receive: Option<(usize, fn() -> Error)>,
    log: TransferLog,
}

impl SimulatedDevice {
    /// A high-speed USB4000 with factory-like EEPROM contents and a synthetic
    /// emission line near pixel 1022.
    pub fn new(profile: DeviceProfile) -> Self {
        let pixels = profile.frame_bytes(true) / 2;
        Self {
            profile,
            high_speed: true,
            serial_number: "USB4C00000".to_string(),
            coefficients: [
                "190.377221".to_string(),
                "0.3631595".to_string(),
                "-1.246345E-5".to_string(),
                "-2.247515E-9".to_string(),
            ],
            bench_config: "H2 OFLV 25".to_string(),
            firmware_config: "USB4000 1.01.11".to_string(),
            temperature_raw: 0x1800,
            spectrum: synthetic_spectrum(pixels),
            pending: VecDeque::new(),
            cursor: 0,
            receives: 0,
            fail_at_receive: None,
            log: TransferLog::default(),
        }
    }

    /// Enumerate at 12 Mbps instead of 480 Mbps.
    pub fn full_speed(mut self) -> Self {
        self.high_speed = false;
        self
    }

    pub fn with_serial_number(mut self, serial: &str) -> Self {
        self.serial_number = serial.to_string();
        self
    }

    /// EEPROM text for the four wavelength coefficients.
    pub fn with_coefficients(mut self, coefficients: [&str; 4]) -> Self {
        self.coefficients = coefficients.map(str::to_string);
        self
    }

    pub fn with_bench_config(mut self, bench: &str) -> Self {
        self.bench_config = bench.to_string();
        self
    }

    pub fn with_temperature_raw(mut self, raw: u16) -> Self {
        self.temperature_raw = raw;
        self
    }

    /// Pixel values streamed for every frame; repeated or truncated to fit.
    pub fn with_spectrum(mut self, spectrum: Vec<u16>) -> Self {
        self.spectrum = spectrum;
        self
    }

    /// Make the `n`-th receive (zero-based, counting all endpoints) fail.
    pub fn fail_at_receive(mut self, n: usize, error: fn() -> Error) -> Self {
        self.fail_at_receive = Some((n, error));
        self
    }

    pub fn log(&self) -> TransferLog {
        self.log.clone()
    }

    fn pixel_count(&self) -> u16 {
        (self.profile.frame_bytes(self.high_speed) / 2) as u16
    }

    fn status_block(&self) -> Vec<u8> {
        let mut block = vec![0u8; STATUS_REPLY_LENGTH];
        block[..2].copy_from_slice(&self.pixel_count().to_le_bytes());
        block[14] = if self.high_speed { 0x80 } else { 0x00 };
        block
    }

    fn info_reply(&self, index: u8) -> Vec<u8> {
        let text = match index {
            0 => self.serial_number.as_str(),
            1..=4 => self.coefficients[(index - 1) as usize].as_str(),
            15 => self.bench_config.as_str(),
            16 => self.firmware_config.as_str(),
            _ => "",
        };
        let mut reply = vec![0u8; INFO_REPLY_LENGTH];
        reply[0] = 0x05;
        reply[1] = index;
        // 14 characters max, then NUL
        for (slot, b) in reply[2..INFO_REPLY_LENGTH - 1]
            .iter_mut()
            .zip(text.bytes())
        {
            *slot = b;
        }
        reply
    }

    fn handle_command(&mut self, data: &[u8]) -> Result<()> {
        match data {
            [0x01] => {
                self.pending.clear();
                self.cursor = 0;
            }
            [0xFE] => self.pending.push_back(self.status_block()),
            [0x05, index] => self.pending.push_back(self.info_reply(*index)),
            [0x6C] => {
                let raw = self.temperature_raw.to_le_bytes();
                self.pending.push_back(vec![0x08, raw[0], raw[1]]);
            }
            [0x09] => self.cursor = 0,
            other => {
                return Err(Error::invalid(format!(
                    "Simulated device does not understand {:02X?}",
                    other
                )))
            }
        }
        Ok(())
    }

    fn data_block(&mut self, length: usize) -> Vec<u8> {
        let frame_bytes = self.profile.frame_bytes(self.high_speed);
        let mut block = Vec::with_capacity(length);
        for _ in 0..length {
            let pixel = (self.cursor / 2) % self.spectrum.len().max(1);
            let value = self.spectrum.get(pixel).copied().unwrap_or(0);
            let bytes = value.to_le_bytes();
            block.push(bytes[self.cursor % 2]);
            self.cursor = (self.cursor + 1) % frame_bytes.max(1);
        }
        block
    }
}

impl Transport for SimulatedDevice {
    fn send(&mut self, endpoint: Endpoint, data: &[u8]) -> Result<()> {
        self.log.push(Transfer::Send {
            endpoint: endpoint.address(),
            data: data.to_vec(),
        });
        if endpoint != self.profile.command_out {
            return Err(Error::invalid(format!("Write to non-command endpoint {}", endpoint)));
        }
        self.handle_command(data)
    }

    fn receive(&mut self, endpoint: Endpoint, length: usize) -> Result<Vec<u8>> {
        self.log.push(Transfer::Receive {
            endpoint: endpoint.address(),
            length,
        });
        let index = self.receives;
        self.receives += 1;
        if let Some((n, error)) = self.fail_at_receive {
            if n == index {
                return Err(error());
            }
        }

        if endpoint == self.profile.command_in {
            let mut reply = self.pending.pop_front().ok_or(Error::Timeout)?;
            reply.truncate(length);
            Ok(reply)
        } else if endpoint == self.profile.data_primary || endpoint == self.profile.data_secondary {
            Ok(self.data_block(length))
        } else {
            Err(Error::invalid(format!("Read from unknown endpoint {}", endpoint)))
        }
    }
}

/// Flat baseline with a Gaussian line centred on pixel 1022.
fn synthetic_spectrum(pixels: usize) -> Vec<u16> {
    (0..pixels)
        .map(|p| {
            let d = (p as f64 - 1022.0) / 6.0;
            (1500.0 + 40000.0 * (-0.5 * d * d).exp()) as u16
        })
        .collect()
}
