//! Frame reassembly.
//!
//! A full spectrum does not fit in one bulk transfer, so the device streams it
//! as a fixed sequence of blocks (see [`DeviceProfile::read_plan`]). This module
//! issues those reads in order, concatenates the blocks and decodes the result
//! into 16-bit pixels. It does not interpret the pixel values.

use std::ops::{Deref, Range};

use crate::error::{Error, Result};
use crate::profile::{DeviceProfile, ReadStep};
use crate::protocol::{send_command, Command};
use crate::transport::Transport;

/// One decoded spectrum, in sensor pixel order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IntensityFrame {
    pixels: Vec<u16>,
}

impl IntensityFrame {
    pub fn new(pixels: Vec<u16>) -> Self {
        Self { pixels }
    }

    pub fn pixels(&self) -> &[u16] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u16> {
        self.pixels
    }

    /// Pixels within `range`, clipped to the frame length.
    pub fn window(&self, range: Range<usize>) -> &[u16] {
        let end = range.end.min(self.pixels.len());
        let start = range.start.min(end);
        &self.pixels[start..end]
    }

    /// Index and value of the brightest pixel within `range`.
    pub fn peak(&self, range: Range<usize>) -> Option<(usize, u16)> {
        let offset = range.start;
        self.window(range)
            .iter()
            .enumerate()
            // max_by_key keeps the last maximum; reverse so the first one wins
            .rev()
            .max_by_key(|&(_, &v)| v)
            .map(|(i, &v)| (i + offset, v))
    }
}

impl Deref for IntensityFrame {
    type Target = [u16];

    fn deref(&self) -> &[u16] {
        &self.pixels
    }
}

/// Accumulates raw blocks in read order.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
}

impl FrameAssembler {
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(bytes),
        }
    }

    /// Append one block. The block itself is dropped once copied.
    pub fn push(&mut self, block: Vec<u8>) {
        self.buffer.extend_from_slice(&block);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Decode the accumulated bytes as little-endian `u16` pixels.
    pub fn finish(self) -> Result<IntensityFrame> {
        if self.buffer.len() % 2 != 0 {
            return Err(Error::OddLength(self.buffer.len()));
        }
        let pixels = self
            .buffer
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        Ok(IntensityFrame { pixels })
    }
}

/// Capture one frame.
///
/// On a high-speed bus the capture is triggered with the request-spectra
/// command first. The full-speed path has not been validated against hardware.
pub fn capture_frame<T: Transport>(
    transport: &mut T,
    profile: &DeviceProfile,
    high_speed: bool,
) -> Result<IntensityFrame> {
    if high_speed {
        send_command(transport, profile, Command::RequestSpectra)?;
    }

    let plan = profile.read_plan(high_speed);
    let mut assembler = FrameAssembler::with_capacity(profile.frame_bytes(high_speed));
    for step in plan {
        read_step(transport, profile, step, &mut assembler)?;
    }

    tracing::trace!(
        "Reassembled {} bytes ({} speed)",
        assembler.len(),
        if high_speed { "high" } else { "full" }
    );
    assembler.finish()
}

fn read_step<T: Transport>(
    transport: &mut T,
    profile: &DeviceProfile,
    step: &ReadStep,
    assembler: &mut FrameAssembler,
) -> Result<()> {
    let endpoint = profile.endpoint(step.role);
    for _ in 0..step.reads {
        let block = transport.receive(endpoint, step.block_size)?;
        if block.len() != step.block_size {
            return Err(Error::ShortRead {
                endpoint: endpoint.address(),
                expected: step.block_size,
                actual: block.len(),
            });
        }
        assembler.push(block);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembler_decodes_little_endian() {
        let mut assembler = FrameAssembler::default();
        assembler.push(vec![0x01, 0x00, 0xFF]);
        assembler.push(vec![0x34, 0x12]);
        assert_eq!(assembler.len(), 5);
        // 5 bytes: odd
        assert!(matches!(assembler.finish(), Err(Error::OddLength(5))));

        let mut assembler = FrameAssembler::default();
        assembler.push(vec![0x01, 0x00, 0xFF, 0xFF]);
        assembler.push(vec![0x34, 0x12]);
        let frame = assembler.finish().unwrap();
        assert_eq!(frame.pixels(), &[1, 0xFFFF, 0x1234]);
        assert_eq!(frame.into_pixels(), vec![1, 0xFFFF, 0x1234]);
    }

    #[test]
    fn test_empty_assembler() {
        let frame = FrameAssembler::default().finish().unwrap();
        assert!(frame.is_empty());
    }

    #[test]
    fn test_frame_window_clips() {
        let frame = IntensityFrame::new((0..10).collect());
        assert_eq!(frame.window(2..5), &[2, 3, 4]);
        assert_eq!(frame.window(8..20), &[8, 9]);
        assert!(frame.window(12..20).is_empty());
    }

    #[test]
    fn test_frame_peak() {
        let frame = IntensityFrame::new(vec![5, 9, 1, 9, 3]);
        assert_eq!(frame.peak(0..5), Some((1, 9)));
        assert_eq!(frame.peak(2..5), Some((3, 9)));
        assert_eq!(frame.peak(5..9), None);
    }
}
