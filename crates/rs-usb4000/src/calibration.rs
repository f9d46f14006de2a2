//! Pixel → wavelength mapping.
//!
//! Each USB4000 stores a third-order polynomial in EEPROM slots 1..=4 that maps
//! a sensor pixel index to a wavelength in nanometres:
//!
//! ```text
//! λ(p) = c0 + c1·p + c2·p² + c3·p³
//! ```

use std::ops::Range;

use serde::Serialize;

/// Wavelength calibration polynomial, constant term first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CalibrationCoefficients {
    pub c0: f64,
    pub c1: f64,
    pub c2: f64,
    pub c3: f64,
}

impl CalibrationCoefficients {
    pub const fn new(c0: f64, c1: f64, c2: f64, c3: f64) -> Self {
        Self { c0, c1, c2, c3 }
    }

    pub fn to_array(self) -> [f64; 4] {
        [self.c0, self.c1, self.c2, self.c3]
    }

    /// Wavelength in nanometres at `pixel`.
    pub fn to_wavelength(&self, pixel: usize) -> f64 {
        to_wavelength(pixel, self)
    }

    /// Pixels within `range` where the wavelength first exceeds each multiple
    /// of `step_nm`, suitable for axis labelling.
    pub fn ticks(&self, range: Range<usize>, step_nm: u32) -> Vec<WavelengthTick> {
        let mut ticks = Vec::new();
        if step_nm == 0 || range.is_empty() {
            return ticks;
        }
        let step = step_nm as f64;
        let base = self.to_wavelength(range.start);
        let mut next = (base / step).ceil() * step;
        for pixel in range {
            if self.to_wavelength(pixel) > next {
                ticks.push(WavelengthTick {
                    pixel,
                    nanometers: next,
                });
                next += step;
            }
        }
        ticks
    }
}

impl From<[f64; 4]> for CalibrationCoefficients {
    fn from(c: [f64; 4]) -> Self {
        Self::new(c[0], c[1], c[2], c[3])
    }
}

/// An axis label position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WavelengthTick {
    pub pixel: usize,
    pub nanometers: f64,
}

/// Evaluate the calibration polynomial at `pixel` (direct power form).
pub fn to_wavelength(pixel: usize, coeffs: &CalibrationCoefficients) -> f64 {
    let p = pixel as f64;
    coeffs.c0 + coeffs.c1 * p + coeffs.c2 * (p * p) + coeffs.c3 * (p * p * p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const FACTORY: CalibrationCoefficients =
        CalibrationCoefficients::new(190.377, 0.363, -1.246e-5, -2.248e-9);

    #[test]
    fn test_pixel_zero_is_constant_term() {
        assert_abs_diff_eq!(to_wavelength(0, &FACTORY), 190.38, epsilon = 0.01);
    }

    #[test]
    fn test_high_pixel_does_not_overflow() {
        // p³ exceeds i32 range here; evaluation is in f64 throughout
        let nm = FACTORY.to_wavelength(3647);
        let p = 3647.0f64;
        let expected = 190.377 + 0.363 * p - 1.246e-5 * p * p - 2.248e-9 * p * p * p;
        assert_abs_diff_eq!(nm, expected, epsilon = 1e-9);
        assert!(nm > 1200.0 && nm < 1300.0);
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(FACTORY.to_wavelength(1234), FACTORY.to_wavelength(1234));
    }

    #[test]
    fn test_ticks_are_increasing_multiples() {
        let ticks = FACTORY.ticks(22..3670, 25);
        assert!(!ticks.is_empty());
        for pair in ticks.windows(2) {
            assert!(pair[1].pixel > pair[0].pixel);
            assert_abs_diff_eq!(pair[1].nanometers - pair[0].nanometers, 25.0);
        }
        for tick in &ticks {
            assert_abs_diff_eq!(tick.nanometers % 25.0, 0.0);
            assert!(FACTORY.to_wavelength(tick.pixel) > tick.nanometers);
            assert!(FACTORY.to_wavelength(tick.pixel - 1) <= tick.nanometers);
        }
        // first label above the start wavelength (~198.4 nm)
        assert_abs_diff_eq!(ticks[0].nanometers, 200.0);
    }

    #[test]
    fn test_ticks_degenerate_inputs() {
        assert!(FACTORY.ticks(10..10, 25).is_empty());
        assert!(FACTORY.ticks(0..100, 0).is_empty());
    }
}
