//! Approximate display colour of a wavelength.

use serde::Serialize;

const GAMMA: f64 = 0.8;

/// 8-bit sRGB triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb {
        r: 255,
        g: 255,
        b: 255,
    };

    /// `#rrggbb`
    pub fn hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Piecewise-linear visible spectrum, 380 to 750 nm. Anything outside the
/// visible range is white.
pub fn wavelength_to_rgb(nm: f64) -> Rgb {
    let (r, g, b) = if (380.0..=440.0).contains(&nm) {
        let attenuation = 0.3 + 0.7 * (nm - 380.0) / (440.0 - 380.0);
        (
            -(nm - 440.0) / (440.0 - 380.0) * attenuation.powf(GAMMA),
            0.0,
            attenuation.powf(GAMMA),
        )
    } else if (440.0..=490.0).contains(&nm) {
        (0.0, ((nm - 440.0) / (490.0 - 440.0)).powf(GAMMA), 1.0)
    } else if (490.0..=510.0).contains(&nm) {
        (0.0, 1.0, (-(nm - 510.0) / (510.0 - 490.0)).powf(GAMMA))
    } else if (510.0..=580.0).contains(&nm) {
        (((nm - 510.0) / (580.0 - 510.0)).powf(GAMMA), 1.0, 0.0)
    } else if (580.0..=645.0).contains(&nm) {
        (1.0, (-(nm - 645.0) / (645.0 - 580.0)).powf(GAMMA), 0.0)
    } else if (645.0..=750.0).contains(&nm) {
        let attenuation = 0.3 + 0.7 * (750.0 - nm) / (750.0 - 645.0);
        (attenuation.powf(GAMMA), 0.0, 0.0)
    } else {
        return Rgb::WHITE;
    };

    Rgb {
        r: channel(r),
        g: channel(g),
        b: channel(b),
    }
}

fn channel(intensity: f64) -> u8 {
    (intensity * 255.0).floor().clamp(0.0, 255.0) as u8
}
