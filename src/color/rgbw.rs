//! RGB to RGBW white channel extraction
//!
//! The conversion is pure and independent of the driver transport; RGBW
//! drivers pick an algorithm from their config.

use crate::models::{Color, WhiteAlgorithm};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ColorRgbw {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub white: u8,
}

/// Per-channel calibration tables for the HyperSerial algorithms
#[derive(Clone)]
pub struct RgbwChannelCorrection {
    red: [u8; 256],
    green: [u8; 256],
    blue: [u8; 256],
    white: [u8; 256],
}

impl Default for RgbwChannelCorrection {
    fn default() -> Self {
        let mut identity = [0u8; 256];
        for (i, entry) in identity.iter_mut().enumerate() {
            *entry = i as u8;
        }

        Self {
            red: identity,
            green: identity,
            blue: identity,
            white: identity,
        }
    }
}

fn round_divide(a: u32, b: u32) -> u32 {
    (a + b / 2) / b
}

impl RgbwChannelCorrection {
    /// Build the calibration tables for the given algorithm
    ///
    /// Cold and neutral white override the custom gains with fixed presets;
    /// all other algorithms get identity tables.
    pub fn prepare(algorithm: WhiteAlgorithm, gain: u8, red: u8, green: u8, blue: u8) -> Self {
        let (gain, red, green, blue) = match algorithm {
            WhiteAlgorithm::HyperserialColdWhite => (0xff, 0xa0, 0xa0, 0xa0),
            WhiteAlgorithm::HyperserialNeutralWhite => (0xff, 0xb0, 0xb0, 0x70),
            WhiteAlgorithm::HyperserialCustom => (gain, red, green, blue),
            _ => return Self::default(),
        };

        let mut correction = Self::default();
        for i in 0..256u32 {
            correction.white[i as usize] = round_divide(gain as u32 * i, 0xff).min(0xff) as u8;
            correction.red[i as usize] = round_divide(red as u32 * i, 0xff).min(0xff) as u8;
            correction.green[i as usize] = round_divide(green as u32 * i, 0xff).min(0xff) as u8;
            correction.blue[i as usize] = round_divide(blue as u32 * i, 0xff).min(0xff) as u8;
        }

        correction
    }
}

pub fn rgb_to_rgbw(
    input: Color,
    algorithm: WhiteAlgorithm,
    correction: &RgbwChannelCorrection,
) -> ColorRgbw {
    let (red, green, blue) = input.into_components();

    match algorithm {
        WhiteAlgorithm::SubtractMinimum => {
            let white = red.min(green).min(blue);
            ColorRgbw {
                red: red - white,
                green: green - white,
                blue: blue - white,
                white,
            }
        }

        WhiteAlgorithm::SubMinWarmAdjust => sub_min_adjusted(red, green, blue, 0.274, 0.454, 2.333),

        WhiteAlgorithm::SubMinCoolAdjust => sub_min_adjusted(red, green, blue, 0.299, 0.587, 0.114),

        WhiteAlgorithm::WhiteOff => ColorRgbw {
            red,
            green,
            blue,
            white: 0,
        },

        WhiteAlgorithm::WledAuto => ColorRgbw {
            red,
            green,
            blue,
            white: red.min(green).min(blue),
        },

        WhiteAlgorithm::WledAutoMax => ColorRgbw {
            red,
            green,
            blue,
            white: red.max(green).max(blue),
        },

        WhiteAlgorithm::WledAutoAccurate => {
            let white = red.min(green).min(blue);
            ColorRgbw {
                red: red - white,
                green: green - white,
                blue: blue - white,
                white,
            }
        }

        WhiteAlgorithm::HyperserialColdWhite
        | WhiteAlgorithm::HyperserialNeutralWhite
        | WhiteAlgorithm::HyperserialCustom => {
            let white = correction.red[red as usize]
                .min(correction.green[green as usize])
                .min(correction.blue[blue as usize]);

            ColorRgbw {
                red: red.saturating_sub(correction.red[white as usize]),
                green: green.saturating_sub(correction.green[white as usize]),
                blue: blue.saturating_sub(correction.blue[white as usize]),
                white: correction.white[white as usize],
            }
        }
    }
}

fn sub_min_adjusted(red: u8, green: u8, blue: u8, f1: f64, f2: f64, f3: f64) -> ColorRgbw {
    let white = (red as f64 * f1)
        .min(green as f64 * f2)
        .min(blue as f64 * f3) as u8;

    ColorRgbw {
        red: red.saturating_sub((white as f64 / f1) as u8),
        green: green.saturating_sub((white as f64 / f2) as u8),
        blue: blue.saturating_sub((white as f64 / f3) as u8),
        white,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtract_minimum_is_invertible() {
        let correction = RgbwChannelCorrection::default();

        for &(r, g, b) in &[(10u8, 20u8, 30u8), (255, 255, 255), (0, 0, 0), (7, 200, 99)] {
            let rgbw = rgb_to_rgbw(
                Color::new(r, g, b),
                WhiteAlgorithm::SubtractMinimum,
                &correction,
            );

            // {R+W, G+W, B+W} reproduces the original exactly
            assert_eq!(
                (
                    rgbw.red + rgbw.white,
                    rgbw.green + rgbw.white,
                    rgbw.blue + rgbw.white
                ),
                (r, g, b)
            );
        }
    }

    #[test]
    fn wled_auto_keeps_rgb() {
        let rgbw = rgb_to_rgbw(
            Color::new(100, 50, 25),
            WhiteAlgorithm::WledAuto,
            &RgbwChannelCorrection::default(),
        );
        assert_eq!((rgbw.red, rgbw.green, rgbw.blue, rgbw.white), (100, 50, 25, 25));

        let rgbw = rgb_to_rgbw(
            Color::new(100, 50, 25),
            WhiteAlgorithm::WledAutoMax,
            &RgbwChannelCorrection::default(),
        );
        assert_eq!(rgbw.white, 100);
    }

    #[test]
    fn white_off_passthrough() {
        let rgbw = rgb_to_rgbw(
            Color::new(1, 2, 3),
            WhiteAlgorithm::WhiteOff,
            &RgbwChannelCorrection::default(),
        );
        assert_eq!(rgbw, ColorRgbw {
            red: 1,
            green: 2,
            blue: 3,
            white: 0
        });
    }

    #[test]
    fn cold_white_tables() {
        let correction =
            RgbwChannelCorrection::prepare(WhiteAlgorithm::HyperserialColdWhite, 0, 0, 0, 0);

        // gain 0xff, channels 0xa0
        assert_eq!(correction.white[255], 255);
        assert_eq!(correction.red[255], 0xa0);

        let rgbw = rgb_to_rgbw(
            Color::new(255, 255, 255),
            WhiteAlgorithm::HyperserialColdWhite,
            &correction,
        );
        assert_eq!(rgbw.white, correction.white[0xa0 as usize]);
    }
}
