//! Per-LED color correction pipeline
//!
//! For every LED the muxed color goes through, in order: saturation and
//! luminance gain, channel cross-adjustment, temperature correction, the
//! minimum backlight floor and finally the per-channel gamma lookup.

use std::convert::TryFrom;
use std::num::ParseIntError;

use slotmap::{DefaultKey, SlotMap};

use crate::models::{ChannelAdjustment, Color, ColorAdjustment};

mod rgbw;
pub use rgbw::*;

/// One channel-correction vector plus its temperature correction
#[derive(Debug, Clone, Copy)]
pub struct ChannelCalibration {
    target: Color,
    correction: u8,
    enabled: bool,
}

impl ChannelCalibration {
    fn new(target: Color, default: (u8, u8, u8), correction: u8) -> Self {
        let enabled = target.into_components() != default;

        Self {
            target,
            correction,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Contribution of `input` to the output color, scaled by the channel
    /// target and the compensated brightness
    pub fn apply(&self, input: u8, brightness: u8) -> Color {
        Color::new(
            ((brightness as u32 * input as u32 * self.target.red as u32) / 65025).min(255) as _,
            ((brightness as u32 * input as u32 * self.target.green as u32) / 65025).min(255) as _,
            ((brightness as u32 * input as u32 * self.target.blue as u32) / 65025).min(255) as _,
        )
    }

    /// Temperature correction of a single component
    pub fn correction(&self, input: u8) -> u8 {
        ((input as u32 * self.correction as u32) / 255) as u8
    }
}

/// Saturation/luminance, backlight, brightness and gamma stage
///
/// The 256-entry per-channel mapping tables are regenerated whenever gamma
/// changes.
#[derive(Clone)]
pub struct RgbTransform {
    classic_config: bool,
    saturation_gain: f32,
    luminance_gain: f32,
    backlight_enabled: bool,
    backlight_colored: bool,
    sum_brightness_low: f32,
    gamma_r: f32,
    gamma_g: f32,
    gamma_b: f32,
    mapping_r: [u8; 256],
    mapping_g: [u8; 256],
    mapping_b: [u8; 256],
    brightness: u8,
    brightness_compensation: u8,
}

#[derive(Default, Debug, Clone, Copy)]
pub struct BrightnessComponents {
    pub rgb: u8,
    pub cmy: u8,
    pub w: u8,
}

impl RgbTransform {
    fn gamma_table(gamma: f32) -> [u8; 256] {
        let mut table = [0u8; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            *entry = ((i as f32 / 255.0).powf(gamma) * 255.0 + 0.5).min(255.0) as u8;
        }
        table
    }

    pub fn set_gamma(&mut self, gamma_r: f32, gamma_g: f32, gamma_b: f32) {
        self.gamma_r = gamma_r;
        self.gamma_g = gamma_g;
        self.gamma_b = gamma_b;
        self.mapping_r = Self::gamma_table(gamma_r);
        self.mapping_g = Self::gamma_table(gamma_g);
        self.mapping_b = Self::gamma_table(gamma_b);
    }

    pub fn set_backlight_enabled(&mut self, enabled: bool) {
        self.backlight_enabled = enabled;
    }

    pub fn brightness_components(&self) -> BrightnessComponents {
        let fw = self.brightness_compensation as f32 * 2.0 / 100.0 + 1.0;
        let fcmy = self.brightness_compensation as f32 / 100.0 + 1.0;

        if self.brightness > 0 {
            let b_in = if self.brightness < 50 {
                -0.09 * self.brightness as f32 + 7.5
            } else {
                -0.04 * self.brightness as f32 + 5.0
            };

            BrightnessComponents {
                rgb: (255.0 / b_in).min(255.0) as u8,
                cmy: (255.0 / (b_in * fcmy)).min(255.0) as u8,
                w: (255.0 / (b_in * fw)).min(255.0) as u8,
            }
        } else {
            BrightnessComponents::default()
        }
    }

    /// Saturation and luminance gain
    ///
    /// The classic transform works in HSL; the advanced one is a per-channel
    /// linear combination around the Rec. 709 luma.
    pub fn transform_sat_lum(&self, color: Color) -> Color {
        if (self.saturation_gain - 1.0).abs() < f32::EPSILON
            && (self.luminance_gain - 1.0).abs() < f32::EPSILON
        {
            return color;
        }

        let (r, g, b) = color.into_components();

        if self.classic_config {
            let (h, s, l) = rgb_to_hsl(r, g, b);
            let s = (s * self.saturation_gain).min(1.0);
            let l = (l * self.luminance_gain).min(1.0);
            let (r, g, b) = hsl_to_rgb(h, s, l);
            Color::new(r, g, b)
        } else {
            let luma = 0.2126 * r as f32 + 0.7152 * g as f32 + 0.0722 * b as f32;
            let adjust = |c: u8| {
                ((luma + (c as f32 - luma) * self.saturation_gain) * self.luminance_gain)
                    .max(0.0)
                    .min(255.0) as u8
            };
            Color::new(adjust(r), adjust(g), adjust(b))
        }
    }

    /// Backlight floor followed by the gamma lookup
    pub fn transform(&self, color: Color) -> Color {
        let (mut r, mut g, mut b) = color.into_components();

        let mut rgb_sum = r as f32 + g as f32 + b as f32;

        if self.backlight_enabled && self.sum_brightness_low > 0. && rgb_sum < self.sum_brightness_low
        {
            if self.backlight_colored {
                if rgb_sum == 0. {
                    r = r.max(1);
                    g = g.max(1);
                    b = b.max(1);
                    rgb_sum = r as f32 + g as f32 + b as f32;
                }

                let cl = (self.sum_brightness_low / rgb_sum).min(255.0);

                r = (r as f32 * cl).min(255.0) as u8;
                g = (g as f32 * cl).min(255.0) as u8;
                b = (b as f32 * cl).min(255.0) as u8;
            } else {
                let x = (self.sum_brightness_low / 3.0).min(255.0) as u8;
                r = x;
                g = x;
                b = x;
            }
        }

        Color::new(
            self.mapping_r[r as usize],
            self.mapping_g[g as usize],
            self.mapping_b[b as usize],
        )
    }
}

impl From<&ChannelAdjustment> for RgbTransform {
    fn from(settings: &ChannelAdjustment) -> Self {
        let mut transform = Self {
            classic_config: settings.classic_config,
            saturation_gain: settings.saturation_gain,
            luminance_gain: settings.luminance_gain,
            backlight_enabled: true,
            backlight_colored: settings.backlight_colored,
            sum_brightness_low: 765.0
                * ((2.0f32.powf(settings.backlight_threshold as f32 / 100.0 * 2.0) - 1.0) / 3.0),
            gamma_r: 0.,
            gamma_g: 0.,
            gamma_b: 0.,
            mapping_r: [0; 256],
            mapping_g: [0; 256],
            mapping_b: [0; 256],
            brightness: settings.brightness as _,
            brightness_compensation: settings.brightness_compensation as _,
        };

        transform.set_gamma(settings.gamma_red, settings.gamma_green, settings.gamma_blue);
        transform
    }
}

impl std::fmt::Debug for RgbTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RgbTransform")
            .field("classic_config", &self.classic_config)
            .field("saturation_gain", &self.saturation_gain)
            .field("luminance_gain", &self.luminance_gain)
            .field("gamma", &(self.gamma_r, self.gamma_g, self.gamma_b))
            .field("brightness", &self.brightness)
            .finish()
    }
}

pub(crate) fn rgb_to_hsl(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let r = r as f32 / 255.;
    let g = g as f32 / 255.;
    let b = b as f32 / 255.;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) / 2.;

    if (max - min).abs() < f32::EPSILON {
        return (0., 0., l);
    }

    let d = max - min;
    let s = if l > 0.5 {
        d / (2. - max - min)
    } else {
        d / (max + min)
    };

    let h = if (max - r).abs() < f32::EPSILON {
        (g - b) / d + if g < b { 6. } else { 0. }
    } else if (max - g).abs() < f32::EPSILON {
        (b - r) / d + 2.
    } else {
        (r - g) / d + 4.
    } / 6.;

    (h, s, l)
}

pub(crate) fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (u8, u8, u8) {
    fn hue_to_component(p: f32, q: f32, mut t: f32) -> f32 {
        if t < 0. {
            t += 1.;
        }
        if t > 1. {
            t -= 1.;
        }
        if t < 1. / 6. {
            p + (q - p) * 6. * t
        } else if t < 1. / 2. {
            q
        } else if t < 2. / 3. {
            p + (q - p) * (2. / 3. - t) * 6.
        } else {
            p
        }
    }

    if s == 0. {
        let v = (l * 255.).round() as u8;
        return (v, v, v);
    }

    let q = if l < 0.5 { l * (1. + s) } else { l + s - l * s };
    let p = 2. * l - q;

    (
        (hue_to_component(p, q, h + 1. / 3.) * 255.).round() as u8,
        (hue_to_component(p, q, h) * 255.).round() as u8,
        (hue_to_component(p, q, h - 1. / 3.) * 255.).round() as u8,
    )
}

/// Full calibration for one LED segment
#[derive(Debug, Clone)]
pub struct ColorCalibration {
    black: ChannelCalibration,
    white: ChannelCalibration,
    red: ChannelCalibration,
    green: ChannelCalibration,
    blue: ChannelCalibration,
    cyan: ChannelCalibration,
    magenta: ChannelCalibration,
    yellow: ChannelCalibration,
    transform: RgbTransform,
}

impl ColorCalibration {
    pub fn set_backlight_enabled(&mut self, enabled: bool) {
        self.transform.set_backlight_enabled(enabled);
    }

    /// Apply the full correction chain to one color
    pub fn calibrate(&self, color: Color) -> Color {
        // Saturation/luminance gain
        let color = self.transform.transform_sat_lum(color);

        // Channel cross-adjustment
        let (ored, ogreen, oblue) = color.into_components();
        let (ored, ogreen, oblue) = (ored as u32, ogreen as u32, oblue as u32);
        let brightness = self.transform.brightness_components();

        let nrng = (255 - ored) * (255 - ogreen);
        let rng = ored * (255 - ogreen);
        let nrg = (255 - ored) * ogreen;
        let rg = ored * ogreen;

        let black = nrng * (255 - oblue) / 65025;
        let red = rng * (255 - oblue) / 65025;
        let green = nrg * (255 - oblue) / 65025;
        let blue = nrng * oblue / 65025;
        let cyan = nrg * oblue / 65025;
        let magenta = rng * oblue / 65025;
        let yellow = rg * (255 - oblue) / 65025;
        let white = rg * oblue / 65025;

        let o = self.black.apply(black as _, 255);
        let r = self.red.apply(red as _, brightness.rgb);
        let g = self.green.apply(green as _, brightness.rgb);
        let b = self.blue.apply(blue as _, brightness.rgb);
        let c = self.cyan.apply(cyan as _, brightness.cmy);
        let m = self.magenta.apply(magenta as _, brightness.cmy);
        let y = self.yellow.apply(yellow as _, brightness.cmy);
        let w = self.white.apply(white as _, brightness.w);

        let sum = |f: fn(&Color) -> u8| {
            (f(&o) as u32
                + f(&r) as u32
                + f(&g) as u32
                + f(&b) as u32
                + f(&c) as u32
                + f(&m) as u32
                + f(&y) as u32
                + f(&w) as u32)
                .min(255) as u8
        };

        let color = Color::new(sum(|c| c.red), sum(|c| c.green), sum(|c| c.blue));

        // Temperature correction
        let color = Color::new(
            self.red.correction(color.red),
            self.green.correction(color.green),
            self.blue.correction(color.blue),
        );

        // Backlight floor and gamma
        self.transform.transform(color)
    }
}

impl From<&ChannelAdjustment> for ColorCalibration {
    fn from(settings: &ChannelAdjustment) -> Self {
        Self {
            black: ChannelCalibration::new(settings.black, (0, 0, 0), 255),
            white: ChannelCalibration::new(settings.white, (255, 255, 255), 255),
            red: ChannelCalibration::new(
                settings.red,
                (255, 0, 0),
                settings.temperature_red.min(255) as _,
            ),
            green: ChannelCalibration::new(
                settings.green,
                (0, 255, 0),
                settings.temperature_green.min(255) as _,
            ),
            blue: ChannelCalibration::new(
                settings.blue,
                (0, 0, 255),
                settings.temperature_blue.min(255) as _,
            ),
            cyan: ChannelCalibration::new(settings.cyan, (0, 255, 255), 255),
            magenta: ChannelCalibration::new(settings.magenta, (255, 0, 255), 255),
            yellow: ChannelCalibration::new(settings.yellow, (255, 255, 0), 255),
            transform: settings.into(),
        }
    }
}

/// LED segment matcher parsed from the `leds` field
#[derive(Debug, Clone)]
pub enum LedMatch {
    /// `*`
    All,
    /// `0-19, 22, 30-40`
    Ranges(LedRanges),
    /// Invalid filter
    None,
}

lazy_static::lazy_static! {
    static ref PATTERN_REGEX: regex::Regex = regex::Regex::new("^([0-9]+(\\-[0-9]+)?)(,[ ]*([0-9]+(\\-[0-9]+)?))*$").unwrap();
}

#[derive(Debug, Clone)]
pub struct LedRanges {
    ranges: Vec<std::ops::RangeInclusive<usize>>,
}

impl TryFrom<&str> for LedRanges {
    type Error = &'static str;

    fn try_from(pattern: &str) -> Result<Self, Self::Error> {
        Ok(Self {
            ranges: pattern
                .split(',')
                .map(|led_index_list| {
                    if led_index_list.contains('-') {
                        let split: Vec<_> = led_index_list.splitn(2, '-').collect();
                        let start = split[0].trim().parse()?;
                        let end = split[1].trim().parse()?;

                        Ok(start..=end)
                    } else {
                        let index = led_index_list.trim().parse()?;
                        Ok(index..=index)
                    }
                })
                .collect::<Result<Vec<_>, ParseIntError>>()
                .map_err(|_| "invalid index")?,
        })
    }
}

impl From<&str> for LedMatch {
    fn from(pattern: &str) -> Self {
        let pattern = pattern.trim();

        if pattern == "*" {
            return Self::All;
        }

        if PATTERN_REGEX.is_match(pattern) {
            if let Ok(ranges) = LedRanges::try_from(pattern) {
                return Self::Ranges(ranges);
            }
        }

        error!(pattern = ?pattern, "unrecognized segment range, ignoring");
        Self::None
    }
}

/// Per-LED calibration routing
///
/// Every LED points at one [ColorCalibration] from a shared pool; segment
/// assignment comes from the `leds` spec of each channel adjustment entry.
#[derive(Debug, Clone)]
pub struct LedCalibration {
    calibration_config: SlotMap<DefaultKey, ColorCalibration>,
    per_led_config: Vec<Option<DefaultKey>>,
}

impl LedCalibration {
    pub fn new(led_count: usize, config: &ColorAdjustment) -> Self {
        let mut calibration_config = SlotMap::with_capacity(config.channel_adjustment.len());
        let mut per_led_config = vec![None; led_count];

        for adjustment in &config.channel_adjustment {
            let data: ColorCalibration = adjustment.into();

            match LedMatch::from(adjustment.leds.as_str()) {
                LedMatch::All => {
                    let key = calibration_config.insert(data);
                    per_led_config.fill(Some(key));
                }
                LedMatch::Ranges(ranges) => {
                    let key = calibration_config.insert(data);
                    for range in &ranges.ranges {
                        let start = *range.start();
                        let end = *range.end();

                        if start >= led_count || end >= led_count {
                            warn!(
                                range = ?(start, end),
                                led_count = %led_count,
                                "segment range exceeds layout, clamping"
                            );
                        }

                        for led in per_led_config
                            .iter_mut()
                            .take(end.saturating_add(1).min(led_count))
                            .skip(start.min(led_count))
                        {
                            *led = Some(key);
                        }
                    }
                }
                LedMatch::None => {}
            }
        }

        for (index, assignment) in per_led_config.iter().enumerate() {
            if assignment.is_none() {
                warn!(index = %index, "no calibration set for led");
            }
        }

        Self {
            calibration_config,
            per_led_config,
        }
    }

    pub fn set_backlight_enabled(&mut self, enabled: bool) {
        for (_, calibration) in self.calibration_config.iter_mut() {
            calibration.set_backlight_enabled(enabled);
        }
    }

    /// Transform the LED colors in place
    pub fn apply(&self, led_data: &mut [Color]) {
        for (led, assignment) in led_data.iter_mut().zip(self.per_led_config.iter()) {
            if let Some(calibration) = assignment.and_then(|key| self.calibration_config.get(key)) {
                *led = calibration.calibrate(*led);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChannelAdjustment;

    lazy_static::lazy_static! {
        static ref BASE_COLORS: [Color; 8] = [
            Color::new(0, 0, 0),
            Color::new(255, 255, 255),
            Color::new(255, 0, 0),
            Color::new(0, 255, 0),
            Color::new(0, 0, 255),
            Color::new(255, 255, 0),
            Color::new(0, 255, 255),
            Color::new(255, 0, 255),
        ];
    }

    fn neutral_adjustment() -> ChannelAdjustment {
        ChannelAdjustment {
            gamma_red: 1.0,
            gamma_green: 1.0,
            gamma_blue: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn channel_calibration_scales() {
        for &color in &*BASE_COLORS {
            let calibration = ChannelCalibration::new(color, (1, 1, 1), 255);
            assert_eq!(color, calibration.apply(255, 255));
            assert_eq!(color / 2, calibration.apply(127, 255));
            assert_eq!(color / 2, calibration.apply(255, 127));
        }
    }

    #[test]
    fn neutral_calibration_is_identity() {
        let calibration: ColorCalibration = (&neutral_adjustment()).into();

        for &color in &*BASE_COLORS {
            assert_eq!(color, calibration.calibrate(color));
        }
    }

    #[test]
    fn output_stays_in_range() {
        let calibration: ColorCalibration = (&ChannelAdjustment {
            saturation_gain: 2.5,
            luminance_gain: 2.5,
            brightness: 100,
            brightness_compensation: 100,
            ..Default::default()
        })
            .into();

        // Exhaustive on a coarse lattice
        for r in (0..=255).step_by(17) {
            for g in (0..=255).step_by(17) {
                for b in (0..=255).step_by(17) {
                    // The result type makes overflow impossible; this checks
                    // the transform doesn't panic on saturated gains
                    calibrate_one(&calibration, r as u8, g as u8, b as u8);
                }
            }
        }
    }

    fn calibrate_one(calibration: &ColorCalibration, r: u8, g: u8, b: u8) -> Color {
        calibration.calibrate(Color::new(r, g, b))
    }

    #[test]
    fn temperature_scales_channels() {
        let calibration: ColorCalibration = (&ChannelAdjustment {
            temperature_red: 127,
            ..neutral_adjustment()
        })
            .into();

        let out = calibration.calibrate(Color::new(255, 255, 255));
        assert_eq!(out.red, 127);
        assert_eq!(out.green, 255);
        assert_eq!(out.blue, 255);
    }

    #[test]
    fn backlight_floor_raises_black() {
        let mut calibration: ColorCalibration = (&ChannelAdjustment {
            backlight_threshold: 50,
            backlight_colored: false,
            ..neutral_adjustment()
        })
            .into();
        calibration.set_backlight_enabled(true);

        let out = calibration.calibrate(Color::new(0, 0, 0));
        assert!(out.red > 0 && out.green > 0 && out.blue > 0);
        assert_eq!(out.red, out.green);
        assert_eq!(out.green, out.blue);
    }

    #[test]
    fn gamma_tables_regenerate() {
        let mut transform: RgbTransform = (&neutral_adjustment()).into();
        assert_eq!(transform.transform(Color::new(128, 128, 128)).red, 128);

        transform.set_gamma(2.0, 2.0, 2.0);
        let out = transform.transform(Color::new(128, 128, 128));
        assert!(out.red < 128);
    }

    #[test]
    fn led_ranges_parsing() {
        let ranges = LedRanges::try_from("0-19, 22, 30-40").unwrap();
        assert_eq!(ranges.ranges, vec![0..=19, 22..=22, 30..=40]);

        assert!(LedRanges::try_from("a-b").is_err());
        assert!(matches!(LedMatch::from("*"), LedMatch::All));
        assert!(matches!(LedMatch::from("leds"), LedMatch::None));
    }

    #[test]
    fn per_led_routing() {
        let config = ColorAdjustment {
            channel_adjustment: vec![
                ChannelAdjustment {
                    leds: "0-3".to_owned(),
                    temperature_red: 0,
                    ..neutral_adjustment()
                },
                ChannelAdjustment {
                    leds: "4-7".to_owned(),
                    ..neutral_adjustment()
                },
            ],
            ..Default::default()
        };

        let calibration = LedCalibration::new(8, &config);
        let mut led_data = vec![Color::new(255, 0, 0); 8];
        calibration.apply(&mut led_data);

        // First segment kills the red channel, second is neutral
        assert_eq!(led_data[0], Color::new(0, 0, 0));
        assert_eq!(led_data[3], Color::new(0, 0, 0));
        assert_eq!(led_data[4], Color::new(255, 0, 0));
        assert_eq!(led_data[7], Color::new(255, 0, 0));
    }

    #[test]
    fn out_of_range_segment_is_clamped() {
        let config = ColorAdjustment {
            channel_adjustment: vec![ChannelAdjustment {
                leds: "2-100".to_owned(),
                ..neutral_adjustment()
            }],
            ..Default::default()
        };

        let calibration = LedCalibration::new(4, &config);
        assert!(calibration.per_led_config[0].is_none());
        assert!(calibration.per_led_config[2].is_some());
        assert!(calibration.per_led_config[3].is_some());
    }
}
