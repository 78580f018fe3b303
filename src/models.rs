//! Settings documents consumed by the core pipeline
//!
//! Configuration arrives as validated JSON documents; every section below
//! mirrors one subtree of the settings database maintained by the embedding
//! process.

use std::path::Path;

use palette::rgb::Rgb;
use serde_derive::{Deserialize, Serialize};
use strum_macros::EnumDiscriminants;
use thiserror::Error;
use validator::Validate;

pub type Color = Rgb<palette::encoding::srgb::Srgb, u8>;

mod devices;
pub use devices::*;

mod led_string;
pub use led_string::*;

pub(crate) fn default_true() -> bool {
    true
}

pub(crate) fn default_false() -> bool {
    false
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Instance {
    #[serde(default)]
    pub id: i32,
    #[serde(default = "String::new")]
    pub friendly_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", deny_unknown_fields)]
pub enum BlackBorderDetectorMode {
    Default,
    Classic,
    Osd,
    Letterbox,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct BlackBorderDetector {
    #[serde(default = "default_true")]
    pub enable: bool,
    #[validate(range(min = 0, max = 100))]
    pub threshold: u32,
    pub unknown_frame_cnt: u32,
    pub border_frame_cnt: u32,
    pub max_inconsistent_cnt: u32,
    pub blur_remove_cnt: u16,
    pub mode: BlackBorderDetectorMode,
}

impl Default for BlackBorderDetector {
    fn default() -> Self {
        Self {
            enable: true,
            threshold: 5,
            unknown_frame_cnt: 600,
            border_frame_cnt: 50,
            max_inconsistent_cnt: 10,
            blur_remove_cnt: 1,
            mode: BlackBorderDetectorMode::Default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum ImageToLedMappingType {
    MulticolorMean,
    UnicolorMean,
    Advanced,
    Weighted,
}

impl ImageToLedMappingType {
    /// Numeric id used by the JSON API and the averaging unit
    pub fn to_int(self) -> i32 {
        match self {
            ImageToLedMappingType::MulticolorMean => 0,
            ImageToLedMappingType::UnicolorMean => 1,
            ImageToLedMappingType::Advanced => 2,
            ImageToLedMappingType::Weighted => 3,
        }
    }
}

impl Default for ImageToLedMappingType {
    fn default() -> Self {
        Self::MulticolorMean
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ColorAdjustment {
    pub image_to_led_mapping_type: ImageToLedMappingType,
    #[serde(rename = "sparse_processing")]
    pub sparse_processing: bool,
    #[validate(nested)]
    pub channel_adjustment: Vec<ChannelAdjustment>,
}

impl Default for ColorAdjustment {
    fn default() -> Self {
        Self {
            image_to_led_mapping_type: ImageToLedMappingType::MulticolorMean,
            sparse_processing: false,
            channel_adjustment: vec![ChannelAdjustment::default()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ChannelAdjustment {
    pub id: String,
    /// LED segment spec: `*`, `12` or `0-19, 22, 30-40`
    pub leds: String,
    #[serde(rename = "classic_config")]
    pub classic_config: bool,
    #[validate(range(min = 0.0, max = 5.0))]
    pub saturation_gain: f32,
    #[validate(range(min = 0.0, max = 5.0))]
    pub luminance_gain: f32,
    #[serde(
        serialize_with = "crate::serde::serialize_color_as_array",
        deserialize_with = "crate::serde::deserialize_color_from_array"
    )]
    pub black: Color,
    #[serde(
        serialize_with = "crate::serde::serialize_color_as_array",
        deserialize_with = "crate::serde::deserialize_color_from_array"
    )]
    pub white: Color,
    #[serde(
        serialize_with = "crate::serde::serialize_color_as_array",
        deserialize_with = "crate::serde::deserialize_color_from_array"
    )]
    pub red: Color,
    #[serde(
        serialize_with = "crate::serde::serialize_color_as_array",
        deserialize_with = "crate::serde::deserialize_color_from_array"
    )]
    pub green: Color,
    #[serde(
        serialize_with = "crate::serde::serialize_color_as_array",
        deserialize_with = "crate::serde::deserialize_color_from_array"
    )]
    pub blue: Color,
    #[serde(
        serialize_with = "crate::serde::serialize_color_as_array",
        deserialize_with = "crate::serde::deserialize_color_from_array"
    )]
    pub cyan: Color,
    #[serde(
        serialize_with = "crate::serde::serialize_color_as_array",
        deserialize_with = "crate::serde::deserialize_color_from_array"
    )]
    pub magenta: Color,
    #[serde(
        serialize_with = "crate::serde::serialize_color_as_array",
        deserialize_with = "crate::serde::deserialize_color_from_array"
    )]
    pub yellow: Color,
    #[validate(range(min = 0, max = 255))]
    pub temperature_red: u32,
    #[validate(range(min = 0, max = 255))]
    pub temperature_green: u32,
    #[validate(range(min = 0, max = 255))]
    pub temperature_blue: u32,
    #[validate(range(min = 0, max = 100))]
    pub backlight_threshold: u32,
    pub backlight_colored: bool,
    #[validate(range(min = 0, max = 100))]
    pub brightness: u32,
    #[validate(range(min = 0, max = 100))]
    pub brightness_compensation: u32,
    #[validate(range(min = 0.1, max = 5.0))]
    pub gamma_red: f32,
    #[validate(range(min = 0.1, max = 5.0))]
    pub gamma_green: f32,
    #[validate(range(min = 0.1, max = 5.0))]
    pub gamma_blue: f32,
}

impl Default for ChannelAdjustment {
    fn default() -> Self {
        Self {
            id: "A userdefined name".to_owned(),
            leds: "*".to_owned(),
            classic_config: false,
            saturation_gain: 1.0,
            luminance_gain: 1.0,
            black: Color::from_components((0, 0, 0)),
            white: Color::from_components((255, 255, 255)),
            red: Color::from_components((255, 0, 0)),
            green: Color::from_components((0, 255, 0)),
            blue: Color::from_components((0, 0, 255)),
            cyan: Color::from_components((0, 255, 255)),
            magenta: Color::from_components((255, 0, 255)),
            yellow: Color::from_components((255, 255, 0)),
            temperature_red: 255,
            temperature_green: 255,
            temperature_blue: 255,
            backlight_threshold: 0,
            backlight_colored: false,
            brightness: 100,
            brightness_compensation: 0,
            gamma_red: 1.5,
            gamma_green: 1.5,
            gamma_blue: 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", deny_unknown_fields)]
pub enum SmoothingType {
    Linear,
    Alternative,
}

impl Default for SmoothingType {
    fn default() -> Self {
        Self::Linear
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct Smoothing {
    pub enable: bool,
    #[serde(rename = "type")]
    pub ty: SmoothingType,
    #[serde(rename = "time_ms")]
    #[validate(range(min = 25, max = 5000))]
    pub time_ms: u32,
    #[validate(range(min = 1.0, max = 200.0))]
    pub update_frequency: f32,
    pub continuous_output: bool,
    pub direct_mode: bool,
    pub pause: bool,
    #[validate(range(min = 0, max = 255))]
    pub anti_flickering_threshold: u32,
    #[validate(range(min = 0, max = 255))]
    pub anti_flickering_step: u32,
    #[validate(range(min = 0, max = 5000))]
    pub anti_flickering_timeout: u32,
}

impl Default for Smoothing {
    fn default() -> Self {
        Self {
            enable: true,
            ty: SmoothingType::Linear,
            time_ms: 200,
            update_frequency: 25.0,
            continuous_output: true,
            direct_mode: false,
            pause: false,
            anti_flickering_threshold: 0,
            anti_flickering_step: 0,
            anti_flickering_timeout: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct InstanceCapture {
    pub system_enable: bool,
    #[validate(range(min = 100, max = 253))]
    pub system_priority: i32,
    pub video_enable: bool,
    #[validate(range(min = 100, max = 253))]
    pub video_priority: i32,
}

impl Default for InstanceCapture {
    fn default() -> Self {
        Self {
            system_enable: false,
            system_priority: 250,
            video_enable: true,
            video_priority: 240,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", deny_unknown_fields)]
pub enum EffectType {
    Color,
    Effect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct ForegroundEffect {
    #[serde(
        serialize_with = "crate::serde::serialize_color_as_array",
        deserialize_with = "crate::serde::deserialize_color_from_array"
    )]
    pub color: Color,
    pub effect: String,
    pub enable: bool,
    #[serde(rename = "type")]
    pub ty: EffectType,
    #[validate(range(min = 100))]
    pub duration_ms: Option<i32>,
}

impl Default for ForegroundEffect {
    fn default() -> Self {
        Self {
            enable: true,
            ty: EffectType::Effect,
            color: Color::from_components((255, 0, 0)),
            effect: "Rainbow swirl fast".to_owned(),
            duration_ms: Some(3000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct BackgroundEffect {
    #[serde(
        serialize_with = "crate::serde::serialize_color_as_array",
        deserialize_with = "crate::serde::deserialize_color_from_array"
    )]
    pub color: Color,
    pub effect: String,
    pub enable: bool,
    #[serde(rename = "type")]
    pub ty: EffectType,
}

impl Default for BackgroundEffect {
    fn default() -> Self {
        Self {
            enable: false,
            ty: EffectType::Effect,
            color: Color::from_components((255, 138, 0)),
            effect: "Warm mood blobs".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", deny_unknown_fields)]
pub enum ColorOrder {
    Rgb,
    Bgr,
    Rbg,
    Brg,
    Gbr,
    Grb,
}

impl ColorOrder {
    pub fn reorder_from_rgb(self, color: Color) -> Color {
        let (r, g, b) = color.into_components();

        Color::from_components(match self {
            ColorOrder::Rgb => (r, g, b),
            ColorOrder::Bgr => (b, g, r),
            ColorOrder::Rbg => (r, b, g),
            ColorOrder::Brg => (b, r, g),
            ColorOrder::Gbr => (g, b, r),
            ColorOrder::Grb => (g, r, b),
        })
    }

    /// The permutation undoing this one
    pub fn inverse(self) -> Self {
        match self {
            ColorOrder::Rgb => ColorOrder::Rgb,
            ColorOrder::Bgr => ColorOrder::Bgr,
            ColorOrder::Rbg => ColorOrder::Rbg,
            ColorOrder::Brg => ColorOrder::Gbr,
            ColorOrder::Gbr => ColorOrder::Brg,
            ColorOrder::Grb => ColorOrder::Grb,
        }
    }
}

impl Default for ColorOrder {
    fn default() -> Self {
        Self::Rgb
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_scan_range"))]
#[serde(default, deny_unknown_fields)]
pub struct Led {
    #[validate(range(min = 0., max = 1.))]
    pub hmin: f32,
    #[validate(range(min = 0., max = 1.))]
    pub hmax: f32,
    #[validate(range(min = 0., max = 1.))]
    pub vmin: f32,
    #[validate(range(min = 0., max = 1.))]
    pub vmax: f32,
    pub group: i32,
    pub disabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_order: Option<ColorOrder>,
}

impl Default for Led {
    fn default() -> Self {
        Self {
            hmin: 0.,
            hmax: 1.,
            vmin: 0.,
            vmax: 1.,
            group: 0,
            disabled: false,
            color_order: None,
        }
    }
}

/// Validate the bounds of a scan range
fn validate_scan_range(led: &Led) -> Result<(), validator::ValidationError> {
    if led.hmin > led.hmax {
        return Err(validator::ValidationError::new("invalid_range"));
    }

    if led.vmin > led.vmax {
        return Err(validator::ValidationError::new("invalid_range"));
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq, Validate)]
pub struct Leds {
    #[validate(length(min = 1), nested)]
    pub leds: Vec<Led>,
}

impl Default for Leds {
    fn default() -> Self {
        Self {
            leds: vec![Led::default()],
        }
    }
}

impl serde::Serialize for Leds {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeSeq;
        let mut seq = serializer.serialize_seq(Some(self.leds.len()))?;
        for led in &self.leds {
            seq.serialize_element(led)?;
        }
        seq.end()
    }
}

impl<'de> serde::Deserialize<'de> for Leds {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(Leds {
            leds: <Vec<Led> as serde::Deserialize>::deserialize(deserializer)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct VideoMemoryManager {
    pub enable: bool,
    /// Maximum number of frame buffers kept for reuse
    #[validate(range(min = 1, max = 256))]
    pub buffer_size: u32,
}

impl Default for VideoMemoryManager {
    fn default() -> Self {
        Self {
            enable: true,
            buffer_size: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct HdrToneMapping {
    pub enable: bool,
    /// Path to the zstd-compressed 3D LUT file
    pub lut_file: String,
}

impl Default for HdrToneMapping {
    fn default() -> Self {
        Self {
            enable: false,
            lut_file: "lut_lin_tables.3d.zst".to_owned(),
        }
    }
}

/// One settings subtree, as delivered to the components on change
#[derive(Debug, Clone, PartialEq, EnumDiscriminants, Serialize, Deserialize)]
#[strum_discriminants(name(SettingKind), derive(strum_macros::EnumString))]
pub enum SettingData {
    BackgroundEffect(BackgroundEffect),
    BlackBorderDetector(BlackBorderDetector),
    ColorAdjustment(ColorAdjustment),
    Device(Device),
    ForegroundEffect(ForegroundEffect),
    HdrToneMapping(HdrToneMapping),
    InstanceCapture(InstanceCapture),
    Leds(Leds),
    Smoothing(Smoothing),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InstanceConfig {
    #[validate(nested)]
    pub instance: Instance,
    #[validate(nested)]
    #[serde(default)]
    pub background_effect: BackgroundEffect,
    #[validate(nested)]
    #[serde(default)]
    pub black_border_detector: BlackBorderDetector,
    #[validate(nested)]
    #[serde(default)]
    pub color: ColorAdjustment,
    #[validate(nested)]
    #[serde(default)]
    pub device: Device,
    #[validate(nested)]
    #[serde(default)]
    pub foreground_effect: ForegroundEffect,
    #[validate(nested)]
    #[serde(default)]
    pub hdr: HdrToneMapping,
    #[validate(nested)]
    #[serde(default)]
    pub instance_capture: InstanceCapture,
    #[validate(nested)]
    #[serde(default)]
    pub leds: Leds,
    #[validate(nested)]
    #[serde(default)]
    pub smoothing: Smoothing,
}

impl InstanceConfig {
    pub fn new_dummy(id: i32) -> Self {
        Self {
            instance: Instance {
                id,
                friendly_name: "Dummy device".to_owned(),
                enabled: true,
            },
            background_effect: Default::default(),
            black_border_detector: Default::default(),
            color: Default::default(),
            device: Default::default(),
            foreground_effect: Default::default(),
            hdr: Default::default(),
            instance_capture: Default::default(),
            leds: Default::default(),
            smoothing: Default::default(),
        }
    }
}

/// Top-level settings document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    #[validate(nested)]
    #[serde(default)]
    pub video_memory_manager: VideoMemoryManager,
    #[validate(nested)]
    pub instances: Vec<InstanceConfig>,
}

impl Config {
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path)?;
        let config: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn led_defaults_cover_full_frame() {
        let led = Led::default();
        assert_eq!((led.hmin, led.hmax, led.vmin, led.vmax), (0., 1., 0., 1.));
        assert!(!led.disabled);
        assert_eq!(led.group, 0);
    }

    #[test]
    fn leds_roundtrip() {
        let leds = Leds {
            leds: vec![
                Led {
                    hmin: 0.,
                    hmax: 0.5,
                    vmin: 0.,
                    vmax: 0.1,
                    group: 2,
                    disabled: true,
                    color_order: Some(ColorOrder::Grb),
                },
                Led::default(),
            ],
        };

        let json = serde_json::to_string(&leds).unwrap();
        let back: Leds = serde_json::from_str(&json).unwrap();
        assert_eq!(leds, back);
    }

    #[test]
    fn mapping_type_ints() {
        assert_eq!(ImageToLedMappingType::MulticolorMean.to_int(), 0);
        assert_eq!(ImageToLedMappingType::UnicolorMean.to_int(), 1);
        assert_eq!(ImageToLedMappingType::Advanced.to_int(), 2);
        assert_eq!(ImageToLedMappingType::Weighted.to_int(), 3);
    }

    #[test]
    fn color_order_permutations() {
        let color = Color::from_components((1, 2, 3));
        assert_eq!(
            ColorOrder::Bgr.reorder_from_rgb(color).into_components(),
            (3, 2, 1)
        );
        assert_eq!(
            ColorOrder::Grb.reorder_from_rgb(color).into_components(),
            (2, 1, 3)
        );
        assert_eq!(
            ColorOrder::Rgb.reorder_from_rgb(color).into_components(),
            (1, 2, 3)
        );
    }

    #[test]
    fn color_order_inverse_roundtrip() {
        let color = Color::from_components((10, 20, 30));
        for order in [
            ColorOrder::Rgb,
            ColorOrder::Bgr,
            ColorOrder::Rbg,
            ColorOrder::Brg,
            ColorOrder::Gbr,
            ColorOrder::Grb,
        ]
        .iter()
        {
            assert_eq!(
                order.inverse().reorder_from_rgb(order.reorder_from_rgb(color)),
                color
            );
        }
    }
}
