use ambassador::{delegatable_trait, Delegate};
use derive_more::From;
use serde_derive::{Deserialize, Serialize};
use strum_macros::IntoStaticStr;
use validator::Validate;

use super::{default_false, ColorOrder};

#[delegatable_trait]
pub trait DeviceConfig: Sync + Send {
    fn hardware_led_count(&self) -> usize;

    fn color_order(&self) -> ColorOrder {
        ColorOrder::Rgb
    }

    fn rewrite_time(&self) -> Option<std::time::Duration> {
        None
    }

    fn latch_time(&self) -> std::time::Duration {
        Default::default()
    }
}

macro_rules! impl_device_config {
    ($t:ty) => {
        impl DeviceConfig for $t {
            fn hardware_led_count(&self) -> usize {
                self.hardware_led_count as _
            }

            fn color_order(&self) -> ColorOrder {
                self.color_order
            }

            fn rewrite_time(&self) -> Option<std::time::Duration> {
                if self.rewrite_time == 0 {
                    None
                } else {
                    Some(std::time::Duration::from_millis(self.rewrite_time as _))
                }
            }

            fn latch_time(&self) -> std::time::Duration {
                std::time::Duration::from_millis(self.latch_time as _)
            }
        }
    };
}

/// RGB to RGBW conversion algorithm
///
/// The conversion is pure and independent of the driver transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhiteAlgorithm {
    WhiteOff,
    SubtractMinimum,
    SubMinWarmAdjust,
    SubMinCoolAdjust,
    WledAuto,
    WledAutoMax,
    WledAutoAccurate,
    HyperserialColdWhite,
    HyperserialNeutralWhite,
    HyperserialCustom,
}

impl Default for WhiteAlgorithm {
    fn default() -> Self {
        Self::SubtractMinimum
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DummyDeviceMode {
    Text,
    Ansi,
}

impl Default for DummyDeviceMode {
    fn default() -> Self {
        Self::Text
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct Dummy {
    #[serde(default)]
    pub color_order: ColorOrder,
    #[validate(range(min = 1))]
    pub hardware_led_count: u32,
    pub rewrite_time: u32,
    pub latch_time: u32,
    pub mode: DummyDeviceMode,
}

impl_device_config!(Dummy);

impl Default for Dummy {
    fn default() -> Self {
        Self {
            color_order: Default::default(),
            hardware_led_count: 1,
            rewrite_time: 0,
            latch_time: 0,
            mode: Default::default(),
        }
    }
}

fn default_file_rewrite_time() -> u32 {
    1000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct File {
    #[serde(default)]
    pub color_order: ColorOrder,
    #[validate(range(min = 1))]
    pub hardware_led_count: u32,
    #[serde(default)]
    pub latch_time: u32,
    pub output: String,
    #[serde(default = "default_file_rewrite_time")]
    pub rewrite_time: u32,
    #[serde(default)]
    pub print_time_stamp: bool,
}

impl_device_config!(File);

fn default_adalight_rate() -> i32 {
    2000000
}

fn default_white_channel_limit() -> f32 {
    1.
}

fn default_white_channel() -> i32 {
    255
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Adalight {
    #[serde(default)]
    pub color_order: ColorOrder,
    #[validate(range(min = 1))]
    pub hardware_led_count: u32,
    #[serde(default)]
    pub latch_time: u32,
    /// Serial device node
    pub output: String,
    #[serde(default = "default_adalight_rate")]
    pub rate: i32,
    #[serde(default)]
    pub rewrite_time: u32,
    /// High speed AWA protocol with data integrity check
    #[serde(default = "default_false")]
    pub awa_mode: bool,
    #[serde(default = "default_false")]
    pub lightberry_apa102_mode: bool,
    /// Append the `{limit, r, g, b}` white calibration tuple (AWA mode only)
    #[serde(default = "default_false")]
    pub white_channel_calibration: bool,
    /// White channel limit, percent of full scale
    #[serde(default = "default_white_channel_limit")]
    #[validate(range(min = 0., max = 100.))]
    pub white_channel_limit: f32,
    #[serde(default = "default_white_channel")]
    #[validate(range(min = 0, max = 255))]
    pub white_channel_red: i32,
    #[serde(default = "default_white_channel")]
    #[validate(range(min = 0, max = 255))]
    pub white_channel_green: i32,
    #[serde(default = "default_white_channel")]
    #[validate(range(min = 0, max = 255))]
    pub white_channel_blue: i32,
}

impl_device_config!(Adalight);

fn default_spi_rate() -> i32 {
    1000000
}

fn default_brightness_level() -> u32 {
    31
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Apa102 {
    #[serde(default)]
    pub color_order: ColorOrder,
    #[validate(range(min = 1))]
    pub hardware_led_count: u32,
    #[serde(default)]
    pub latch_time: u32,
    pub output: String,
    #[serde(default = "default_spi_rate")]
    pub rate: i32,
    #[serde(default)]
    pub rewrite_time: u32,
    /// Global brightness field of the start byte (0..31)
    #[serde(default = "default_brightness_level")]
    #[validate(range(min = 1, max = 31))]
    pub brightness_level: u32,
}

impl_device_config!(Apa102);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Hd108 {
    #[serde(default)]
    pub color_order: ColorOrder,
    #[validate(range(min = 1))]
    pub hardware_led_count: u32,
    #[serde(default)]
    pub latch_time: u32,
    pub output: String,
    #[serde(default = "default_spi_rate")]
    pub rate: i32,
    #[serde(default)]
    pub rewrite_time: u32,
    /// Global 5-bit current level applied to all three channels
    #[serde(default = "default_brightness_level")]
    #[validate(range(min = 1, max = 31))]
    pub global_brightness: u32,
}

impl_device_config!(Hd108);

fn default_ws_spi_rate() -> i32 {
    3000000
}

fn default_ws_spi_rewrite_time() -> u32 {
    1000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Ws2812Spi {
    #[serde(default)]
    pub color_order: ColorOrder,
    #[validate(range(min = 1))]
    pub hardware_led_count: u32,
    #[serde(default = "default_false")]
    pub invert: bool,
    #[serde(default)]
    pub latch_time: u32,
    pub output: String,
    #[serde(default = "default_ws_spi_rate")]
    pub rate: i32,
    #[serde(default = "default_ws_spi_rewrite_time")]
    pub rewrite_time: u32,
}

impl_device_config!(Ws2812Spi);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Sk6812Spi {
    #[serde(default)]
    pub color_order: ColorOrder,
    #[validate(range(min = 1))]
    pub hardware_led_count: u32,
    #[serde(default = "default_false")]
    pub invert: bool,
    #[serde(default)]
    pub latch_time: u32,
    pub output: String,
    #[serde(default = "default_ws_spi_rate")]
    pub rate: i32,
    #[serde(default = "default_ws_spi_rewrite_time")]
    pub rewrite_time: u32,
    #[serde(default)]
    pub white_algorithm: WhiteAlgorithm,
}

impl_device_config!(Sk6812Spi);

fn default_artnet_universe() -> i32 {
    1
}

fn default_channels_per_fixture() -> i32 {
    3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UdpArtNet {
    #[serde(default)]
    pub color_order: ColorOrder,
    #[validate(range(min = 1))]
    pub hardware_led_count: u32,
    #[serde(default)]
    pub latch_time: u32,
    /// Target host, port defaults to 6454
    pub output: String,
    #[serde(default)]
    pub rewrite_time: u32,
    #[serde(default = "default_artnet_universe")]
    #[validate(range(min = 0, max = 32767))]
    pub universe: i32,
    #[serde(default = "default_channels_per_fixture")]
    #[validate(range(min = 1, max = 512))]
    pub channels_per_fixture: i32,
    #[serde(default = "default_false")]
    pub disable_splitting: bool,
}

impl_device_config!(UdpArtNet);

fn default_e131_source_name() -> String {
    "hyperhdr".to_owned()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UdpE131 {
    #[serde(default)]
    pub color_order: ColorOrder,
    #[validate(range(min = 1))]
    pub hardware_led_count: u32,
    #[serde(default)]
    pub latch_time: u32,
    /// Target host, port defaults to 5568
    pub output: String,
    #[serde(default)]
    pub rewrite_time: u32,
    #[serde(default = "default_artnet_universe")]
    #[validate(range(min = 1, max = 63999))]
    pub universe: i32,
    /// Sender CID; generated when empty
    #[serde(default)]
    pub cid: String,
    #[serde(default = "default_e131_source_name")]
    #[serde(rename = "source-name")]
    pub source_name: String,
}

impl_device_config!(UdpE131);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, IntoStaticStr, Delegate, From)]
#[serde(rename_all = "lowercase", tag = "type", deny_unknown_fields)]
#[delegate(DeviceConfig)]
pub enum Device {
    Dummy(Dummy),
    File(File),
    Adalight(Adalight),
    Apa102(Apa102),
    Hd108(Hd108),
    Ws2812Spi(Ws2812Spi),
    Sk6812Spi(Sk6812Spi),
    UdpArtNet(UdpArtNet),
    UdpE131(UdpE131),
}

impl Default for Device {
    fn default() -> Self {
        Self::Dummy(Dummy::default())
    }
}

impl Validate for Device {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        match self {
            Device::Dummy(device) => device.validate(),
            Device::File(device) => device.validate(),
            Device::Adalight(device) => device.validate(),
            Device::Apa102(device) => device.validate(),
            Device::Hd108(device) => device.validate(),
            Device::Ws2812Spi(device) => device.validate(),
            Device::Sk6812Spi(device) => device.validate(),
            Device::UdpArtNet(device) => device.validate(),
            Device::UdpE131(device) => device.validate(),
        }
    }
}
