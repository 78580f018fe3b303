use async_trait::async_trait;

use super::{common::*, DeviceError};
use crate::models;

/// Stand-in device printing frames to the log
pub struct DummyDevice {
    leds: Vec<models::Color>,
}

#[async_trait]
impl WritingDevice for DummyDevice {
    type Config = models::Dummy;

    fn new(config: &Self::Config) -> Result<Self, DeviceError> {
        Ok(Self {
            leds: vec![Default::default(); config.hardware_led_count as _],
        })
    }

    async fn set_led_data(
        &mut self,
        config: &Self::Config,
        led_data: &[models::Color],
    ) -> Result<(), DeviceError> {
        for (dst, led) in self.leds.iter_mut().zip(led_data.iter()) {
            *dst = config.color_order.reorder_from_rgb(*led);
        }
        Ok(())
    }

    async fn write(&mut self, config: &Self::Config) -> Result<usize, DeviceError> {
        use std::fmt::Write;

        let mut line = String::with_capacity(self.leds.len() * 16);
        match config.mode {
            models::DummyDeviceMode::Text => {
                for led in &self.leds {
                    write!(line, "{{{},{},{}}}", led.red, led.green, led.blue)?;
                }
            }
            models::DummyDeviceMode::Ansi => {
                for led in &self.leds {
                    write!(line, "\x1b[48;2;{};{};{}m  ", led.red, led.green, led.blue)?;
                }
                line.push_str("\x1b[0m");
            }
        }

        info!(leds = %line, "dummy device output");
        Ok(self.leds.len() * 3)
    }
}
