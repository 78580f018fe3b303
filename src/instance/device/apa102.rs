use async_trait::async_trait;
use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};

use super::{common::*, DeviceError};
use crate::models;

const START_FRAME_SIZE: usize = 4;
const BYTES_PER_LED: usize = 4;

pub struct Apa102Device {
    dev: Spidev,
    buf: Vec<u8>,
}

#[async_trait]
impl WritingDevice for Apa102Device {
    type Config = models::Apa102;

    fn new(config: &Self::Config) -> Result<Self, DeviceError> {
        let mut dev = Spidev::open(&config.output)?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(config.rate as _)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        dev.configure(&options)?;

        let led_count = config.hardware_led_count as usize;
        let end_frame_size = (led_count + 15) / 16;
        let buf = vec![0; START_FRAME_SIZE + led_count * BYTES_PER_LED + end_frame_size];

        info!(path = %config.output, "initialized APA102 SPI device");

        Ok(Self { dev, buf })
    }

    async fn set_led_data(
        &mut self,
        config: &Self::Config,
        led_data: &[models::Color],
    ) -> Result<(), DeviceError> {
        let brightness = 0xe0 | (config.brightness_level.min(31) as u8);

        for (led, color) in led_data.iter().enumerate() {
            let (r, g, b) = config.color_order.reorder_from_rgb(*color).into_components();
            let offset = START_FRAME_SIZE + led * BYTES_PER_LED;

            self.buf[offset] = brightness;
            self.buf[offset + 1] = b;
            self.buf[offset + 2] = g;
            self.buf[offset + 3] = r;
        }

        Ok(())
    }

    async fn write(&mut self, _config: &Self::Config) -> Result<usize, DeviceError> {
        let mut transfer = SpidevTransfer::write(&self.buf);
        self.dev.transfer(&mut transfer)?;
        Ok(self.buf.len())
    }
}
