use async_trait::async_trait;
use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};

use super::{common::*, DeviceError};
use crate::{
    color::{rgb_to_rgbw, RgbwChannelCorrection},
    models,
};

const SPI_BYTES_PER_COLOUR: usize = 4;
/// RGBW, four channels per LED
const SPI_BYTES_PER_LED: usize = 4 * SPI_BYTES_PER_COLOUR;
const SPI_FRAME_END_LATCH_BYTES: usize = 116;
const BITPAIR_TO_BYTE: [u8; 4] = [0b1000_1000, 0b1000_1100, 0b1100_1000, 0b1100_1100];

pub struct Sk6812SpiDevice {
    dev: Spidev,
    buf: Vec<u8>,
    correction: RgbwChannelCorrection,
}

impl Sk6812SpiDevice {
    fn encode_byte(buf: &mut [u8], offset: usize, value: u8, invert: bool) {
        let mut bits = value as u32;
        for j in (0..SPI_BYTES_PER_COLOUR).rev() {
            let byte = BITPAIR_TO_BYTE[(bits & 0x3) as usize];
            buf[offset + j] = if invert { !byte } else { byte };
            bits >>= 2;
        }
    }
}

#[async_trait]
impl WritingDevice for Sk6812SpiDevice {
    type Config = models::Sk6812Spi;

    fn new(config: &Self::Config) -> Result<Self, DeviceError> {
        let mut dev = Spidev::open(&config.output)?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(config.rate as _)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        dev.configure(&options)?;

        let buf = vec![
            if config.invert { 0xff } else { 0 };
            config.hardware_led_count as usize * SPI_BYTES_PER_LED + SPI_FRAME_END_LATCH_BYTES
        ];

        // Calibration tables only matter for the hyperserial algorithms
        let correction = RgbwChannelCorrection::prepare(config.white_algorithm, 0xff, 0xff, 0xff, 0xff);

        info!(path = %config.output, algorithm = ?config.white_algorithm, "initialized SK6812 SPI device");

        Ok(Self {
            dev,
            buf,
            correction,
        })
    }

    async fn set_led_data(
        &mut self,
        config: &Self::Config,
        led_data: &[models::Color],
    ) -> Result<(), DeviceError> {
        for (led, color) in led_data.iter().enumerate() {
            let color = config.color_order.reorder_from_rgb(*color);
            let rgbw = rgb_to_rgbw(color, config.white_algorithm, &self.correction);

            let base = led * SPI_BYTES_PER_LED;
            Self::encode_byte(&mut self.buf, base, rgbw.red, config.invert);
            Self::encode_byte(
                &mut self.buf,
                base + SPI_BYTES_PER_COLOUR,
                rgbw.green,
                config.invert,
            );
            Self::encode_byte(
                &mut self.buf,
                base + 2 * SPI_BYTES_PER_COLOUR,
                rgbw.blue,
                config.invert,
            );
            Self::encode_byte(
                &mut self.buf,
                base + 3 * SPI_BYTES_PER_COLOUR,
                rgbw.white,
                config.invert,
            );
        }

        Ok(())
    }

    async fn write(&mut self, _config: &Self::Config) -> Result<usize, DeviceError> {
        let mut transfer = SpidevTransfer::write(&self.buf);
        self.dev.transfer(&mut transfer)?;
        Ok(self.buf.len())
    }
}
