use async_trait::async_trait;
use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};

use super::{common::*, DeviceError};
use crate::models;

pub struct Ws2812SpiDevice {
    dev: Spidev,
    buf: Vec<u8>,
}

const SPI_BYTES_PER_COLOUR: usize = 4;
const SPI_BYTES_PER_LED: usize = 3 * SPI_BYTES_PER_COLOUR;
/// Keeps the line low for the >300 us reset latch
const SPI_FRAME_END_LATCH_BYTES: usize = 116;
/// Two payload bits per SPI byte, each expanded to `10` or `11` followed by
/// two low fill bits
const BITPAIR_TO_BYTE: [u8; 4] = [0b1000_1000, 0b1000_1100, 0b1100_1000, 0b1100_1100];

impl Ws2812SpiDevice {
    fn encode(buf: &mut [u8], led: usize, color: models::Color, invert: bool) {
        let (r, g, b) = color.into_components();
        let mut color_bits = ((r as u32) << 16) | ((g as u32) << 8) | (b as u32);

        let base = led * SPI_BYTES_PER_LED;
        for j in (0..SPI_BYTES_PER_LED).rev() {
            let byte = BITPAIR_TO_BYTE[(color_bits & 0x3) as usize];
            buf[base + j] = if invert { !byte } else { byte };
            color_bits >>= 2;
        }
    }
}

#[async_trait]
impl WritingDevice for Ws2812SpiDevice {
    type Config = models::Ws2812Spi;

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

        info!(path = %config.output, "initialized WS2812 SPI device");

        Ok(Self { dev, buf })
    }

    async fn set_led_data(
        &mut self,
        config: &Self::Config,
        led_data: &[models::Color],
    ) -> Result<(), DeviceError> {
        for (led, color) in led_data.iter().enumerate() {
            let color = config.color_order.reorder_from_rgb(*color);
            Self::encode(&mut self.buf, led, color, config.invert);
        }

        Ok(())
    }

    async fn write(&mut self, _config: &Self::Config) -> Result<usize, DeviceError> {
        let mut transfer = SpidevTransfer::write(&self.buf);
        self.dev.transfer(&mut transfer)?;
        Ok(self.buf.len())
    }
}
