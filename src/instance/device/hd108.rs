use async_trait::async_trait;
use byteorder::{BigEndian, ByteOrder};
use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};

use super::{common::*, DeviceError};
use crate::models;

const START_FRAME_SIZE: usize = 4;
/// 16-bit control word plus three 16-bit channels
const BYTES_PER_LED: usize = 8;

pub struct Hd108Device {
    dev: Spidev,
    buf: Vec<u8>,
}

#[async_trait]
impl WritingDevice for Hd108Device {
    type Config = models::Hd108;

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

        info!(path = %config.output, "initialized HD108 SPI device");

        Ok(Self { dev, buf })
    }

    async fn set_led_data(
        &mut self,
        config: &Self::Config,
        led_data: &[models::Color],
    ) -> Result<(), DeviceError> {
        let level = (config.global_brightness.min(31)) as u16;
        // Start bit plus the same 5-bit current level on all three channels
        let control = 0x8000 | (level << 10) | (level << 5) | level;

        for (led, color) in led_data.iter().enumerate() {
            let (r, g, b) = config.color_order.reorder_from_rgb(*color).into_components();
            let offset = START_FRAME_SIZE + led * BYTES_PER_LED;

            // 8-bit components expanded to 16 bits, big-endian on the wire
            BigEndian::write_u16(&mut self.buf[offset..], control);
            BigEndian::write_u16(&mut self.buf[offset + 2..], ((r as u16) << 8) | r as u16);
            BigEndian::write_u16(&mut self.buf[offset + 4..], ((g as u16) << 8) | g as u16);
            BigEndian::write_u16(&mut self.buf[offset + 6..], ((b as u16) << 8) | b as u16);
        }

        Ok(())
    }

    async fn write(&mut self, _config: &Self::Config) -> Result<usize, DeviceError> {
        let mut transfer = SpidevTransfer::write(&self.buf);
        self.dev.transfer(&mut transfer)?;
        Ok(self.buf.len())
    }
}
