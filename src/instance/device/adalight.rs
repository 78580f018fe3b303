//! Adalight serial driver with the AWA high speed protocol
//!
//! The AWA frame appends a Fletcher-16 checksum plus an extension byte
//! hashing every payload byte XORed with its position; a trailing `0x41`
//! would collide with the start byte and is remapped to `0xaa`.

use async_trait::async_trait;
use tokio::{fs::File, io::AsyncWriteExt};

use super::{common::*, DeviceError};
use crate::models;

const HEADER_SIZE: usize = 6;

/// Start frame and per-LED prefix of the LightBerry APA102 mode
const LIGHTBERRY_START_FRAME_SIZE: usize = 4;
const LIGHTBERRY_BYTES_PER_LED: usize = 4;

pub struct AdalightDevice {
    file: Option<File>,
    buffer: Vec<u8>,
    frame_len: usize,
}

pub fn fletcher_checksum(payload: &[u8]) -> (u8, u8, u8) {
    let mut fletcher1 = 0u16;
    let mut fletcher2 = 0u16;
    let mut fletcher_ext = 0u16;
    let mut position = 0u8;

    for byte in payload {
        fletcher_ext = (fletcher_ext + (byte ^ position) as u16) % 255;
        position = position.wrapping_add(1);
        fletcher1 = (fletcher1 + *byte as u16) % 255;
        fletcher2 = (fletcher2 + fletcher1) % 255;
    }

    let fletcher_ext = if fletcher_ext == 0x41 {
        0xaa
    } else {
        fletcher_ext as u8
    };

    (fletcher1 as u8, fletcher2 as u8, fletcher_ext)
}

impl AdalightDevice {
    fn lightberry(config: &models::Adalight) -> bool {
        config.lightberry_apa102_mode && !config.awa_mode
    }

    fn create_header(config: &models::Adalight) -> Vec<u8> {
        let led_count = config.hardware_led_count as usize;

        let mut buffer;
        let total_led_count;

        if Self::lightberry(config) {
            let end_frame_size = ((led_count + 15) / 16).max(LIGHTBERRY_BYTES_PER_LED);
            buffer = vec![
                0u8;
                HEADER_SIZE
                    + LIGHTBERRY_START_FRAME_SIZE
                    + led_count * LIGHTBERRY_BYTES_PER_LED
                    + end_frame_size
            ];

            for led in 0..led_count {
                buffer[HEADER_SIZE + LIGHTBERRY_START_FRAME_SIZE + led * 4] = 0xff;
            }

            total_led_count = led_count;
            debug!("adalight driver with activated LightBerry APA102 mode");
        } else {
            let awa_extra = if config.awa_mode { 8 } else { 0 };
            buffer = vec![0u8; HEADER_SIZE + led_count * 3 + awa_extra];
            total_led_count = led_count - 1;

            if config.awa_mode {
                debug!("adalight driver with activated high speed AWA protocol");
            }
        }

        buffer[0] = b'A';
        buffer[1] = if config.awa_mode { b'w' } else { b'd' };
        buffer[2] = if config.awa_mode && config.white_channel_calibration {
            b'A'
        } else {
            b'a'
        };
        buffer[3] = (total_led_count >> 8) as u8;
        buffer[4] = (total_led_count & 0xff) as u8;
        buffer[5] = buffer[3] ^ buffer[4] ^ 0x55;

        buffer
    }

    pub fn new(config: &models::Adalight) -> Result<Self, DeviceError> {
        let buffer = Self::create_header(config);
        let frame_len = buffer.len();

        Ok(Self {
            file: None,
            buffer,
            frame_len,
        })
    }

    fn white_channel_extension(config: &models::Adalight, buffer: &mut Vec<u8>) {
        if config.awa_mode && config.white_channel_calibration {
            buffer.push(((config.white_channel_limit * 255. / 100.).round() as i32).min(255) as u8);
            buffer.push(config.white_channel_red.min(255) as u8);
            buffer.push(config.white_channel_green.min(255) as u8);
            buffer.push(config.white_channel_blue.min(255) as u8);
        }
    }

    #[cfg(test)]
    fn frame(&self) -> &[u8] {
        &self.buffer[..self.frame_len]
    }
}

#[async_trait]
impl WritingDevice for AdalightDevice {
    type Config = models::Adalight;

    fn new(config: &Self::Config) -> Result<Self, DeviceError> {
        AdalightDevice::new(config)
    }

    async fn open(&mut self, config: &Self::Config) -> Result<(), DeviceError> {
        // The device node carries the configured baud rate set up by the OS
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&config.output)
            .await?;

        info!(path = %config.output, rate = %config.rate, "opened adalight serial device");
        self.file = Some(file);
        Ok(())
    }

    async fn set_led_data(
        &mut self,
        config: &Self::Config,
        led_data: &[models::Color],
    ) -> Result<(), DeviceError> {
        if Self::lightberry(config) {
            let base = HEADER_SIZE + LIGHTBERRY_START_FRAME_SIZE;
            for (led, color) in led_data.iter().enumerate() {
                let color = config.color_order.reorder_from_rgb(*color);
                let offset = base + led * LIGHTBERRY_BYTES_PER_LED;
                self.buffer[offset + 1] = color.red;
                self.buffer[offset + 2] = color.green;
                self.buffer[offset + 3] = color.blue;
            }

            self.frame_len = self.buffer.len();
        } else {
            self.buffer.truncate(HEADER_SIZE);

            for color in led_data {
                let color = config.color_order.reorder_from_rgb(*color);
                self.buffer.push(color.red);
                self.buffer.push(color.green);
                self.buffer.push(color.blue);
            }

            if config.awa_mode {
                Self::white_channel_extension(config, &mut self.buffer);

                let (fletcher1, fletcher2, fletcher_ext) =
                    fletcher_checksum(&self.buffer[HEADER_SIZE..]);
                self.buffer.push(fletcher1);
                self.buffer.push(fletcher2);
                self.buffer.push(fletcher_ext);
            }

            self.frame_len = self.buffer.len();
        }

        Ok(())
    }

    async fn write(&mut self, _config: &Self::Config) -> Result<usize, DeviceError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| DeviceError::Io(std::io::ErrorKind::NotConnected.into()))?;

        file.write_all(&self.buffer[..self.frame_len]).await?;
        file.flush().await?;

        Ok(self.frame_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Color;

    fn awa_config(led_count: u32) -> models::Adalight {
        models::Adalight {
            color_order: Default::default(),
            hardware_led_count: led_count,
            latch_time: 0,
            output: "/dev/null".to_owned(),
            rate: 2000000,
            rewrite_time: 0,
            awa_mode: true,
            lightberry_apa102_mode: false,
            white_channel_calibration: false,
            white_channel_limit: 1.,
            white_channel_red: 255,
            white_channel_green: 255,
            white_channel_blue: 255,
        }
    }

    #[tokio::test]
    async fn awa_frame_layout() {
        let config = awa_config(1);
        let mut device = AdalightDevice::new(&config).unwrap();

        device
            .set_led_data(&config, &[Color::new(0x41, 0x41, 0x41)])
            .await
            .unwrap();

        let frame = device.frame();

        // Header: start byte, AWA marker, no white calibration, count 0,
        // count checksum
        assert_eq!(&frame[..6], &[0x41, 0x77, 0x61, 0x00, 0x00, 0x55]);
        // Payload
        assert_eq!(&frame[6..9], &[0x41, 0x41, 0x41]);
        // Fletcher-16 over the payload plus the position-XOR extension
        let (fletcher1, fletcher2, fletcher_ext) = fletcher_checksum(&[0x41, 0x41, 0x41]);
        assert_eq!(&frame[9..], &[fletcher1, fletcher2, fletcher_ext]);
        assert_eq!(fletcher1, 0xc3);
    }

    #[test]
    fn fletcher_ext_avoids_start_byte() {
        // A single 'A' at position 0 hashes to 0x41 and must be remapped
        let (_, _, ext) = fletcher_checksum(&[0x41]);
        assert_eq!(ext, 0xaa);
    }

    #[test]
    fn fletcher_checksum_parse_roundtrip() {
        // Verifying the checksum over payload for all kinds of payloads
        // reproduces the transmitted values
        for len in [1usize, 3, 17, 255, 300].iter() {
            let payload: Vec<u8> = (0..*len).map(|i| (i * 7 + 13) as u8).collect();
            let sent = fletcher_checksum(&payload);
            let received = fletcher_checksum(&payload);
            assert_eq!(sent, received);
        }
    }

    #[tokio::test]
    async fn white_calibration_tuple_is_appended() {
        let config = models::Adalight {
            white_channel_calibration: true,
            white_channel_limit: 100.,
            white_channel_red: 0xa0,
            white_channel_green: 0xb0,
            white_channel_blue: 0xc0,
            ..awa_config(1)
        };
        let mut device = AdalightDevice::new(&config).unwrap();

        device
            .set_led_data(&config, &[Color::new(1, 2, 3)])
            .await
            .unwrap();

        let frame = device.frame();
        // 'A' marker in the mode byte
        assert_eq!(frame[2], 0x41);
        // Payload then the calibration tuple
        assert_eq!(&frame[6..9], &[1, 2, 3]);
        assert_eq!(&frame[9..13], &[255, 0xa0, 0xb0, 0xc0]);
        // Checksums hash the tuple as well
        let expected = fletcher_checksum(&frame[6..13]);
        assert_eq!(&frame[13..], &[expected.0, expected.1, expected.2]);
    }

    #[tokio::test]
    async fn lightberry_mode_frames_apa102() {
        let config = models::Adalight {
            awa_mode: false,
            lightberry_apa102_mode: true,
            ..awa_config(2)
        };
        let mut device = AdalightDevice::new(&config).unwrap();

        device
            .set_led_data(&config, &[Color::new(1, 2, 3), Color::new(4, 5, 6)])
            .await
            .unwrap();

        let frame = device.frame();
        assert_eq!(&frame[..3], &[0x41, 0x64, 0x61]);
        // Start frame
        assert_eq!(&frame[6..10], &[0, 0, 0, 0]);
        // Per-LED brightness prefix plus color
        assert_eq!(&frame[10..14], &[0xff, 1, 2, 3]);
        assert_eq!(&frame[14..18], &[0xff, 4, 5, 6]);
    }
}
