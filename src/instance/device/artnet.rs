//! Art-Net (UDP 6454) output
//!
//! One DMX universe carries at most 512 channels; fixtures never straddle a
//! universe boundary, so with 3 channels per fixture a universe rolls over
//! every 170 LEDs. The transmitted channel count is always even.

use async_trait::async_trait;
use byteorder::{BigEndian, ByteOrder};
use tokio::net::UdpSocket;

use super::{common::*, DeviceError};
use crate::models;

const ARTNET_DEFAULT_PORT: u16 = 6454;
const ARTNET_HEADER_SIZE: usize = 18;
const DMX_MAX: usize = 512;

pub struct ArtNetDevice {
    socket: Option<UdpSocket>,
    packets: Vec<Vec<u8>>,
    sequence: u8,
}

impl ArtNetDevice {
    fn prepare_header(packet: &mut [u8], universe: u16, channel_count: u16) {
        packet[..8].copy_from_slice(b"Art-Net\0");
        // OpOutput / OpDmx, low byte first
        packet[8] = 0x00;
        packet[9] = 0x50;
        // Protocol revision 14
        packet[10] = 0x00;
        packet[11] = 0x0e;
        // Sequence, patched at send time
        packet[12] = 0;
        // Physical
        packet[13] = 0;
        packet[14] = (universe & 0xff) as u8;
        packet[15] = ((universe >> 8) & 0x7f) as u8;
        BigEndian::write_u16(&mut packet[16..18], channel_count);
    }

    fn build_packets(config: &models::UdpArtNet, led_data: &[models::Color]) -> Vec<Vec<u8>> {
        let channels_per_fixture = config.channels_per_fixture.max(3) as usize;
        let fixtures_per_universe = (DMX_MAX / channels_per_fixture).max(1);

        led_data
            .chunks(fixtures_per_universe)
            .enumerate()
            .map(|(index, chunk)| {
                let universe = config.universe as u16 + index as u16;
                // Channel count must be even per the specification
                let mut channel_count = chunk.len() * channels_per_fixture;
                if channel_count & 0x1 != 0 {
                    channel_count += 1;
                }

                let mut packet = vec![0u8; ARTNET_HEADER_SIZE + channel_count];
                Self::prepare_header(&mut packet, universe, channel_count as u16);

                for (fixture, color) in chunk.iter().enumerate() {
                    let color = config.color_order.reorder_from_rgb(*color);
                    let offset = ARTNET_HEADER_SIZE + fixture * channels_per_fixture;
                    packet[offset] = color.red;
                    packet[offset + 1] = color.green;
                    packet[offset + 2] = color.blue;
                }

                packet
            })
            .collect()
    }

    fn target(config: &models::UdpArtNet) -> String {
        if config.output.contains(':') {
            config.output.clone()
        } else {
            format!("{}:{}", config.output, ARTNET_DEFAULT_PORT)
        }
    }
}

#[async_trait]
impl WritingDevice for ArtNetDevice {
    type Config = models::UdpArtNet;

    fn new(_config: &Self::Config) -> Result<Self, DeviceError> {
        Ok(Self {
            socket: None,
            packets: Vec::new(),
            sequence: 0,
        })
    }

    async fn open(&mut self, config: &Self::Config) -> Result<(), DeviceError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(Self::target(config)).await?;

        info!(target = %Self::target(config), "opened Art-Net output");
        self.socket = Some(socket);
        Ok(())
    }

    async fn set_led_data(
        &mut self,
        config: &Self::Config,
        led_data: &[models::Color],
    ) -> Result<(), DeviceError> {
        self.packets = Self::build_packets(config, led_data);
        Ok(())
    }

    async fn write(&mut self, _config: &Self::Config) -> Result<usize, DeviceError> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| DeviceError::Io(std::io::ErrorKind::NotConnected.into()))?;

        // 0x00 disables resequencing on the receiver, skip it
        self.sequence = self.sequence.checked_add(1).unwrap_or(1);

        let mut written = 0;
        for packet in &mut self.packets {
            packet[12] = self.sequence;
            written += socket.send(packet).await?;
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Color;

    fn config(led_count: u32) -> models::UdpArtNet {
        models::UdpArtNet {
            color_order: Default::default(),
            hardware_led_count: led_count,
            latch_time: 0,
            output: "127.0.0.1".to_owned(),
            rewrite_time: 0,
            universe: 1,
            channels_per_fixture: 3,
            disable_splitting: false,
        }
    }

    #[test]
    fn header_layout() {
        let packets = ArtNetDevice::build_packets(&config(1), &[Color::new(10, 20, 30)]);
        assert_eq!(packets.len(), 1);

        let packet = &packets[0];
        assert_eq!(&packet[..8], b"Art-Net\0");
        assert_eq!(&packet[8..10], &[0x00, 0x50]);
        assert_eq!(&packet[10..12], &[0x00, 0x0e]);
        assert_eq!(packet[14], 1);
        // 3 channels rounded up to 4
        assert_eq!(&packet[16..18], &[0, 4]);
        assert_eq!(&packet[18..21], &[10, 20, 30]);
    }

    #[test]
    fn universe_rolls_over_every_170_leds() {
        let leds = vec![Color::new(1, 2, 3); 341];
        let packets = ArtNetDevice::build_packets(&config(341), &leds);

        // 170 + 170 + 1
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0][14], 1);
        assert_eq!(packets[1][14], 2);
        assert_eq!(packets[2][14], 3);

        // Full universes carry 510 channels
        assert_eq!(BigEndian::read_u16(&packets[0][16..18]), 510);
        assert_eq!(packets[0].len(), ARTNET_HEADER_SIZE + 510);
        // The tail universe carries one padded fixture
        assert_eq!(BigEndian::read_u16(&packets[2][16..18]), 4);
    }

    #[test]
    fn channel_count_is_always_even() {
        for count in 1..16u32 {
            let leds = vec![Color::new(1, 2, 3); count as usize];
            for packet in ArtNetDevice::build_packets(&config(count), &leds) {
                assert_eq!(BigEndian::read_u16(&packet[16..18]) % 2, 0);
            }
        }
    }
}
