//! E1.31 (sACN, UDP 5568) output
//!
//! Layered ACN header of 126 bytes including the DMX start code; the
//! per-universe sequence number increases monotonically modulo 256 and a
//! universe rolls over every 170 LEDs.

use async_trait::async_trait;
use byteorder::{BigEndian, ByteOrder};
use tokio::net::UdpSocket;
use uuid::Uuid;

use super::{common::*, DeviceError};
use crate::models;

const E131_DEFAULT_PORT: u16 = 5568;
const E131_HEADER_SIZE: usize = 126;
const ACN_ID: [u8; 12] = *b"ASC-E1.17\0\0\0";
const VECTOR_ROOT_E131_DATA: u32 = 0x0000_0004;
const VECTOR_E131_DATA_PACKET: u32 = 0x0000_0002;
const VECTOR_DMP_SET_PROPERTY: u8 = 0x02;
/// 170 RGB LEDs fill the 510 usable channels of a universe
const LEDS_PER_UNIVERSE: usize = 170;

pub struct E131Device {
    socket: Option<UdpSocket>,
    cid: Uuid,
    packets: Vec<Vec<u8>>,
    sequence: u8,
}

impl E131Device {
    fn prepare_header(packet: &mut [u8], config: &models::UdpE131, cid: &Uuid, universe: u16) {
        let count = (packet.len() - E131_HEADER_SIZE) as u16;

        /* Root layer */
        BigEndian::write_u16(&mut packet[0..], 0x0010);
        BigEndian::write_u16(&mut packet[2..], 0);
        packet[4..16].copy_from_slice(&ACN_ID);
        BigEndian::write_u16(&mut packet[16..], 0x7000 | (110 + count));
        BigEndian::write_u32(&mut packet[18..], VECTOR_ROOT_E131_DATA);
        packet[22..38].copy_from_slice(cid.as_bytes());

        /* Frame layer */
        BigEndian::write_u16(&mut packet[38..], 0x7000 | (88 + count));
        BigEndian::write_u32(&mut packet[40..], VECTOR_E131_DATA_PACKET);
        let name = config.source_name.as_bytes();
        let name_len = name.len().min(63);
        packet[44..44 + name_len].copy_from_slice(&name[..name_len]);
        packet[108] = 100;
        BigEndian::write_u16(&mut packet[109..], 0);
        // Sequence number at 111, patched at send time
        packet[112] = 0;
        BigEndian::write_u16(&mut packet[113..], universe);

        /* DMP layer */
        BigEndian::write_u16(&mut packet[115..], 0x7000 | (11 + count));
        packet[117] = VECTOR_DMP_SET_PROPERTY;
        packet[118] = 0xa1;
        BigEndian::write_u16(&mut packet[119..], 0);
        BigEndian::write_u16(&mut packet[121..], 1);
        BigEndian::write_u16(&mut packet[123..], 1 + count);
        // DMX start code
        packet[125] = 0;
    }

    fn build_packets(
        config: &models::UdpE131,
        cid: &Uuid,
        led_data: &[models::Color],
    ) -> Vec<Vec<u8>> {
        led_data
            .chunks(LEDS_PER_UNIVERSE)
            .enumerate()
            .map(|(index, chunk)| {
                let universe = config.universe as u16 + index as u16;
                let mut packet = vec![0u8; E131_HEADER_SIZE + chunk.len() * 3];
                Self::prepare_header(&mut packet, config, cid, universe);

                for (led, color) in chunk.iter().enumerate() {
                    let color = config.color_order.reorder_from_rgb(*color);
                    let offset = E131_HEADER_SIZE + led * 3;
                    packet[offset] = color.red;
                    packet[offset + 1] = color.green;
                    packet[offset + 2] = color.blue;
                }

                packet
            })
            .collect()
    }

    fn target(config: &models::UdpE131) -> String {
        if config.output.contains(':') {
            config.output.clone()
        } else {
            format!("{}:{}", config.output, E131_DEFAULT_PORT)
        }
    }
}

#[async_trait]
impl WritingDevice for E131Device {
    type Config = models::UdpE131;

    fn new(config: &Self::Config) -> Result<Self, DeviceError> {
        let cid = if config.cid.is_empty() {
            let cid = Uuid::new_v4();
            debug!(cid = %cid, "e131 no CID configured, generated one");
            cid
        } else {
            config.cid.parse().map_err(|_| {
                DeviceError::InvalidConfig(format!("invalid E1.31 CID: {}", config.cid))
            })?
        };

        Ok(Self {
            socket: None,
            cid,
            packets: Vec::new(),
            sequence: 0,
        })
    }

    async fn open(&mut self, config: &Self::Config) -> Result<(), DeviceError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(Self::target(config)).await?;

        info!(target = %Self::target(config), cid = %self.cid, "opened E1.31 output");
        self.socket = Some(socket);
        Ok(())
    }

    async fn set_led_data(
        &mut self,
        config: &Self::Config,
        led_data: &[models::Color],
    ) -> Result<(), DeviceError> {
        self.packets = Self::build_packets(config, &self.cid, led_data);
        Ok(())
    }

    async fn write(&mut self, _config: &Self::Config) -> Result<usize, DeviceError> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| DeviceError::Io(std::io::ErrorKind::NotConnected.into()))?;

        self.sequence = self.sequence.wrapping_add(1);

        let mut written = 0;
        for packet in &mut self.packets {
            packet[111] = self.sequence;
            written += socket.send(packet).await?;
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Color;

    fn config(led_count: u32) -> models::UdpE131 {
        models::UdpE131 {
            color_order: Default::default(),
            hardware_led_count: led_count,
            latch_time: 0,
            output: "127.0.0.1".to_owned(),
            rewrite_time: 0,
            universe: 1,
            cid: "10fa3029-59a9-4f4a-a7e8-1b23a54a4255".to_owned(),
            source_name: "hyperhdr".to_owned(),
        }
    }

    #[test]
    fn header_layout() {
        let config = config(1);
        let cid: Uuid = config.cid.parse().unwrap();
        let packets = E131Device::build_packets(&config, &cid, &[Color::new(10, 20, 30)]);
        assert_eq!(packets.len(), 1);

        let packet = &packets[0];
        assert_eq!(packet.len(), E131_HEADER_SIZE + 3);
        assert_eq!(BigEndian::read_u16(&packet[0..]), 16);
        assert_eq!(&packet[4..16], &ACN_ID);
        assert_eq!(BigEndian::read_u16(&packet[16..]), 0x7000 | 113);
        assert_eq!(BigEndian::read_u32(&packet[18..]), VECTOR_ROOT_E131_DATA);
        assert_eq!(&packet[22..38], cid.as_bytes());
        assert_eq!(BigEndian::read_u16(&packet[38..]), 0x7000 | 91);
        assert_eq!(BigEndian::read_u32(&packet[40..]), VECTOR_E131_DATA_PACKET);
        assert_eq!(&packet[44..52], b"hyperhdr");
        assert_eq!(packet[108], 100);
        assert_eq!(BigEndian::read_u16(&packet[113..]), 1);
        assert_eq!(packet[117], VECTOR_DMP_SET_PROPERTY);
        assert_eq!(packet[118], 0xa1);
        assert_eq!(BigEndian::read_u16(&packet[123..]), 4);
        // Start code then the payload
        assert_eq!(packet[125], 0);
        assert_eq!(&packet[126..], &[10, 20, 30]);
    }

    #[test]
    fn universe_rollover() {
        let config = config(200);
        let cid: Uuid = config.cid.parse().unwrap();
        let leds = vec![Color::new(1, 2, 3); 200];
        let packets = E131Device::build_packets(&config, &cid, &leds);

        assert_eq!(packets.len(), 2);
        assert_eq!(BigEndian::read_u16(&packets[0][113..]), 1);
        assert_eq!(BigEndian::read_u16(&packets[1][113..]), 2);
        assert_eq!(packets[0].len(), E131_HEADER_SIZE + 510);
        assert_eq!(packets[1].len(), E131_HEADER_SIZE + 90);
    }

    #[test]
    fn invalid_cid_is_rejected() {
        let config = models::UdpE131 {
            cid: "not-a-uuid".to_owned(),
            ..config(1)
        };

        assert!(matches!(
            <E131Device as WritingDevice>::new(&config),
            Err(DeviceError::InvalidConfig(_))
        ));
    }
}
