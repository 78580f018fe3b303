use async_trait::async_trait;
use thiserror::Error;

use crate::models::{self, DeviceConfig};

mod common;
use common::*;

// Device implementation modules

mod adalight;
mod apa102;
mod artnet;
mod dummy;
mod e131;
mod file;
mod hd108;
mod sk6812spi;
mod ws2812spi;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device not supported: {0}")]
    NotSupported(&'static str),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("format error: {0}")]
    FormatError(#[from] std::fmt::Error),
    #[error("invalid device config: {0}")]
    InvalidConfig(String),
}

#[async_trait]
trait DeviceImpl: Send {
    /// Set the device implementation's view of the LED data to the given values
    ///
    /// # Panics
    ///
    /// Implementations are allowed to panic if led_data.len() != hardware_led_count. The [Device]
    /// wrapper is responsible for ensuring the given slice is the right size.
    async fn set_led_data(&mut self, led_data: &[models::Color]) -> Result<(), DeviceError>;

    /// Update the device implementation's temporal data: latch writes,
    /// refresh rewrites and error retries.
    async fn update(&mut self) -> Result<(), DeviceError>;

    /// Emit `n` all-black frames, regardless of the enable state
    async fn write_black(&mut self, n: usize) -> Result<(), DeviceError>;

    async fn set_enabled(&mut self, enabled: bool) -> Result<(), DeviceError>;

    fn is_enabled(&self) -> bool;

    fn in_error(&self) -> bool;

    fn pause_retry_timer(&mut self, pause: bool);

    /// Synchronize the refresh timer with the smoother's output interval
    fn smoothing_restarted(&mut self, interval: std::time::Duration);
}

pub struct Device {
    name: String,
    inner: Box<dyn DeviceImpl>,
    led_data: Vec<models::Color>,
    notified_inconsistent_led_data: bool,
}

impl Device {
    async fn build_inner(config: models::Device) -> Result<Box<dyn DeviceImpl>, DeviceError> {
        let inner: Box<dyn DeviceImpl> = match config {
            models::Device::Dummy(dummy) => {
                Box::new(DeviceHarness::new(dummy::DummyDevice::new(&dummy)?, dummy).await?)
            }
            models::Device::File(file) => {
                Box::new(DeviceHarness::new(file::FileDevice::new(&file)?, file).await?)
            }
            models::Device::Adalight(adalight) => Box::new(
                DeviceHarness::new(adalight::AdalightDevice::new(&adalight)?, adalight).await?,
            ),
            models::Device::Apa102(apa102) => {
                Box::new(DeviceHarness::new(apa102::Apa102Device::new(&apa102)?, apa102).await?)
            }
            models::Device::Hd108(hd108) => {
                Box::new(DeviceHarness::new(hd108::Hd108Device::new(&hd108)?, hd108).await?)
            }
            models::Device::Ws2812Spi(ws2812spi) => Box::new(
                DeviceHarness::new(ws2812spi::Ws2812SpiDevice::new(&ws2812spi)?, ws2812spi)
                    .await?,
            ),
            models::Device::Sk6812Spi(sk6812spi) => Box::new(
                DeviceHarness::new(sk6812spi::Sk6812SpiDevice::new(&sk6812spi)?, sk6812spi)
                    .await?,
            ),
            models::Device::UdpArtNet(artnet) => Box::new(
                DeviceHarness::new(artnet::ArtNetDevice::new(&artnet)?, artnet).await?,
            ),
            models::Device::UdpE131(e131) => {
                Box::new(DeviceHarness::new(e131::E131Device::new(&e131)?, e131).await?)
            }
        };

        Ok(inner)
    }

    pub async fn new(name: &str, config: models::Device) -> Result<Self, DeviceError> {
        let led_count = config.hardware_led_count();
        let inner = Self::build_inner(config).await?;

        info!(name = %name, led_count = %led_count, "initialized led device");

        Ok(Self {
            name: name.to_owned(),
            inner,
            led_data: vec![Default::default(); led_count],
            notified_inconsistent_led_data: false,
        })
    }

    pub async fn set_led_data(&mut self, led_data: &[models::Color]) -> Result<(), DeviceError> {
        // Store the LED data for updates
        let led_count = led_data.len();
        let hw_led_count = self.led_data.len();

        if led_count == hw_led_count {
            self.led_data.copy_from_slice(led_data);
            self.notified_inconsistent_led_data = false;
        } else if led_count > hw_led_count {
            // Too much data, take only the slice that fits
            self.led_data.copy_from_slice(&led_data[..hw_led_count]);

            if !self.notified_inconsistent_led_data {
                self.notified_inconsistent_led_data = true;
                warn!(
                    "too much LED data for device: {} extra",
                    led_count - hw_led_count
                );
            }
        } else {
            // Not enough data, pad with zeros
            self.led_data[..led_count].copy_from_slice(led_data);
            self.led_data[led_count..].fill(Default::default());

            if !self.notified_inconsistent_led_data {
                self.notified_inconsistent_led_data = true;
                warn!(
                    "not enough LED data for device: {} missing",
                    hw_led_count - led_count
                );
            }
        }

        self.inner.set_led_data(&self.led_data).await
    }

    pub async fn update(&mut self) -> Result<(), DeviceError> {
        self.inner.update().await
    }

    /// Drive black frames, used on shutdown and disable
    pub async fn write_black(&mut self, n: usize) -> Result<(), DeviceError> {
        self.inner.write_black(n).await
    }

    pub async fn set_enabled(&mut self, enabled: bool) -> Result<(), DeviceError> {
        self.inner.set_enabled(enabled).await
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_enabled()
    }

    pub fn in_error(&self) -> bool {
        self.inner.in_error()
    }

    pub fn pause_retry_timer(&mut self, pause: bool) {
        self.inner.pause_retry_timer(pause);
    }

    pub fn smoothing_restarted(&mut self, interval: std::time::Duration) {
        self.inner.smoothing_restarted(interval);
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device").field("name", &self.name).finish()
    }
}
