//! Shared device bookkeeping
//!
//! [DeviceHarness] wraps one [WritingDevice] and owns everything the drivers
//! share: latch-time enforcement, the refresh (rewrite) timer, the enable
//! switch with power semantics and the retry state machine for failed
//! writes.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{DeviceError, DeviceImpl};
use crate::models::{self, DeviceConfig};

/// Writes past this many consecutive failures park the device in error
/// until the component is toggled
const MAX_WRITE_RETRY: u32 = 5;

const RETRY_BASE_INTERVAL: Duration = Duration::from_millis(500);

#[async_trait]
pub trait WritingDevice: Send + Sized {
    type Config: DeviceConfig;

    fn new(config: &Self::Config) -> Result<Self, DeviceError>;

    /// Acquire the OS resource backing the device
    async fn open(&mut self, _config: &Self::Config) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn set_led_data(
        &mut self,
        config: &Self::Config,
        led_data: &[models::Color],
    ) -> Result<(), DeviceError>;

    /// Produce the on-wire frame and transmit it
    ///
    /// Returns the number of bytes written.
    async fn write(&mut self, config: &Self::Config) -> Result<usize, DeviceError>;

    /// Power-on semantics, identity for dumb transports
    async fn switch_on(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn switch_off(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Snapshot device-side state before taking it over
    async fn store_state(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn restore_state(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

pub struct DeviceHarness<D: WritingDevice> {
    inner: D,
    config: D::Config,
    enabled: bool,
    in_error: bool,
    last_written: Vec<models::Color>,
    last_write_time: Option<Instant>,
    next_write_time: Option<Instant>,
    /// Refresh floor requested by the smoother
    smoothing_interval: Option<Duration>,
    retry_count: u32,
    next_retry_time: Option<Instant>,
    retry_paused: bool,
}

impl<D: WritingDevice> DeviceHarness<D> {
    pub async fn new(mut inner: D, config: D::Config) -> Result<Self, DeviceError> {
        inner.open(&config).await?;
        inner.store_state().await?;
        inner.switch_on().await?;

        Ok(Self {
            last_written: vec![Default::default(); config.hardware_led_count()],
            inner,
            config,
            enabled: true,
            in_error: false,
            last_write_time: None,
            next_write_time: None,
            smoothing_interval: None,
            retry_count: 0,
            next_retry_time: None,
            retry_paused: false,
        })
    }

    fn enter_error(&mut self, error: &DeviceError) {
        error!(error = %error, "device write failed");
        self.in_error = true;
        self.next_write_time = None;

        if self.retry_count < MAX_WRITE_RETRY {
            let backoff = RETRY_BASE_INTERVAL * 2u32.pow(self.retry_count);
            self.retry_count += 1;
            self.next_retry_time = Some(Instant::now() + backoff);
            info!(retry = %self.retry_count, backoff = ?backoff, "scheduling device retry");
        } else {
            // Stay in error until the component is toggled
            self.next_retry_time = None;
            error!("device retries exhausted");
        }
    }

    fn leave_error(&mut self) {
        if self.in_error {
            info!("device recovered");
        }

        self.in_error = false;
        self.retry_count = 0;
        self.next_retry_time = None;
    }

    async fn write(&mut self) -> Result<(), DeviceError> {
        match self.inner.write(&self.config).await {
            Ok(_) => {
                self.leave_error();
                self.last_write_time = Some(Instant::now());
                self.next_write_time = None;
                Ok(())
            }
            Err(error) => {
                self.enter_error(&error);
                // The error is consumed here so the pipeline keeps ticking
                Ok(())
            }
        }
    }

    async fn latching_write(&mut self) -> Result<(), DeviceError> {
        let latch_time = self.config.latch_time();
        if latch_time.is_zero() {
            self.write().await?;
        } else if let Some(lwt) = self.last_write_time {
            let now = Instant::now();
            let next_write_time = lwt + latch_time;

            if next_write_time < now {
                self.write().await?;
            } else {
                // Still latching, schedule the write
                self.next_write_time = Some(next_write_time);
            }
        } else {
            self.write().await?;
        }

        Ok(())
    }

    /// Refresh interval: the configured rewrite time, raised to the
    /// smoother's output interval when that is slower
    fn rewrite_interval(&self) -> Option<Duration> {
        match (self.config.rewrite_time(), self.smoothing_interval) {
            (Some(rewrite), Some(smoothing)) => Some(rewrite.max(smoothing)),
            (rewrite, _) => rewrite,
        }
    }
}

#[async_trait]
impl<D: WritingDevice> DeviceImpl for DeviceHarness<D> {
    async fn set_led_data(&mut self, led_data: &[models::Color]) -> Result<(), DeviceError> {
        self.last_written.copy_from_slice(led_data);

        if !self.enabled {
            return Ok(());
        }

        if self.in_error {
            // Keep the data, the retry timer will flush it
            return Ok(());
        }

        self.inner.set_led_data(&self.config, led_data).await?;
        self.latching_write().await?;
        Ok(())
    }

    async fn update(&mut self) -> Result<(), DeviceError> {
        // Retry takes precedence over everything else
        if self.in_error {
            match (self.next_retry_time, self.retry_paused) {
                (Some(next_retry_time), false) => {
                    let now = Instant::now();
                    if next_retry_time > now {
                        tokio::time::sleep_until(next_retry_time.into()).await;
                    }

                    let led_data = self.last_written.clone();
                    self.inner.set_led_data(&self.config, &led_data).await?;
                    self.next_retry_time = None;
                    self.write().await?;
                    return Ok(());
                }
                _ => return futures::future::pending().await,
            }
        }

        if !self.enabled {
            return futures::future::pending().await;
        }

        // Pending latched write
        if let Some(next_write_time) = self.next_write_time {
            let now = Instant::now();

            if next_write_time > now {
                tokio::time::sleep_until(next_write_time.into()).await;
            }

            self.write().await?;
            return Ok(());
        }

        // Periodic refresh for strips that require continuous updates
        if let Some(rewrite_interval) = self.rewrite_interval() {
            let now = Instant::now();
            let next_rewrite_time = self
                .last_write_time
                .map(|lwt| lwt + rewrite_interval)
                .unwrap_or(now);

            if next_rewrite_time > now {
                tokio::time::sleep_until(next_rewrite_time.into()).await;
            }

            let led_data = self.last_written.clone();
            self.inner.set_led_data(&self.config, &led_data).await?;
            self.latching_write().await?;

            Ok(())
        } else {
            futures::future::pending().await
        }
    }

    async fn write_black(&mut self, n: usize) -> Result<(), DeviceError> {
        let black = vec![models::Color::default(); self.config.hardware_led_count()];

        for _ in 0..n {
            self.inner.set_led_data(&self.config, &black).await?;
            if let Err(error) = self.inner.write(&self.config).await {
                warn!(error = %error, "black frame write failed");
                return Ok(());
            }
        }

        self.last_written.fill(Default::default());
        self.last_write_time = Some(Instant::now());
        Ok(())
    }

    async fn set_enabled(&mut self, enabled: bool) -> Result<(), DeviceError> {
        if self.enabled == enabled {
            return Ok(());
        }

        self.enabled = enabled;

        if enabled {
            // A component toggle also ends an exhausted error state
            self.leave_error();
            self.inner.switch_on().await?;

            let led_data = self.last_written.clone();
            self.inner.set_led_data(&self.config, &led_data).await?;
            self.latching_write().await?;
        } else {
            self.write_black(1).await?;
            self.inner.switch_off().await?;
            self.inner.restore_state().await?;
        }

        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn in_error(&self) -> bool {
        self.in_error
    }

    fn pause_retry_timer(&mut self, pause: bool) {
        self.retry_paused = pause;
    }

    fn smoothing_restarted(&mut self, interval: Duration) {
        self.smoothing_interval = Some(interval);
    }
}
