use std::{fmt::Write, time};

use async_trait::async_trait;
use chrono::Utc;
use tokio::{fs::File, io::AsyncWriteExt};

use super::{common::*, DeviceError};
use crate::models;

pub struct FileDevice {
    leds: Vec<models::Color>,
    file_handle: File,
    last_write_time: time::Instant,
    str_buf: String,
}

#[async_trait]
impl WritingDevice for FileDevice {
    type Config = models::File;

    fn new(config: &Self::Config) -> Result<Self, DeviceError> {
        let file_handle = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.output)?;

        Ok(Self {
            leds: vec![Default::default(); config.hardware_led_count as _],
            file_handle: File::from_std(file_handle),
            last_write_time: time::Instant::now(),
            str_buf: String::new(),
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
        self.str_buf.clear();

        if config.print_time_stamp {
            let now = Utc::now();
            let elapsed_time_ms = self.last_write_time.elapsed().as_millis();
            self.last_write_time = time::Instant::now();

            write!(self.str_buf, "{} | +{}", now, elapsed_time_ms)?;
        }

        write!(self.str_buf, " [")?;
        for led in &self.leds {
            write!(self.str_buf, "{{{},{},{}}}", led.red, led.green, led.blue)?;
        }
        writeln!(self.str_buf, "]")?;

        self.file_handle.write_all(self.str_buf.as_bytes()).await?;
        self.file_handle.flush().await?;

        Ok(self.str_buf.len())
    }
}
