//! HDR tone mapping through a 3D lookup table
//!
//! The table maps every 8-bit RGB triplet to its tone-mapped counterpart.
//! It is large (48 MB decompressed), so it is loaded lazily on the first
//! HDR-enabled frame, decompressed once and shared read-only afterwards.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::models::{Color, HdrToneMapping};

/// Bytes of one full 256^3 RGB mapping
pub const LUT_TABLE_SIZE: usize = 256 * 256 * 256 * 3;

#[derive(Debug, Error)]
pub enum LutError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid LUT size: {0} bytes, expected a multiple of {LUT_TABLE_SIZE}")]
    InvalidSize(usize),
}

pub struct Lut {
    enabled: bool,
    path: PathBuf,
    table: Option<Arc<Vec<u8>>>,
    load_failed: bool,
}

impl Lut {
    pub fn new(config: &HdrToneMapping) -> Self {
        Self {
            enabled: config.enable,
            path: PathBuf::from(&config.lut_file),
            table: None,
            load_failed: false,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && !self.load_failed
    }

    /// Read-only handle for worker threads
    pub fn table(&self) -> Option<Arc<Vec<u8>>> {
        self.table.clone()
    }

    fn load(&mut self) -> Result<(), LutError> {
        let file = std::fs::File::open(&self.path)?;
        let mut data = zstd::decode_all(std::io::BufReader::new(file))?;

        if data.len() < LUT_TABLE_SIZE || data.len() % LUT_TABLE_SIZE != 0 {
            return Err(LutError::InvalidSize(data.len()));
        }

        // Files may carry several tables (one per signal mode); the tone
        // mapping table comes first
        data.truncate(LUT_TABLE_SIZE);

        info!(path = ?self.path, "loaded HDR LUT");
        self.table = Some(Arc::new(data));
        Ok(())
    }

    /// Tone map the LED colors in place
    ///
    /// A missing or unreadable LUT disables tone mapping for the rest of the
    /// session; the frame itself is not dropped.
    pub fn apply(&mut self, led_data: &mut [Color]) {
        if !self.enabled || self.load_failed {
            return;
        }

        if self.table.is_none() {
            if let Err(error) = self.load() {
                warn!(error = %error, path = ?self.path, "HDR LUT unavailable, tone mapping disabled");
                self.load_failed = true;
                return;
            }
        }

        let table = self.table.as_ref().unwrap();
        for led in led_data.iter_mut() {
            *led = lookup(table, *led);
        }
    }

    #[cfg(test)]
    fn from_table(table: Vec<u8>) -> Self {
        Self {
            enabled: true,
            path: PathBuf::new(),
            table: Some(Arc::new(table)),
            load_failed: false,
        }
    }
}

#[inline]
pub fn lookup(table: &[u8], color: Color) -> Color {
    let index =
        ((color.red as usize) << 16 | (color.green as usize) << 8 | color.blue as usize) * 3;
    Color::new(table[index], table[index + 1], table[index + 2])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_table() -> Vec<u8> {
        let mut table = vec![0u8; LUT_TABLE_SIZE];
        for r in 0..256usize {
            for g in 0..256usize {
                for b in 0..256usize {
                    let index = (r << 16 | g << 8 | b) * 3;
                    table[index] = r as u8;
                    table[index + 1] = g as u8;
                    table[index + 2] = b as u8;
                }
            }
        }
        table
    }

    #[test]
    fn identity_lut_is_identity() {
        let mut lut = Lut::from_table(identity_table());
        let mut led_data = vec![Color::new(12, 200, 3), Color::new(255, 0, 128)];
        let expected = led_data.clone();

        lut.apply(&mut led_data);
        assert_eq!(led_data, expected);
    }

    #[test]
    fn missing_file_disables_mapping() {
        let mut lut = Lut::new(&HdrToneMapping {
            enable: true,
            lut_file: "/nonexistent/lut.3d.zst".to_owned(),
        });

        let mut led_data = vec![Color::new(1, 2, 3)];
        lut.apply(&mut led_data);

        assert!(!lut.is_enabled());
        assert_eq!(led_data[0], Color::new(1, 2, 3));
    }
}
