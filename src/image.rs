use std::convert::TryFrom;

use thiserror::Error;

use crate::models::Color;

mod pool;
pub use pool::*;

/// Origin pixel format of a captured frame, retained for diagnostics
///
/// The pipeline only ever sees packed RGB; this tag records what the
/// grabber decoded the frame from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Yuyv,
    Nv12,
    I420,
    Mjpeg,
}

impl Default for PixelFormat {
    fn default() -> Self {
        Self::Rgb24
    }
}

/// An image which can be processed by the pipeline
pub trait Image {
    /// Width of the image in pixels
    fn width(&self) -> u32;

    /// Height of the image in pixels
    fn height(&self) -> u32;

    /// Get the color at the given coordinates, or None if out of range
    fn color_at(&self, x: u32, y: u32) -> Option<Color>;

    /// Get the color at the given coordinates
    ///
    /// # Safety
    ///
    /// The caller must guarantee `x < width() && y < height()`.
    unsafe fn color_at_unchecked(&self, x: u32, y: u32) -> Color;
}

#[derive(Debug, Clone, Error)]
pub enum RawImageError {
    #[error("invalid data ({data} bytes) for the given dimensions ({width} x {height} x {channels} = {expected})")]
    InvalidData {
        data: usize,
        width: usize,
        height: usize,
        channels: usize,
        expected: usize,
    },
}

/// Row-major packed RGB frame
///
/// Frames are shared by value after allocation; buffers come from the
/// process-global [VideoPool] and return to it on drop.
#[derive(Clone)]
pub struct RawImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
}

pub const CHANNELS: usize = 3;

impl RawImage {
    /// Allocate a frame of the given dimensions, reusing a pooled buffer
    /// when one of the right size is available
    pub fn allocate(width: u32, height: u32, format: PixelFormat) -> Self {
        let size = width as usize * height as usize * CHANNELS;
        let data = global_pool().request(size);

        Self {
            data,
            width,
            height,
            format,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Fill every pixel with the given color
    pub fn fill(&mut self, color: Color) {
        for pixel in self.data.chunks_exact_mut(CHANNELS) {
            pixel[0] = color.red;
            pixel[1] = color.green;
            pixel[2] = color.blue;
        }
    }

    pub fn set_color(&mut self, x: u32, y: u32, color: Color) {
        let offset = (y as usize * self.width as usize + x as usize) * CHANNELS;
        self.data[offset] = color.red;
        self.data[offset + 1] = color.green;
        self.data[offset + 2] = color.blue;
    }
}

impl Image for RawImage {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn color_at(&self, x: u32, y: u32) -> Option<Color> {
        if x >= self.width || y >= self.height {
            return None;
        }

        // Safety: bounds checked above
        Some(unsafe { self.color_at_unchecked(x, y) })
    }

    unsafe fn color_at_unchecked(&self, x: u32, y: u32) -> Color {
        let offset = (y as usize * self.width as usize + x as usize) * CHANNELS;
        Color::new(
            *self.data.get_unchecked(offset),
            *self.data.get_unchecked(offset + 1),
            *self.data.get_unchecked(offset + 2),
        )
    }
}

impl Drop for RawImage {
    fn drop(&mut self) {
        global_pool().release(std::mem::take(&mut self.data));
    }
}

impl std::fmt::Debug for RawImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut f = f.debug_struct("RawImage");
        f.field("width", &self.width);
        f.field("height", &self.height);
        f.field("format", &self.format);

        if self.data.len() > 32 {
            f.field("data", &format!("[{} bytes]", self.data.len()));
        } else {
            f.field("data", &self.data);
        }

        f.finish()
    }
}

impl TryFrom<(Vec<u8>, u32, u32)> for RawImage {
    type Error = RawImageError;

    fn try_from((data, width, height): (Vec<u8>, u32, u32)) -> Result<Self, Self::Error> {
        let expected = width as usize * height as usize * CHANNELS;

        if data.len() != expected {
            return Err(RawImageError::InvalidData {
                data: data.len(),
                width: width as _,
                height: height as _,
                channels: CHANNELS,
                expected,
            });
        }

        Ok(Self {
            data,
            width,
            height,
            format: PixelFormat::Rgb24,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryInto;

    #[test]
    fn rejects_mismatched_data() {
        let result: Result<RawImage, _> = (vec![0u8; 10], 2, 2).try_into();
        assert!(result.is_err());
    }

    #[test]
    fn color_access() {
        let mut image = RawImage::allocate(4, 4, PixelFormat::Rgb24);
        image.fill(Color::new(0, 0, 0));
        image.set_color(1, 2, Color::new(10, 20, 30));

        assert_eq!(image.color_at(1, 2), Some(Color::new(10, 20, 30)));
        assert_eq!(image.color_at(0, 0), Some(Color::new(0, 0, 0)));
        assert_eq!(image.color_at(4, 0), None);
    }
}
