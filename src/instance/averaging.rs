//! Frame to LED color reduction
//!
//! Materialized for a fixed geometry `(width, height, borders)`; the per-LED
//! pixel tables are precomputed so the per-frame loops only walk offsets.
//! The mapping type selects one of four specialized inner loops, this is the
//! hot path of the pipeline.

use crate::{
    image::{RawImage, CHANNELS},
    models::{Color, ImageToLedMappingType, Led},
};

/// Sparse mode samples at most this many pixels per LED
const SPARSE_PIXEL_TARGET: u32 = 64;

/// Dominant mode bins colors at 4 bits per channel
const DOMINANT_BINS: usize = 1 << 12;

pub struct ImageColorAveraging {
    width: u32,
    height: u32,
    horizontal_border: u32,
    vertical_border: u32,
    mapping_type: ImageToLedMappingType,
    /// Per-LED byte offsets of the sampled pixels; empty for disabled LEDs
    colors_map: Vec<Vec<u32>>,
}

impl ImageColorAveraging {
    pub fn new(
        mapping_type: ImageToLedMappingType,
        sparse_processing: bool,
        width: u32,
        height: u32,
        horizontal_border: u32,
        vertical_border: u32,
        leds: &[Led],
    ) -> Self {
        // A border can never eat more than half the frame
        let horizontal_border = horizontal_border.min(height.saturating_sub(1) / 2);
        let vertical_border = vertical_border.min(width.saturating_sub(1) / 2);

        let actual_width = width - 2 * vertical_border;
        let actual_height = height - 2 * horizontal_border;

        let colors_map = leds
            .iter()
            .map(|led| {
                if led.disabled {
                    return Vec::new();
                }

                let min_x = vertical_border + ((led.hmin * actual_width as f32) as u32)
                    .min(actual_width - 1);
                let max_x = vertical_border
                    + ((led.hmax * actual_width as f32).ceil() as u32).min(actual_width - 1);
                let min_y = horizontal_border + ((led.vmin * actual_height as f32) as u32)
                    .min(actual_height - 1);
                let max_y = horizontal_border
                    + ((led.vmax * actual_height as f32).ceil() as u32).min(actual_height - 1);

                let window_w = max_x - min_x + 1;
                let window_h = max_y - min_y + 1;

                let step = if sparse_processing {
                    let cells = window_w * window_h;
                    (((cells as f32 / SPARSE_PIXEL_TARGET as f32).sqrt()).ceil() as u32).max(1)
                } else {
                    1
                };

                let mut offsets =
                    Vec::with_capacity(((window_w / step + 1) * (window_h / step + 1)) as usize);
                let mut y = min_y;
                while y <= max_y {
                    let mut x = min_x;
                    while x <= max_x {
                        offsets.push((y * width + x) * CHANNELS as u32);
                        x += step;
                    }
                    y += step;
                }

                offsets
            })
            .collect();

        Self {
            width,
            height,
            horizontal_border,
            vertical_border,
            mapping_type,
            colors_map,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn horizontal_border(&self) -> u32 {
        self.horizontal_border
    }

    pub fn vertical_border(&self) -> u32 {
        self.vertical_border
    }

    /// Produce one color per LED
    ///
    /// `advanced` is the shared 256-entry square table used by the weighted
    /// mean. Disabled LEDs keep their previous value.
    pub fn process(&self, image: &RawImage, led_colors: &mut [Color], advanced: &[u32; 256]) {
        debug_assert_eq!(self.colors_map.len(), led_colors.len());

        match self.mapping_type {
            ImageToLedMappingType::MulticolorMean => self.process_mean(image, led_colors),
            ImageToLedMappingType::UnicolorMean => self.process_unicolor(image, led_colors),
            ImageToLedMappingType::Advanced => self.process_weighted(image, led_colors, advanced),
            ImageToLedMappingType::Weighted => self.process_dominant(image, led_colors),
        }
    }

    fn process_mean(&self, image: &RawImage, led_colors: &mut [Color]) {
        let data = image.data();

        for (offsets, value) in self.colors_map.iter().zip(led_colors.iter_mut()) {
            if offsets.is_empty() {
                continue;
            }

            let mut r_acc = 0u64;
            let mut g_acc = 0u64;
            let mut b_acc = 0u64;

            for &offset in offsets {
                let offset = offset as usize;
                r_acc += data[offset] as u64;
                g_acc += data[offset + 1] as u64;
                b_acc += data[offset + 2] as u64;
            }

            let cnt = offsets.len() as u64;
            *value = Color::new(
                (r_acc / cnt) as u8,
                (g_acc / cnt) as u8,
                (b_acc / cnt) as u8,
            );
        }
    }

    fn process_unicolor(&self, image: &RawImage, led_colors: &mut [Color]) {
        let data = image.data();

        let mut r_acc = 0u64;
        let mut g_acc = 0u64;
        let mut b_acc = 0u64;
        let mut cnt = 0u64;

        for y in self.horizontal_border..self.height - self.horizontal_border {
            let row = (y * self.width) as usize * CHANNELS;
            for x in self.vertical_border..self.width - self.vertical_border {
                let offset = row + x as usize * CHANNELS;
                r_acc += data[offset] as u64;
                g_acc += data[offset + 1] as u64;
                b_acc += data[offset + 2] as u64;
                cnt += 1;
            }
        }

        let color = Color::new(
            (r_acc / cnt.max(1)) as u8,
            (g_acc / cnt.max(1)) as u8,
            (b_acc / cnt.max(1)) as u8,
        );

        for (offsets, value) in self.colors_map.iter().zip(led_colors.iter_mut()) {
            if !offsets.is_empty() {
                *value = color;
            }
        }
    }

    fn process_weighted(&self, image: &RawImage, led_colors: &mut [Color], advanced: &[u32; 256]) {
        let data = image.data();

        for (offsets, value) in self.colors_map.iter().zip(led_colors.iter_mut()) {
            if offsets.is_empty() {
                continue;
            }

            let mut r_acc = 0u64;
            let mut g_acc = 0u64;
            let mut b_acc = 0u64;

            for &offset in offsets {
                let offset = offset as usize;
                r_acc += advanced[data[offset] as usize] as u64;
                g_acc += advanced[data[offset + 1] as usize] as u64;
                b_acc += advanced[data[offset + 2] as usize] as u64;
            }

            let cnt = offsets.len() as u64;
            *value = Color::new(
                ((r_acc / cnt) as f32).sqrt().min(255.) as u8,
                ((g_acc / cnt) as f32).sqrt().min(255.) as u8,
                ((b_acc / cnt) as f32).sqrt().min(255.) as u8,
            );
        }
    }

    fn process_dominant(&self, image: &RawImage, led_colors: &mut [Color]) {
        let data = image.data();

        for (offsets, value) in self.colors_map.iter().zip(led_colors.iter_mut()) {
            if offsets.is_empty() {
                continue;
            }

            let mut bins = [0u16; DOMINANT_BINS];
            let mut best_bin = 0usize;
            let mut best_count = 0u16;

            for &offset in offsets {
                let offset = offset as usize;
                let bin = ((data[offset] as usize >> 4) << 8)
                    | ((data[offset + 1] as usize >> 4) << 4)
                    | (data[offset + 2] as usize >> 4);

                bins[bin] += 1;
                // Strictly greater keeps the first bin reaching the count
                if bins[bin] > best_count {
                    best_count = bins[bin];
                    best_bin = bin;
                }
            }

            *value = Color::new(
                (((best_bin >> 8) as u8) << 4) | 8,
                ((((best_bin >> 4) & 0xf) as u8) << 4) | 8,
                (((best_bin & 0xf) as u8) << 4) | 8,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::PixelFormat;

    fn advanced_table() -> [u32; 256] {
        let mut table = [0u32; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            *entry = (i * i) as u32;
        }
        table
    }

    fn uniform_frame(width: u32, height: u32, color: Color) -> RawImage {
        let mut image = RawImage::allocate(width, height, PixelFormat::Rgb24);
        image.fill(color);
        image
    }

    fn strip_layout(count: usize) -> Vec<Led> {
        (0..count)
            .map(|i| Led {
                hmin: i as f32 / count as f32,
                hmax: (i + 1) as f32 / count as f32,
                vmin: 0.,
                vmax: 1.,
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn output_has_one_color_per_led() {
        let leds = strip_layout(10);
        let averaging = ImageColorAveraging::new(
            ImageToLedMappingType::MulticolorMean,
            false,
            64,
            48,
            0,
            0,
            &leds,
        );

        let mut colors = vec![Color::default(); 10];
        averaging.process(
            &uniform_frame(64, 48, Color::new(90, 60, 30)),
            &mut colors,
            &advanced_table(),
        );

        assert_eq!(colors.len(), 10);
        assert!(colors.iter().all(|c| *c == Color::new(90, 60, 30)));
    }

    #[test]
    fn uniform_frame_is_exact_for_all_algorithms() {
        let leds = strip_layout(4);
        let color = Color::new(120, 7, 255);
        let frame = uniform_frame(32, 32, color);
        let advanced = advanced_table();

        for mapping_type in [
            ImageToLedMappingType::MulticolorMean,
            ImageToLedMappingType::UnicolorMean,
            ImageToLedMappingType::Advanced,
        ]
        .iter()
        {
            let averaging =
                ImageColorAveraging::new(*mapping_type, false, 32, 32, 0, 0, &leds);
            let mut colors = vec![Color::default(); 4];
            averaging.process(&frame, &mut colors, &advanced);
            assert!(
                colors.iter().all(|c| *c == color),
                "mapping type {:?}",
                mapping_type
            );
        }
    }

    #[test]
    fn border_cells_are_excluded() {
        let leds = strip_layout(4);

        // Top/bottom 8 rows black, center red
        let mut frame = uniform_frame(64, 48, Color::new(0, 0, 0));
        for y in 8..40 {
            for x in 0..64 {
                frame.set_color(x, y, Color::new(250, 0, 0));
            }
        }

        let averaging = ImageColorAveraging::new(
            ImageToLedMappingType::MulticolorMean,
            false,
            64,
            48,
            8,
            0,
            &leds,
        );

        let mut colors = vec![Color::default(); 4];
        averaging.process(&frame, &mut colors, &advanced_table());

        for color in &colors {
            assert_eq!(*color, Color::new(250, 0, 0));
        }
    }

    #[test]
    fn unicolor_assigns_same_color_everywhere() {
        let leds = strip_layout(6);
        let mut frame = uniform_frame(60, 30, Color::new(0, 0, 0));
        // Left half white
        for y in 0..30 {
            for x in 0..30 {
                frame.set_color(x, y, Color::new(255, 255, 255));
            }
        }

        let averaging = ImageColorAveraging::new(
            ImageToLedMappingType::UnicolorMean,
            false,
            60,
            30,
            0,
            0,
            &leds,
        );

        let mut colors = vec![Color::default(); 6];
        averaging.process(&frame, &mut colors, &advanced_table());

        let first = colors[0];
        assert!(colors.iter().all(|c| *c == first));
        // Half white, half black
        assert_eq!(first.red, 127);
    }

    #[test]
    fn dominant_picks_majority_bin() {
        let leds = strip_layout(1);
        let mut frame = uniform_frame(30, 30, Color::new(200, 16, 16));
        // Minority stripe
        for y in 0..8 {
            for x in 0..30 {
                frame.set_color(x, y, Color::new(16, 200, 16));
            }
        }

        let averaging = ImageColorAveraging::new(
            ImageToLedMappingType::Weighted,
            false,
            30,
            30,
            0,
            0,
            &leds,
        );

        let mut colors = vec![Color::default(); 1];
        averaging.process(&frame, &mut colors, &advanced_table());

        // Bin center of (200, 16, 16)
        assert_eq!(colors[0], Color::new(0xc8, 0x18, 0x18));
    }

    #[test]
    fn disabled_leds_are_never_written() {
        let mut leds = strip_layout(3);
        leds[1].disabled = true;

        let averaging = ImageColorAveraging::new(
            ImageToLedMappingType::MulticolorMean,
            false,
            16,
            16,
            0,
            0,
            &leds,
        );

        let sentinel = Color::new(1, 2, 3);
        let mut colors = vec![sentinel; 3];
        averaging.process(
            &uniform_frame(16, 16, Color::new(99, 99, 99)),
            &mut colors,
            &advanced_table(),
        );

        assert_eq!(colors[1], sentinel);
        assert_eq!(colors[0], Color::new(99, 99, 99));
    }

    #[test]
    fn sparse_matches_dense_on_small_windows() {
        // Windows below the sparse pixel target sample every cell
        let leds = strip_layout(8);
        let mut frame = uniform_frame(16, 4, Color::new(0, 0, 0));
        for y in 0..4 {
            for x in 0..16 {
                frame.set_color(x, y, Color::new(x as u8 * 10, y as u8 * 20, 77));
            }
        }

        let dense = ImageColorAveraging::new(
            ImageToLedMappingType::MulticolorMean,
            false,
            16,
            4,
            0,
            0,
            &leds,
        );
        let sparse = ImageColorAveraging::new(
            ImageToLedMappingType::MulticolorMean,
            true,
            16,
            4,
            0,
            0,
            &leds,
        );

        let mut dense_colors = vec![Color::default(); 8];
        let mut sparse_colors = vec![Color::default(); 8];
        let advanced = advanced_table();
        dense.process(&frame, &mut dense_colors, &advanced);
        sparse.process(&frame, &mut sparse_colors, &advanced);

        assert_eq!(dense_colors, sparse_colors);
    }
}
