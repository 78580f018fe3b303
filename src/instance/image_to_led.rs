//! Owns the averaging unit and its geometry
//!
//! The border processor feeds back into the averaging geometry through
//! re-materialization only: whenever the frame size or the stable border
//! changes, a fresh [ImageColorAveraging] is built. The rebuild is
//! idempotent, there is no back-pointer between the two.

use crate::{
    image::{Image, RawImage},
    models::{self, Color, ImageToLedMappingType, LedString},
};

use super::{BlackBorderProcessor, ImageColorAveraging};

pub struct ImageToLedManager {
    led_string: LedString,
    border_processor: BlackBorderProcessor,
    averaging: Option<ImageColorAveraging>,
    mapping_type: ImageToLedMappingType,
    sparse_processing: bool,
    /// Square table shared with the weighted mean
    advanced: [u32; 256],
}

impl ImageToLedManager {
    pub fn new(led_string: LedString, config: &models::InstanceConfig) -> Self {
        let mut advanced = [0u32; 256];
        for (i, entry) in advanced.iter_mut().enumerate() {
            *entry = (i * i) as u32;
        }

        Self {
            led_string,
            border_processor: BlackBorderProcessor::new(config.black_border_detector.clone()),
            averaging: None,
            mapping_type: config.color.image_to_led_mapping_type,
            sparse_processing: config.color.sparse_processing,
            advanced,
        }
    }

    fn register_processing_unit(
        &mut self,
        width: u32,
        height: u32,
        horizontal_border: u32,
        vertical_border: u32,
    ) {
        if width > 0 && height > 0 {
            self.averaging = Some(ImageColorAveraging::new(
                self.mapping_type,
                self.sparse_processing,
                width,
                height,
                horizontal_border,
                vertical_border,
                self.led_string.leds(),
            ));
        } else {
            self.averaging = None;
        }
    }

    fn set_size(&mut self, width: u32, height: u32) {
        if let Some(averaging) = &self.averaging {
            if averaging.width() == width && averaging.height() == height {
                return;
            }
        }

        self.register_processing_unit(width, height, 0, 0);
    }

    pub fn set_led_string(&mut self, led_string: LedString) {
        self.led_string = led_string;

        if let Some(averaging) = &self.averaging {
            let (width, height) = (averaging.width(), averaging.height());
            self.register_processing_unit(width, height, 0, 0);
        }
    }

    /// Returns the new mapping type when it changed
    pub fn handle_color_settings(
        &mut self,
        config: &models::ColorAdjustment,
    ) -> Option<ImageToLedMappingType> {
        let changed = self.set_mapping_type(config.image_to_led_mapping_type);
        self.set_sparse_processing(config.sparse_processing);

        if changed {
            Some(self.mapping_type)
        } else {
            None
        }
    }

    pub fn handle_border_settings(&mut self, config: models::BlackBorderDetector) {
        self.border_processor.handle_settings_update(config);
    }

    pub fn set_mapping_type(&mut self, mapping_type: ImageToLedMappingType) -> bool {
        if self.mapping_type == mapping_type {
            return false;
        }

        debug!(mapping_type = ?mapping_type, "set led mapping type");
        self.mapping_type = mapping_type;

        if let Some(averaging) = &self.averaging {
            let (width, height) = (averaging.width(), averaging.height());
            self.register_processing_unit(width, height, 0, 0);
        }

        true
    }

    pub fn set_sparse_processing(&mut self, sparse_processing: bool) {
        if self.sparse_processing == sparse_processing {
            return;
        }

        self.sparse_processing = sparse_processing;

        if let Some(averaging) = &self.averaging {
            let (width, height) = (averaging.width(), averaging.height());
            self.register_processing_unit(width, height, 0, 0);
        }
    }

    pub fn set_border_user_enabled(&mut self, enable: bool) {
        self.border_processor.set_user_enabled(enable);
    }

    pub fn set_border_hard_disable(&mut self, disable: bool) {
        self.border_processor.set_hard_disable(disable);
    }

    pub fn border_enabled(&self) -> bool {
        self.border_processor.enabled()
    }

    fn verify_border(&mut self, image: &RawImage) {
        let has_border = self
            .averaging
            .as_ref()
            .map(|a| a.horizontal_border() != 0 || a.vertical_border() != 0)
            .unwrap_or(false);

        if !self.border_processor.enabled() && has_border {
            debug!("reset border");
            self.border_processor.process(image);
            self.register_processing_unit(image.width(), image.height(), 0, 0);
            return;
        }

        if self.border_processor.enabled() && self.border_processor.process(image) {
            let border = self.border_processor.current_border();

            if border.unknown {
                self.register_processing_unit(image.width(), image.height(), 0, 0);
            } else {
                self.register_processing_unit(
                    image.width(),
                    image.height(),
                    border.horizontal_size as _,
                    border.vertical_size as _,
                );
            }
        }
    }

    /// Reduce the frame to one color per LED
    ///
    /// Returns false when the frame had to be dropped because the geometry
    /// rebuild failed.
    pub fn process(&mut self, image: &RawImage, led_colors: &mut [Color]) -> bool {
        self.set_size(image.width(), image.height());
        self.verify_border(image);

        match &self.averaging {
            Some(averaging)
                if averaging.width() == image.width() && averaging.height() == image.height() =>
            {
                averaging.process(image, led_colors, &self.advanced);
                self.apply_color_order_overrides(led_colors);
                true
            }
            _ => {
                warn!(
                    width = %image.width(),
                    height = %image.height(),
                    "no averaging unit for frame geometry, dropping frame"
                );
                false
            }
        }
    }

    /// Pre-compensate per-LED color order overrides
    ///
    /// The driver applies the device-wide order to the whole frame, so an
    /// LED with its own order gets the device permutation undone here first.
    fn apply_color_order_overrides(&self, led_colors: &mut [Color]) {
        if !self
            .led_string
            .leds()
            .iter()
            .any(|led| led.color_order.is_some())
        {
            return;
        }

        let device_inverse = self.led_string.color_order().inverse();
        for (led, color) in self.led_string.leds().iter().zip(led_colors.iter_mut()) {
            if let Some(order) = led.color_order {
                if order != self.led_string.color_order() {
                    *color = device_inverse.reorder_from_rgb(order.reorder_from_rgb(*color));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::PixelFormat;
    use crate::models::{
        BlackBorderDetector, ColorOrder, InstanceConfig, Led, Leds,
    };

    fn manager_with(config: InstanceConfig, leds: Vec<Led>) -> ImageToLedManager {
        let led_string = LedString::new(&Leds { leds }, ColorOrder::Rgb).unwrap();
        ImageToLedManager::new(led_string, &config)
    }

    fn fast_border_config() -> InstanceConfig {
        let mut config = InstanceConfig::new_dummy(0);
        config.black_border_detector = BlackBorderDetector {
            unknown_frame_cnt: 2,
            border_frame_cnt: 2,
            max_inconsistent_cnt: 0,
            blur_remove_cnt: 0,
            ..Default::default()
        };
        config
    }

    fn letterboxed_frame(border: u32) -> RawImage {
        let mut image = RawImage::allocate(64, 48, PixelFormat::Rgb24);
        for y in border..48 - border {
            for x in 0..64 {
                image.set_color(x, y, Color::new(220, 10, 10));
            }
        }
        image
    }

    #[test]
    fn adapts_to_stable_border() {
        let leds = vec![
            // Sits inside the letterbox bar
            Led {
                hmin: 0.,
                hmax: 1.,
                vmin: 0.,
                vmax: 0.05,
                ..Default::default()
            },
        ];
        let mut manager = manager_with(fast_border_config(), leds);

        let frame = letterboxed_frame(12);
        let mut colors = vec![Color::default(); 1];

        for _ in 0..8 {
            assert!(manager.process(&frame, &mut colors));
        }

        // After the border settled, the top LED maps into the active region
        assert_eq!(colors[0], Color::new(220, 10, 10));
    }

    #[test]
    fn geometry_rebuild_on_resize() {
        let mut manager = manager_with(fast_border_config(), vec![Led::default()]);
        let mut colors = vec![Color::default(); 1];

        assert!(manager.process(&letterboxed_frame(0), &mut colors));

        let mut small = RawImage::allocate(32, 24, PixelFormat::Rgb24);
        small.fill(Color::new(5, 6, 7));
        assert!(manager.process(&small, &mut colors));
        assert_eq!(colors[0], Color::new(5, 6, 7));
    }

    #[test]
    fn disabling_border_resets_geometry() {
        let mut manager = manager_with(fast_border_config(), vec![Led::default()]);
        let mut colors = vec![Color::default(); 1];

        let frame = letterboxed_frame(12);
        for _ in 0..8 {
            manager.process(&frame, &mut colors);
        }
        assert!(manager
            .averaging
            .as_ref()
            .map(|a| a.horizontal_border() > 0)
            .unwrap());

        manager.set_border_user_enabled(false);
        manager.process(&frame, &mut colors);
        assert_eq!(manager.averaging.as_ref().unwrap().horizontal_border(), 0);
    }

    #[test]
    fn per_led_order_override_is_precompensated() {
        let leds = vec![
            Led {
                color_order: Some(ColorOrder::Bgr),
                ..Default::default()
            },
            Led::default(),
        ];
        let mut manager = manager_with(fast_border_config(), leds);
        manager.set_border_user_enabled(false);

        let mut frame = RawImage::allocate(8, 8, PixelFormat::Rgb24);
        frame.fill(Color::new(10, 20, 30));

        let mut colors = vec![Color::default(); 2];
        assert!(manager.process(&frame, &mut colors));

        // Device order is RGB here, so the override shows through directly
        assert_eq!(colors[0], Color::new(30, 20, 10));
        assert_eq!(colors[1], Color::new(10, 20, 30));
    }
}
