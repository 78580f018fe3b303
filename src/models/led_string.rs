use thiserror::Error;

use super::{ColorOrder, Led, Leds};

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("layout would produce zero leds")]
    Empty,
}

/// Runtime LED layout derived from the `leds` settings array and the device
/// color order
///
/// Construction clamps the scan fractions to [0, 1] and swaps inverted
/// ranges, so downstream consumers never see a malformed spec. Disabled LEDs
/// keep their index but never contribute to the output.
#[derive(Debug, Clone, PartialEq)]
pub struct LedString {
    leds: Vec<Led>,
    color_order: ColorOrder,
    has_disabled: bool,
}

impl LedString {
    pub fn new(config: &Leds, device_order: ColorOrder) -> Result<Self, LayoutError> {
        if config.leds.is_empty() {
            return Err(LayoutError::Empty);
        }

        let mut has_disabled = false;
        let leds = config
            .leds
            .iter()
            .map(|led| {
                let mut led = led.clone();
                led.hmin = led.hmin.max(0.).min(1.);
                led.hmax = led.hmax.max(0.).min(1.);
                led.vmin = led.vmin.max(0.).min(1.);
                led.vmax = led.vmax.max(0.).min(1.);

                // Fix if the user swapped min and max
                if led.hmin > led.hmax {
                    std::mem::swap(&mut led.hmin, &mut led.hmax);
                }
                if led.vmin > led.vmax {
                    std::mem::swap(&mut led.vmin, &mut led.vmax);
                }

                has_disabled |= led.disabled;
                led
            })
            .collect();

        Ok(Self {
            leds,
            color_order: device_order,
            has_disabled,
        })
    }

    pub fn leds(&self) -> &[Led] {
        &self.leds
    }

    pub fn len(&self) -> usize {
        self.leds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leds.is_empty()
    }

    pub fn color_order(&self) -> ColorOrder {
        self.color_order
    }

    /// Per-LED override, falling back to the device order
    pub fn color_order_for(&self, index: usize) -> ColorOrder {
        self.leds
            .get(index)
            .and_then(|led| led.color_order)
            .unwrap_or(self.color_order)
    }

    pub fn has_disabled(&self) -> bool {
        self.has_disabled
    }

    /// Coarse midpoint grid of the layout, used to pick image-to-led
    /// mapping parameters
    ///
    /// Each LED's midpoint is projected into 1000ths and deduplicated per
    /// axis. Axes whose ratio exceeds 2:1 are expanded on the minor axis,
    /// and the result is bounded to 80 per axis, rescaled proportionally.
    pub fn led_grid_size(&self) -> (u32, u32) {
        const GRID_LIMIT: u32 = 80;

        let mut mid_points_x: Vec<i32> = Vec::with_capacity(self.leds.len());
        let mut mid_points_y: Vec<i32> = Vec::with_capacity(self.leds.len());

        for led in &self.leds {
            mid_points_x.push((1000. * (led.hmin + led.hmax) / 2.) as i32);
            mid_points_y.push((1000. * (led.vmin + led.vmax) / 2.) as i32);
        }

        mid_points_x.sort_unstable();
        mid_points_x.dedup();
        mid_points_y.sort_unstable();
        mid_points_y.dedup();

        let mut width = mid_points_x.len() as u32;
        let mut height = mid_points_y.len() as u32;

        // Correct the grid in case it is malformed in width vs height
        if width > 2 * height {
            height = (width / 2).max(1);
        } else if 2 * width < height {
            width = (height / 2).max(1);
        }

        if width > GRID_LIMIT || height > GRID_LIMIT {
            let scale = (GRID_LIMIT as f32 / width as f32).min(GRID_LIMIT as f32 / height as f32);
            width = ((width as f32 * scale) as u32).max(1);
            height = ((height as f32 * scale) as u32).max(1);
        }

        (width, height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_layout(top: usize, bottom: usize) -> Leds {
        let mut leds = Vec::new();
        for i in 0..top {
            leds.push(Led {
                hmin: i as f32 / top as f32,
                hmax: (i + 1) as f32 / top as f32,
                vmin: 0.,
                vmax: 0.1,
                ..Default::default()
            });
        }
        for i in 0..bottom {
            leds.push(Led {
                hmin: i as f32 / bottom as f32,
                hmax: (i + 1) as f32 / bottom as f32,
                vmin: 0.9,
                vmax: 1.,
                ..Default::default()
            });
        }
        Leds { leds }
    }

    #[test]
    fn rejects_empty_layout() {
        assert!(LedString::new(&Leds { leds: vec![] }, ColorOrder::Rgb).is_err());
    }

    #[test]
    fn clamps_and_swaps_ranges() {
        let leds = Leds {
            leds: vec![Led {
                hmin: 1.2,
                hmax: -0.5,
                vmin: 0.8,
                vmax: 0.2,
                ..Default::default()
            }],
        };

        let led_string = LedString::new(&leds, ColorOrder::Rgb).unwrap();
        let led = &led_string.leds()[0];
        assert_eq!((led.hmin, led.hmax), (0., 1.));
        assert_eq!((led.vmin, led.vmax), (0.2, 0.8));
    }

    #[test]
    fn grid_size_expands_minor_axis() {
        // 60 distinct X midpoints, 2 distinct Y midpoints
        let led_string = LedString::new(&frame_layout(60, 60), ColorOrder::Rgb).unwrap();
        let (w, h) = led_string.led_grid_size();
        assert_eq!(w, 60);
        assert_eq!(h, 30);
    }

    #[test]
    fn grid_size_bounded_to_80() {
        let mut leds = Vec::new();
        for i in 0..200 {
            leds.push(Led {
                hmin: i as f32 / 200.,
                hmax: (i + 1) as f32 / 200.,
                vmin: 0.,
                vmax: 0.05,
                ..Default::default()
            });
        }
        let led_string = LedString::new(&Leds { leds }, ColorOrder::Rgb).unwrap();
        let (w, h) = led_string.led_grid_size();
        assert!(w <= 80 && h <= 80);
        assert_eq!(w, 80);
    }

    #[test]
    fn per_led_color_order_override() {
        let leds = Leds {
            leds: vec![
                Led {
                    color_order: Some(ColorOrder::Grb),
                    ..Default::default()
                },
                Led::default(),
            ],
        };
        let led_string = LedString::new(&leds, ColorOrder::Bgr).unwrap();
        assert_eq!(led_string.color_order_for(0), ColorOrder::Grb);
        assert_eq!(led_string.color_order_for(1), ColorOrder::Bgr);
    }
}
