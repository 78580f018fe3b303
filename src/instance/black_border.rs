//! Letterbox / pillarbox / OSD border detection
//!
//! The detector inspects single frames; the processor adds hysteresis so the
//! averaging geometry only follows borders that are stable across frames.

use crate::{image::Image, models};

/// A detected border
///
/// `horizontal_size` is the height of the top/bottom bars, `vertical_size`
/// the width of the left/right bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlackBorder {
    pub unknown: bool,
    pub horizontal_size: u16,
    pub vertical_size: u16,
}

impl BlackBorder {
    /// A border is only concrete when both axes settled on an inset
    fn detected(vertical: Option<u32>, horizontal: Option<u32>) -> Self {
        match (vertical, horizontal) {
            (Some(vertical), Some(horizontal)) => Self {
                unknown: false,
                horizontal_size: horizontal as _,
                vertical_size: vertical as _,
            },
            _ => Self::default(),
        }
    }

    /// Inflate non-zero borders to hide blurred transitions
    fn blur(&mut self, blur: u16) {
        if self.horizontal_size > 0 {
            self.horizontal_size += blur;
        }

        if self.vertical_size > 0 {
            self.vertical_size += blur;
        }
    }
}

impl Default for BlackBorder {
    fn default() -> Self {
        Self {
            unknown: true,
            horizontal_size: 0,
            vertical_size: 0,
        }
    }
}

/// Single-frame border detection at a fixed threshold
///
/// Every probe goes through the bounds-checked pixel accessor and a probe
/// outside the frame counts as black, so undersized frames degrade to an
/// unknown border instead of misreading pixels.
#[derive(Debug, Clone, Copy)]
pub struct BlackBorderDetector {
    threshold: u8,
}

impl BlackBorderDetector {
    /// `threshold` is the black fraction in [0, 1]
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: (threshold * 255.).ceil().max(0.).min(255.) as u8,
        }
    }

    fn non_black(&self, image: &impl Image, x: u32, y: u32) -> bool {
        image
            .color_at(x, y)
            .map(|color| {
                color.red >= self.threshold
                    || color.green >= self.threshold
                    || color.blue >= self.threshold
            })
            .unwrap_or(false)
    }

    pub fn process(&self, image: &impl Image, mode: models::BlackBorderDetectorMode) -> BlackBorder {
        match mode {
            models::BlackBorderDetectorMode::Default => self.process_default(image),
            models::BlackBorderDetectorMode::Classic => self.process_classic(image),
            models::BlackBorderDetectorMode::Osd => self.process_osd(image),
            models::BlackBorderDetectorMode::Letterbox => self.process_letterbox(image),
        }
    }

    /// Smallest column inset at which the picture leaves black
    ///
    /// The 1/3 and 2/3 rows are probed from the left edge, the center row
    /// from the right edge, so asymmetric pillarboxes still terminate the
    /// scan.
    fn scan_vertical(&self, image: &impl Image) -> Option<u32> {
        let third_w = image.width() / 3;
        let third_h = image.height() / 3;
        let last_column = image.width() - 1;
        let center_row = image.height() / 2;

        (0..third_w).find(|&inset| {
            self.non_black(image, inset, third_h)
                || self.non_black(image, inset, 2 * third_h)
                || self.non_black(image, last_column - inset, center_row)
        })
    }

    /// Smallest row inset, symmetric to [scan_vertical](Self::scan_vertical):
    /// 1/3 and 2/3 columns from the top, center column from the bottom
    fn scan_horizontal(&self, image: &impl Image) -> Option<u32> {
        let third_w = image.width() / 3;
        let third_h = image.height() / 3;
        let last_row = image.height() - 1;
        let center_column = image.width() / 2;

        (0..third_h).find(|&inset| {
            self.non_black(image, third_w, inset)
                || self.non_black(image, 2 * third_w, inset)
                || self.non_black(image, center_column, last_row - inset)
        })
    }

    fn process_default(&self, image: &impl Image) -> BlackBorder {
        BlackBorder::detected(self.scan_vertical(image), self.scan_horizontal(image))
    }

    /// Walks the top-left diagonal until it leaves black, then slides the
    /// hit point left and up as far as the picture content extends
    fn process_classic(&self, image: &impl Image) -> BlackBorder {
        let scan_w = image.width() / 3;
        let scan_h = image.height() / 3;

        let mut hit = None;
        for step in 0..scan_w.max(scan_h) {
            let (x, y) = (step.min(scan_w), step.min(scan_h));
            if self.non_black(image, x, y) {
                hit = Some((x, y));
                break;
            }
        }

        let (mut x, mut y) = match hit {
            Some(hit) => hit,
            None => return BlackBorder::default(),
        };

        while x > 0 && self.non_black(image, x - 1, y) {
            x -= 1;
        }
        while y > 0 && self.non_black(image, x, y - 1) {
            y -= 1;
        }

        BlackBorder::detected(Some(x), Some(y))
    }

    /// Top/bottom bars only
    ///
    /// The quarter columns probe both edges; the center column probes the
    /// top edge only, so captions rendered into the bottom bar don't fake a
    /// smaller border.
    fn process_letterbox(&self, image: &impl Image) -> BlackBorder {
        let quarter_w = image.width() / 4;
        let center_column = image.width() / 2;
        let last_row = image.height() - 1;

        for inset in 0..image.height() / 3 {
            if self.non_black(image, center_column, inset)
                || self.non_black(image, quarter_w, inset)
                || self.non_black(image, 3 * quarter_w, inset)
                || self.non_black(image, quarter_w, last_row - inset)
                || self.non_black(image, 3 * quarter_w, last_row - inset)
            {
                return BlackBorder::detected(Some(0), Some(inset));
            }
        }

        BlackBorder::default()
    }

    /// Locates the vertical border first, then probes the horizontal one
    /// only at that column and its mirror, so on-screen displays inside the
    /// picture can't shift the result
    fn process_osd(&self, image: &impl Image) -> BlackBorder {
        let vertical = self.scan_vertical(image);

        // Without a vertical hit the probes sit just outside the scanned
        // band, matching the widest plausible border
        let column = vertical.unwrap_or(image.width() / 3);
        let mirror_column = image.width() - 1 - column;
        let last_row = image.height() - 1;

        let horizontal = (0..image.height() / 3).find(|&inset| {
            self.non_black(image, column, inset)
                || self.non_black(image, column, last_row - inset)
                || self.non_black(image, mirror_column, inset)
                || self.non_black(image, mirror_column, last_row - inset)
        });

        BlackBorder::detected(vertical, horizontal)
    }
}

/// Debounces detected borders before exposing them to the averaging geometry
pub struct BlackBorderProcessor {
    config: models::BlackBorderDetector,
    detector: BlackBorderDetector,
    user_enabled: bool,
    hard_disabled: bool,
    enabled: bool,
    current_border: BlackBorder,
    previous_border: BlackBorder,
    consistent_cnt: u32,
    inconsistent_cnt: u32,
}

impl BlackBorderProcessor {
    pub fn new(config: models::BlackBorderDetector) -> Self {
        let detector = BlackBorderDetector::new(config.threshold.min(100) as f32 / 100.);
        let enabled = config.enable;

        Self {
            config,
            detector,
            user_enabled: enabled,
            hard_disabled: false,
            enabled,
            current_border: Default::default(),
            previous_border: Default::default(),
            consistent_cnt: 0,
            inconsistent_cnt: 0,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn current_border(&self) -> BlackBorder {
        self.current_border
    }

    pub fn handle_settings_update(&mut self, config: models::BlackBorderDetector) {
        self.detector = BlackBorderDetector::new(config.threshold.min(100) as f32 / 100.);
        self.set_user_enabled(config.enable);
        self.config = config;
    }

    /// User-level toggle (component state change)
    pub fn set_user_enabled(&mut self, enable: bool) {
        self.user_enabled = enable;
        if enable {
            if !self.hard_disabled {
                self.enabled = true;
            }
        } else {
            self.enabled = false;
        }
    }

    /// Non-user-overridable off state, used while an incompatible visible
    /// priority is active
    pub fn set_hard_disable(&mut self, disable: bool) {
        if disable {
            self.enabled = false;
        } else if self.user_enabled {
            // the user has the last word to enable
            self.enabled = true;
        }
        self.hard_disabled = disable;
    }

    fn update_border(&mut self, new_border: BlackBorder) -> bool {
        if new_border == self.previous_border {
            self.consistent_cnt += 1;
            self.inconsistent_cnt = 0;
        } else {
            self.inconsistent_cnt += 1;

            // Tolerate a few differing frames before tracking the newcomer
            if self.inconsistent_cnt <= self.config.max_inconsistent_cnt {
                return false;
            }

            self.previous_border = new_border;
            self.consistent_cnt = 0;
        }

        if self.current_border == new_border {
            self.inconsistent_cnt = 0;
            return false;
        }

        if new_border.unknown {
            if self.consistent_cnt >= self.config.unknown_frame_cnt {
                self.current_border = new_border;
                return true;
            }
        } else if self.current_border.unknown || self.consistent_cnt >= self.config.border_frame_cnt
        {
            self.current_border = new_border;
            return true;
        }

        false
    }

    /// Process the given image
    ///
    /// # Returns
    ///
    /// true if the exposed border changed, false otherwise
    pub fn process(&mut self, image: &impl Image) -> bool {
        if !self.enabled {
            let changed = !self.current_border.unknown;
            self.current_border = Default::default();
            return changed;
        }

        let mut image_border = self.detector.process(image, self.config.mode);
        image_border.blur(self.config.blur_remove_cnt);

        self.update_border(image_border)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{PixelFormat, RawImage};
    use crate::models::{BlackBorderDetector as DetectorConfig, BlackBorderDetectorMode, Color};

    /// 64x64 frame with the given top/bottom and left/right black bars
    fn bordered_frame(horizontal: u32, vertical: u32) -> RawImage {
        let mut image = RawImage::allocate(64, 64, PixelFormat::Rgb24);
        for y in 0..64 {
            for x in 0..64 {
                let inside =
                    y >= horizontal && y < 64 - horizontal && x >= vertical && x < 64 - vertical;
                if inside {
                    image.set_color(x, y, Color::new(200, 180, 160));
                }
            }
        }
        image
    }

    fn quick_config() -> DetectorConfig {
        DetectorConfig {
            unknown_frame_cnt: 2,
            border_frame_cnt: 2,
            max_inconsistent_cnt: 2,
            blur_remove_cnt: 0,
            ..Default::default()
        }
    }

    #[test]
    fn detects_letterbox_bars() {
        let detector = BlackBorderDetector::new(0.05);
        let border = detector.process(&bordered_frame(8, 0), BlackBorderDetectorMode::Default);

        assert!(!border.unknown);
        assert_eq!(border.horizontal_size, 8);
        assert_eq!(border.vertical_size, 0);
    }

    #[test]
    fn detects_pillarbox_bars() {
        let detector = BlackBorderDetector::new(0.05);
        let border = detector.process(&bordered_frame(0, 8), BlackBorderDetectorMode::Default);

        assert!(!border.unknown);
        assert_eq!(border.vertical_size, 8);
    }

    #[test]
    fn classic_mode_finds_symmetric_border() {
        let detector = BlackBorderDetector::new(0.05);
        let border = detector.process(&bordered_frame(6, 6), BlackBorderDetectorMode::Classic);

        assert!(!border.unknown);
        assert_eq!(border.horizontal_size, 6);
        assert_eq!(border.vertical_size, 6);
    }

    #[test]
    fn letterbox_mode_ignores_vertical_bars() {
        let detector = BlackBorderDetector::new(0.05);
        let border = detector.process(&bordered_frame(10, 4), BlackBorderDetectorMode::Letterbox);

        assert!(!border.unknown);
        assert_eq!(border.horizontal_size, 10);
        assert_eq!(border.vertical_size, 0);
    }

    #[test]
    fn osd_mode_matches_default_on_clean_frames() {
        let detector = BlackBorderDetector::new(0.05);
        let border = detector.process(&bordered_frame(8, 4), BlackBorderDetectorMode::Osd);

        assert!(!border.unknown);
        assert_eq!(border.horizontal_size, 8);
        assert_eq!(border.vertical_size, 4);
    }

    #[test]
    fn one_pixel_border_with_blur() {
        let mut processor = BlackBorderProcessor::new(DetectorConfig {
            blur_remove_cnt: 2,
            border_frame_cnt: 0,
            max_inconsistent_cnt: 0,
            ..quick_config()
        });

        let frame = bordered_frame(1, 1);
        processor.process(&frame);

        let border = processor.current_border();
        assert!(!border.unknown);
        assert_eq!(border.horizontal_size, 1 + 2);
        assert_eq!(border.vertical_size, 1 + 2);
    }

    #[test]
    fn fully_black_frame_goes_unknown() {
        let config = quick_config();
        let unknown_after = config.unknown_frame_cnt;
        let mut processor = BlackBorderProcessor::new(config);

        // Install a concrete border first
        let frame = bordered_frame(4, 0);
        for _ in 0..8 {
            processor.process(&frame);
        }
        assert!(!processor.current_border().unknown);

        let black = bordered_frame(64, 64);
        let mut changed_at = None;
        for i in 0..16 {
            if processor.process(&black) {
                changed_at = Some(i);
                break;
            }
        }

        assert!(processor.current_border().unknown);
        // max_inconsistent_cnt differing frames first, then the consistency run
        assert!(changed_at.unwrap() as u32 >= unknown_after);
    }

    #[test]
    fn hysteresis_ignores_transient_borders() {
        let mut processor = BlackBorderProcessor::new(DetectorConfig {
            max_inconsistent_cnt: 5,
            ..quick_config()
        });

        let stable = bordered_frame(4, 0);
        for _ in 0..8 {
            processor.process(&stable);
        }
        let installed = processor.current_border();

        // A couple of glitched frames must not move the border
        let glitch = bordered_frame(12, 0);
        assert!(!processor.process(&glitch));
        assert!(!processor.process(&glitch));
        assert_eq!(processor.current_border(), installed);

        // Back to the stable border, nothing changed
        assert!(!processor.process(&stable));
        assert_eq!(processor.current_border(), installed);
    }

    #[test]
    fn hard_disable_overrides_user_enable() {
        let mut processor = BlackBorderProcessor::new(quick_config());
        assert!(processor.enabled());

        processor.set_hard_disable(true);
        assert!(!processor.enabled());

        // User toggle does not win over hard disable
        processor.set_user_enabled(true);
        assert!(!processor.enabled());

        // Back from hard disable, the user setting returns
        processor.set_hard_disable(false);
        assert!(processor.enabled());
    }

    #[test]
    fn disabling_resets_border() {
        let mut processor = BlackBorderProcessor::new(quick_config());
        let frame = bordered_frame(4, 0);
        for _ in 0..8 {
            processor.process(&frame);
        }
        assert!(!processor.current_border().unknown);

        processor.set_user_enabled(false);
        assert!(processor.process(&frame));
        assert!(processor.current_border().unknown);
    }
}
