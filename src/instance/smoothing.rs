//! Timed interpolation between muxed color updates
//!
//! The smoother owns a table of named configurations; id 0 is the master
//! config from the settings, ids at or above
//! [SMOOTHING_EFFECT_CONFIGS_START] are claimed by effects. Interpolation is
//! integer linear between the snapshot taken at the last target change and
//! the target, with an optional anti-flicker gate on the way out.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::models::{self, Color, SmoothingType};

/// First config id handed out to effects
///
/// User-defined configs live far below this, so effect slots can never be
/// clobbered by a settings update.
pub const SMOOTHING_EFFECT_CONFIGS_START: u32 = 1024;

const MINIMAL_UPDATE_INTERVAL_MS: i64 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct SmoothingConfig {
    pub pause: bool,
    pub settling_time_ms: i64,
    pub update_interval_ms: i64,
    pub direct_mode: bool,
    pub ty: SmoothingType,
    pub anti_flickering_threshold: i32,
    pub anti_flickering_step: i32,
    pub anti_flickering_timeout: i64,
}

impl SmoothingConfig {
    pub fn new(
        pause: bool,
        settling_time_ms: i64,
        update_interval_ms: i64,
        direct_mode: bool,
    ) -> Self {
        Self {
            pause,
            settling_time_ms,
            update_interval_ms: update_interval_ms.max(MINIMAL_UPDATE_INTERVAL_MS),
            direct_mode,
            ty: SmoothingType::Linear,
            anti_flickering_threshold: 0,
            anti_flickering_step: 0,
            anti_flickering_timeout: 0,
        }
    }
}

impl From<&models::Smoothing> for SmoothingConfig {
    fn from(settings: &models::Smoothing) -> Self {
        let update_interval_ms =
            ((1000.0 / settings.update_frequency) as i64).max(MINIMAL_UPDATE_INTERVAL_MS);

        Self {
            pause: settings.pause,
            settling_time_ms: settings.time_ms as _,
            update_interval_ms,
            direct_mode: settings.direct_mode,
            ty: settings.ty,
            anti_flickering_threshold: settings.anti_flickering_threshold.min(255) as _,
            anti_flickering_step: settings.anti_flickering_step.min(255) as _,
            anti_flickering_timeout: settings.anti_flickering_timeout as _,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmoothingUpdate {
    /// New data for the device
    Write,
    /// Tick happened, output unchanged
    Hold,
}

pub struct Smoothing {
    /// Sparse config table; id 0 (the master config) is always present
    configs: BTreeMap<u32, SmoothingConfig>,
    current_config: u32,
    enabled: bool,
    pause: bool,
    continuous_output: bool,
    target_data: Vec<Color>,
    /// Snapshot of the output when the current transition started
    previous_data: Vec<Color>,
    current_data: Vec<Color>,
    last_sent: Vec<Color>,
    /// Per-channel time of the last accepted change, for the anti-flicker
    /// gate
    previous_timeouts: Vec<Instant>,
    target_time: Instant,
    previous_time: Instant,
    next_update: Option<Instant>,
}

impl Smoothing {
    pub fn new(settings: &models::Smoothing, led_count: usize) -> Self {
        let now = Instant::now();

        let mut configs = BTreeMap::new();
        configs.insert(0, settings.into());

        Self {
            configs,
            current_config: 0,
            enabled: settings.enable,
            pause: settings.pause,
            continuous_output: settings.continuous_output,
            target_data: vec![Default::default(); led_count],
            previous_data: vec![Default::default(); led_count],
            current_data: vec![Default::default(); led_count],
            last_sent: vec![Default::default(); led_count],
            previous_timeouts: vec![now; led_count * 3],
            target_time: now,
            previous_time: now,
            next_update: None,
        }
    }

    fn config(&self) -> &SmoothingConfig {
        &self.configs[&self.current_config]
    }

    pub fn current_config_id(&self) -> u32 {
        self.current_config
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.config().update_interval_ms as _)
    }

    fn effectively_paused(&self) -> bool {
        self.pause || self.config().pause
    }

    fn direct(&self) -> bool {
        !self.enabled || self.config().direct_mode || self.config().settling_time_ms == 0
    }

    /// Add or overwrite a smoothing config
    ///
    /// Returns the id to pass to [select_config](Self::select_config).
    /// Effects request ids at or above [SMOOTHING_EFFECT_CONFIGS_START];
    /// everything below is for the settings layer.
    pub fn update_config(&mut self, id: u32, config: SmoothingConfig) -> u32 {
        self.configs.insert(id, config);
        id
    }

    /// Replace the master config (id 0) from the settings
    pub fn handle_settings_update(&mut self, settings: &models::Smoothing) {
        self.enabled = settings.enable;
        self.pause = settings.pause;
        self.continuous_output = settings.continuous_output;
        self.configs.insert(0, settings.into());
        self.select_config(0, true);
    }

    /// Switch the active config
    ///
    /// Falls back to the master config and returns false when `id` does not
    /// exist.
    pub fn select_config(&mut self, id: u32, force: bool) -> bool {
        let (id, known) = if self.configs.contains_key(&id) {
            (id, true)
        } else {
            warn!(id = %id, "unknown smoothing config, falling back to master");
            (0, false)
        };

        if id != self.current_config || force {
            self.current_config = id;

            // Restart the tick timer on the new interval
            if self.next_update.is_some() {
                self.next_update = Some(Instant::now() + self.update_interval());
            }

            debug!(
                id = %id,
                interval_ms = %self.config().update_interval_ms,
                "selected smoothing config"
            );
        }

        known
    }

    pub fn set_enable(&mut self, enable: bool) {
        self.enabled = enable;

        if !enable && !self.effectively_paused() {
            // Flush the pending target unsmoothed
            self.next_update = Some(Instant::now());
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Pausing holds the last output, there is no black flash
    pub fn set_pause(&mut self, pause: bool) {
        if self.pause == pause {
            return;
        }

        self.pause = pause;

        if pause {
            self.next_update = None;
        } else {
            self.next_update = Some(Instant::now() + self.update_interval());
        }
    }

    pub fn is_paused(&self) -> bool {
        self.pause
    }

    /// Accept a new target vector from the pipeline
    pub fn set_target(&mut self, color_data: &[Color]) {
        if color_data.len() != self.target_data.len() {
            error!(
                "invalid led color data, expected {} leds, got {}",
                self.target_data.len(),
                color_data.len()
            );
            return;
        }

        let now = Instant::now();
        self.target_data.copy_from_slice(color_data);

        if self.effectively_paused() {
            // Target is remembered, the timer stays off
            return;
        }

        if self.direct() {
            self.next_update = Some(now);
            return;
        }

        // Interpolate from the last computed output
        self.previous_data.copy_from_slice(&self.current_data);
        self.previous_time = now;
        self.target_time = now + Duration::from_millis(self.config().settling_time_ms as _);

        if self.next_update.is_none() {
            self.next_update = Some(now + self.update_interval());
        }
    }

    fn anti_flicker(&mut self, now: Instant) {
        let config = self.config();
        let threshold = config.anti_flickering_threshold;
        if threshold <= 0 {
            return;
        }

        let step = config.anti_flickering_step;
        let timeout = Duration::from_millis(config.anti_flickering_timeout.max(0) as u64);

        for (index, (current, sent)) in self
            .current_data
            .iter_mut()
            .zip(self.last_sent.iter())
            .enumerate()
        {
            for channel in 0..3 {
                let out: &mut u8 = match channel {
                    0 => &mut current.red,
                    1 => &mut current.green,
                    _ => &mut current.blue,
                };
                let sent = match channel {
                    0 => sent.red,
                    1 => sent.green,
                    _ => sent.blue,
                };

                let diff = (*out as i32 - sent as i32).abs();
                if diff == 0 {
                    continue;
                }

                let slot = index * 3 + channel;

                if diff < threshold {
                    if now.duration_since(self.previous_timeouts[slot]) < timeout {
                        // Too small and too soon, hold the channel
                        *out = sent;
                    } else {
                        // Timeout expired, allow a dampened step
                        self.previous_timeouts[slot] = now;
                        if step > 0 && diff > step {
                            let direction = if *out > sent { 1 } else { -1 };
                            *out = (sent as i32 + direction * step) as u8;
                        }
                    }
                } else {
                    self.previous_timeouts[slot] = now;
                }
            }
        }
    }

    fn compute_linear(&mut self, now: Instant) -> bool {
        let denom = self
            .target_time
            .duration_since(self.previous_time)
            .as_micros() as i64;
        let elapsed = now.duration_since(self.previous_time).as_micros() as i64;

        let k = if denom <= 0 {
            1.0
        } else {
            (elapsed as f32 / denom as f32).min(1.0)
        };

        for ((target, previous), current) in self
            .target_data
            .iter()
            .zip(self.previous_data.iter())
            .zip(self.current_data.iter_mut())
        {
            let interpolate = |prev: u8, tgt: u8| -> u8 {
                (prev as i32 + ((tgt as i32 - prev as i32) as f32 * k).round() as i32)
                    .clamp(0, 255) as u8
            };

            current.red = interpolate(previous.red, target.red);
            current.green = interpolate(previous.green, target.green);
            current.blue = interpolate(previous.blue, target.blue);
        }

        k >= 1.0
    }

    /// Wait for the next tick and compute the output
    ///
    /// Resolves to the led data and whether the device needs a write; stays
    /// pending while there is nothing to do.
    pub async fn update(&mut self) -> (&[Color], SmoothingUpdate) {
        let next_update = match self.next_update {
            Some(next_update) => next_update,
            None => futures::future::pending().await,
        };

        if next_update > Instant::now() {
            tokio::time::sleep_until(next_update.into()).await;
        }

        let now = Instant::now();
        self.next_update = None;

        let settled = if self.direct() {
            // Forward the target unmodified
            self.current_data.copy_from_slice(&self.target_data);
            true
        } else {
            let settled = self.compute_linear(now);
            self.anti_flicker(now);
            settled
        };

        let changed = self.current_data != self.last_sent;

        // Keep ticking while interpolating, and at the refresh rate when
        // continuous output is on
        if !settled || (self.continuous_output && !self.direct()) {
            self.next_update = Some(now + self.update_interval());
        }

        if changed {
            self.last_sent.copy_from_slice(&self.current_data);
            (&self.current_data, SmoothingUpdate::Write)
        } else if self.continuous_output {
            (&self.current_data, SmoothingUpdate::Write)
        } else {
            (&self.current_data, SmoothingUpdate::Hold)
        }
    }

    pub fn last_sent(&self) -> &[Color] {
        &self.last_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smoothing(settings: models::Smoothing, led_count: usize) -> Smoothing {
        Smoothing::new(&settings, led_count)
    }

    fn plain_settings() -> models::Smoothing {
        models::Smoothing {
            enable: true,
            time_ms: 200,
            update_frequency: 25.0,
            continuous_output: false,
            ..Default::default()
        }
    }

    fn solid(value: u8, count: usize) -> Vec<Color> {
        vec![Color::new(value, value, value); count]
    }

    #[tokio::test(start_paused = true)]
    async fn linear_interpolation_reaches_target() {
        let mut smoothing = smoothing(plain_settings(), 10);

        smoothing.set_target(&vec![Color::new(255, 0, 0); 10]);

        let mut frames = Vec::new();
        for _ in 0..5 {
            let (led_data, update) = smoothing.update().await;
            assert_eq!(update, SmoothingUpdate::Write);
            frames.push(led_data[0]);
        }

        // 5 frames over 200 ms at 25 Hz, interpolating up to the target
        assert_eq!(frames.len(), 5);
        assert_eq!(frames[4], Color::new(255, 0, 0));
        for pair in frames.windows(2) {
            assert!(pair[0].red < pair[1].red);
        }

        // Settled and not continuous: no further updates scheduled
        assert!(smoothing.next_update.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn direct_mode_bypasses_interpolation() {
        let mut smoothing = smoothing(plain_settings(), 4);
        let id = smoothing.update_config(3, SmoothingConfig::new(false, 200, 40, true));
        smoothing.select_config(id, false);

        smoothing.set_target(&solid(50, 4));

        let (led_data, update) = smoothing.update().await;
        assert_eq!(update, SmoothingUpdate::Write);
        assert_eq!(led_data, &solid(50, 4)[..]);

        // No interpolation on subsequent ticks
        assert!(smoothing.next_update.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_settling_forwards_immediately() {
        let mut smoothing = smoothing(
            models::Smoothing {
                time_ms: 0,
                ..plain_settings()
            },
            2,
        );

        // time_ms of 0 behaves as direct mode
        smoothing.set_target(&solid(77, 2));

        let (led_data, update) = smoothing.update().await;
        assert_eq!(update, SmoothingUpdate::Write);
        assert_eq!(led_data[0], Color::new(77, 77, 77));
    }

    #[tokio::test(start_paused = true)]
    async fn equal_target_produces_no_write() {
        let mut smoothing = smoothing(plain_settings(), 3);

        // Target equals the current output (all black)
        smoothing.set_target(&solid(0, 3));

        while smoothing.next_update.is_some() {
            let (_, update) = smoothing.update().await;
            assert_eq!(update, SmoothingUpdate::Hold);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn continuous_output_keeps_writing() {
        let mut smoothing = smoothing(
            models::Smoothing {
                continuous_output: true,
                ..plain_settings()
            },
            2,
        );

        smoothing.set_target(&solid(10, 2));

        for _ in 0..10 {
            let (_, update) = smoothing.update().await;
            assert_eq!(update, SmoothingUpdate::Write);
        }

        // Still scheduled after settling
        assert!(smoothing.next_update.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_holds_output_without_black_flash() {
        let mut smoothing = smoothing(plain_settings(), 2);

        smoothing.set_target(&solid(100, 2));
        while smoothing.next_update.is_some() {
            smoothing.update().await;
        }
        assert_eq!(smoothing.last_sent()[0], Color::new(100, 100, 100));

        smoothing.set_pause(true);
        smoothing.set_target(&solid(0, 2));
        assert!(smoothing.next_update.is_none());
        assert_eq!(smoothing.last_sent()[0], Color::new(100, 100, 100));
    }

    #[tokio::test(start_paused = true)]
    async fn anti_flicker_gates_small_changes() {
        let mut settings = plain_settings();
        settings.time_ms = 40;
        settings.anti_flickering_threshold = 10;
        settings.anti_flickering_step = 5;
        settings.anti_flickering_timeout = 500;
        let mut smoothing = smoothing(settings, 1);

        // Settle on a baseline
        smoothing.set_target(&solid(120, 1));
        while smoothing.next_update.is_some() {
            smoothing.update().await;
        }
        assert_eq!(smoothing.last_sent()[0].red, 120);

        // Small oscillations are held at the baseline while the per-channel
        // timeout is running
        let start = tokio::time::Instant::now();
        let mut first_change = None;
        for i in 0..32 {
            let target = if i % 2 == 0 { 125 } else { 120 };
            smoothing.set_target(&solid(target, 1));
            while smoothing.next_update.is_some() {
                let (led_data, update) = smoothing.update().await;
                if update == SmoothingUpdate::Write && led_data[0].red != 120 {
                    first_change.get_or_insert((
                        tokio::time::Instant::now() - start,
                        led_data[0].red,
                    ));
                }
            }
        }

        let (elapsed, value) = first_change.expect("oscillation eventually passes the gate");
        assert!(elapsed >= Duration::from_millis(500));
        // The first accepted change is dampened to at most the step
        assert!((value as i32 - 120).abs() <= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn select_config_switches_interval() {
        let mut smoothing = smoothing(plain_settings(), 1);
        let id = smoothing.update_config(
            SMOOTHING_EFFECT_CONFIGS_START,
            SmoothingConfig::new(false, 100, 10, false),
        );

        assert!(smoothing.select_config(id, false));
        assert_eq!(smoothing.update_interval(), Duration::from_millis(10));

        // Unknown ids fall back to master
        assert!(!smoothing.select_config(99, false));
        assert_eq!(smoothing.current_config_id(), 0);
    }

    #[test]
    fn interval_is_clamped_to_minimum() {
        let config = SmoothingConfig::new(false, 100, 1, false);
        assert_eq!(config.update_interval_ms, MINIMAL_UPDATE_INTERVAL_MS);
    }
}
