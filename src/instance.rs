//! Per-instance pipeline wiring
//!
//! One instance is one cooperative task: muxer, averaging, calibration,
//! smoothing and the device all run on the task driving [Instance::run].
//! Producers reach it through the global input bus, effects through the
//! instance's own engine channel.

use std::sync::Arc;

use thiserror::Error;
use tokio::select;
use tokio::sync::{broadcast, mpsc};

use crate::{
    api::types::PriorityInfo,
    color::LedCalibration,
    component::ComponentName,
    global::{Event, Global, InputMessage, InstanceEventKind, Message},
    image::RawImage,
    lut::Lut,
    models::{
        Color, DeviceConfig, EffectType, InstanceConfig, LayoutError, LedString, SettingData,
    },
};

pub mod averaging;
use averaging::*;

mod black_border;
use black_border::*;

mod device;
use device::*;

mod effects;
use effects::*;

mod image_to_led;
use image_to_led::*;

mod muxer;
use muxer::*;

mod smoothing;
use smoothing::*;

/// Priority of the boot-time foreground effect
const FOREGROUND_PRIORITY: i32 = 0;

#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
    #[error("invalid layout: {0}")]
    Layout(#[from] LayoutError),
    #[error("recv error: {0}")]
    Recv(#[from] broadcast::error::RecvError),
}

/// Out-of-band commands dispatched to a running instance
#[derive(Debug)]
pub enum InstanceMessage {
    Settings(SettingData),
    ComponentState {
        component: ComponentName,
        state: bool,
    },
    ForcedPriority(Option<i32>),
}

/// Cheap handle for controlling a spawned instance
#[derive(Clone)]
pub struct InstanceHandle {
    tx: mpsc::Sender<InstanceMessage>,
}

impl InstanceHandle {
    pub async fn send(&self, message: InstanceMessage) -> bool {
        self.tx.send(message).await.is_ok()
    }
}

pub struct Instance {
    id: i32,
    global: Global,
    config: InstanceConfig,
    device: Device,
    muxer: PriorityMuxer,
    image_to_led: ImageToLedManager,
    calibration: LedCalibration,
    lut: Lut,
    smoothing: Smoothing,
    effects: EffectEngine,
    led_colors: Vec<Color>,
    all_leds_disabled: bool,
    paused: bool,
    receiver: broadcast::Receiver<InputMessage>,
    event_rx: broadcast::Receiver<Event>,
    command_rx: mpsc::Receiver<InstanceMessage>,
    /// Keeps the grabber priorities registered for the instance's lifetime
    _capture_sources: Vec<crate::global::InputSourceHandle>,
}

impl Instance {
    pub async fn new(
        global: Global,
        config: InstanceConfig,
    ) -> Result<(Self, InstanceHandle), InstanceError> {
        let id = config.instance.id;
        let led_string = LedString::new(&config.leds, config.device.color_order())?;
        let led_count = led_string.len();
        let all_leds_disabled = led_string.leds().iter().all(|led| led.disabled);

        let calibration = LedCalibration::new(led_count, &config.color);
        let lut = Lut::new(&config.hdr);
        let image_to_led = ImageToLedManager::new(led_string, &config);
        let mut smoothing = Smoothing::new(&config.smoothing, led_count);
        let device = Device::new(&config.instance.friendly_name, config.device.clone()).await?;
        let mut muxer = PriorityMuxer::new(global.clone(), id).await;
        let mut effects = EffectEngine::new(led_count);

        // Effects run on their own, faster smoothing config
        let effect_cfg = smoothing.update_config(
            SMOOTHING_EFFECT_CONFIGS_START,
            SmoothingConfig::new(false, 100, 16, false),
        );

        // Register the grabber priorities for this instance
        let mut capture_sources = Vec::new();
        if config.instance_capture.video_enable {
            if let Ok(handle) = global
                .register_input_source(
                    crate::global::InputSourceName::VideoGrabber,
                    Some(config.instance_capture.video_priority),
                )
                .await
            {
                capture_sources.push(handle);
            }
        }
        if config.instance_capture.system_enable {
            if let Ok(handle) = global
                .register_input_source(
                    crate::global::InputSourceName::SystemGrabber,
                    Some(config.instance_capture.system_priority),
                )
                .await
            {
                capture_sources.push(handle);
            }
        }

        // Boot sequence: foreground effect for its duration, background
        // effect on the idle channel
        if config.foreground_effect.enable {
            match config.foreground_effect.ty {
                EffectType::Color => {
                    let duration = config
                        .foreground_effect
                        .duration_ms
                        .map(|ms| chrono::Duration::milliseconds(ms as _));
                    muxer
                        .handle_message(InputMessage::new(
                            0,
                            ComponentName::Color,
                            crate::global::InputMessageData::SolidColor {
                                priority: FOREGROUND_PRIORITY,
                                duration,
                                color: config.foreground_effect.color,
                                clear_effect: false,
                            },
                        ))
                        .await;
                }
                EffectType::Effect => {
                    let duration = config
                        .foreground_effect
                        .duration_ms
                        .map(|ms| chrono::Duration::milliseconds(ms as _));
                    effects
                        .start(
                            &config.foreground_effect.effect,
                            FOREGROUND_PRIORITY,
                            duration,
                            effect_cfg,
                        )
                        .await
                        .map_err(|error| warn!(error = %error, "foreground effect failed"))
                        .ok();
                }
            }
        }
        if config.background_effect.enable {
            if let EffectType::Effect = config.background_effect.ty {
                effects
                    .start(
                        &config.background_effect.effect,
                        EFFECT_CHANNEL_PRIORITY,
                        None,
                        effect_cfg,
                    )
                    .await
                    .map_err(|error| warn!(error = %error, "background effect failed"))
                    .ok();
            }
        }

        let receiver = global.subscribe_input().await;
        let event_rx = global.subscribe_events().await;
        let (command_tx, command_rx) = mpsc::channel(4);

        global
            .send_event(Event::instance(id, InstanceEventKind::Started))
            .await;

        Ok((
            Self {
                id,
                global,
                config,
                device,
                muxer,
                image_to_led,
                calibration,
                lut,
                smoothing,
                effects,
                led_colors: vec![Default::default(); led_count],
                all_leds_disabled,
                paused: false,
                receiver,
                event_rx,
                command_rx,
                _capture_sources: capture_sources,
            },
            InstanceHandle { tx: command_tx },
        ))
    }

    fn handle_color(&mut self, color: Color) {
        self.led_colors.fill(color);
    }

    async fn handle_image(&mut self, image: &Arc<RawImage>) -> bool {
        let processed = self.image_to_led.process(image, &mut self.led_colors);

        if processed {
            // Forwarders get the frame that actually drove the LEDs
            self.global
                .send_event(Event::instance(
                    self.id,
                    InstanceEventKind::ImageUpdated {
                        image: image.clone(),
                    },
                ))
                .await;
        }

        processed
    }

    fn handle_led_colors(&mut self, led_colors: &[Color]) -> bool {
        if led_colors.len() != self.led_colors.len() {
            error!(
                "invalid led color data, expected {} leds, got {}",
                self.led_colors.len(),
                led_colors.len()
            );
            false
        } else {
            self.led_colors.copy_from_slice(led_colors);
            true
        }
    }

    async fn handle_message(&mut self, message: MuxedMessage) {
        if self.all_leds_disabled {
            // Nothing can ever reach the device
            return;
        }

        let component = message.component();

        // Borders and backlight make no sense under synthetic sources
        self.image_to_led.set_border_hard_disable(matches!(
            component,
            ComponentName::Effect | ComponentName::Color
        ));
        self.calibration
            .set_backlight_enabled(component != ComponentName::Effect);

        // Producers pick their smoothing config through their muxer entry
        if message.smoothing_cfg() != self.smoothing.current_config_id() {
            self.smoothing.select_config(message.smoothing_cfg(), false);
            self.smoothing_restarted().await;
        }

        let updated = match message.data() {
            MuxedMessageData::SolidColor { color, .. } => {
                self.handle_color(*color);
                true
            }
            MuxedMessageData::Image { image, .. } => self.handle_image(&image.clone()).await,
            MuxedMessageData::LedColors { led_colors, .. } => {
                self.handle_led_colors(&led_colors.clone())
            }
        };

        if !updated {
            return;
        }

        // Color processing: tone mapping, then per-LED calibration
        self.lut.apply(&mut self.led_colors);
        self.calibration.apply(&mut self.led_colors);

        self.smoothing.set_target(&self.led_colors);
    }

    async fn smoothing_restarted(&mut self) {
        let interval = self.smoothing.update_interval();
        self.device.smoothing_restarted(interval);
        self.global
            .send_event(Event::instance(
                self.id,
                InstanceEventKind::SmoothingRestarted {
                    interval_ms: interval.as_millis() as i64,
                },
            ))
            .await;
    }

    async fn handle_settings_update(&mut self, update: SettingData) {
        match update {
            SettingData::ColorAdjustment(color) => {
                self.calibration = LedCalibration::new(self.led_colors.len(), &color);

                if let Some(mapping_type) = self.image_to_led.handle_color_settings(&color) {
                    self.global
                        .send_event(Event::instance(
                            self.id,
                            InstanceEventKind::ImageToLedsMappingChanged { mapping_type },
                        ))
                        .await;
                }

                self.global
                    .send_event(Event::instance(
                        self.id,
                        InstanceEventKind::AdjustmentUpdated {
                            adjustment: serde_json::to_value(&color).unwrap_or_default(),
                        },
                    ))
                    .await;

                self.config.color = color;
            }
            SettingData::Smoothing(smoothing) => {
                self.smoothing.handle_settings_update(&smoothing);
                self.smoothing_restarted().await;
                self.config.smoothing = smoothing;
            }
            SettingData::Leds(leds) => match LedString::new(&leds, self.config.device.color_order())
            {
                Ok(led_string) => {
                    let led_count = led_string.len();
                    self.all_leds_disabled = led_string.leds().iter().all(|led| led.disabled);
                    self.led_colors = vec![Default::default(); led_count];
                    self.calibration = LedCalibration::new(led_count, &self.config.color);
                    self.smoothing = Smoothing::new(&self.config.smoothing, led_count);
                    self.image_to_led.set_led_string(led_string);

                    self.effects.abort_all().await;
                    self.effects = EffectEngine::new(led_count);

                    self.config.leds = leds;
                }
                Err(error) => {
                    error!(error = %error, "rejecting invalid led layout");
                }
            },
            SettingData::Device(device) => {
                match Device::new(&self.config.instance.friendly_name, device.clone()).await {
                    Ok(new_device) => {
                        self.device = new_device;
                        self.config.device = device;
                    }
                    Err(error) => {
                        error!(error = %error, "device rebuild failed, keeping previous config");
                    }
                }
            }
            SettingData::BlackBorderDetector(detector) => {
                self.image_to_led.handle_border_settings(detector.clone());
                self.config.black_border_detector = detector;
            }
            SettingData::HdrToneMapping(hdr) => {
                self.lut = Lut::new(&hdr);
                self.config.hdr = hdr;
            }
            SettingData::InstanceCapture(capture) => {
                self.config.instance_capture = capture;
                warn!("capture priorities apply after instance restart");
            }
            SettingData::ForegroundEffect(effect) => {
                self.config.foreground_effect = effect;
            }
            SettingData::BackgroundEffect(effect) => {
                self.config.background_effect = effect;
            }
        }
    }

    async fn set_component_state(&mut self, component: ComponentName, state: bool) {
        match component {
            ComponentName::All => {
                // Halt or resume the whole pipeline without losing state
                if self.paused == !state {
                    return;
                }

                self.paused = !state;
                self.smoothing.set_pause(!state);
                self.device.pause_retry_timer(!state);
                self.device.set_enabled(state).await.ok();

                self.global
                    .send_event(Event::instance(
                        self.id,
                        InstanceEventKind::PauseChanged { paused: !state },
                    ))
                    .await;
            }
            ComponentName::Smoothing => self.smoothing.set_enable(state),
            ComponentName::BlackBorder => self.image_to_led.set_border_user_enabled(state),
            ComponentName::LedDevice => {
                self.device.set_enabled(state).await.ok();
            }
            other => {
                debug!(component = %other, state = %state, "ignoring component state change");
            }
        }
    }

    pub fn current_priorities(&self) -> Vec<PriorityInfo> {
        self.muxer.current_priorities()
    }

    pub async fn run(mut self) -> Result<(), InstanceError> {
        // Push the boot-time content (background black or foreground color)
        // through the pipeline
        if let Some(muxed) = self.muxer.refresh().await {
            self.handle_message(muxed).await;
        }

        loop {
            select! {
                _ = self.device.update() => {
                    // Device update completed
                },
                message = self.receiver.recv() => {
                    match message {
                        Ok(message) => {
                            if let Some(muxed) = self.muxer.handle_message(message).await {
                                self.handle_message(muxed).await;
                            }
                        },
                        Err(broadcast::error::RecvError::Closed) => {
                            // No more input messages
                            break;
                        },
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("skipped {} input messages", skipped);
                        },
                    }
                },
                message = self.muxer.update() => {
                    // An entry timed out
                    if let Some(muxed) = message {
                        self.handle_message(muxed).await;
                    }
                },
                message = self.effects.update() => {
                    if let Some(message) = message {
                        if let Some(muxed) = self.muxer.handle_message(message).await {
                            self.handle_message(muxed).await;
                        }
                    }
                },
                (led_data, update) = self.smoothing.update() => {
                    self.global
                        .send_event(Event::instance(self.id, InstanceEventKind::SmoothingClockTick))
                        .await;

                    if update == SmoothingUpdate::Write {
                        let led_data = led_data.to_vec();
                        self.device.set_led_data(&led_data).await?;
                    }
                },
                command = self.command_rx.recv() => {
                    match command {
                        Some(InstanceMessage::Settings(update)) => {
                            self.handle_settings_update(update).await;
                        }
                        Some(InstanceMessage::ComponentState { component, state }) => {
                            self.set_component_state(component, state).await;
                        }
                        Some(InstanceMessage::ForcedPriority(priority)) => {
                            if let Some(muxed) = self.muxer.set_forced_priority(priority).await {
                                self.handle_message(muxed).await;
                            }
                        }
                        None => break,
                    }
                },
                event = self.event_rx.recv() => {
                    if let Ok(Event::Stop) = event {
                        break;
                    }
                },
            }
        }

        self.stop().await
    }

    async fn stop(mut self) -> Result<(), InstanceError> {
        info!(instance = %self.id, "stopping instance");

        self.effects.abort_all().await;

        // Leave the strip dark
        self.device.write_black(3).await?;

        self.global
            .send_event(Event::instance(self.id, InstanceEventKind::Stopped))
            .await;

        Ok(())
    }
}
