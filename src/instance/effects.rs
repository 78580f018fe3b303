//! Built-in effect producers
//!
//! An effect is a finite state machine ticked on its own timer; each tick
//! yields the next LED vector, which the engine feeds into the muxer at the
//! effect's priority. Cancellation is cooperative and honored within one
//! tick interval.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::{
    color::hsl_to_rgb,
    component::ComponentName,
    global::{InputMessage, InputMessageData, Message},
    models::Color,
};

const EFFECT_SOURCE_ID: usize = 0;

/// Effects must notice cancellation at least this often
const MAX_TICK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum StartEffectError {
    #[error("unknown effect: {0}")]
    NotFound(String),
}

/// A stateful producer of LED vectors
pub trait Effect: Send {
    fn name(&self) -> &str;

    fn interval(&self) -> Duration;

    /// Produce the next frame; None ends the effect
    fn tick(&mut self) -> Option<Vec<Color>>;
}

/// Rotating rainbow over the whole strip
struct RainbowSwirl {
    name: &'static str,
    led_count: usize,
    rotation_time: Duration,
    angle: f32,
}

impl Effect for RainbowSwirl {
    fn name(&self) -> &str {
        self.name
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(100)
    }

    fn tick(&mut self) -> Option<Vec<Color>> {
        let step = self.interval().as_secs_f32() / self.rotation_time.as_secs_f32();
        self.angle = (self.angle + step).fract();

        Some(
            (0..self.led_count)
                .map(|i| {
                    let hue = (self.angle + i as f32 / self.led_count as f32).fract();
                    let (r, g, b) = hsl_to_rgb(hue, 1., 0.5);
                    Color::new(r, g, b)
                })
                .collect(),
        )
    }
}

/// Single light sweeping back and forth with a decaying tail
struct KnightRider {
    led_count: usize,
    position: f32,
    direction: f32,
    trail: Vec<f32>,
}

impl Effect for KnightRider {
    fn name(&self) -> &str {
        "Knight rider"
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(30)
    }

    fn tick(&mut self) -> Option<Vec<Color>> {
        let speed = self.led_count as f32 / 20.;
        self.position += self.direction * speed;

        if self.position <= 0. {
            self.position = 0.;
            self.direction = 1.;
        } else if self.position >= (self.led_count - 1) as f32 {
            self.position = (self.led_count - 1) as f32;
            self.direction = -1.;
        }

        for value in self.trail.iter_mut() {
            *value *= 0.7;
        }
        self.trail[self.position as usize] = 1.;

        Some(
            self.trail
                .iter()
                .map(|value| Color::new((value * 255.) as u8, 0, 0))
                .collect(),
        )
    }
}

/// Slowly breathing blob of a fixed hue family
struct MoodBlobs {
    name: &'static str,
    led_count: usize,
    base_hue: f32,
    hue_span: f32,
    angle: f32,
}

impl Effect for MoodBlobs {
    fn name(&self) -> &str {
        self.name
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(100)
    }

    fn tick(&mut self) -> Option<Vec<Color>> {
        self.angle = (self.angle + 0.005).fract();

        Some(
            (0..self.led_count)
                .map(|i| {
                    let phase =
                        (i as f32 / self.led_count as f32 + self.angle) * std::f32::consts::TAU;
                    let hue = (self.base_hue + phase.sin() * self.hue_span).rem_euclid(1.);
                    let (r, g, b) = hsl_to_rgb(hue, 1., 0.5);
                    Color::new(r, g, b)
                })
                .collect(),
        )
    }
}

/// Resolve an effect by its user-facing name
pub fn create_effect(name: &str, led_count: usize) -> Option<Box<dyn Effect>> {
    match name {
        "Rainbow swirl" => Some(Box::new(RainbowSwirl {
            name: "Rainbow swirl",
            led_count,
            rotation_time: Duration::from_secs(20),
            angle: 0.,
        })),
        "Rainbow swirl fast" => Some(Box::new(RainbowSwirl {
            name: "Rainbow swirl fast",
            led_count,
            rotation_time: Duration::from_secs(3),
            angle: 0.,
        })),
        "Knight rider" => Some(Box::new(KnightRider {
            led_count,
            position: 0.,
            direction: 1.,
            trail: vec![0.; led_count],
        })),
        "Warm mood blobs" => Some(Box::new(MoodBlobs {
            name: "Warm mood blobs",
            led_count,
            base_hue: 0.05,
            hue_span: 0.06,
            angle: 0.,
        })),
        "Cold mood blobs" => Some(Box::new(MoodBlobs {
            name: "Cold mood blobs",
            led_count,
            base_hue: 0.6,
            hue_span: 0.06,
            angle: 0.,
        })),
        _ => None,
    }
}

struct RunningEffect {
    cancel: watch::Sender<bool>,
    join: tokio::task::JoinHandle<()>,
}

/// Runs effects for one instance and relays their frames to the muxer
pub struct EffectEngine {
    led_count: usize,
    tx: mpsc::Sender<InputMessage>,
    rx: mpsc::Receiver<InputMessage>,
    running: HashMap<i32, RunningEffect>,
}

impl EffectEngine {
    pub fn new(led_count: usize) -> Self {
        let (tx, rx) = mpsc::channel(60);

        Self {
            led_count,
            tx,
            rx,
            running: HashMap::new(),
        }
    }

    /// Start an effect at the given priority, replacing any effect already
    /// running there
    pub async fn start(
        &mut self,
        name: &str,
        priority: i32,
        duration: Option<chrono::Duration>,
        smoothing_cfg: u32,
    ) -> Result<(), StartEffectError> {
        let mut effect = create_effect(name, self.led_count)
            .ok_or_else(|| StartEffectError::NotFound(name.to_owned()))?;

        self.abort(priority).await;

        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let tx = self.tx.clone();
        let effect_name = name.to_owned();
        let deadline = duration
            .and_then(|duration| duration.to_std().ok())
            .map(|duration| tokio::time::Instant::now() + duration);

        let join = tokio::spawn(async move {
            tx.send(InputMessage::new(
                EFFECT_SOURCE_ID,
                ComponentName::Effect,
                InputMessageData::RegisterInput {
                    priority,
                    origin: "System".to_owned(),
                    owner: effect_name.clone(),
                    smoothing_cfg,
                },
            ))
            .await
            .ok();

            let mut ticker = tokio::time::interval(effect.interval().min(MAX_TICK_INTERVAL));

            loop {
                tokio::select! {
                    _ = ticker.tick() => {},
                    _ = cancel_rx.changed() => break,
                }

                if deadline
                    .map(|deadline| tokio::time::Instant::now() >= deadline)
                    .unwrap_or(false)
                {
                    break;
                }

                let led_colors = match effect.tick() {
                    Some(led_colors) => led_colors,
                    None => break,
                };

                let message = InputMessage::new(
                    EFFECT_SOURCE_ID,
                    ComponentName::Effect,
                    InputMessageData::LedColors {
                        priority,
                        duration: None,
                        led_colors: std::sync::Arc::new(led_colors),
                        clear_effect: false,
                    },
                );

                // Frames are dropped rather than awaited when the instance
                // is congested; the next tick supersedes them anyway
                match tx.try_send(message) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {}
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }

            // Release the priority on the way out
            tx.send(InputMessage::new(
                EFFECT_SOURCE_ID,
                ComponentName::Effect,
                InputMessageData::Clear { priority },
            ))
            .await
            .ok();

            debug!(effect = %effect_name, priority = %priority, "effect finished");
        });

        self.running.insert(
            priority,
            RunningEffect {
                cancel: cancel_tx,
                join,
            },
        );

        Ok(())
    }

    pub async fn abort(&mut self, priority: i32) -> bool {
        if let Some(effect) = self.running.remove(&priority) {
            effect.cancel.send(true).ok();
            effect.join.await.ok();
            true
        } else {
            false
        }
    }

    pub async fn abort_all(&mut self) {
        let priorities: Vec<i32> = self.running.keys().copied().collect();
        for priority in priorities {
            self.abort(priority).await;
        }
    }

    /// Next message produced by a running effect
    pub async fn update(&mut self) -> Option<InputMessage> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_effects_resolve() {
        for name in [
            "Rainbow swirl",
            "Rainbow swirl fast",
            "Knight rider",
            "Warm mood blobs",
            "Cold mood blobs",
        ]
        .iter()
        {
            assert!(create_effect(name, 10).is_some(), "{}", name);
        }

        assert!(create_effect("Nope", 10).is_none());
    }

    #[test]
    fn effects_produce_full_vectors() {
        for name in ["Rainbow swirl", "Knight rider", "Warm mood blobs"].iter() {
            let mut effect = create_effect(name, 16).unwrap();
            for _ in 0..32 {
                let led_colors = effect.tick().expect("builtin effects never end");
                assert_eq!(led_colors.len(), 16, "{}", name);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn effect_emits_and_clears() {
        let mut engine = EffectEngine::new(8);
        engine
            .start("Rainbow swirl fast", 42, None, 0)
            .await
            .unwrap();

        // Registration comes first
        let message = engine.update().await.unwrap();
        assert!(matches!(
            message.data(),
            InputMessageData::RegisterInput { priority: 42, .. }
        ));

        let message = engine.update().await.unwrap();
        match message.data() {
            InputMessageData::LedColors {
                priority,
                led_colors,
                ..
            } => {
                assert_eq!(*priority, 42);
                assert_eq!(led_colors.len(), 8);
            }
            other => panic!("unexpected message: {:?}", other),
        }

        engine.abort(42).await;

        // Drain to the clear message
        loop {
            let message = engine.update().await.unwrap();
            if let InputMessageData::Clear { priority } = message.data() {
                assert_eq!(*priority, 42);
                break;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn effect_honors_duration() {
        let mut engine = EffectEngine::new(4);
        engine
            .start(
                "Knight rider",
                10,
                Some(chrono::Duration::milliseconds(200)),
                0,
            )
            .await
            .unwrap();

        let mut cleared = false;
        for _ in 0..64 {
            let message = engine.update().await.unwrap();
            if matches!(message.data(), InputMessageData::Clear { priority: 10 }) {
                cleared = true;
                break;
            }
        }

        assert!(cleared);
    }
}
