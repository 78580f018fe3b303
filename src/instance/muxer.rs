//! Many-writer, single-reader arbitration of concurrent color sources
//!
//! Lower priority values take precedence. Every entry carries its own
//! deadline; expiry deactivates the entry and the next live slot becomes
//! visible. Priority 256 is the reserved background slot, permanently fed
//! with black.

use std::collections::{BTreeMap, HashMap};
use std::convert::TryInto;
use std::pin::Pin;
use std::time::Instant;

use futures::Future;

use crate::{
    api::types::PriorityInfo,
    component::ComponentName,
    global::{Event, Global, InputMessage, InputMessageData, InstanceEventKind, Message},
    models::Color,
};

mod muxed_message;
pub use muxed_message::*;

pub const MAX_PRIORITY: i32 = 256;

/// Channel reserved for the effect engine, exempt from clear_all
pub const EFFECT_CHANNEL_PRIORITY: i32 = 254;

const MUXER_ID: usize = 0;

#[derive(Debug)]
struct InputEntry {
    input_id: usize,
    /// Latest content message; None until the producer sets colors
    message: Option<InputMessage>,
    expires: Option<Instant>,
    active: bool,
    origin: String,
    owner: String,
    smoothing_cfg: u32,
}

impl InputEntry {
    /// Eligible for visible selection
    fn selectable(&self, now: Instant) -> bool {
        self.active
            && self.message.is_some()
            && self.expires.map(|expires| expires > now).unwrap_or(true)
    }
}

type TimeoutFuture = Box<
    dyn Fn() -> Pin<Box<dyn Future<Output = (usize, i32)> + Send + Sync>> + Send + Sync,
>;

pub struct PriorityMuxer {
    global: Global,
    instance_id: i32,
    inputs: BTreeMap<i32, InputEntry>,
    input_id: usize,
    timeouts: HashMap<usize, TimeoutFuture>,
    forced_priority: Option<i32>,
    visible_priority: i32,
    visible_component: Option<ComponentName>,
}

impl PriorityMuxer {
    pub async fn new(global: Global, instance_id: i32) -> Self {
        let mut this = Self {
            global,
            instance_id,
            inputs: Default::default(),
            input_id: 0,
            timeouts: Default::default(),
            forced_priority: None,
            visible_priority: MAX_PRIORITY,
            visible_component: None,
        };

        // Start by clearing all outputs
        this.clear_all().await;

        this
    }

    fn current_priority(&self) -> i32 {
        let now = Instant::now();

        if let Some(forced) = self.forced_priority {
            if self
                .inputs
                .get(&forced)
                .map(|entry| entry.selectable(now))
                .unwrap_or(false)
            {
                return forced;
            }
        }

        self.inputs
            .iter()
            .find(|(_, entry)| entry.selectable(now))
            .map(|(priority, _)| *priority)
            .unwrap_or(MAX_PRIORITY)
    }

    pub fn get_current_priority(&self) -> i32 {
        self.current_priority()
    }

    /// Force the visible priority; None returns to auto-selection
    pub async fn set_forced_priority(&mut self, priority: Option<i32>) -> Option<MuxedMessage> {
        self.forced_priority = priority;
        self.notify_output_change().await
    }

    /// Re-emit the currently visible content
    pub async fn refresh(&mut self) -> Option<MuxedMessage> {
        self.notify_output_change().await
    }

    async fn notify_output_change(&mut self) -> Option<MuxedMessage> {
        let priority = self.current_priority();
        let entry = self.inputs.get(&priority)?;
        let message = entry.message.as_ref()?;
        let component = message.component();

        if priority != self.visible_priority {
            self.visible_priority = priority;
            debug!(priority = %priority, "current priority changed");
            self.global
                .send_event(Event::instance(
                    self.instance_id,
                    InstanceEventKind::VisiblePriorityChanged {
                        priority: Some(priority),
                    },
                ))
                .await;
        }

        if self.visible_component != Some(component) {
            self.visible_component = Some(component);
            self.global
                .send_event(Event::instance(
                    self.instance_id,
                    InstanceEventKind::VisibleComponentChanged { component },
                ))
                .await;
        }

        let entry = self.inputs.get(&priority)?;
        Some(MuxedMessage::new(
            entry.message.as_ref()?.component(),
            entry.smoothing_cfg,
            entry.message.as_ref()?.data().clone().try_into().ok()?,
        ))
    }

    fn insert_input(&mut self, priority: i32, input: InputMessage) {
        let expires = input
            .data()
            .duration()
            .map(|duration| Instant::now() + duration.to_std().unwrap_or_default());

        let input_id = self.input_id;
        self.input_id += 1;

        let entry = self
            .inputs
            .entry(priority)
            .or_insert_with(|| InputEntry {
                input_id,
                message: None,
                expires: None,
                active: false,
                origin: String::new(),
                owner: String::new(),
                smoothing_cfg: 0,
            });

        // Drop the timeout of the replaced content
        self.timeouts.remove(&entry.input_id);

        entry.input_id = input_id;
        entry.message = Some(input);
        entry.expires = expires;
        entry.active = true;

        if let Some(expires) = expires {
            self.timeouts.insert(
                input_id,
                Box::new(move || {
                    Box::pin(async move {
                        tokio::time::sleep_until(expires.into()).await;
                        (input_id, priority)
                    })
                }),
            );
        }
    }

    fn register_input(
        &mut self,
        priority: i32,
        origin: String,
        owner: String,
        smoothing_cfg: u32,
    ) {
        let input_id = self.input_id;
        self.input_id += 1;

        // Registration refreshes metadata but never touches the content of
        // an existing entry
        let entry = self.inputs.entry(priority).or_insert_with(|| InputEntry {
            input_id,
            message: None,
            expires: None,
            active: false,
            origin: String::new(),
            owner: String::new(),
            smoothing_cfg: 0,
        });

        entry.origin = origin;
        entry.owner = owner;
        entry.smoothing_cfg = smoothing_cfg;

        trace!(priority = %priority, origin = %entry.origin, "registered input");
    }

    fn clear_input(&mut self, priority: i32) -> bool {
        if let Some(InputEntry { input_id, .. }) = self.inputs.remove(&priority) {
            self.timeouts.remove(&input_id);
            true
        } else {
            false
        }
    }

    async fn clear_all(&mut self) -> Option<MuxedMessage> {
        // The effect channel survives clear_all
        let keep: Vec<i32> = self
            .inputs
            .keys()
            .filter(|priority| **priority == EFFECT_CHANNEL_PRIORITY)
            .copied()
            .collect();

        let remove: Vec<i32> = self
            .inputs
            .keys()
            .filter(|priority| !keep.contains(priority))
            .copied()
            .collect();

        for priority in remove {
            self.clear_input(priority);
        }

        debug!("cleared all inputs");

        self.insert_input(
            MAX_PRIORITY,
            InputMessage::new(
                MUXER_ID,
                ComponentName::All,
                InputMessageData::SolidColor {
                    priority: MAX_PRIORITY,
                    duration: None,
                    color: Color::from_components((0, 0, 0)),
                    clear_effect: false,
                },
            ),
        );

        self.notify_output_change().await
    }

    async fn clear(&mut self, priority: i32) -> Option<MuxedMessage> {
        if priority >= MAX_PRIORITY {
            warn!(priority = %priority, "cannot clear reserved priority");
            return None;
        }

        let notify = self.current_priority() == priority;

        self.clear_input(priority);
        debug!(priority = %priority, "cleared priority");

        if notify {
            self.notify_output_change().await
        } else {
            None
        }
    }

    /// Remove all effect-engine entries, used by producers that set
    /// `clear_effect`
    fn clear_effects(&mut self) {
        let effect_priorities: Vec<i32> = self
            .inputs
            .iter()
            .filter(|(_, entry)| {
                entry
                    .message
                    .as_ref()
                    .map(|message| message.component() == ComponentName::Effect)
                    .unwrap_or(false)
            })
            .map(|(priority, _)| *priority)
            .collect();

        for priority in effect_priorities {
            self.clear_input(priority);
        }
    }

    async fn handle_input(&mut self, input: InputMessage) -> Option<MuxedMessage> {
        let priority = input.data().priority().unwrap();

        match input.data() {
            InputMessageData::SolidColor { clear_effect, .. }
            | InputMessageData::LedColors { clear_effect, .. }
            | InputMessageData::Image { clear_effect, .. }
                if *clear_effect && input.component() != ComponentName::Effect =>
            {
                self.clear_effects();
            }
            _ => {}
        }

        let notify = priority <= self.current_priority();

        self.insert_input(priority, input);
        trace!(priority = %priority, "new content for priority level");

        if notify {
            self.notify_output_change().await
        } else {
            None
        }
    }

    async fn set_inactive(&mut self, priority: i32) -> Option<MuxedMessage> {
        let was_visible = self.current_priority() == priority;

        if let Some(entry) = self.inputs.get_mut(&priority) {
            entry.active = false;
            self.timeouts.remove(&entry.input_id);
        }

        if was_visible {
            self.notify_output_change().await
        } else {
            None
        }
    }

    async fn handle_timeout(&mut self, (id, priority): (usize, i32)) -> Option<MuxedMessage> {
        let was_visible = self.current_priority() == priority;

        // Deactivate only if the entry still carries the timed out content
        if let Some(entry) = self.inputs.get_mut(&priority) {
            if entry.input_id == id {
                entry.active = false;
                debug!(priority = %priority, "input timeout");
            } else {
                warn!(id = %id, "unexpected timeout for input");
            }
        }

        self.timeouts.remove(&id);

        if was_visible {
            self.notify_output_change().await
        } else {
            None
        }
    }

    pub async fn handle_message(&mut self, input: InputMessage) -> Option<MuxedMessage> {
        trace!(input = ?input, "got input");

        match input.data() {
            InputMessageData::ClearAll => self.clear_all().await,
            InputMessageData::Clear { priority } => self.clear(*priority).await,
            InputMessageData::RegisterInput {
                priority,
                origin,
                owner,
                smoothing_cfg,
            } => {
                self.register_input(*priority, origin.clone(), owner.clone(), *smoothing_cfg);
                None
            }
            InputMessageData::SetInactive { priority } => self.set_inactive(*priority).await,
            InputMessageData::PrioritiesRequest { response } => {
                let priorities = self.current_priorities();
                if let Some(tx) = (*response.lock().await).take() {
                    // Send errors mean the caller went away
                    tx.send(priorities).ok();
                }
                None
            }
            _ => self.handle_input(input).await,
        }
    }

    pub fn current_priorities(&self) -> Vec<PriorityInfo> {
        let now = Instant::now();
        let visible = self.current_priority();

        self.inputs
            .iter()
            .map(|(priority, entry)| PriorityInfo {
                priority: *priority,
                active: entry.selectable(now),
                visible: *priority == visible,
                component: entry
                    .message
                    .as_ref()
                    .map(|message| message.component())
                    .unwrap_or(ComponentName::All),
                origin: entry.origin.clone(),
                owner: entry.owner.clone(),
                duration_ms: entry
                    .expires
                    .map(|expires| {
                        expires
                            .checked_duration_since(now)
                            .map(|left| left.as_millis() as i64)
                            .unwrap_or(0)
                    }),
                value: entry.message.as_ref().and_then(|message| {
                    if let InputMessageData::SolidColor { color, .. } = message.data() {
                        Some(*color)
                    } else {
                        None
                    }
                }),
            })
            .collect()
    }

    /// Wait for the next entry timeout
    pub async fn update(&mut self) -> Option<MuxedMessage> {
        if !self.timeouts.is_empty() {
            let id = futures::future::select_all(self.timeouts.values().map(|f| f())).await;
            self.handle_timeout(id.0).await
        } else {
            futures::future::pending().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn muxer() -> PriorityMuxer {
        PriorityMuxer::new(Global::new(), 0).await
    }

    fn solid(priority: i32, color: Color, timeout_ms: i64) -> InputMessage {
        InputMessage::new(
            1,
            ComponentName::Color,
            InputMessageData::SolidColor {
                priority,
                duration: if timeout_ms > 0 {
                    Some(chrono::Duration::milliseconds(timeout_ms))
                } else {
                    None
                },
                color,
                clear_effect: false,
            },
        )
    }

    #[tokio::test]
    async fn starts_on_background_black() {
        let muxer = muxer().await;
        assert_eq!(muxer.get_current_priority(), MAX_PRIORITY);
    }

    #[tokio::test]
    async fn lower_priority_wins() {
        let mut muxer = muxer().await;

        let message = muxer
            .handle_message(solid(150, Color::new(0, 255, 0), 0))
            .await;
        assert!(message.is_some());
        assert_eq!(muxer.get_current_priority(), 150);

        let message = muxer
            .handle_message(solid(100, Color::new(255, 0, 0), 0))
            .await;
        assert!(message.is_some());
        assert_eq!(muxer.get_current_priority(), 100);

        // Setting a higher numeric priority does not change the output
        let message = muxer
            .handle_message(solid(200, Color::new(0, 0, 255), 0))
            .await;
        assert!(message.is_none());
        assert_eq!(muxer.get_current_priority(), 100);
    }

    #[tokio::test]
    async fn timeout_evicts_entry() {
        let mut muxer = muxer().await;

        muxer
            .handle_message(solid(100, Color::new(255, 0, 0), 20))
            .await;
        assert_eq!(muxer.get_current_priority(), 100);

        let message = muxer.update().await;
        assert!(message.is_some());
        assert_eq!(muxer.get_current_priority(), MAX_PRIORITY);

        // The entry is deactivated, not removed
        assert!(muxer.inputs.contains_key(&100));
        assert!(!muxer.inputs[&100].active);
    }

    #[tokio::test]
    async fn clear_returns_to_next_source() {
        let mut muxer = muxer().await;

        muxer
            .handle_message(solid(150, Color::new(0, 255, 0), 0))
            .await;
        muxer
            .handle_message(solid(100, Color::new(255, 0, 0), 0))
            .await;

        let message = muxer
            .handle_message(InputMessage::new(
                1,
                ComponentName::Color,
                InputMessageData::Clear { priority: 100 },
            ))
            .await;

        assert!(message.is_some());
        assert_eq!(muxer.get_current_priority(), 150);
    }

    #[tokio::test]
    async fn clear_all_keeps_effect_channel() {
        let mut muxer = muxer().await;

        muxer
            .handle_message(InputMessage::new(
                1,
                ComponentName::Effect,
                InputMessageData::SolidColor {
                    priority: EFFECT_CHANNEL_PRIORITY,
                    duration: None,
                    color: Color::new(1, 1, 1),
                    clear_effect: false,
                },
            ))
            .await;
        muxer
            .handle_message(solid(100, Color::new(255, 0, 0), 0))
            .await;

        muxer
            .handle_message(InputMessage::new(
                1,
                ComponentName::Color,
                InputMessageData::ClearAll,
            ))
            .await;

        assert!(muxer.inputs.contains_key(&EFFECT_CHANNEL_PRIORITY));
        assert!(!muxer.inputs.contains_key(&100));
        assert_eq!(muxer.get_current_priority(), EFFECT_CHANNEL_PRIORITY);
    }

    #[tokio::test]
    async fn set_inactive_hides_entry() {
        let mut muxer = muxer().await;

        muxer
            .handle_message(solid(100, Color::new(255, 0, 0), 0))
            .await;
        let message = muxer
            .handle_message(InputMessage::new(
                1,
                ComponentName::Color,
                InputMessageData::SetInactive { priority: 100 },
            ))
            .await;

        assert!(message.is_some());
        assert_eq!(muxer.get_current_priority(), MAX_PRIORITY);
        assert!(muxer.inputs.contains_key(&100));
    }

    #[tokio::test]
    async fn register_does_not_overwrite_content() {
        let mut muxer = muxer().await;

        muxer
            .handle_message(solid(100, Color::new(255, 0, 0), 0))
            .await;

        muxer
            .handle_message(InputMessage::new(
                2,
                ComponentName::Color,
                InputMessageData::RegisterInput {
                    priority: 100,
                    origin: "test".to_owned(),
                    owner: "owner".to_owned(),
                    smoothing_cfg: 3,
                },
            ))
            .await;

        // The earlier content stays visible, only metadata was refreshed
        assert_eq!(muxer.get_current_priority(), 100);
        assert_eq!(muxer.inputs[&100].smoothing_cfg, 3);
        assert!(muxer.inputs[&100].message.is_some());
    }

    #[tokio::test]
    async fn forced_priority_overrides_auto_selection() {
        let mut muxer = muxer().await;

        muxer
            .handle_message(solid(100, Color::new(255, 0, 0), 0))
            .await;
        muxer
            .handle_message(solid(150, Color::new(0, 255, 0), 0))
            .await;

        muxer.set_forced_priority(Some(150)).await;
        assert_eq!(muxer.get_current_priority(), 150);

        muxer.set_forced_priority(None).await;
        assert_eq!(muxer.get_current_priority(), 100);
    }

    #[tokio::test]
    async fn clear_effect_flag_stops_effects() {
        let mut muxer = muxer().await;

        muxer
            .handle_message(InputMessage::new(
                1,
                ComponentName::Effect,
                InputMessageData::SolidColor {
                    priority: 50,
                    duration: None,
                    color: Color::new(1, 1, 1),
                    clear_effect: false,
                },
            ))
            .await;
        assert_eq!(muxer.get_current_priority(), 50);

        muxer
            .handle_message(InputMessage::new(
                2,
                ComponentName::Color,
                InputMessageData::SolidColor {
                    priority: 100,
                    duration: None,
                    color: Color::new(2, 2, 2),
                    clear_effect: true,
                },
            ))
            .await;

        assert!(!muxer.inputs.contains_key(&50));
        assert_eq!(muxer.get_current_priority(), 100);
    }
}
