use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};

use crate::{
    api::types::PriorityInfo, component::ComponentName, image::RawImage, models::Color,
};

use super::Message;

/// A message on the instance input bus
#[derive(Debug, Clone)]
pub struct InputMessage {
    source_id: usize,
    component: ComponentName,
    data: InputMessageData,
}

impl Message for InputMessage {
    type Data = InputMessageData;

    fn new(source_id: usize, component: ComponentName, data: Self::Data) -> Self {
        Self {
            source_id,
            component,
            data,
        }
    }

    fn source_id(&self) -> usize {
        self.source_id
    }

    fn component(&self) -> ComponentName {
        self.component
    }

    fn data(&self) -> &Self::Data {
        &self.data
    }
}

#[derive(Debug, Clone)]
pub enum InputMessageData {
    ClearAll,
    Clear {
        priority: i32,
    },
    /// Announce a producer on a priority slot without setting colors
    RegisterInput {
        priority: i32,
        origin: String,
        owner: String,
        smoothing_cfg: u32,
    },
    SolidColor {
        priority: i32,
        duration: Option<chrono::Duration>,
        color: Color,
        clear_effect: bool,
    },
    LedColors {
        priority: i32,
        duration: Option<chrono::Duration>,
        led_colors: Arc<Vec<Color>>,
        clear_effect: bool,
    },
    Image {
        priority: i32,
        duration: Option<chrono::Duration>,
        image: Arc<RawImage>,
        clear_effect: bool,
    },
    /// Deactivate a slot; the entry persists until evicted or cleared
    SetInactive {
        priority: i32,
    },
    PrioritiesRequest {
        response: Arc<Mutex<Option<oneshot::Sender<Vec<PriorityInfo>>>>>,
    },
}

impl InputMessageData {
    pub fn priority(&self) -> Option<i32> {
        match self {
            InputMessageData::ClearAll | InputMessageData::PrioritiesRequest { .. } => None,
            InputMessageData::Clear { priority }
            | InputMessageData::RegisterInput { priority, .. }
            | InputMessageData::SolidColor { priority, .. }
            | InputMessageData::LedColors { priority, .. }
            | InputMessageData::Image { priority, .. }
            | InputMessageData::SetInactive { priority } => Some(*priority),
        }
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        match self {
            InputMessageData::SolidColor { duration, .. }
            | InputMessageData::LedColors { duration, .. }
            | InputMessageData::Image { duration, .. } => *duration,
            _ => None,
        }
    }
}
