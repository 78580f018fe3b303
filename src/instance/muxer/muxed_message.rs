use std::convert::TryFrom;
use std::sync::Arc;

use crate::{
    component::ComponentName,
    global::InputMessageData,
    image::RawImage,
    models::Color,
};

/// The visible output selected by the muxer
#[derive(Debug, Clone)]
pub struct MuxedMessage {
    component: ComponentName,
    /// Smoothing configuration requested by the producing entry
    smoothing_cfg: u32,
    data: MuxedMessageData,
}

impl MuxedMessage {
    pub fn new(component: ComponentName, smoothing_cfg: u32, data: MuxedMessageData) -> Self {
        Self {
            component,
            smoothing_cfg,
            data,
        }
    }

    pub fn component(&self) -> ComponentName {
        self.component
    }

    pub fn smoothing_cfg(&self) -> u32 {
        self.smoothing_cfg
    }

    pub fn data(&self) -> &MuxedMessageData {
        &self.data
    }
}

#[derive(Debug, Clone)]
pub enum MuxedMessageData {
    SolidColor {
        priority: i32,
        color: Color,
    },
    LedColors {
        priority: i32,
        led_colors: Arc<Vec<Color>>,
    },
    Image {
        priority: i32,
        image: Arc<RawImage>,
    },
}

impl MuxedMessageData {
    pub fn priority(&self) -> i32 {
        match self {
            MuxedMessageData::SolidColor { priority, .. }
            | MuxedMessageData::LedColors { priority, .. }
            | MuxedMessageData::Image { priority, .. } => *priority,
        }
    }
}

impl TryFrom<InputMessageData> for MuxedMessageData {
    type Error = ();

    fn try_from(data: InputMessageData) -> Result<Self, Self::Error> {
        match data {
            InputMessageData::SolidColor {
                priority, color, ..
            } => Ok(Self::SolidColor { priority, color }),
            InputMessageData::LedColors {
                priority,
                led_colors,
                ..
            } => Ok(Self::LedColors {
                priority,
                led_colors,
            }),
            InputMessageData::Image {
                priority, image, ..
            } => Ok(Self::Image { priority, image }),
            _ => Err(()),
        }
    }
}
