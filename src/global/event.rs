use std::sync::Arc;

use crate::{
    component::ComponentName,
    image::RawImage,
    models::ImageToLedMappingType,
};

/// Cross-instance broadcast events
///
/// Forwarders and correlated peripherals subscribe to these; the core only
/// emits them.
#[derive(Debug, Clone)]
pub enum Event {
    Start,
    Stop,
    Instance(InstanceEvent),
}

impl Event {
    pub fn instance(id: i32, kind: InstanceEventKind) -> Self {
        Self::Instance(InstanceEvent { id, kind })
    }
}

#[derive(Debug, Clone)]
pub struct InstanceEvent {
    pub id: i32,
    pub kind: InstanceEventKind,
}

#[derive(Debug, Clone)]
pub enum InstanceEventKind {
    Started,
    Stopped,
    VisiblePriorityChanged {
        priority: Option<i32>,
    },
    VisibleComponentChanged {
        component: ComponentName,
    },
    ImageToLedsMappingChanged {
        mapping_type: ImageToLedMappingType,
    },
    /// Forwarders consume the frame selected by the muxer
    ImageUpdated {
        image: Arc<RawImage>,
    },
    AdjustmentUpdated {
        adjustment: serde_json::Value,
    },
    SmoothingRestarted {
        interval_ms: i64,
    },
    SmoothingClockTick,
    PauseChanged {
        paused: bool,
    },
}
