use serde_derive::Serialize;

use crate::{component::ComponentName, models::Color};

/// Status of one priority slot, as reported by the JSON API
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityInfo {
    pub priority: i32,
    pub active: bool,
    pub visible: bool,
    #[serde(rename = "componentId")]
    pub component: ComponentName,
    pub origin: String,
    pub owner: String,
    /// Remaining time before eviction; None means no timeout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    /// Set when the slot carries a solid color
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_optional_color"
    )]
    pub value: Option<Color>,
}

fn serialize_optional_color<S>(color: &Option<Color>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match color {
        Some(color) => crate::serde::serialize_color_as_array(color, serializer),
        None => serializer.serialize_none(),
    }
}
