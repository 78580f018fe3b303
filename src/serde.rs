//! serde helpers for the settings documents

use serde::ser::SerializeSeq;

use crate::models::Color;

/// Serialize a color as a `[R, G, B]` array, as found in the settings documents
pub fn serialize_color_as_array<S>(color: &Color, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let mut seq = serializer.serialize_seq(Some(3))?;
    seq.serialize_element(&color.red)?;
    seq.serialize_element(&color.green)?;
    seq.serialize_element(&color.blue)?;
    seq.end()
}

/// Deserialize a color from a `[R, G, B]` array
pub fn deserialize_color_from_array<'de, D>(deserializer: D) -> Result<Color, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let components = <[u8; 3] as serde::Deserialize>::deserialize(deserializer)?;
    Ok(Color::from_components((
        components[0],
        components[1],
        components[2],
    )))
}
