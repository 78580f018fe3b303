//! Component system definitions

use parse_display::Display;
use serde::{Deserialize, Serialize};

#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ComponentName {
    #[display("HyperHDR")]
    All,
    #[display("HDR tone mapping")]
    HdrToneMapping,
    #[display("Smoothing")]
    Smoothing,
    #[display("Blackborder detector")]
    BlackBorder,
    #[display("Json/Proto forwarder")]
    Forwarder,
    #[display("System capture")]
    SystemGrabber,
    #[display("Video capture device")]
    VideoGrabber,
    #[display("Solid color")]
    Color,
    #[display("Effect")]
    Effect,
    #[display("Image")]
    Image,
    #[display("LED device")]
    LedDevice,
}
