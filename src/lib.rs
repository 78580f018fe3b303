//! HyperHDR ambient lighting engine
//!
//! Per-instance real-time color pipeline: priority muxing, frame-to-LED
//! averaging with black border detection, HDR tone mapping, per-LED
//! calibration, temporal smoothing and the LED device drivers.

#[macro_use]
extern crate tracing;

pub mod api;
pub mod cli;
pub mod color;
pub mod component;
pub mod global;
pub mod image;
pub mod instance;
pub mod lut;
pub mod models;
pub mod serde;
