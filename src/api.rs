//! Types exposed to the JSON status consumers

pub mod types;
