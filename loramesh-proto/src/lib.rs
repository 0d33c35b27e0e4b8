//! Shared wire definitions for the `LoRaMesh` gateway API and live channel.

pub mod codec;
pub mod frame;
pub mod message;
pub mod node;
