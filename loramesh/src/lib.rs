//! `loramesh`: live message stream client for LoRa mesh gateways.
//!
//! Keeps a local, duplicate-free view of a gateway's append-only message
//! stream fed by a paged history API and a push channel, keeps the push
//! channel alive across failures, and tracks which mesh nodes are online.

pub mod api;
pub mod config;
pub mod console;
pub mod history;
pub mod live;
pub mod peers;
pub mod reconcile;
pub mod schedule;
pub mod session;
