//! Reference gateway for the `loramesh` client.
//!
//! Serves the message history, node roster, publish endpoint and live
//! channel from memory. Used for local development and by the client's
//! integration tests.

pub mod config;
pub mod gateway;
pub mod roster;
pub mod store;
