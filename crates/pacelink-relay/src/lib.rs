//! Pacelink Relay - Companion-side client for the wearable daemon
//!
//! Connects to the pacelinkd Unix socket, forwards workout commands, and
//! turns inbound frames into display updates for the companion UI.

pub mod client;
pub mod error;

pub use client::{RelayClient, RelayConfig, RelayUpdate};
pub use error::RelayError;
