//! Pacelink Protocol - Wire protocol for wearable/companion communication
//!
//! This crate provides the message types and command parsing for the
//! JSON-lines link between the wearable-side daemon (pacelinkd) and the
//! companion relay (pacelink-relay).

pub mod message;
pub mod parse;
pub mod version;

pub use message::{RelayMessage, RelayPayload, TelemetryUpdate, WearableMessage};
pub use parse::{parse_command, ParseError, RawCommand};
pub use version::ProtocolVersion;
