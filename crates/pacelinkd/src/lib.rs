//! Pacelink Daemon - Wearable-side workout session controller
//!
//! This crate provides the core infrastructure for the wearable daemon:
//! - `controller` - Session controller actor owning the workout lifecycle
//! - `delivery` - Last-value-wins delivery channel to the companion link
//! - `reconciler` - Post-workout reconciliation against the health store
//! - `link` - Unix socket server for the companion relay connection
//! - `source` - Simulated telemetry source and health store
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     pacelinkd daemon                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │   LinkServer    │────▶│     ControllerActor         │   │
//! │  │ (Unix Socket)   │     │  (session state owner)      │   │
//! │  └────────┬────────┘     └──────────────┬──────────────┘   │
//! │           │                             │                   │
//! │           │ frames                      │ readings          │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ DeliveryWorker  │◀────│     TelemetrySource         │   │
//! │  │ (latest wins)   │     │   (sensor capture)          │   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod controller;
pub mod delivery;
pub mod link;
pub mod reconciler;
pub mod source;
