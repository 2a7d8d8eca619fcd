//! Shared-camera HTTP server.
//!
//! One image sensor, many consumers: still capture and Motion-JPEG
//! endpoints, snapshot export to removable media, and a timer-driven
//! periodic capture job, all serialized through a single-permit sensor
//! gate.

pub mod config;
pub mod error;
pub mod gate;
pub mod periodic;
pub mod sensor;
pub mod settings;
pub mod snapshot;
pub mod storage;
pub mod web;

pub use config::Config;
pub use error::CamError;
pub use gate::{SensorGate, SensorPermit};
pub use periodic::{OwnerSlot, PeriodicCapture};
pub use snapshot::Exporter;
