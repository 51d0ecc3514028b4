//! On-device BLE provisioning daemon.
//!
//! Advertises a fixed GATT profile (C3), accepts Wi-Fi credentials over
//! it, drives the interface onto the requested network (C1), reports
//! progress through a Status characteristic (C4), and remembers the last
//! successful pairing across restarts (C2). [`supervisor::Supervisor`]
//! (C5) wires the pieces together and owns the process lifecycle.

pub mod bluetooth;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod error;
pub mod pairing;
pub mod snapshot;
pub mod status;
pub mod supervisor;
pub mod wifi;

pub use error::{Error, Result};
