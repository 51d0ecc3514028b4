//! C1's Bluetooth half (controller init + read-through snapshot) and C3,
//! the GATT server built on top of it.

pub mod fake;
#[cfg(target_os = "linux")]
pub mod linux;
pub mod gatt;
pub mod uuids;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::snapshot::BluetoothSnapshot;

use gatt::{GattEvent, GattServer};

/// The OS adapter's Bluetooth controller operations (§4.1).
#[async_trait]
pub trait Bt: Send + Sync {
    /// Open the controller, ensure power-on, enable LE advertising
    /// capability. Fails with `BtUnavailable` if the controller is
    /// missing — fatal at startup (§4.5).
    async fn bt_init(&self) -> Result<()>;

    /// Non-blocking read of the controller and connected central, if any.
    async fn bt_snapshot(&self) -> BluetoothSnapshot;
}

/// Wires the platform-agnostic [`GattServer`] onto a concrete BLE
/// peripheral backend: registers the GATT application/advertisement and
/// relays `GattEvent`s for the lifetime of the process.
#[async_trait]
pub trait GattTransport: Send + Sync {
    async fn serve(&self, server: Arc<GattServer>, events: mpsc::Receiver<GattEvent>) -> Result<()>;
}
