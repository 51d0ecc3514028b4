//! In-memory `Bt` fake used by GATT/controller tests. Mirrors a
//! controller that is always present and never connected, unless a test
//! explicitly drives it otherwise.

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::snapshot::BluetoothSnapshot;

use super::gatt::{GattEvent, GattServer};
use super::{Bt, GattTransport};

pub struct FakeBt {
    available: bool,
    connected_central: Mutex<Option<String>>,
    advertising: Mutex<bool>,
}

impl FakeBt {
    pub fn new() -> Self {
        Self {
            available: true,
            connected_central: Mutex::new(None),
            advertising: Mutex::new(true),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            connected_central: Mutex::new(None),
            advertising: Mutex::new(false),
        }
    }

    pub fn set_connected_central(&self, central: Option<&str>) {
        *self.connected_central.lock().unwrap() = central.map(str::to_string);
    }

    pub fn set_advertising(&self, advertising: bool) {
        *self.advertising.lock().unwrap() = advertising;
    }
}

impl Default for FakeBt {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bt for FakeBt {
    async fn bt_init(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(Error::BtUnavailable)
        }
    }

    async fn bt_snapshot(&self) -> BluetoothSnapshot {
        BluetoothSnapshot {
            peripheral_address: "AA:BB:CC:DD:EE:FF".to_string(),
            connected_central: self.connected_central.lock().unwrap().clone(),
            link_rssi: None,
            advertising: *self.advertising.lock().unwrap(),
        }
    }
}

/// `GattTransport` stand-in for platforms without BlueZ (tests, and any
/// non-Linux dev build): just drains the event channel until it closes.
pub struct NullTransport;

#[async_trait]
impl GattTransport for NullTransport {
    async fn serve(&self, _server: Arc<GattServer>, mut events: mpsc::Receiver<GattEvent>) -> Result<()> {
        while events.recv().await.is_some() {}
        Ok(())
    }
}
