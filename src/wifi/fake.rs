//! In-memory `Wifi` fake used by controller/GATT tests, mirroring the way
//! the teacher codebase provides a fallback peripheral backend for
//! platforms without a native implementation — here it stands in for real
//! radio/supplicant hardware entirely.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::credentials::Password;
use crate::error::{Error, Result, TimeoutStage};
use crate::snapshot::{NetworkSnapshot, ScanEntry};

use super::{Cancellation, SwitchOutcome, Wifi};

/// What a fake switch attempt should do for a given SSID.
#[derive(Clone)]
pub enum Outcome {
    Succeed { ipv4: String, delay: Duration },
    FailAssoc { delay: Duration },
    NeverCompletes,
}

pub struct FakeWifi {
    outcomes: Mutex<HashMap<String, Outcome>>,
    default_outcome: Outcome,
    scan_results: Mutex<Vec<ScanEntry>>,
    switch_calls: Mutex<u32>,
}

impl FakeWifi {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(HashMap::new()),
            default_outcome: Outcome::Succeed {
                ipv4: "192.0.2.10".to_string(),
                delay: Duration::from_millis(5),
            },
            scan_results: Mutex::new(Vec::new()),
            switch_calls: Mutex::new(0),
        }
    }

    pub fn set_outcome(&self, ssid: &str, outcome: Outcome) {
        self.outcomes.lock().unwrap().insert(ssid.to_string(), outcome);
    }

    pub fn set_scan_results(&self, entries: Vec<ScanEntry>) {
        *self.scan_results.lock().unwrap() = entries;
    }

    pub fn switch_call_count(&self) -> u32 {
        *self.switch_calls.lock().unwrap()
    }
}

impl Default for FakeWifi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Wifi for FakeWifi {
    async fn switch(
        &self,
        ssid: &str,
        _password: &Password,
        cancel: Cancellation,
    ) -> Result<SwitchOutcome> {
        *self.switch_calls.lock().unwrap() += 1;

        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .get(ssid)
            .cloned()
            .unwrap_or_else(|| self.default_outcome.clone());

        match outcome {
            Outcome::Succeed { ipv4, delay } => {
                sleep(delay).await;
                if cancel.is_cancelled() {
                    return Err(Error::WifiAssocFailed("superseded".into()));
                }
                Ok(SwitchOutcome { ipv4 })
            }
            Outcome::FailAssoc { delay } => {
                sleep(delay).await;
                Err(Error::WifiAssocFailed(format!("no AP found for {ssid}")))
            }
            Outcome::NeverCompletes => loop {
                if cancel.is_cancelled() {
                    return Err(Error::WifiAssocFailed("superseded".into()));
                }
                sleep(Duration::from_millis(10)).await;
            },
        }
    }

    async fn snapshot(&self) -> NetworkSnapshot {
        NetworkSnapshot {
            ssid: None,
            rssi: None,
            frequency_mhz: None,
            security: None,
            interface_up: true,
        }
    }

    async fn scan(&self, timeout: Duration) -> Result<Vec<ScanEntry>> {
        if timeout > Duration::from_secs(15) {
            return Err(Error::Timeout(TimeoutStage::Scan));
        }
        Ok(self.scan_results.lock().unwrap().clone())
    }
}
