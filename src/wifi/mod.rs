//! C1's Wi-Fi half: the `Wifi` capability interface plus the Linux
//! supplicant-backed implementation and an in-memory fake for tests.
//!
//! C1 is the only component that touches the Wi-Fi interface (§9
//! "Ownership of singletons"); C3/C4 only ever see this trait.

pub mod linux;
pub mod fake;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::credentials::Password;
use crate::error::Result;
use crate::snapshot::{NetworkSnapshot, ScanEntry};

/// Outcome of a successful `wifi_switch` (§4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchOutcome {
    pub ipv4: String,
}

/// A cheap, cloneable cooperative-cancellation flag. The controller (C4)
/// flips it when a fresh credential write supersedes an in-flight switch;
/// the Wi-Fi adapter checks it at each bounded wait (§4.4 step 1, §5).
#[derive(Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The OS adapter's Wi-Fi operations (§4.1).
#[async_trait]
pub trait Wifi: Send + Sync {
    /// Run the full reconfiguration procedure (§4.4 step 4, §6). Blocks
    /// until an outcome is determined, a hard timeout elapses, or
    /// `cancel` is observed at a safe point.
    async fn switch(
        &self,
        ssid: &str,
        password: &Password,
        cancel: Cancellation,
    ) -> Result<SwitchOutcome>;

    /// Non-blocking read of current link state.
    async fn snapshot(&self) -> NetworkSnapshot;

    /// Active scan bounded by `timeout` (caller enforces the 15s hard max).
    async fn scan(&self, timeout: Duration) -> Result<Vec<ScanEntry>>;
}
