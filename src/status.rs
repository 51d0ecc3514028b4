//! The Status singleton (§3): the single source of truth for pairing and
//! connection progress, owned exclusively by the provisioning controller
//! (C4) and readable/subscribable by everyone else over GATT (C3).

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};

/// Tagged Status variant. Serialised as a compact JSON object for the
/// Status characteristic; field names are stable wire contract.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Status {
    Idle,
    CredentialsReceived {
        ssid: String,
    },
    Connecting {
        ssid: String,
        attempt: u32,
    },
    Connected {
        ssid: String,
        ipv4: String,
        since: DateTime<Utc>,
    },
    Failed {
        ssid: String,
        reason: String,
    },
    Disconnected {
        #[serde(skip_serializing_if = "Option::is_none")]
        last_ssid: Option<String>,
    },
}

impl Status {
    pub fn ssid(&self) -> Option<&str> {
        match self {
            Status::Idle => None,
            Status::CredentialsReceived { ssid }
            | Status::Connecting { ssid, .. }
            | Status::Connected { ssid, .. }
            | Status::Failed { ssid, .. } => Some(ssid),
            Status::Disconnected { last_ssid } => last_ssid.as_deref(),
        }
    }

    pub fn to_json(&self) -> Vec<u8> {
        // `Status` only ever holds credential-free fields (I4), so this
        // can never panic on a non-serialisable value.
        serde_json::to_vec(self).expect("Status always serialises")
    }
}

/// Shared handle to the canonical Status value plus its transition stream.
///
/// Broadcasting is level-triggered for new subscribers: `subscribe`
/// returns both the current value and a receiver of future transitions,
/// so a central that joins mid-sequence observes the current Status as
/// its first notification (P2) without racing a separate read.
#[derive(Clone)]
pub struct StatusChannel {
    current: std::sync::Arc<RwLock<Status>>,
    tx: broadcast::Sender<Status>,
}

impl StatusChannel {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(32);
        Self {
            current: std::sync::Arc::new(RwLock::new(Status::Idle)),
            tx,
        }
    }

    /// Non-blocking snapshot read, used by the GATT Status-read handler.
    pub async fn current(&self) -> Status {
        self.current.read().await.clone()
    }

    /// Transition to a new Status and fan the notification out to every
    /// subscriber. Called only by the provisioning controller (C4).
    pub async fn set(&self, status: Status) {
        *self.current.write().await = status.clone();
        // A subscriber list that cannot keep up is dropped, never blocking
        // the sender (design note §9): `send` never awaits.
        let _ = self.tx.send(status);
    }

    /// Subscribe for future transitions. Pair with `current()` read under
    /// the same lock acquisition order (current before subscribe) to
    /// avoid losing a transition between the two calls.
    pub fn subscribe(&self) -> broadcast::Receiver<Status> {
        self.tx.subscribe()
    }

    /// Atomically fetch the current value and a receiver for everything
    /// after it, so a late joiner never misses or double-counts a
    /// transition racing the subscribe call.
    pub async fn current_and_subscribe(&self) -> (Status, broadcast::Receiver<Status>) {
        let guard = self.current.read().await;
        let rx = self.tx.subscribe();
        (guard.clone(), rx)
    }
}

impl Default for StatusChannel {
    fn default() -> Self {
        Self::new()
    }
}
