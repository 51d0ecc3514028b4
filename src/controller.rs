//! Provisioning controller (C4): the canonical owner of [`Status`]. Takes
//! one `Credentials` record at a time from C3, drives the Wi-Fi switch
//! through C1, and persists the pairing record through C2 on success.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::credentials::Credentials;
use crate::pairing::{PairingRecord, PairingStore};
use crate::status::{Status, StatusChannel};
use crate::wifi::{Cancellation, Wifi};

/// Generation counter guarding against a superseded switch's result being
/// applied after a newer credential write has already restarted the
/// algorithm (§4.4 "Ordering guarantees").
struct Inflight {
    generation: u64,
    cancel: Cancellation,
}

pub struct Controller {
    wifi: Arc<dyn Wifi>,
    pairing: Arc<PairingStore>,
    status: StatusChannel,
    device_id: String,
    device_name: String,
    inflight: Mutex<Option<Inflight>>,
}

impl Controller {
    pub fn new(
        wifi: Arc<dyn Wifi>,
        pairing: Arc<PairingStore>,
        status: StatusChannel,
        device_id: String,
        device_name: String,
    ) -> Self {
        Self {
            wifi,
            pairing,
            status,
            device_id,
            device_name,
            inflight: Mutex::new(None),
        }
    }

    pub fn status_channel(&self) -> StatusChannel {
        self.status.clone()
    }

    /// Drains `credentials_rx` until the channel closes (supervisor
    /// shutdown). Cancellation of a prior attempt and the generation bump
    /// happen synchronously here, in receive order, so arrival order at
    /// C4 is preserved (§5 "Credential writes: FIFO ... C4 only honors
    /// the latest"); the Wi-Fi switch itself runs in a spawned task so a
    /// slow switch never delays noticing the next write.
    pub async fn run(self: Arc<Self>, mut credentials_rx: mpsc::Receiver<Credentials>) {
        while let Some(creds) = credentials_rx.recv().await {
            let generation = {
                let mut guard = self.inflight.lock().await;
                let next_generation = match guard.take() {
                    Some(prev) => {
                        prev.cancel.cancel();
                        prev.generation + 1
                    }
                    None => 1,
                };
                let cancel = Cancellation::new();
                *guard = Some(Inflight {
                    generation: next_generation,
                    cancel,
                });
                next_generation
            };

            self.status
                .set(Status::CredentialsReceived {
                    ssid: creds.ssid.clone(),
                })
                .await;
            self.status
                .set(Status::Connecting {
                    ssid: creds.ssid.clone(),
                    attempt: 1,
                })
                .await;

            let this = Arc::clone(&self);
            tokio::spawn(async move {
                this.run_switch(creds, generation).await;
            });
        }
    }

    async fn run_switch(self: Arc<Self>, creds: Credentials, generation: u64) {
        let cancel = {
            let guard = self.inflight.lock().await;
            match &*guard {
                Some(i) if i.generation == generation => i.cancel.clone(),
                _ => return, // already superseded before the switch even started
            }
        };

        let outcome = self
            .wifi
            .switch(&creds.ssid, &creds.password, cancel)
            .await;

        // Discard the result if a newer write has already taken over
        // (generation-based supersession keeps the interleaving
        // linearizable per the spec's ordering guarantee).
        let still_current = {
            let guard = self.inflight.lock().await;
            matches!(&*guard, Some(i) if i.generation == generation)
        };
        if !still_current {
            return;
        }

        match outcome {
            Ok(switch) => {
                self.status
                    .set(Status::Connected {
                        ssid: creds.ssid.clone(),
                        ipv4: switch.ipv4,
                        since: chrono::Utc::now(),
                    })
                    .await;

                let record = PairingRecord {
                    device_id: self.device_id.clone(),
                    device_name: self.device_name.clone(),
                    paired_at: chrono::Utc::now(),
                };
                if let Err(e) = self.pairing.save(&record).await {
                    tracing::warn!(error = %e, tag = e.tag(), "failed to persist pairing record");
                }
            }
            Err(e) => {
                self.status
                    .set(Status::Failed {
                        ssid: creds.ssid.clone(),
                        reason: e.tag().to_string(),
                    })
                    .await;
            }
        }

        let mut guard = self.inflight.lock().await;
        if matches!(&*guard, Some(i) if i.generation == generation) {
            *guard = None;
        }
    }
}
