//! Platform-agnostic GATT server logic (C3): per-connection state,
//! characteristic read/write/subscribe dispatch, and scan coalescing.
//! The platform layer (e.g. `bluetooth::linux`) wires BlueZ D-Bus
//! callbacks into these methods; none of this module touches D-Bus.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, broadcast, Mutex, Notify, RwLock};

use crate::bluetooth::uuids::CharacteristicId;
use crate::bluetooth::Bt;
use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::pairing::PairingStore;
use crate::snapshot::{self, DeviceInfo, ScanEntry};
use crate::status::{Status, StatusChannel};
use crate::wifi::Wifi;

const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Per-central ephemeral state (§3 ConnectionContext).
pub struct ConnectionContext {
    pub mtu: usize,
    pub subscriptions: HashSet<CharacteristicId>,
    status_forward_cancel: Option<Arc<Notify>>,
}

impl ConnectionContext {
    fn new(mtu: usize) -> Self {
        Self {
            mtu,
            subscriptions: HashSet::new(),
            status_forward_cancel: None,
        }
    }
}

/// Event the platform layer must realize (send a BlueZ `PropertiesChanged`
/// signal, or re-register the LE advertisement).
#[derive(Debug, Clone)]
pub enum GattEvent {
    Notify {
        central: String,
        characteristic: CharacteristicId,
        payload: Vec<u8>,
    },
    ResumeAdvertising,
}

/// Single-flight Wi-Fi scan coalescer (§4.1, §9 "Scan reuse").
///
/// Overlapping scan requests share one underlying `wifi.scan()` call; the
/// cache is the completion of that call plus a short TTL, matching the
/// spec's "single-flight primitive" design note.
pub struct ScanCoalescer {
    wifi: Arc<dyn Wifi>,
    inflight: Mutex<Option<broadcast::Sender<Arc<Vec<ScanEntry>>>>>,
    cache: RwLock<Option<(Instant, Arc<Vec<ScanEntry>>)>>,
    cache_ttl: Duration,
    scan_timeout: Duration,
}

impl ScanCoalescer {
    pub fn new(wifi: Arc<dyn Wifi>, scan_timeout: Duration, cache_ttl: Duration) -> Self {
        Self {
            wifi,
            inflight: Mutex::new(None),
            cache: RwLock::new(None),
            cache_ttl,
            scan_timeout,
        }
    }

    /// Returns the last cached scan result, or an empty list if none
    /// exists yet; never blocks on a live scan (§4.1 Read(Scan)).
    pub async fn cached_or_empty(self: &Arc<Self>) -> Vec<ScanEntry> {
        let cached = self.cache.read().await.as_ref().map(|(_, v)| (**v).clone());
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _ = this.refresh().await;
        });
        cached.unwrap_or_default()
    }

    /// Drive (or join) the single underlying scan in flight. Exercised
    /// directly by coalescing tests (P7/S6); also the engine behind
    /// `cached_or_empty`'s background refresh.
    pub async fn refresh(&self) -> Result<Vec<ScanEntry>> {
        if let Some((at, value)) = self.cache.read().await.clone() {
            if at.elapsed() < self.cache_ttl {
                return Ok((*value).clone());
            }
        }

        let mut guard = self.inflight.lock().await;
        if let Some(tx) = guard.as_ref() {
            let mut rx = tx.subscribe();
            drop(guard);
            return rx
                .recv()
                .await
                .map(|v| (*v).clone())
                .map_err(|_| Error::GattTransient("scan coalescer closed".into()));
        }

        let (tx, _rx) = broadcast::channel(1);
        *guard = Some(tx.clone());
        drop(guard);

        let result = self.wifi.scan(self.scan_timeout).await;

        *self.inflight.lock().await = None;

        match result {
            Ok(entries) => {
                let arc = Arc::new(entries.clone());
                *self.cache.write().await = Some((Instant::now(), arc.clone()));
                let _ = tx.send(arc);
                Ok(entries)
            }
            Err(e) => {
                let _ = tx.send(Arc::new(Vec::new()));
                Err(e)
            }
        }
    }
}

/// The GATT server proper (C3). Generic over nothing — depends only on
/// the `Wifi`/`Bt` capability interfaces and the shared `StatusChannel`,
/// so it is identical on every platform; only the D-Bus plumbing differs.
pub struct GattServer {
    wifi: Arc<dyn Wifi>,
    bt: Arc<dyn Bt>,
    status: StatusChannel,
    pairing: Arc<PairingStore>,
    scan: Arc<ScanCoalescer>,
    credentials_tx: mpsc::Sender<Credentials>,
    connections: RwLock<HashMap<String, Arc<Mutex<ConnectionContext>>>>,
    events_tx: mpsc::Sender<GattEvent>,
    device_name: String,
}

impl GattServer {
    pub fn new(
        wifi: Arc<dyn Wifi>,
        bt: Arc<dyn Bt>,
        status: StatusChannel,
        pairing: Arc<PairingStore>,
        scan_timeout: Duration,
        credentials_tx: mpsc::Sender<Credentials>,
        events_tx: mpsc::Sender<GattEvent>,
        device_name: String,
    ) -> Self {
        Self {
            scan: Arc::new(ScanCoalescer::new(
                Arc::clone(&wifi),
                scan_timeout,
                Duration::from_secs(2),
            )),
            wifi,
            bt,
            status,
            pairing,
            credentials_tx,
            connections: RwLock::new(HashMap::new()),
            events_tx,
            device_name,
        }
    }

    pub async fn on_connect(&self, central: &str, mtu: usize) {
        self.connections.write().await.insert(
            central.to_string(),
            Arc::new(Mutex::new(ConnectionContext::new(mtu))),
        );
    }

    /// Resumes advertising via `events_tx` within the caller's own
    /// dispatch latency; the platform layer must actually re-register
    /// the advertisement within the 500 ms deadline (I6, P8).
    pub async fn on_disconnect(&self, central: &str) {
        if let Some(ctx) = self.connections.write().await.remove(central) {
            let ctx = ctx.lock().await;
            if let Some(cancel) = &ctx.status_forward_cancel {
                cancel.notify_waiters();
            }
        }
        let _ = self.events_tx.send(GattEvent::ResumeAdvertising).await;
    }

    /// Clone the per-central lock out of the connection table and lock it,
    /// so the table's own read lock need not be held for the call's
    /// duration (avoids a deadlock against concurrent `on_connect`).
    async fn lock_connection(
        &self,
        central: &str,
    ) -> Result<tokio::sync::OwnedMutexGuard<ConnectionContext>> {
        let ctx = self
            .connections
            .read()
            .await
            .get(central)
            .cloned()
            .ok_or_else(|| Error::Internal("unknown connection".into()))?;
        Ok(ctx.lock_owned().await)
    }

    pub async fn on_read(&self, central: &str, ch: CharacteristicId) -> Result<Vec<u8>> {
        // Holding the per-central lock for the call's duration serializes
        // all read/write/subscribe events on one connection (§4.3
        // Concurrency), while other centrals proceed independently.
        let _guard = self.lock_connection(central).await?;

        match ch {
            CharacteristicId::Credentials => Err(Error::ReadNotPermitted),
            CharacteristicId::Status => Ok(self.status.current().await.to_json()),
            CharacteristicId::Scan => {
                let entries = self.scan.cached_or_empty().await;
                Ok(snapshot::to_json(&entries))
            }
            CharacteristicId::NetworkDetails => Ok(snapshot::to_json(&self.wifi.snapshot().await)),
            CharacteristicId::BluetoothDetails => {
                Ok(snapshot::to_json(&self.bt.bt_snapshot().await))
            }
            CharacteristicId::DeviceInfo => {
                let paired_at = self
                    .pairing
                    .load()
                    .await
                    .map(|r| r.paired_at.to_rfc3339());
                Ok(snapshot::to_json(&DeviceInfo {
                    paired_at,
                    firmware_version: FIRMWARE_VERSION.to_string(),
                    device_name: self.device_name.clone(),
                }))
            }
        }
    }

    pub async fn on_write(&self, central: &str, ch: CharacteristicId, bytes: Vec<u8>) -> Result<()> {
        let _guard = self.lock_connection(central).await?;

        match ch {
            CharacteristicId::Credentials => {
                let creds = match Credentials::parse(&bytes) {
                    Ok(creds) => creds,
                    Err(e) => {
                        self.status
                            .set(Status::Failed {
                                ssid: String::new(),
                                reason: "invalid_credentials".to_string(),
                            })
                            .await;
                        return Err(e);
                    }
                };
                self.credentials_tx
                    .send(creds)
                    .await
                    .map_err(|_| Error::Internal("controller channel closed".into()))?;
                Ok(())
            }
            _ => Err(Error::WriteNotPermitted),
        }
    }

    /// Subscribing to Status re-syncs the subscriber with one immediate
    /// notification of the current value (§4.3 "+Subscribed(Status)").
    pub async fn on_subscribe(self: &Arc<Self>, central: &str, ch: CharacteristicId) -> Result<()> {
        if ch != CharacteristicId::Status {
            return Ok(());
        }

        let connections = self.connections.read().await;
        let Some(ctx_lock) = connections.get(central) else {
            return Err(Error::Internal("unknown connection".into()));
        };

        let mut ctx = ctx_lock.lock().await;
        ctx.subscriptions.insert(ch);
        let cancel = Arc::new(Notify::new());
        ctx.status_forward_cancel = Some(Arc::clone(&cancel));
        drop(ctx);
        drop(connections);

        let (current, mut rx) = self.status.current_and_subscribe().await;
        let _ = self
            .events_tx
            .send(GattEvent::Notify {
                central: central.to_string(),
                characteristic: CharacteristicId::Status,
                payload: current.to_json(),
            })
            .await;

        let this = Arc::clone(self);
        let central = central.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.notified() => break,
                    res = rx.recv() => {
                        match res {
                            Ok(status) => {
                                let _ = this.events_tx.send(GattEvent::Notify {
                                    central: central.clone(),
                                    characteristic: CharacteristicId::Status,
                                    payload: status.to_json(),
                                }).await;
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        }
                    }
                }
            }
        });

        Ok(())
    }

    pub async fn on_unsubscribe(&self, central: &str, ch: CharacteristicId) {
        let connections = self.connections.read().await;
        if let Some(ctx_lock) = connections.get(central) {
            let mut ctx = ctx_lock.lock().await;
            ctx.subscriptions.remove(&ch);
            if ch == CharacteristicId::Status {
                if let Some(cancel) = ctx.status_forward_cancel.take() {
                    cancel.notify_waiters();
                }
            }
        }
    }

    pub async fn connected_centrals(&self) -> Vec<String> {
        self.connections.read().await.keys().cloned().collect()
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::fake::FakeBt;
    use crate::config::Config;
    use crate::status::Status;
    use crate::wifi::fake::FakeWifi;
    use std::path::PathBuf;

    fn make_server() -> (Arc<GattServer>, mpsc::Receiver<Credentials>, mpsc::Receiver<GattEvent>) {
        let (ctx, crx) = mpsc::channel(8);
        let (etx, erx) = mpsc::channel(32);
        let status = StatusChannel::new();
        let pairing = Arc::new(PairingStore::new(PathBuf::from("/tmp/does-not-exist-pairing.json")));
        let server = GattServer::new(
            Arc::new(FakeWifi::new()),
            Arc::new(FakeBt::new()),
            status,
            pairing,
            Config::default().scan_timeout,
            ctx,
            etx,
            "SAGE-TEST".to_string(),
        );
        (Arc::new(server), crx, erx)
    }

    #[tokio::test]
    async fn credentials_read_is_refused() {
        let (server, _crx, _erx) = make_server();
        server.on_connect("central-1", 185).await;
        let err = server
            .on_read("central-1", CharacteristicId::Credentials)
            .await
            .unwrap_err();
        assert_eq!(err.tag(), "read_not_permitted");
    }

    #[tokio::test]
    async fn status_read_returns_idle_initially() {
        let (server, _crx, _erx) = make_server();
        server.on_connect("central-1", 185).await;
        let bytes = server
            .on_read("central-1", CharacteristicId::Status)
            .await
            .unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "{\"state\":\"idle\"}");
    }

    #[tokio::test]
    async fn valid_credentials_write_is_forwarded_to_controller() {
        let (server, mut crx, _erx) = make_server();
        server.on_connect("central-1", 185).await;
        server
            .on_write(
                "central-1",
                CharacteristicId::Credentials,
                br#"{"ssid":"HomeNet","password":"hunter2x8"}"#.to_vec(),
            )
            .await
            .unwrap();

        let creds = crx.recv().await.unwrap();
        assert_eq!(creds.ssid, "HomeNet");
    }

    #[tokio::test]
    async fn malformed_credentials_write_is_rejected_without_forwarding() {
        let (server, mut crx, _erx) = make_server();
        server.on_connect("central-1", 185).await;
        let err = server
            .on_write("central-1", CharacteristicId::Credentials, b"garbage".to_vec())
            .await
            .unwrap_err();
        assert_eq!(err.tag(), "invalid_credentials");
        assert!(crx.try_recv().is_err());

        match server.status.current().await {
            Status::Failed { ssid, reason } => {
                assert_eq!(ssid, "");
                assert_eq!(reason, "invalid_credentials");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn writes_to_other_characteristics_are_refused() {
        let (server, _crx, _erx) = make_server();
        server.on_connect("central-1", 185).await;
        let err = server
            .on_write("central-1", CharacteristicId::Status, b"{}".to_vec())
            .await
            .unwrap_err();
        assert_eq!(err.tag(), "write_not_permitted");
    }

    #[tokio::test]
    async fn subscribing_to_status_sends_immediate_resync() {
        let (server, _crx, mut erx) = make_server();
        server.on_connect("central-1", 185).await;
        server.status.set(Status::Idle).await;

        server
            .on_subscribe("central-1", CharacteristicId::Status)
            .await
            .unwrap();

        let event = erx.recv().await.unwrap();
        match event {
            GattEvent::Notify { characteristic, payload, .. } => {
                assert_eq!(characteristic, CharacteristicId::Status);
                assert!(String::from_utf8(payload).unwrap().contains("idle"));
            }
            _ => panic!("expected Notify"),
        }
    }

    #[tokio::test]
    async fn subsequent_status_transitions_are_forwarded_to_subscriber() {
        let (server, _crx, mut erx) = make_server();
        server.on_connect("central-1", 185).await;
        server
            .on_subscribe("central-1", CharacteristicId::Status)
            .await
            .unwrap();
        let _initial = erx.recv().await.unwrap(); // resync

        server
            .status
            .set(Status::CredentialsReceived { ssid: "HomeNet".into() })
            .await;

        let event = tokio::time::timeout(Duration::from_secs(1), erx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            GattEvent::Notify { payload, .. } => {
                assert!(String::from_utf8(payload).unwrap().contains("HomeNet"));
            }
            _ => panic!("expected Notify"),
        }
    }

    #[tokio::test]
    async fn disconnect_resumes_advertising() {
        let (server, _crx, mut erx) = make_server();
        server.on_connect("central-1", 185).await;
        server.on_disconnect("central-1").await;

        let event = erx.recv().await.unwrap();
        assert!(matches!(event, GattEvent::ResumeAdvertising));
    }

    #[tokio::test]
    async fn concurrent_scan_reads_coalesce_to_one_underlying_scan() {
        let wifi = Arc::new(FakeWifi::new());
        wifi.set_scan_results(vec![ScanEntry {
            ssid: "HomeNet".into(),
            rssi: -50,
            secured: true,
        }]);
        let coalescer = Arc::new(ScanCoalescer::new(
            wifi.clone(),
            Duration::from_secs(5),
            Duration::from_secs(2),
        ));

        let (a, b, c) = tokio::join!(
            coalescer.refresh(),
            coalescer.refresh(),
            coalescer.refresh()
        );
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
        assert_eq!(a.len(), 1);
        assert_eq!(a, b);
        assert_eq!(b, c);
    }
}
