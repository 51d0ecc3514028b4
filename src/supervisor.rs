//! Supervisor (C5): startup ordering, signal handling, and the health
//! probe. Owns nothing provisioning-specific itself — it wires C1–C4
//! together and watches the process lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::bluetooth::gatt::GattServer;
use crate::bluetooth::{Bt, GattTransport};
use crate::config::Config;
use crate::controller::Controller;
use crate::error::{Error, Result};
use crate::pairing::PairingStore;
use crate::status::StatusChannel;
use crate::wifi::Wifi;

const STARTUP_SOFT_DEADLINE: Duration = Duration::from_secs(10);

/// Process-local health flag: true once `bt_init` has completed and the
/// GATT application/advertisement are registered (§4.5). No network
/// transport is exposed for it — an HTTP control plane is out of scope;
/// callers (tests, a future systemd unit) read it in-process.
#[derive(Clone, Default)]
pub struct Health(Arc<AtomicBool>);

impl Health {
    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn mark_ready(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct Supervisor {
    config: Config,
    wifi: Arc<dyn Wifi>,
    bt: Arc<dyn Bt>,
    transport: Arc<dyn GattTransport>,
    device_id: String,
    device_name: String,
    health: Health,
}

impl Supervisor {
    pub fn new(
        config: Config,
        wifi: Arc<dyn Wifi>,
        bt: Arc<dyn Bt>,
        transport: Arc<dyn GattTransport>,
        device_id: String,
    ) -> Self {
        let device_name = format!("{} {}", config.device_name_prefix, &device_id[..device_id.len().min(4)]);
        Self {
            config,
            wifi,
            bt,
            transport,
            device_id,
            device_name,
            health: Health::default(),
        }
    }

    pub fn health(&self) -> Health {
        self.health.clone()
    }

    /// Runs until `SIGTERM`/`SIGINT`, then drains in-flight work and
    /// returns. Startup order: C2 → C1.bt_init → C4 → C3.advertise, each
    /// under a 10 s soft deadline (§4.5).
    pub async fn run(self) -> Result<()> {
        let pairing = Arc::new(PairingStore::new(self.config.pairing_file()));

        with_deadline("bt_init", self.bt.bt_init()).await?;

        let status = StatusChannel::new();
        let (credentials_tx, credentials_rx) = mpsc::channel(16);
        let (events_tx, events_rx) = mpsc::channel(64);

        let controller = Arc::new(Controller::new(
            Arc::clone(&self.wifi),
            Arc::clone(&pairing),
            status.clone(),
            self.device_id.clone(),
            self.device_name.clone(),
        ));
        let controller_task = tokio::spawn(Arc::clone(&controller).run(credentials_rx));

        let gatt = Arc::new(GattServer::new(
            Arc::clone(&self.wifi),
            Arc::clone(&self.bt),
            status,
            pairing,
            self.config.scan_timeout,
            credentials_tx,
            events_tx,
            self.device_name.clone(),
        ));

        let transport = Arc::clone(&self.transport);
        let gatt_for_transport = Arc::clone(&gatt);
        let transport_task = tokio::spawn(async move { transport.serve(gatt_for_transport, events_rx).await });

        self.health.mark_ready();
        tracing::info!(device_name = %self.device_name, "advertising started, health probe is ready");

        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received, draining in-flight work");

        controller_task.abort();
        transport_task.abort();

        Ok(())
    }
}

async fn with_deadline<T>(step: &str, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(STARTUP_SOFT_DEADLINE, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Internal(format!("{step} exceeded startup deadline"))),
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    let mut int = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {}
        _ = int.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
