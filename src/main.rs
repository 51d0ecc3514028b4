use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use sage_provisiond::bluetooth::{Bt, GattTransport};
use sage_provisiond::config::{CliArgs, Config};
use sage_provisiond::error::Result;
use sage_provisiond::supervisor::Supervisor;
use sage_provisiond::wifi::Wifi;

#[cfg(target_os = "linux")]
use sage_provisiond::bluetooth::linux::LinuxBt;
#[cfg(target_os = "linux")]
use sage_provisiond::wifi::linux::LinuxWifi;
#[cfg(not(target_os = "linux"))]
use sage_provisiond::bluetooth::fake::NullTransport;

/// Stable per-device identifier for the PairingRecord, read from
/// `/etc/machine-id` where available; falls back to a fresh random id on
/// platforms that lack one (dev machines, CI).
fn device_id() -> String {
    std::fs::read_to_string("/etc/machine-id")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|_| uuid::Uuid::new_v4().simple().to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let config = Config::from_env().apply_cli(&args);
    config.validate()?;

    fmt().with_env_filter(EnvFilter::new(&config.log_level)).init();

    let device_id = device_id();
    let device_name = format!("{} {}", config.device_name_prefix, &device_id[..device_id.len().min(4)]);

    tracing::info!(wifi_iface = %config.wifi_iface, "starting sage-provisiond");

    let (wifi, bt, transport): (Arc<dyn Wifi>, Arc<dyn Bt>, Arc<dyn GattTransport>) =
        build_platform(&config, &device_name).await?;

    let supervisor = Supervisor::new(config, wifi, bt, transport, device_id);

    match supervisor.run().await {
        Ok(()) => {
            tracing::info!("sage-provisiond stopped cleanly");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, tag = e.tag(), "sage-provisiond failed at startup");
            Err(e)
        }
    }
}

#[cfg(target_os = "linux")]
async fn build_platform(
    config: &Config,
    device_name: &str,
) -> Result<(Arc<dyn Wifi>, Arc<dyn Bt>, Arc<dyn GattTransport>)> {
    let wifi = Arc::new(LinuxWifi::new(
        config.wifi_iface.clone(),
        config.assoc_timeout,
        config.dhcp_timeout,
    ));
    let bt = Arc::new(LinuxBt::connect(device_name.to_string()).await?);
    let transport = Arc::clone(&bt) as Arc<dyn GattTransport>;
    Ok((wifi, bt as Arc<dyn Bt>, transport))
}

#[cfg(not(target_os = "linux"))]
async fn build_platform(
    _config: &Config,
    _device_name: &str,
) -> Result<(Arc<dyn Wifi>, Arc<dyn Bt>, Arc<dyn GattTransport>)> {
    use sage_provisiond::bluetooth::fake::FakeBt;
    use sage_provisiond::wifi::fake::FakeWifi;

    tracing::warn!("non-Linux platform: running with in-memory Wi-Fi/Bluetooth fakes");
    Ok((
        Arc::new(FakeWifi::new()),
        Arc::new(FakeBt::new()),
        Arc::new(NullTransport),
    ))
}
