//! Daemon configuration: built-in defaults, layered with environment
//! variables and CLI flags (§10.3), validated once at startup.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const DEFAULT_DEVICE_PREFIX: &str = "SAGE";
const DEFAULT_WIFI_IFACE: &str = "wlan0";
const DEFAULT_STATE_DIR: &str = ".sage-provisiond";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub state_dir: PathBuf,
    pub device_name_prefix: String,
    pub wifi_iface: String,
    pub assoc_timeout: Duration,
    pub dhcp_timeout: Duration,
    pub scan_timeout: Duration,
    pub scan_timeout_max: Duration,
    pub advertising_resume_deadline: Duration,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            device_name_prefix: DEFAULT_DEVICE_PREFIX.to_string(),
            wifi_iface: DEFAULT_WIFI_IFACE.to_string(),
            assoc_timeout: Duration::from_secs(8),
            dhcp_timeout: Duration::from_secs(8),
            scan_timeout: Duration::from_secs(5),
            scan_timeout_max: Duration::from_secs(15),
            advertising_resume_deadline: Duration::from_millis(500),
            log_level: "info".to_string(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_STATE_DIR)
}

impl Config {
    /// Layer environment variables over the built-in defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(dir) = std::env::var("SAGE_STATE_DIR") {
            cfg.state_dir = PathBuf::from(dir);
        }
        if let Ok(prefix) = std::env::var("SAGE_DEVICE_PREFIX") {
            cfg.device_name_prefix = prefix;
        }
        if let Ok(iface) = std::env::var("SAGE_WIFI_IFACE") {
            cfg.wifi_iface = iface;
        }
        if let Ok(level) = std::env::var("SAGE_LOG_LEVEL") {
            cfg.log_level = level;
        }

        cfg
    }

    /// Apply CLI overrides on top of env-layered defaults.
    pub fn apply_cli(mut self, args: &CliArgs) -> Self {
        if let Some(dir) = &args.state_dir {
            self.state_dir = dir.clone();
        }
        if let Some(prefix) = &args.device_prefix {
            self.device_name_prefix = prefix.clone();
        }
        if let Some(iface) = &args.wifi_iface {
            self.wifi_iface = iface.clone();
        }
        if let Some(level) = &args.log_level {
            self.log_level = level.clone();
        }
        self
    }

    /// Validate invariants that must hold before startup proceeds; a
    /// failure here is fatal (§4.5).
    pub fn validate(&self) -> Result<()> {
        if self.device_name_prefix.is_empty() {
            return Err(Error::Internal(
                "device_name_prefix must not be empty".to_string(),
            ));
        }
        if self.wifi_iface.is_empty() {
            return Err(Error::Internal("wifi_iface must not be empty".to_string()));
        }
        if self.scan_timeout > self.scan_timeout_max {
            return Err(Error::Internal(
                "scan_timeout must not exceed scan_timeout_max".to_string(),
            ));
        }
        if self.assoc_timeout < Duration::from_secs(8) || self.dhcp_timeout < Duration::from_secs(8)
        {
            return Err(Error::Internal(
                "assoc_timeout and dhcp_timeout must be at least 8s (§4.4)".to_string(),
            ));
        }
        Ok(())
    }

    pub fn pairing_file(&self) -> PathBuf {
        self.state_dir.join("pairing.json")
    }
}

/// CLI flags, following the derive style the daemon's entry point used
/// historically for its own arguments.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "SAGE on-device BLE provisioning daemon", long_about = None)]
pub struct CliArgs {
    /// Path to the state directory (pairing record lives here).
    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// Advertised device-name prefix (e.g. "SAGE").
    #[arg(long)]
    pub device_prefix: Option<String>,

    /// Wi-Fi interface name to drive (e.g. "wlan0").
    #[arg(long)]
    pub wifi_iface: Option<String>,

    /// Log verbosity, forwarded to `tracing_subscriber::EnvFilter`.
    #[arg(short, long)]
    pub log_level: Option<String>,
}
