//! Crate-wide error type.
//!
//! Every externally observable failure mode gets its own variant so that
//! callers can map it to a stable machine-readable tag (used in the Status
//! characteristic and in GATT write-error responses) without parsing
//! display strings.

use thiserror::Error;

/// Result type alias used throughout the daemon.
pub type Result<T> = std::result::Result<T, Error>;

/// The bounded wait that timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStage {
    Scan,
    Assoc,
    Dhcp,
    SwitchTotal,
}

impl TimeoutStage {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Assoc => "assoc",
            Self::Dhcp => "dhcp",
            Self::SwitchTotal => "switch_total",
        }
    }
}

impl std::fmt::Display for TimeoutStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("bluetooth controller unavailable")]
    BtUnavailable,

    #[error("GATT I/O failure: {0}")]
    GattTransient(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("characteristic does not permit read")]
    ReadNotPermitted,

    #[error("characteristic does not permit write")]
    WriteNotPermitted,

    #[error("wifi association failed: {0}")]
    WifiAssocFailed(String),

    #[error("dhcp lease request failed: {0}")]
    WifiDhcpFailed(String),

    #[error("no routable ipv4 address after association")]
    WifiNoRoute,

    #[error("timed out waiting for {0}")]
    Timeout(TimeoutStage),

    #[error("pairing record persistence failed: {0}")]
    PersistenceError(String),

    #[error("internal precondition violated: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("D-Bus error: {0}")]
    #[cfg(target_os = "linux")]
    Dbus(#[from] zbus::Error),
}

impl Error {
    /// Stable machine-readable tag, independent of the `Display` message.
    /// Never contains user-supplied data (I4/P3).
    pub fn tag(&self) -> &'static str {
        match self {
            Self::BtUnavailable => "bt_unavailable",
            Self::GattTransient(_) => "gatt_transient",
            Self::InvalidCredentials(_) => "invalid_credentials",
            Self::ReadNotPermitted => "read_not_permitted",
            Self::WriteNotPermitted => "write_not_permitted",
            Self::WifiAssocFailed(_) => "wifi_assoc_failed",
            Self::WifiDhcpFailed(_) => "wifi_dhcp_failed",
            Self::WifiNoRoute => "wifi_no_route",
            Self::Timeout(stage) => match stage {
                TimeoutStage::Scan => "timeout_scan",
                TimeoutStage::Assoc => "timeout_assoc",
                TimeoutStage::Dhcp => "timeout_dhcp",
                TimeoutStage::SwitchTotal => "timeout_switch_total",
            },
            Self::PersistenceError(_) => "persistence_error",
            Self::Internal(_) => "internal",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            #[cfg(target_os = "linux")]
            Self::Dbus(_) => "dbus",
        }
    }

    /// True for the error kinds that are fatal to the whole process at
    /// startup (§7: "Only BtUnavailable and startup failures are fatal").
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(self, Self::BtUnavailable | Self::Internal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_stable_and_password_free() {
        let e = Error::WifiAssocFailed("wrong PSK for ssid".to_string());
        assert_eq!(e.tag(), "wifi_assoc_failed");
        assert!(!e.tag().contains("PSK"));
    }

    #[test]
    fn timeout_tag_includes_stage() {
        assert_eq!(Error::Timeout(TimeoutStage::Dhcp).tag(), "timeout_dhcp");
    }

    #[test]
    fn bt_unavailable_is_fatal() {
        assert!(Error::BtUnavailable.is_fatal_at_startup());
        assert!(!Error::WifiNoRoute.is_fatal_at_startup());
    }
}
