//! Read-through view types produced on demand by the OS adapter (C1) and
//! served verbatim as JSON by the Network/Bluetooth/Scan/Device-info
//! characteristics (§3, §6).

use serde::Serialize;

/// Security protocol observed on an access point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Security {
    Open,
    WpaPsk,
    WpaPsk2,
    Unknown,
}

/// One entry of a Wi-Fi scan result (§6: Scan payload).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanEntry {
    pub ssid: String,
    pub rssi: i32,
    pub secured: bool,
}

/// Current link state of the Wi-Fi interface, plus a scan snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkSnapshot {
    pub ssid: Option<String>,
    pub rssi: Option<i32>,
    pub frequency_mhz: Option<u32>,
    pub security: Option<Security>,
    pub interface_up: bool,
}

/// Currently connected central, if any, plus peripheral-side BT state.
#[derive(Debug, Clone, Serialize)]
pub struct BluetoothSnapshot {
    pub peripheral_address: String,
    pub connected_central: Option<String>,
    pub link_rssi: Option<i32>,
    pub advertising: bool,
}

/// Device-info characteristic payload (§6).
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paired_at: Option<String>,
    pub firmware_version: String,
    pub device_name: String,
}

pub fn to_json<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec())
}

/// Deduplicate scan entries by SSID, keeping the strongest RSSI, and sort
/// descending by RSSI (§4.1, §6).
pub fn dedup_scan_entries(mut entries: Vec<ScanEntry>) -> Vec<ScanEntry> {
    use std::collections::HashMap;

    let mut best: HashMap<String, ScanEntry> = HashMap::new();
    for entry in entries.drain(..) {
        best.entry(entry.ssid.clone())
            .and_modify(|existing| {
                if entry.rssi > existing.rssi {
                    *existing = entry.clone();
                }
            })
            .or_insert(entry);
    }

    let mut result: Vec<ScanEntry> = best.into_values().collect();
    result.sort_by(|a, b| b.rssi.cmp(&a.rssi));
    result
}
