//! Linux Wi-Fi adapter: drives `wpa_cli` (wpa_supplicant's control-socket
//! client), `ip`, and `dhclient` to realize the switch procedure in §6.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::sleep;

use crate::credentials::Password;
use crate::error::{Error, Result, TimeoutStage};
use crate::snapshot::{NetworkSnapshot, ScanEntry, Security};

use super::{Cancellation, SwitchOutcome, Wifi};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct LinuxWifi {
    iface: String,
    wpa_conf_path: PathBuf,
    assoc_timeout: Duration,
    dhcp_timeout: Duration,
}

impl LinuxWifi {
    pub fn new(iface: String, assoc_timeout: Duration, dhcp_timeout: Duration) -> Self {
        Self {
            wpa_conf_path: PathBuf::from(format!("/etc/wpa_supplicant/wpa_supplicant-{iface}.conf")),
            iface,
            assoc_timeout,
            dhcp_timeout,
        }
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::Internal(format!("failed to spawn {program}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Internal(format!(
                "{program} {args:?} exited with {:?}: {stderr}",
                output.status.code()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn wpa_cli_args<'a>(&'a self, rest: &[&'a str]) -> Vec<&'a str> {
        let mut args = vec!["-i", self.iface.as_str()];
        args.extend_from_slice(rest);
        args
    }

    /// Back up the supplicant config before mutating it, so an
    /// unexpected failure can be investigated offline (§6).
    async fn backup_supplicant_config(&self) -> Result<()> {
        if tokio::fs::metadata(&self.wpa_conf_path).await.is_err() {
            // Nothing to back up yet; not an error.
            return Ok(());
        }
        let backup_path = self.wpa_conf_path.with_extension("conf.bak");
        tokio::fs::copy(&self.wpa_conf_path, &backup_path)
            .await
            .map_err(|e| Error::Internal(format!("failed to back up supplicant config: {e}")))?;
        Ok(())
    }

    async fn stop_dhcp_client(&self) {
        let _ = Command::new("pkill")
            .args(["-f", &format!("dhclient.*{}", self.iface)])
            .output()
            .await;
    }

    async fn disassociate(&self) -> Result<()> {
        self.run("wpa_cli", &self.wpa_cli_args(&["disconnect"]))
            .await
            .map(|_| ())
    }

    async fn flush_addresses(&self) -> Result<()> {
        self.run("ip", &["addr", "flush", "dev", &self.iface])
            .await
            .map(|_| ())
    }

    /// Remove any existing supplicant network block matching `ssid`.
    /// Preserves this spec's documented (possibly surprising) behaviour:
    /// only the matching-SSID block is removed, other centrals' blocks
    /// are left intact (§9 open question).
    async fn remove_matching_network_block(&self, ssid: &str) -> Result<()> {
        let listing = self
            .run("wpa_cli", &self.wpa_cli_args(&["list_networks"]))
            .await?;

        for line in listing.lines().skip(1) {
            let mut fields = line.split('\t');
            let Some(id) = fields.next() else { continue };
            let Some(line_ssid) = fields.next() else {
                continue;
            };
            if line_ssid == ssid {
                self.run("wpa_cli", &self.wpa_cli_args(&["remove_network", id]))
                    .await?;
            }
        }
        Ok(())
    }

    async fn add_network(&self, ssid: &str, password: &Password) -> Result<String> {
        let id = self
            .run("wpa_cli", &self.wpa_cli_args(&["add_network"]))
            .await?;

        let quoted_ssid = format!("\"{ssid}\"");
        self.run(
            "wpa_cli",
            &self.wpa_cli_args(&["set_network", &id, "ssid", &quoted_ssid]),
        )
        .await?;

        if password.is_empty() {
            self.run(
                "wpa_cli",
                &self.wpa_cli_args(&["set_network", &id, "key_mgmt", "NONE"]),
            )
            .await?;
        } else {
            let quoted_psk = format!("\"{}\"", password.as_str());
            self.run(
                "wpa_cli",
                &self.wpa_cli_args(&["set_network", &id, "psk", &quoted_psk]),
            )
            .await?;
            self.run(
                "wpa_cli",
                &self.wpa_cli_args(&["set_network", &id, "key_mgmt", "WPA-PSK"]),
            )
            .await?;
        }

        Ok(id)
    }

    async fn enable_and_select(&self, id: &str) -> Result<()> {
        self.run("wpa_cli", &self.wpa_cli_args(&["enable_network", id]))
            .await?;
        self.run("wpa_cli", &self.wpa_cli_args(&["select_network", id]))
            .await?;
        Ok(())
    }

    async fn disable_network(&self, id: &str) {
        let _ = self
            .run("wpa_cli", &self.wpa_cli_args(&["disable_network", id]))
            .await;
    }

    async fn save_config(&self) -> Result<()> {
        self.run("wpa_cli", &self.wpa_cli_args(&["save_config"]))
            .await
            .map(|_| ())
    }

    /// Poll `wpa_cli status` until `wpa_state=COMPLETED`, bounded by
    /// `assoc_timeout` and cooperatively cancellable.
    ///
    /// The upstream shell script this procedure is modelled on reports
    /// success with only a warning when the check is inconclusive; this
    /// implementation takes the stricter reading the spec calls for
    /// (§9): anything short of an observed COMPLETED within the deadline
    /// is `WifiAssocFailed`, full stop.
    async fn wait_for_association(&self, cancel: &Cancellation) -> Result<()> {
        let deadline = Instant::now() + self.assoc_timeout;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::WifiAssocFailed("superseded by new credentials".into()));
            }
            if let Ok(status) = self.run("wpa_cli", &self.wpa_cli_args(&["status"])).await {
                if status.lines().any(|l| l == "wpa_state=COMPLETED") {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout(TimeoutStage::Assoc));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn request_dhcp_lease(&self, cancel: &Cancellation) -> Result<()> {
        let child = Command::new("dhclient")
            .args(["-1", &self.iface])
            .spawn();

        let mut child = match child {
            Ok(c) => c,
            Err(e) => return Err(Error::WifiDhcpFailed(format!("failed to spawn dhclient: {e}"))),
        };

        let deadline = Instant::now() + self.dhcp_timeout;
        loop {
            if cancel.is_cancelled() {
                let _ = child.kill().await;
                return Err(Error::WifiDhcpFailed("superseded by new credentials".into()));
            }
            match child.try_wait() {
                Ok(Some(status)) if status.success() => return Ok(()),
                Ok(Some(status)) => {
                    return Err(Error::WifiDhcpFailed(format!(
                        "dhclient exited with {:?}",
                        status.code()
                    )))
                }
                Ok(None) => {}
                Err(e) => return Err(Error::WifiDhcpFailed(e.to_string())),
            }
            if Instant::now() >= deadline {
                let _ = child.kill().await;
                return Err(Error::Timeout(TimeoutStage::Dhcp));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn routable_ipv4(&self) -> Result<String> {
        let output = self
            .run("ip", &["-4", "-o", "addr", "show", "dev", &self.iface])
            .await
            .map_err(|_| Error::WifiNoRoute)?;

        output
            .lines()
            .find_map(|line| {
                line.split_whitespace()
                    .find(|tok| tok.contains('/'))
                    .and_then(|tok| tok.split('/').next())
            })
            .map(|s| s.to_string())
            .ok_or(Error::WifiNoRoute)
    }

    /// Roll the interface back to quiescent after a partial failure
    /// between step 4(e) and 4(j) (§4.4 "Partial failure").
    async fn rollback(&self, network_id: Option<&str>) {
        if let Some(id) = network_id {
            self.disable_network(id).await;
        }
        let _ = self.flush_addresses().await;
    }
}

#[async_trait]
impl Wifi for LinuxWifi {
    async fn switch(
        &self,
        ssid: &str,
        password: &Password,
        cancel: Cancellation,
    ) -> Result<SwitchOutcome> {
        self.stop_dhcp_client().await;
        self.disassociate().await?;
        self.flush_addresses().await?;

        self.backup_supplicant_config().await?;
        self.remove_matching_network_block(ssid).await?;

        let network_id = self.add_network(ssid, password).await?;

        if cancel.is_cancelled() {
            self.rollback(Some(&network_id)).await;
            return Err(Error::WifiAssocFailed("superseded by new credentials".into()));
        }

        if let Err(e) = self.enable_and_select(&network_id).await {
            self.rollback(Some(&network_id)).await;
            return Err(e);
        }
        if let Err(e) = self.save_config().await {
            self.rollback(Some(&network_id)).await;
            return Err(e);
        }

        if let Err(e) = self.wait_for_association(&cancel).await {
            self.rollback(Some(&network_id)).await;
            return Err(e);
        }

        if let Err(e) = self.request_dhcp_lease(&cancel).await {
            self.rollback(Some(&network_id)).await;
            return Err(e);
        }

        match self.routable_ipv4().await {
            Ok(ipv4) => Ok(SwitchOutcome { ipv4 }),
            Err(e) => {
                self.rollback(Some(&network_id)).await;
                Err(e)
            }
        }
    }

    async fn snapshot(&self) -> NetworkSnapshot {
        let ssid = self
            .run("iw", &[self.iface.as_str(), "link"])
            .await
            .ok()
            .and_then(|out| {
                out.lines()
                    .find(|l| l.trim_start().starts_with("SSID:"))
                    .map(|l| l.trim_start().trim_start_matches("SSID:").trim().to_string())
            });

        let interface_up = self
            .run("ip", &["link", "show", "dev", &self.iface])
            .await
            .map(|out| out.contains("state UP"))
            .unwrap_or(false);

        NetworkSnapshot {
            ssid,
            rssi: None,
            frequency_mhz: None,
            security: None,
            interface_up,
        }
    }

    async fn scan(&self, timeout: Duration) -> Result<Vec<ScanEntry>> {
        let bounded = timeout.min(Duration::from_secs(15));

        let scan_trigger = self.run("iw", &[self.iface.as_str(), "scan"]);
        match tokio::time::timeout(bounded, scan_trigger).await {
            Ok(Ok(output)) => Ok(parse_iw_scan(&output)),
            Ok(Err(_)) => Ok(Vec::new()),
            Err(_) => Err(Error::Timeout(TimeoutStage::Scan)),
        }
    }
}

fn parse_iw_scan(output: &str) -> Vec<ScanEntry> {
    let mut entries = Vec::new();
    let mut current_ssid: Option<String> = None;
    let mut current_rssi = 0i32;
    let mut current_secured = false;

    for line in output.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("BSS ") {
            if let Some(ssid) = current_ssid.take() {
                entries.push(ScanEntry {
                    ssid,
                    rssi: current_rssi,
                    secured: current_secured,
                });
            }
            current_rssi = 0;
            current_secured = false;
        } else if let Some(rest) = trimmed.strip_prefix("SSID: ") {
            current_ssid = Some(rest.to_string());
        } else if let Some(rest) = trimmed.strip_prefix("signal: ") {
            current_rssi = rest
                .split_whitespace()
                .next()
                .and_then(|s| s.parse::<f32>().ok())
                .map(|v| v as i32)
                .unwrap_or(0);
        } else if trimmed.starts_with("RSN:") || trimmed.starts_with("WPA:") {
            current_secured = true;
        }
    }
    if let Some(ssid) = current_ssid {
        entries.push(ScanEntry {
            ssid,
            rssi: current_rssi,
            secured: current_secured,
        });
    }

    crate::snapshot::dedup_scan_entries(entries)
}

#[allow(dead_code)]
fn security_from_flags(rsn: bool, wpa: bool) -> Security {
    if rsn {
        Security::WpaPsk2
    } else if wpa {
        Security::WpaPsk
    } else {
        Security::Open
    }
}
