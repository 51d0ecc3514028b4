//! End-to-end scenarios (S1-S6): GattServer and Controller wired together
//! through the same channels `Supervisor::run` uses, without a D-Bus
//! transport in the loop.

use std::sync::Arc;
use std::time::Duration;

use sage_provisiond::bluetooth::fake::FakeBt;
use sage_provisiond::bluetooth::gatt::{GattEvent, GattServer};
use sage_provisiond::bluetooth::uuids::CharacteristicId;
use sage_provisiond::config::Config;
use sage_provisiond::controller::Controller;
use sage_provisiond::pairing::PairingStore;
use sage_provisiond::snapshot::ScanEntry;
use sage_provisiond::status::{Status, StatusChannel};
use sage_provisiond::wifi::fake::{FakeWifi, Outcome};
use tokio::sync::mpsc;

struct Harness {
    gatt: Arc<GattServer>,
    pairing: Arc<PairingStore>,
    wifi: Arc<FakeWifi>,
    status: StatusChannel,
    events: mpsc::Receiver<GattEvent>,
}

fn spawn_harness() -> Harness {
    let wifi = Arc::new(FakeWifi::new());
    let bt = Arc::new(FakeBt::new());
    let pairing = Arc::new(PairingStore::new(
        tempfile::tempdir().unwrap().path().join("pairing.json"),
    ));
    let status = StatusChannel::new();
    let (credentials_tx, credentials_rx) = mpsc::channel(16);
    let (events_tx, events_rx) = mpsc::channel(64);

    let controller = Arc::new(Controller::new(
        wifi.clone() as Arc<dyn sage_provisiond::wifi::Wifi>,
        pairing.clone(),
        status.clone(),
        "device-abc".to_string(),
        "SAGE-TEST".to_string(),
    ));
    tokio::spawn(controller.run(credentials_rx));

    let gatt = Arc::new(GattServer::new(
        wifi.clone() as Arc<dyn sage_provisiond::wifi::Wifi>,
        bt,
        status.clone(),
        pairing.clone(),
        Config::default().scan_timeout,
        credentials_tx,
        events_tx,
        "SAGE-TEST".to_string(),
    ));

    Harness {
        gatt,
        pairing,
        wifi,
        status,
        events: events_rx,
    }
}

async fn wait_for_status(
    rx: &mut tokio::sync::broadcast::Receiver<Status>,
    pred: impl Fn(&Status) -> bool,
) -> Status {
    for _ in 0..20 {
        let status = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("status channel timed out")
            .unwrap();
        if pred(&status) {
            return status;
        }
    }
    panic!("predicate never satisfied within 20 status transitions");
}

/// S1: cold start, no pairing record yet, Device-info omits `paired_at`.
#[tokio::test]
async fn cold_start_reports_idle_and_unpaired_device_info() {
    let h = spawn_harness();
    assert_eq!(h.status.current().await, Status::Idle);
    assert!(h.pairing.load().await.is_none());

    h.gatt.on_connect("central-1", 185).await;
    let info = h.gatt.on_read("central-1", CharacteristicId::DeviceInfo).await.unwrap();
    let info = String::from_utf8(info).unwrap();
    assert!(!info.contains("paired_at"));
}

/// S2: happy-path provisioning reaches Connected and persists a pairing record.
#[tokio::test]
async fn happy_path_provisioning_persists_pairing_record() {
    let h = spawn_harness();
    let mut rx = h.status.subscribe();

    h.gatt.on_connect("central-1", 185).await;
    h.gatt
        .on_write(
            "central-1",
            CharacteristicId::Credentials,
            br#"{"ssid":"HomeNet","password":"hunter2x8"}"#.to_vec(),
        )
        .await
        .unwrap();

    wait_for_status(&mut rx, |s| matches!(s, Status::CredentialsReceived { ssid } if ssid == "HomeNet")).await;
    wait_for_status(&mut rx, |s| matches!(s, Status::Connecting { ssid, .. } if ssid == "HomeNet")).await;
    let connected = wait_for_status(&mut rx, |s| matches!(s, Status::Connected { ssid, .. } if ssid == "HomeNet")).await;
    match connected {
        Status::Connected { ipv4, .. } => assert!(!ipv4.is_empty()),
        _ => unreachable!(),
    }

    let record = h.pairing.load().await.unwrap();
    assert_eq!(record.device_name, "SAGE-TEST");
}

/// S3: wrong password never reaches COMPLETED, no pairing record is written.
#[tokio::test]
async fn wrong_password_fails_without_pairing() {
    let h = spawn_harness();
    h.wifi.set_outcome(
        "HomeNet",
        Outcome::FailAssoc {
            delay: Duration::from_millis(5),
        },
    );
    let mut rx = h.status.subscribe();

    h.gatt.on_connect("central-1", 185).await;
    h.gatt
        .on_write(
            "central-1",
            CharacteristicId::Credentials,
            br#"{"ssid":"HomeNet","password":"wrongpass"}"#.to_vec(),
        )
        .await
        .unwrap();

    let failed = wait_for_status(&mut rx, |s| matches!(s, Status::Failed { .. })).await;
    match failed {
        Status::Failed { ssid, reason } => {
            assert_eq!(ssid, "HomeNet");
            assert_eq!(reason, "wifi_assoc_failed");
        }
        _ => unreachable!(),
    }
    assert!(h.pairing.load().await.is_none());
}

/// S4: malformed JSON is refused at the write itself, and Status transitions
/// to Failed{reason:"invalid_credentials"} (§7: reported both ways).
#[tokio::test]
async fn malformed_write_is_refused_and_reported_in_status() {
    let h = spawn_harness();
    h.gatt.on_connect("central-1", 185).await;

    let err = h
        .gatt
        .on_write("central-1", CharacteristicId::Credentials, b"not-a-json".to_vec())
        .await
        .unwrap_err();
    assert_eq!(err.tag(), "invalid_credentials");

    match h.status.current().await {
        Status::Failed { ssid, reason } => {
            assert_eq!(ssid, "");
            assert_eq!(reason, "invalid_credentials");
        }
        other => panic!("expected Failed, got {other:?}"),
    }
}

/// S5: a mid-flight resubmission supersedes the stale attempt; observers
/// never see a terminal Connected for the superseded SSID.
#[tokio::test]
async fn mid_flight_resubmission_supersedes_prior_switch() {
    let h = spawn_harness();
    h.wifi.set_outcome("Stale", Outcome::NeverCompletes);
    let mut rx = h.status.subscribe();

    h.gatt.on_connect("central-1", 185).await;
    h.gatt
        .on_write(
            "central-1",
            CharacteristicId::Credentials,
            br#"{"ssid":"Stale","password":"aaaaaaaa"}"#.to_vec(),
        )
        .await
        .unwrap();

    wait_for_status(&mut rx, |s| matches!(s, Status::Connecting { ssid, .. } if ssid == "Stale")).await;

    h.gatt
        .on_write(
            "central-1",
            CharacteristicId::Credentials,
            br#"{"ssid":"HomeNet","password":"hunter2x8"}"#.to_vec(),
        )
        .await
        .unwrap();

    let mut saw_stale_connected = false;
    let mut saw_homenet_connected = false;
    for _ in 0..20 {
        let status = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match status {
            Status::Connected { ssid, .. } if ssid == "Stale" => saw_stale_connected = true,
            Status::Connected { ssid, .. } if ssid == "HomeNet" => {
                saw_homenet_connected = true;
                break;
            }
            _ => {}
        }
    }

    assert!(!saw_stale_connected, "superseded attempt must never reach a terminal Connected");
    assert!(saw_homenet_connected);
    assert_eq!(h.wifi.switch_call_count(), 2);
}

/// S6 plus I6/P8: disconnecting resumes advertising, and a disconnected
/// central's subscription is torn down (no leaked forwarder task output).
#[tokio::test]
async fn disconnect_resumes_advertising_and_drops_subscription() {
    let h = spawn_harness();
    let mut events = h.events;

    h.gatt.on_connect("central-1", 185).await;
    h.gatt
        .on_subscribe("central-1", CharacteristicId::Status)
        .await
        .unwrap();
    let _resync = events.recv().await.unwrap();

    h.gatt.on_disconnect("central-1").await;
    let event = events.recv().await.unwrap();
    assert!(matches!(event, GattEvent::ResumeAdvertising));

    h.status
        .set(Status::CredentialsReceived { ssid: "HomeNet".into() })
        .await;
    let further = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
    assert!(further.is_err(), "disconnected central must not keep receiving forwarded status events");
}

/// S6: three concurrent Scan reads within the coalescing window collapse
/// onto a single underlying scan and return identical results.
#[tokio::test]
async fn concurrent_scan_reads_share_one_underlying_scan() {
    let h = spawn_harness();
    h.wifi.set_scan_results(vec![ScanEntry {
        ssid: "HomeNet".into(),
        rssi: -40,
        secured: true,
    }]);

    h.gatt.on_connect("central-1", 185).await;
    h.gatt.on_connect("central-2", 185).await;
    h.gatt.on_connect("central-3", 185).await;

    // Prime the cache with one real scan so the next three reads observe
    // the same cached snapshot rather than racing the background refresh.
    let _ = h.gatt.on_read("central-1", CharacteristicId::Scan).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (a, b, c) = tokio::join!(
        h.gatt.on_read("central-1", CharacteristicId::Scan),
        h.gatt.on_read("central-2", CharacteristicId::Scan),
        h.gatt.on_read("central-3", CharacteristicId::Scan),
    );
    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
    assert_eq!(a, b);
    assert_eq!(b, c);
    assert!(String::from_utf8(a).unwrap().contains("HomeNet"));
}
