//! Linux BLE peripheral implementation via BlueZ's D-Bus API.
//!
//! Registers a GATT application (one service, six characteristics) and an
//! LE advertisement with BlueZ, and relays `GattEvent`s from
//! [`super::gatt::GattServer`] onto `PropertiesChanged` signals and
//! advertisement re-registration calls.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue, Value};
use zbus::{interface, proxy, Connection};

use crate::error::{Error, Result};
use crate::snapshot::BluetoothSnapshot;

use super::gatt::{GattEvent, GattServer};
use super::uuids::CharacteristicId;
use super::{Bt, GattTransport};

mod bluez_constants {
    pub const BLUEZ_SERVICE: &str = "org.bluez";
    pub const ADAPTER_INTERFACE: &str = "org.bluez.Adapter1";
    pub const GATT_MANAGER_INTERFACE: &str = "org.bluez.GattManager1";
    pub const LE_ADVERTISING_MANAGER_INTERFACE: &str = "org.bluez.LEAdvertisingManager1";
    pub const GATT_SERVICE_INTERFACE: &str = "org.bluez.GattService1";
    pub const GATT_CHARACTERISTIC_INTERFACE: &str = "org.bluez.GattCharacteristic1";
    pub const DEFAULT_ADAPTER_PATH: &str = "/org/bluez/hci0";
    pub const APP_PATH: &str = "/org/sage/provisiond/app";
    pub const SERVICE_PATH: &str = "/org/sage/provisiond/app/service0";
    pub const ADVERTISEMENT_PATH: &str = "/org/sage/provisiond/advertisement0";
}

#[proxy(
    interface = "org.bluez.Adapter1",
    default_service = "org.bluez"
)]
trait Adapter1 {
    #[zbus(property)]
    fn powered(&self) -> zbus::Result<bool>;
    #[zbus(property)]
    fn set_powered(&self, value: bool) -> zbus::Result<()>;
    #[zbus(property)]
    fn address(&self) -> zbus::Result<String>;
    #[zbus(property)]
    fn set_alias(&self, value: &str) -> zbus::Result<()>;
}

#[proxy(
    interface = "org.bluez.GattManager1",
    default_service = "org.bluez"
)]
trait GattManager1 {
    fn register_application(
        &self,
        application: &ObjectPath<'_>,
        options: HashMap<&str, Value<'_>>,
    ) -> zbus::Result<()>;

    fn unregister_application(&self, application: &ObjectPath<'_>) -> zbus::Result<()>;
}

#[proxy(
    interface = "org.bluez.LEAdvertisingManager1",
    default_service = "org.bluez"
)]
trait LEAdvertisingManager1 {
    fn register_advertisement(
        &self,
        advertisement: &ObjectPath<'_>,
        options: HashMap<&str, Value<'_>>,
    ) -> zbus::Result<()>;

    fn unregister_advertisement(&self, advertisement: &ObjectPath<'_>) -> zbus::Result<()>;
}

/// Root application object, exposed at `APP_PATH`. BlueZ walks this via
/// `GetManagedObjects` to discover the service/characteristic tree.
struct Application {
    objects: HashMap<OwnedObjectPath, HashMap<String, HashMap<String, OwnedValue>>>,
}

#[interface(name = "org.freedesktop.DBus.ObjectManager")]
impl Application {
    #[zbus(name = "GetManagedObjects")]
    fn get_managed_objects(
        &self,
    ) -> HashMap<OwnedObjectPath, HashMap<String, HashMap<String, OwnedValue>>> {
        self.objects.clone()
    }
}

/// The single GATT service object (§6: one primary service).
struct GattService {
    uuid: String,
}

#[interface(name = "org.bluez.GattService1")]
impl GattService {
    #[zbus(property, name = "UUID")]
    fn uuid(&self) -> String {
        self.uuid.clone()
    }

    #[zbus(property)]
    fn primary(&self) -> bool {
        true
    }
}

/// One GATT characteristic object. `ReadValue`/`WriteValue` delegate into
/// the platform-agnostic [`GattServer`]; `StartNotify`/`StopNotify` track
/// per-central subscriptions the same way.
struct GattCharacteristic {
    id: CharacteristicId,
    server: Arc<GattServer>,
    central: Arc<RwLock<Option<String>>>,
    value: RwLock<Vec<u8>>,
}

#[interface(name = "org.bluez.GattCharacteristic1")]
impl GattCharacteristic {
    #[zbus(property, name = "UUID")]
    fn uuid(&self) -> String {
        self.id.uuid().to_string()
    }

    #[zbus(property)]
    fn service(&self) -> OwnedObjectPath {
        ObjectPath::try_from(bluez_constants::SERVICE_PATH)
            .expect("static path is valid")
            .into()
    }

    #[zbus(property)]
    fn flags(&self) -> Vec<String> {
        match self.id {
            CharacteristicId::Credentials => {
                vec!["write".to_string(), "write-without-response".to_string()]
            }
            _ => vec!["read".to_string(), "notify".to_string()],
        }
    }

    #[zbus(property, name = "Value")]
    async fn value(&self) -> Vec<u8> {
        self.value.read().await.clone()
    }

    async fn read_value(
        &self,
        _options: HashMap<String, OwnedValue>,
    ) -> zbus::fdo::Result<Vec<u8>> {
        let central = self
            .current_central()
            .await
            .unwrap_or_else(|| "unknown".to_string());
        self.server
            .on_read(&central, self.id)
            .await
            .map_err(to_dbus_error)
    }

    async fn write_value(
        &self,
        value: Vec<u8>,
        _options: HashMap<String, OwnedValue>,
    ) -> zbus::fdo::Result<()> {
        let central = self
            .current_central()
            .await
            .unwrap_or_else(|| "unknown".to_string());
        self.server
            .on_write(&central, self.id, value)
            .await
            .map_err(to_dbus_error)
    }

    #[zbus(name = "StartNotify")]
    async fn start_notify(&self) -> zbus::fdo::Result<()> {
        if let Some(central) = self.current_central().await {
            self.server
                .on_subscribe(&central, self.id)
                .await
                .map_err(to_dbus_error)?;
        }
        Ok(())
    }

    #[zbus(name = "StopNotify")]
    async fn stop_notify(&self) {
        if let Some(central) = self.current_central().await {
            self.server.on_unsubscribe(&central, self.id).await;
        }
    }
}

impl GattCharacteristic {
    async fn current_central(&self) -> Option<String> {
        self.central.read().await.clone()
    }
}

/// LE advertisement object, exposed per connect/disconnect cycle so BlueZ
/// can be asked to re-register it within the resume deadline (I6).
struct Advertisement {
    local_name: String,
    service_uuid: String,
}

#[interface(name = "org.bluez.LEAdvertisement1")]
impl Advertisement {
    #[zbus(property, name = "Type")]
    fn kind(&self) -> String {
        "peripheral".to_string()
    }

    #[zbus(property, name = "ServiceUUIDs")]
    fn service_uuids(&self) -> Vec<String> {
        vec![self.service_uuid.clone()]
    }

    #[zbus(property, name = "LocalName")]
    fn local_name(&self) -> String {
        self.local_name.clone()
    }

    fn release(&self) {}
}

fn to_dbus_error(err: Error) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(format!("{}: {}", err.tag(), err))
}

/// Linux `Bt` implementation. Owns the system D-Bus connection, the
/// adapter proxy, and the set of currently-served GATT/advertisement
/// objects.
pub struct LinuxBt {
    connection: Connection,
    adapter_path: String,
    device_name: String,
    gatt: RwLock<Option<Arc<GattServer>>>,
}

impl LinuxBt {
    pub async fn connect(device_name: String) -> Result<Self> {
        let connection = Connection::system().await.map_err(Error::from)?;
        Ok(Self {
            connection,
            adapter_path: bluez_constants::DEFAULT_ADAPTER_PATH.to_string(),
            device_name,
            gatt: RwLock::new(None),
        })
    }

    fn adapter_proxy_path(&self) -> &str {
        &self.adapter_path
    }

    /// Register the GATT application object tree, register it with
    /// BlueZ's GattManager1, then register the LE advertisement. Called
    /// once at startup and again after every `GattEvent::ResumeAdvertising`
    /// (§4.1, §4.3, I6).
    async fn serve_inner(
        &self,
        server: Arc<GattServer>,
        mut events: mpsc::Receiver<GattEvent>,
    ) -> Result<()> {
        *self.gatt.write().await = Some(Arc::clone(&server));
        self.register_application(Arc::clone(&server)).await?;
        self.register_advertisement().await?;

        while let Some(event) = events.recv().await {
            match event {
                GattEvent::Notify {
                    characteristic,
                    payload,
                    ..
                } => {
                    if let Err(e) = self.emit_properties_changed(characteristic, payload).await {
                        tracing::warn!(error = %e, "failed to emit PropertiesChanged");
                    }
                }
                GattEvent::ResumeAdvertising => {
                    if let Err(e) = self.register_advertisement().await {
                        tracing::warn!(error = %e, "failed to resume advertising");
                    }
                }
            }
        }

        Ok(())
    }

    async fn register_application(&self, server: Arc<GattServer>) -> Result<()> {
        let object_server = self.connection.object_server();

        let service = GattService {
            uuid: super::uuids::SERVICE.to_string(),
        };
        object_server
            .at(bluez_constants::SERVICE_PATH, service)
            .await
            .map_err(Error::from)?;

        let mut objects = HashMap::new();
        for id in CharacteristicId::ALL {
            let path = format!("{}/char_{}", bluez_constants::SERVICE_PATH, id.uuid().simple());
            let characteristic = GattCharacteristic {
                id,
                server: Arc::clone(&server),
                central: Arc::new(RwLock::new(None)),
                value: RwLock::new(Vec::new()),
            };
            object_server
                .at(path.clone(), characteristic)
                .await
                .map_err(Error::from)?;
            objects.insert(
                OwnedObjectPath::try_from(path).expect("path is valid"),
                HashMap::new(),
            );
        }

        let application = Application { objects };
        object_server
            .at(bluez_constants::APP_PATH, application)
            .await
            .map_err(Error::from)?;

        let gatt_manager = GattManager1Proxy::builder(&self.connection)
            .path(self.adapter_proxy_path())
            .map_err(Error::from)?
            .build()
            .await
            .map_err(Error::from)?;

        let app_path = ObjectPath::try_from(bluez_constants::APP_PATH).expect("valid path");
        gatt_manager
            .register_application(&app_path, HashMap::new())
            .await
            .map_err(Error::from)?;

        Ok(())
    }

    async fn register_advertisement(&self) -> Result<()> {
        let object_server = self.connection.object_server();

        let advertisement = Advertisement {
            local_name: self.device_name.clone(),
            service_uuid: super::uuids::SERVICE.to_string(),
        };

        // Re-registering under the same path after a prior registration
        // is a harmless no-op from BlueZ's perspective; `at` returns
        // false rather than erroring if the path is already served.
        let _ = object_server
            .at(bluez_constants::ADVERTISEMENT_PATH, advertisement)
            .await
            .map_err(Error::from)?;

        let ad_manager = LEAdvertisingManager1Proxy::builder(&self.connection)
            .path(self.adapter_proxy_path())
            .map_err(Error::from)?
            .build()
            .await
            .map_err(Error::from)?;

        let ad_path =
            ObjectPath::try_from(bluez_constants::ADVERTISEMENT_PATH).expect("valid path");
        ad_manager
            .register_advertisement(&ad_path, HashMap::new())
            .await
            .map_err(Error::from)?;

        Ok(())
    }

    async fn emit_properties_changed(&self, ch: CharacteristicId, payload: Vec<u8>) -> Result<()> {
        let path = format!("{}/char_{}", bluez_constants::SERVICE_PATH, ch.uuid().simple());
        let object_server = self.connection.object_server();
        let iface_ref = object_server
            .interface::<_, GattCharacteristic>(path)
            .await
            .map_err(Error::from)?;

        *iface_ref.get().await.value.write().await = payload;
        iface_ref
            .get()
            .await
            .value_changed(iface_ref.signal_emitter())
            .await
            .map_err(Error::from)?;

        Ok(())
    }
}

#[async_trait]
impl Bt for LinuxBt {
    /// Powers the adapter on if needed and sets the advertised alias.
    /// Fails with `BtUnavailable` if no adapter is present on the bus
    /// (fatal at startup, §4.5).
    async fn bt_init(&self) -> Result<()> {
        let adapter = Adapter1Proxy::builder(&self.connection)
            .path(self.adapter_proxy_path())
            .map_err(|_| Error::BtUnavailable)?
            .build()
            .await
            .map_err(|_| Error::BtUnavailable)?;

        if !adapter.powered().await.map_err(|_| Error::BtUnavailable)? {
            adapter
                .set_powered(true)
                .await
                .map_err(|_| Error::BtUnavailable)?;
        }

        adapter
            .set_alias(&self.device_name)
            .await
            .map_err(|_| Error::BtUnavailable)?;

        Ok(())
    }

    async fn bt_snapshot(&self) -> BluetoothSnapshot {
        let peripheral_address = match Adapter1Proxy::builder(&self.connection)
            .path(self.adapter_proxy_path())
            .ok()
        {
            Some(builder) => match builder.build().await {
                Ok(proxy) => proxy.address().await.unwrap_or_default(),
                Err(_) => String::new(),
            },
            None => String::new(),
        };

        // At most one central is ever connected to this peripheral at a
        // time (§3); the GATT server's connection table is the source of
        // truth for which one, once the application has been registered.
        let connected_central = match self.gatt.read().await.as_ref() {
            Some(server) => server.connected_centrals().await.into_iter().next(),
            None => None,
        };

        BluetoothSnapshot {
            peripheral_address,
            connected_central,
            link_rssi: None,
            advertising: true,
        }
    }
}

#[async_trait]
impl GattTransport for LinuxBt {
    async fn serve(&self, server: Arc<GattServer>, events: mpsc::Receiver<GattEvent>) -> Result<()> {
        self.serve_inner(server, events).await
    }
}
