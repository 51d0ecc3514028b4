//! Fixed UUID literals for the provisioning GATT profile (§6). The mobile
//! client's name filter and characteristic lookups key off these exact
//! values, not characteristic position — never reorder or regenerate them.

use uuid::{uuid, Uuid};

pub const SERVICE: Uuid = uuid!("7a8f0001-9b3e-4b1a-8c2d-1f9e6a2d4b10");

pub const CREDENTIALS: Uuid = uuid!("7a8f0002-9b3e-4b1a-8c2d-1f9e6a2d4b10");
pub const STATUS: Uuid = uuid!("7a8f0003-9b3e-4b1a-8c2d-1f9e6a2d4b10");
pub const SCAN: Uuid = uuid!("7a8f0004-9b3e-4b1a-8c2d-1f9e6a2d4b10");
pub const NETWORK_DETAILS: Uuid = uuid!("7a8f0005-9b3e-4b1a-8c2d-1f9e6a2d4b10");
pub const BLUETOOTH_DETAILS: Uuid = uuid!("7a8f0006-9b3e-4b1a-8c2d-1f9e6a2d4b10");
pub const DEVICE_INFO: Uuid = uuid!("7a8f0007-9b3e-4b1a-8c2d-1f9e6a2d4b10");

/// Identity of a characteristic, keyed by UUID rather than position (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacteristicId {
    Credentials,
    Status,
    Scan,
    NetworkDetails,
    BluetoothDetails,
    DeviceInfo,
}

impl CharacteristicId {
    pub fn uuid(&self) -> Uuid {
        match self {
            Self::Credentials => CREDENTIALS,
            Self::Status => STATUS,
            Self::Scan => SCAN,
            Self::NetworkDetails => NETWORK_DETAILS,
            Self::BluetoothDetails => BLUETOOTH_DETAILS,
            Self::DeviceInfo => DEVICE_INFO,
        }
    }

    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        match uuid {
            u if u == CREDENTIALS => Some(Self::Credentials),
            u if u == STATUS => Some(Self::Status),
            u if u == SCAN => Some(Self::Scan),
            u if u == NETWORK_DETAILS => Some(Self::NetworkDetails),
            u if u == BLUETOOTH_DETAILS => Some(Self::BluetoothDetails),
            u if u == DEVICE_INFO => Some(Self::DeviceInfo),
            _ => None,
        }
    }

    pub const ALL: [CharacteristicId; 6] = [
        Self::Credentials,
        Self::Status,
        Self::Scan,
        Self::NetworkDetails,
        Self::BluetoothDetails,
        Self::DeviceInfo,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_uuid() {
        for id in CharacteristicId::ALL {
            assert_eq!(CharacteristicId::from_uuid(id.uuid()), Some(id));
        }
    }

    #[test]
    fn unknown_uuid_resolves_to_none() {
        assert_eq!(CharacteristicId::from_uuid(uuid::Uuid::nil()), None);
    }
}
