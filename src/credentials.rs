//! Ephemeral Wi-Fi credentials received over the Credentials characteristic.
//!
//! Never persisted, never logged. [`Password`] redacts itself in every
//! `Debug`/`Display` path so a stray `{:?}` in a log line cannot leak it.

use serde::Deserialize;
use zeroize::{Zeroize, ZeroizeOnDrop};

const MAX_PAYLOAD_BYTES: usize = 512;
const MAX_SSID_BYTES: usize = 32;
const MAX_PASSWORD_BYTES: usize = 63;

/// A Wi-Fi pre-shared key. Redacted on `Debug`/`Display`; zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Password(String);

impl Password {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

impl std::fmt::Display for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Wire format for a Credentials characteristic write.
#[derive(Debug, Deserialize)]
struct CredentialsWire {
    ssid: String,
    password: String,
}

/// Validated, in-memory-only credentials for one provisioning attempt.
#[derive(Clone)]
pub struct Credentials {
    pub ssid: String,
    pub password: Password,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("password", &self.password)
            .finish()
    }
}

impl Credentials {
    /// Parse and validate a raw Credentials-characteristic write (§4.3, §3).
    ///
    /// Rejects oversized payloads, malformed JSON, and SSIDs outside the
    /// 1–32 byte UTF-8 bound. An empty password is permitted (open network).
    pub fn parse(bytes: &[u8]) -> Result<Self, crate::error::Error> {
        if bytes.len() > MAX_PAYLOAD_BYTES {
            return Err(crate::error::Error::InvalidCredentials(format!(
                "payload exceeds {MAX_PAYLOAD_BYTES} bytes"
            )));
        }

        let wire: CredentialsWire = serde_json::from_slice(bytes)
            .map_err(|e| crate::error::Error::InvalidCredentials(format!("malformed json: {e}")))?;

        let ssid_len = wire.ssid.as_bytes().len();
        if ssid_len == 0 || ssid_len > MAX_SSID_BYTES {
            return Err(crate::error::Error::InvalidCredentials(
                "ssid must be 1-32 bytes".to_string(),
            ));
        }

        if wire.password.as_bytes().len() > MAX_PASSWORD_BYTES {
            return Err(crate::error::Error::InvalidCredentials(
                "password must be at most 63 bytes".to_string(),
            ));
        }

        Ok(Self {
            ssid: wire.ssid,
            password: Password(wire.password),
        })
    }
}
