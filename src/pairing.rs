//! Pairing store (C2): a single-file durable record of the last successful
//! pairing, written atomically (write-temp, fsync, rename) so readers never
//! observe a torn file (P9).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairingRecord {
    pub device_id: String,
    pub device_name: String,
    pub paired_at: chrono::DateTime<chrono::Utc>,
}

pub struct PairingStore {
    path: PathBuf,
}

impl PairingStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Returns the record iff the file exists, parses, and validates.
    /// Any read/parse failure degrades to `None` rather than a fatal
    /// error — an unreadable pairing file just means "not yet paired".
    pub async fn load(&self) -> Option<PairingRecord> {
        let data = fs::read(&self.path).await.ok()?;
        serde_json::from_slice(&data).ok()
    }

    /// Atomic write: write to a sibling temp file, fsync, rename over the
    /// target. `PersistenceError` is treated by the caller as non-fatal
    /// (§4.2) but should be logged.
    pub async fn save(&self, record: &PairingRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::PersistenceError(e.to_string()))?;
        }

        let tmp_path = self.tmp_path();
        let data = serde_json::to_vec_pretty(record)
            .map_err(|e| Error::PersistenceError(e.to_string()))?;

        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(|e| Error::PersistenceError(e.to_string()))?;
        file.write_all(&data)
            .await
            .map_err(|e| Error::PersistenceError(e.to_string()))?;
        file.sync_all()
            .await
            .map_err(|e| Error::PersistenceError(e.to_string()))?;
        drop(file);

        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| Error::PersistenceError(e.to_string()))?;

        Ok(())
    }

    /// Remove the record, e.g. on user-initiated unpair.
    pub async fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::PersistenceError(e.to_string())),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "pairing.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_record() -> PairingRecord {
        PairingRecord {
            device_id: "device-abc".to_string(),
            device_name: "SAGE-1234".to_string(),
            paired_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn load_returns_none_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = PairingStore::new(dir.path().join("pairing.json"));
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = PairingStore::new(dir.path().join("pairing.json"));
        let record = sample_record();

        store.save(&record).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn save_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = PairingStore::new(dir.path().join("pairing.json"));
        store.save(&sample_record()).await.unwrap();

        assert!(!store.tmp_path().exists());
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn clear_removes_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = PairingStore::new(dir.path().join("pairing.json"));
        store.save(&sample_record()).await.unwrap();

        store.clear().await.unwrap();
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn clear_is_idempotent_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = PairingStore::new(dir.path().join("pairing.json"));
        assert!(store.clear().await.is_ok());
    }

    #[tokio::test]
    async fn overwrite_replaces_prior_record_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let store = PairingStore::new(dir.path().join("pairing.json"));
        store.save(&sample_record()).await.unwrap();

        let mut second = sample_record();
        second.device_name = "SAGE-5678".to_string();
        store.save(&second).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.device_name, "SAGE-5678");
    }

    #[tokio::test]
    async fn load_degrades_gracefully_on_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairing.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        let store = PairingStore::new(path);
        assert!(store.load().await.is_none());
    }
}
