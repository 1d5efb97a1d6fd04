//! Device persistence
//!
//! The pairing flow only needs two operations from its host application: an
//! ownership-checked lookup and a full-record update. [`DeviceStore`] is that seam.
//! [`FileDeviceStore`] backs the `wolite-ctl` CLI with one JSON file replaced
//! atomically on every write; [`MemoryDeviceStore`] keeps records in memory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use wolite_core::{secure_fs, Fingerprint};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid device file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Device {0} not found")]
    NotFound(u64),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A controllable machine and its companion pairing, if any
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: u64,
    pub owner: String,
    pub name: String,
    pub mac_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub companion_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub companion_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub companion_fingerprint: Option<Fingerprint>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("name", &self.name)
            .field("mac_address", &self.mac_address)
            .field("companion_url", &self.companion_url)
            .field("companion_token", &self.companion_token.as_ref().map(|_| "<redacted>"))
            .field("companion_fingerprint", &self.companion_fingerprint)
            .finish()
    }
}

impl Device {
    pub fn new(id: u64, owner: &str, name: &str, mac_address: &str) -> Self {
        Self {
            id,
            owner: owner.to_string(),
            name: name.to_string(),
            mac_address: mac_address.to_string(),
            companion_url: None,
            companion_token: None,
            companion_fingerprint: None,
        }
    }

    /// Paired means url, token and fingerprint are all recorded
    pub fn is_paired(&self) -> bool {
        self.companion_url.as_deref().is_some_and(|u| !u.is_empty())
            && self.companion_token.as_deref().is_some_and(|t| !t.is_empty())
            && self.companion_fingerprint.is_some()
    }

    pub fn clear_pairing(&mut self) {
        self.companion_url = None;
        self.companion_token = None;
        self.companion_fingerprint = None;
    }
}

/// Storage collaborator used by the pairing orchestrator
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// `None` when the device does not exist or belongs to someone else
    async fn get_device_for_user(&self, owner: &str, id: u64) -> Result<Option<Device>>;

    /// Replace the stored record with `device`
    async fn update_device(&self, device: &Device) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DeviceFile {
    devices: BTreeMap<u64, Device>,
}

/// JSON flat-file store (owner-only permissions, atomic replace)
pub struct FileDeviceStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileDeviceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add a new, unpaired device and return it with its assigned id
    pub async fn insert(&self, owner: &str, name: &str, mac_address: &str) -> Result<Device> {
        let _guard = self.lock.lock().await;
        let mut file = self.read()?;

        let id = file.devices.keys().next_back().map_or(1, |last| last + 1);
        let device = Device::new(id, owner, name, mac_address);
        file.devices.insert(id, device.clone());
        self.write(&file)?;

        debug!(id, owner, "device added");
        Ok(device)
    }

    /// All devices belonging to `owner`, by id
    pub async fn list(&self, owner: &str) -> Result<Vec<Device>> {
        let _guard = self.lock.lock().await;
        Ok(self
            .read()?
            .devices
            .into_values()
            .filter(|d| d.owner == owner)
            .collect())
    }

    fn read(&self) -> Result<DeviceFile> {
        match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Parse {
                path: self.path.clone(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DeviceFile::default()),
            Err(source) => Err(StoreError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn write(&self, file: &DeviceFile) -> Result<()> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            secure_fs::ensure_private_dir(parent).map_err(io_err)?;
        }

        let data = serde_json::to_vec_pretty(file).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })?;
        secure_fs::write_private(&self.path, &data).map_err(io_err)
    }
}

#[async_trait]
impl DeviceStore for FileDeviceStore {
    async fn get_device_for_user(&self, owner: &str, id: u64) -> Result<Option<Device>> {
        let _guard = self.lock.lock().await;
        Ok(self
            .read()?
            .devices
            .remove(&id)
            .filter(|d| d.owner == owner))
    }

    async fn update_device(&self, device: &Device) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.read()?;

        match file.devices.get_mut(&device.id) {
            Some(slot) => *slot = device.clone(),
            None => return Err(StoreError::NotFound(device.id)),
        }
        self.write(&file)
    }
}

/// In-memory store, for embedding and tests
#[derive(Default)]
pub struct MemoryDeviceStore {
    devices: Mutex<BTreeMap<u64, Device>>,
}

impl MemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, device: Device) {
        self.devices.lock().await.insert(device.id, device);
    }

    /// Raw lookup without the ownership check
    pub async fn get(&self, id: u64) -> Option<Device> {
        self.devices.lock().await.get(&id).cloned()
    }
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn get_device_for_user(&self, owner: &str, id: u64) -> Result<Option<Device>> {
        Ok(self
            .devices
            .lock()
            .await
            .get(&id)
            .filter(|d| d.owner == owner)
            .cloned())
    }

    async fn update_device(&self, device: &Device) -> Result<()> {
        match self.devices.lock().await.get_mut(&device.id) {
            Some(slot) => {
                *slot = device.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(device.id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paired(mut device: Device) -> Device {
        device.companion_url = Some("https://10.0.0.2:8443".to_string());
        device.companion_token = Some("secret-token".to_string());
        device.companion_fingerprint = Some(Fingerprint::of_der(b"cert"));
        device
    }

    #[test]
    fn test_is_paired_requires_all_fields() {
        let device = Device::new(1, "alice", "desk", "AA:BB:CC:DD:EE:FF");
        assert!(!device.is_paired());

        let mut device = paired(device);
        assert!(device.is_paired());

        device.companion_token = Some(String::new());
        assert!(!device.is_paired());

        device.clear_pairing();
        assert_eq!(device, Device::new(1, "alice", "desk", "AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn test_debug_redacts_token() {
        let device = paired(Device::new(1, "alice", "desk", "mac"));
        let debug = format!("{:?}", device);
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDeviceStore::new(dir.path().join("nested").join("devices.json"));

        let a = store.insert("alice", "desk", "mac-a").await.unwrap();
        let b = store.insert("bob", "laptop", "mac-b").await.unwrap();
        assert_eq!((a.id, b.id), (1, 2));

        let mut a = store.get_device_for_user("alice", a.id).await.unwrap().unwrap();
        a = paired(a);
        store.update_device(&a).await.unwrap();

        let reopened = FileDeviceStore::new(store.path().to_path_buf());
        let loaded = reopened.get_device_for_user("alice", 1).await.unwrap().unwrap();
        assert_eq!(loaded, a);
        assert_eq!(reopened.list("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ownership_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDeviceStore::new(dir.path().join("devices.json"));
        let device = store.insert("alice", "desk", "mac").await.unwrap();

        assert!(store.get_device_for_user("mallory", device.id).await.unwrap().is_none());
        assert!(store.get_device_for_user("alice", 99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_missing_device_fails() {
        let store = MemoryDeviceStore::new();
        let result = store.update_device(&Device::new(7, "alice", "x", "y")).await;
        assert!(matches!(result, Err(StoreError::NotFound(7))));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");
        std::fs::write(&path, b"[oops").unwrap();

        let store = FileDeviceStore::new(path);
        assert!(matches!(store.list("alice").await, Err(StoreError::Parse { .. })));
    }
}
