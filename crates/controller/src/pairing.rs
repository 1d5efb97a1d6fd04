//! Pairing and dispatch
//!
//! # PairingOrchestrator
//!
//! Pairing is: ownership check, unverified fingerprint fetch, pinned health check
//! with the supplied token, then one store update. Nothing is written until every
//! network step has succeeded, so a failed pair leaves the device record as it was.

use thiserror::Error;
use tracing::{info, warn};
use wolite_core::{ApiResponse, Fingerprint, PowerAction};

use crate::client::{self, ClientError, PinnedClient};
use crate::store::{Device, DeviceStore, StoreError};

#[derive(Debug, Error)]
pub enum PairingError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Device {0} not found")]
    DeviceNotFound(u64),

    #[error("Companion not paired")]
    NotPaired,

    #[error("Failed to fetch certificate fingerprint: {0}")]
    FetchFingerprint(#[source] ClientError),

    #[error("Failed to verify companion connection: {0}")]
    VerifyConnection(#[source] ClientError),

    #[error("Companion command failed: {0}")]
    Command(#[source] ClientError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, PairingError>;

/// Companion address and token supplied by the operator
#[derive(Clone)]
pub struct PairRequest {
    pub url: String,
    pub token: String,
    /// Fingerprint confirmed out of band; when set, the fetched one must equal it
    pub fingerprint: Option<String>,
}

impl PairRequest {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            fingerprint: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    fn validate(&self) -> Result<Option<Fingerprint>> {
        if self.url.trim().is_empty() {
            return Err(PairingError::InvalidRequest("url is required".to_string()));
        }
        if self.token.is_empty() {
            return Err(PairingError::InvalidRequest("token is required".to_string()));
        }
        self.fingerprint
            .as_deref()
            .map(str::parse::<Fingerprint>)
            .transpose()
            .map_err(|e| PairingError::InvalidRequest(e.to_string()))
    }
}

pub struct PairingOrchestrator<S> {
    store: S,
}

impl<S: DeviceStore> PairingOrchestrator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn device(&self, owner: &str, id: u64) -> Result<Device> {
        self.store
            .get_device_for_user(owner, id)
            .await?
            .ok_or(PairingError::DeviceNotFound(id))
    }

    /// Pair `id` with the companion at `req.url`
    pub async fn pair(&self, owner: &str, id: u64, req: PairRequest) -> Result<Device> {
        let confirmed = req.validate()?;
        let mut device = self.device(owner, id).await?;

        let fetched = client::fetch_fingerprint(&req.url)
            .await
            .map_err(PairingError::FetchFingerprint)?;
        if let Some(expected) = confirmed {
            if expected != fetched {
                return Err(PairingError::FetchFingerprint(
                    ClientError::FingerprintMismatch {
                        expected,
                        got: fetched,
                    },
                ));
            }
        }

        let client = PinnedClient::new(&req.url, &req.token, &fetched.to_string())
            .map_err(PairingError::VerifyConnection)?;
        client.ping().await.map_err(PairingError::VerifyConnection)?;

        device.companion_url = Some(client.base_url().to_string());
        device.companion_token = Some(req.token);
        device.companion_fingerprint = Some(fetched);
        self.store.update_device(&device).await?;

        info!(id, owner, fingerprint = %fetched, "device paired");
        Ok(device)
    }

    /// Forget the companion for `id`; succeeds on an already unpaired device
    pub async fn unpair(&self, owner: &str, id: u64) -> Result<Device> {
        let mut device = self.device(owner, id).await?;
        device.clear_pairing();
        self.store.update_device(&device).await?;

        info!(id, owner, "device unpaired");
        Ok(device)
    }

    /// Send `action` to the paired companion of `id`
    pub async fn power(&self, owner: &str, id: u64, action: &str) -> Result<ApiResponse> {
        let device = self.device(owner, id).await?;

        let (Some(url), Some(token), Some(fingerprint)) = (
            device.companion_url.as_deref(),
            device.companion_token.as_deref(),
            device.companion_fingerprint,
        ) else {
            return Err(PairingError::NotPaired);
        };
        if !device.is_paired() {
            return Err(PairingError::NotPaired);
        }

        let action: PowerAction = action.parse().map_err(|_| {
            PairingError::InvalidRequest(format!("invalid action: {action}"))
        })?;

        let client = PinnedClient::new(url, token, &fingerprint.to_string())
            .map_err(PairingError::Command)?;
        client.power(action).await.map_err(|e| {
            warn!(id, %action, error = %e, "power command failed");
            PairingError::Command(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDeviceStore;

    async fn orchestrator() -> PairingOrchestrator<MemoryDeviceStore> {
        let store = MemoryDeviceStore::new();
        store.insert(Device::new(1, "alice", "desk", "mac")).await;
        PairingOrchestrator::new(store)
    }

    #[tokio::test]
    async fn test_pair_validates_request() {
        let orch = orchestrator().await;

        let err = orch.pair("alice", 1, PairRequest::new("", "tok")).await.unwrap_err();
        assert!(matches!(err, PairingError::InvalidRequest(_)));

        let err = orch
            .pair("alice", 1, PairRequest::new("https://h:8443", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, PairingError::InvalidRequest(_)));

        let err = orch
            .pair("alice", 1, PairRequest::new("https://h:8443", "tok").with_fingerprint("zz"))
            .await
            .unwrap_err();
        assert!(matches!(err, PairingError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_pair_checks_ownership() {
        let orch = orchestrator().await;
        let err = orch
            .pair("mallory", 1, PairRequest::new("https://127.0.0.1:9", "tok"))
            .await
            .unwrap_err();
        assert!(matches!(err, PairingError::DeviceNotFound(1)));
    }

    #[tokio::test]
    async fn test_failed_pair_persists_nothing() {
        let orch = orchestrator().await;
        let before = orch.store().get(1).await.unwrap();

        let err = orch
            .pair("alice", 1, PairRequest::new("https://127.0.0.1:9", "tok"))
            .await
            .unwrap_err();
        assert!(matches!(err, PairingError::FetchFingerprint(_)));
        assert_eq!(orch.store().get(1).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_power_requires_pairing() {
        let orch = orchestrator().await;
        let err = orch.power("alice", 1, "shutdown").await.unwrap_err();
        assert!(matches!(err, PairingError::NotPaired));
    }

    #[tokio::test]
    async fn test_power_rejects_unknown_action() {
        let orch = orchestrator().await;
        let mut device = orch.store().get(1).await.unwrap();
        device.companion_url = Some("https://127.0.0.1:9".to_string());
        device.companion_token = Some("tok".to_string());
        device.companion_fingerprint = Some(Fingerprint::of_der(b"cert"));
        orch.store().update_device(&device).await.unwrap();

        let err = orch.power("alice", 1, "explode").await.unwrap_err();
        assert!(matches!(err, PairingError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_unpair_is_idempotent() {
        let orch = orchestrator().await;
        let device = orch.unpair("alice", 1).await.unwrap();
        assert!(!device.is_paired());
        assert!(orch.unpair("alice", 1).await.is_ok());
    }
}
