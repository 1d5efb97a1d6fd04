//! Wolite Controller - pairs with companions and sends them power commands
//!
//! - `client`: pinned HTTPS client and the one-time fingerprint fetch
//! - `verifier`: rustls certificate verifiers for fingerprint pinning
//! - `store`: device records and the storage seam
//! - `pairing`: pair / unpair / power orchestration

pub mod client;
pub mod pairing;
pub mod store;
pub mod verifier;

pub use client::{fetch_fingerprint, ClientError, PinnedClient};
pub use pairing::{PairRequest, PairingError, PairingOrchestrator};
pub use store::{Device, DeviceStore, FileDeviceStore, MemoryDeviceStore, StoreError};
