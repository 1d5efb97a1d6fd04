//! rustls crypto provider helpers
//!
//! Both sides build their TLS configs against the ring provider explicitly, so the
//! process never depends on which provider feature some other crate happened to enable.

use std::sync::Arc;

use rustls::crypto::CryptoProvider;

/// The ring provider used for every TLS config in the workspace
pub fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Install ring as the process-wide default provider (required for rustls 0.23+).
///
/// Safe to call more than once; later calls are no-ops.
pub fn install_default_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}
