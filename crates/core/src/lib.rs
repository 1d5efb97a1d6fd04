//! Wolite Core - Shared protocol types for companion power management
//!
//! This crate provides:
//! - Certificate fingerprints used for TOFU pinning
//! - Bearer token and token-hash types
//! - Power actions and the JSON response envelope
//! - Error types
//! - Owner-only file helpers and TLS provider setup

// Version constants
pub const API_VERSION: &str = "v1";
pub const APP_VERSION_STRING: &str = env!("CARGO_PKG_VERSION");

pub mod auth;
pub mod error;
pub mod fingerprint;
pub mod secure_fs;
pub mod tls;
pub mod types;

// Re-export common types
pub use auth::{Token, TokenHash};
pub use error::{CoreError, Result};
pub use fingerprint::Fingerprint;
pub use types::{routes, ApiResponse, FingerprintData, PowerAction};
