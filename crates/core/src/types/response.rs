//! JSON envelope returned by every companion endpoint
//!
//! Success: `{code, message, data?}`. Errors: `{code, message}`.

use crate::fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};

/// Route paths served by the companion
pub mod routes {
    pub const PREFIX: &str = "/api/v1";
    pub const HEALTH: &str = "/api/v1/health";
    pub const CERT_FINGERPRINT: &str = "/api/v1/cert-fingerprint";
    pub const SHUTDOWN: &str = "/api/v1/shutdown";
    pub const REBOOT: &str = "/api/v1/reboot";
    pub const SLEEP: &str = "/api/v1/sleep";
    pub const HIBERNATE: &str = "/api/v1/hibernate";
}

/// Response envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse<T = serde_json::Value> {
    pub code: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            code: 200,
            message: message.into(),
            data,
        }
    }

    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// `data` payload of `GET /api/v1/cert-fingerprint`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintData {
    pub fingerprint: Fingerprint,
}
