//! Certificate fingerprints for trust pinning
//!
//! A fingerprint is the SHA-256 of a certificate's raw DER bytes, never of its PEM text.
//! Parsing is case-insensitive and tolerates `:` separators (and `-`/whitespace), so
//! `"AA:BB:.."` and `"aabb.."` pin identically.
//! The canonical text form is upper-case hex with no separators, as served by the
//! companion's `cert-fingerprint` endpoint.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// SHA-256 certificate fingerprint
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint a DER-encoded certificate
    pub fn of_der(der: &[u8]) -> Self {
        Self(Sha256::digest(der).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Colon-separated form, e.g. `AA:BB:CC:..` (for operator display)
    pub fn to_colon_hex(&self) -> String {
        self.0
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Strip separators and whitespace, then uppercase.
    ///
    /// Handles "AA:BB:CC", "aa:bb:cc", "AABBCC", "aa-bb-cc".
    pub fn normalize(raw: &str) -> String {
        raw.chars()
            .filter(|c| !matches!(c, ':' | '-') && !c.is_whitespace())
            .map(|c| c.to_ascii_uppercase())
            .collect()
    }
}

impl FromStr for Fingerprint {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let clean = Self::normalize(s);
        if clean.len() != 64 {
            return Err(CoreError::InvalidFingerprint(format!(
                "expected 64 hex characters, got {}",
                clean.len()
            )));
        }

        let mut bytes = [0u8; 32];
        hex::decode_to_slice(&clean, &mut bytes)
            .map_err(|e| CoreError::InvalidFingerprint(e.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
