//! Bearer token types shared by the companion and the controller
//!
//! The companion only ever stores a [`TokenHash`]; the plaintext [`Token`] exists
//! in the transient pickup file and in the controller's pairing record.
//!
//! ## Security Notes
//!
//! - **Generation**: 32 characters drawn uniformly from `[A-Za-z0-9]` using the OS CSPRNG
//! - **Comparison**: hashes are compared with `subtle::ConstantTimeEq`, never `==`
//! - **Debug**: `Token` redacts its value so it never lands in logs

use crate::error::{CoreError, Result};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;

/// Plaintext token length in characters
pub const TOKEN_LEN: usize = 32;

/// Digest size of a token hash in bytes
pub const TOKEN_HASH_LEN: usize = 32;

/// Plaintext bearer token
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    /// Generate a new random token from the OS random source
    ///
    /// # Example
    /// ```
    /// # use wolite_core::auth::Token;
    /// let token = Token::generate();
    /// assert_eq!(token.as_str().len(), 32);
    /// ```
    pub fn generate() -> Self {
        Self(
            OsRng
                .sample_iter(&Alphanumeric)
                .take(TOKEN_LEN)
                .map(char::from)
                .collect(),
        )
    }

    /// Wrap a token presented by a caller or loaded from a pairing record
    ///
    /// Only rejects the empty string; any other value is hashed and compared.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(CoreError::InvalidTokenFormat);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// SHA-256 of the token's bytes
    pub fn hash(&self) -> TokenHash {
        TokenHash::of(self.0.as_bytes())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(<redacted>)")
    }
}

/// SHA-256 digest of a token, the only form the companion persists
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TokenHash([u8; TOKEN_HASH_LEN]);

impl TokenHash {
    /// Hash arbitrary presented bytes (e.g. the value of an `Authorization` header)
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    /// Rebuild a hash from its persisted form
    ///
    /// # Errors
    /// - `InvalidTokenFormat` if the slice is not exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; TOKEN_HASH_LEN] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidTokenFormat)?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; TOKEN_HASH_LEN] {
        &self.0
    }

    /// Constant-time equality
    pub fn ct_matches(&self, other: &TokenHash) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl fmt::Debug for TokenHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenHash({}..)", &hex::encode(self.0)[..8])
    }
}
