//! Bearer token lifecycle
//!
//! # TokenStore
//!
//! Owns the single shared secret that authenticates power commands. Only the
//! SHA-256 of the token is persisted (`token.sha256`, raw 32 bytes). The plaintext
//! is written once to `token.txt` for the operator to pick up and is removed after
//! a grace period, at shutdown, or at the next start, whichever comes first.
//!
//! ## Deletion timers
//!
//! Each generation arms its own timer task. When a timer fires it only removes the
//! transient file if its generation is still current; a `regenerate` in between
//! turns the older timer into a no-op, and the newer timer owns the file.
//!
//! ## Locking
//!
//! One `RwLock` guards the hash and generation counter. Hash reads run concurrently;
//! generation (initial or `regenerate`) takes the write lock, so concurrent
//! regenerations serialize and the last writer wins.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use wolite_core::{secure_fs, Token, TokenHash};

/// How long the plaintext token file stays on disk
pub const TOKEN_FILE_GRACE: Duration = Duration::from_secs(120);

const HASH_FILE: &str = "token.sha256";
const TEMP_TOKEN_FILE: &str = "token.txt";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid token hash length: expected 32 bytes, got {0}")]
    CorruptHash(usize),
}

pub type Result<T> = std::result::Result<T, TokenError>;

struct TokenState {
    hash: TokenHash,
    generation: u64,
}

/// Token storage for validating authentication
#[derive(Clone)]
pub struct TokenStore {
    state: Arc<RwLock<TokenState>>,
    hash_path: PathBuf,
    temp_path: PathBuf,
    grace: Duration,
}

impl TokenStore {
    /// Load the persisted hash from `dir`, or generate a first token
    pub async fn load(dir: &Path) -> Result<Self> {
        Self::load_with_grace(dir, TOKEN_FILE_GRACE).await
    }

    /// Like [`TokenStore::load`] with a custom lifetime for the plaintext file
    pub async fn load_with_grace(dir: &Path, grace: Duration) -> Result<Self> {
        let hash_path = dir.join(HASH_FILE);
        let temp_path = dir.join(TEMP_TOKEN_FILE);

        // A plaintext file surviving from a previous run (crash before the timer fired)
        // must never be served again.
        if secure_fs::remove_if_exists(&temp_path).map_err(|source| TokenError::Io {
            path: temp_path.clone(),
            source,
        })? {
            info!(path = %temp_path.display(), "stale token file deleted");
        }

        let existing = match std::fs::read(&hash_path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(source) => {
                return Err(TokenError::Io {
                    path: hash_path,
                    source,
                })
            }
        };

        match existing {
            Some(bytes) => {
                let hash = TokenHash::from_slice(&bytes)
                    .map_err(|_| TokenError::CorruptHash(bytes.len()))?;
                debug!(path = %hash_path.display(), "token hash loaded");

                Ok(Self {
                    state: Arc::new(RwLock::new(TokenState {
                        hash,
                        generation: 0,
                    })),
                    hash_path,
                    temp_path,
                    grace,
                })
            }
            None => {
                let placeholder = TokenHash::of(&[]);
                let store = Self {
                    state: Arc::new(RwLock::new(TokenState {
                        hash: placeholder,
                        generation: 0,
                    })),
                    hash_path,
                    temp_path,
                    grace,
                };
                store.regenerate().await?;
                Ok(store)
            }
        }
    }

    /// Create a new token, persist its hash and re-arm the transient file timer
    ///
    /// Invalidates every previously issued token immediately. Returns the plaintext.
    pub async fn regenerate(&self) -> Result<Token> {
        let mut state = self.state.write().await;

        info!("generating authentication token");
        let token = Token::generate();
        let hash = token.hash();

        secure_fs::write_private(&self.temp_path, token.as_str().as_bytes()).map_err(
            |source| TokenError::Io {
                path: self.temp_path.clone(),
                source,
            },
        )?;

        if let Err(source) = secure_fs::write_private(&self.hash_path, hash.as_bytes()) {
            let _ = secure_fs::remove_if_exists(&self.temp_path);
            return Err(TokenError::Io {
                path: self.hash_path.clone(),
                source,
            });
        }

        state.hash = hash;
        state.generation += 1;
        let generation = state.generation;
        drop(state);

        info!(
            path = %self.temp_path.display(),
            grace_secs = self.grace.as_secs(),
            "token saved to file, it will be deleted automatically"
        );
        self.arm_deletion(generation);

        Ok(token)
    }

    /// Current token hash
    pub async fn current_hash(&self) -> TokenHash {
        self.state.read().await.hash
    }

    /// Hash a presented token and compare it to the current hash in constant time
    pub async fn verify(&self, presented: &str) -> bool {
        let presented = TokenHash::of(presented.as_bytes());
        self.current_hash().await.ct_matches(&presented)
    }

    /// Remove the transient plaintext file; safe to call any number of times
    pub fn cleanup(&self) {
        match secure_fs::remove_if_exists(&self.temp_path) {
            Ok(true) => info!(path = %self.temp_path.display(), "temp token file cleaned up"),
            Ok(false) => {}
            Err(e) => error!(path = %self.temp_path.display(), error = %e, "failed to remove temp token file"),
        }
    }

    pub fn temp_token_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn hash_path(&self) -> &Path {
        &self.hash_path
    }

    fn arm_deletion(&self, generation: u64) {
        let state = Arc::clone(&self.state);
        let path = self.temp_path.clone();
        let grace = self.grace;

        tokio::spawn(async move {
            tokio::time::sleep(grace).await;

            // Hold the read lock so a concurrent regenerate cannot write a new file mid-check
            let current = state.read().await;
            if current.generation != generation {
                debug!(generation, "token file superseded, skipping auto-delete");
                return;
            }

            match secure_fs::remove_if_exists(&path) {
                Ok(true) => info!(path = %path.display(), "token file auto-deleted"),
                Ok(false) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to auto-delete token file"),
            }
        });
    }
}
