//! Wolite Companion - host agent that accepts authenticated power commands
//!
//! Runs on the machine being controlled. Exposes a small HTTPS API secured by a
//! self-signed certificate (pinned by the controller) and a bearer token.
//!
//! Modules:
//! - `cert`: self-signed TLS identity
//! - `auth`: bearer token lifecycle
//! - `commands`: platform power commands with two-phase prepare/execute
//! - `ratelimit`: global request bucket
//! - `server`: HTTPS routes and middleware
//! - `config`: persisted settings and state directory

pub mod auth;
pub mod cert;
pub mod commands;
pub mod config;
pub mod ratelimit;
pub mod server;

pub use auth::TokenStore;
pub use cert::{CertStore, Identity};
pub use commands::{CommandExecutor, CommandRunner, ExecutableLookup, Platform};
pub use config::CompanionConfig;
pub use ratelimit::RateLimiterStore;
pub use server::{AppState, CompanionServer};
