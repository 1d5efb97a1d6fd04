//! HTTPS client for a paired companion
//!
//! Every call except [`fetch_fingerprint`] runs over a TLS session pinned to the
//! fingerprint recorded at pairing. Each request is bounded by [`CLIENT_TIMEOUT`];
//! dropping the returned future aborts the request.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Response, StatusCode, Url};
use rustls::client::danger::ServerCertVerifier;
use thiserror::Error;
use tracing::{debug, info, warn};
use wolite_core::{routes, tls, ApiResponse, CoreError, Fingerprint, PowerAction};

use crate::verifier::{self, FetchVerifier, PinnedVerifier};

/// Bound on every network call made by the controller
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid client configuration: {0}")]
    InvalidConfig(String),

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Certificate fingerprint mismatch: expected {expected}, got {got}")]
    FingerprintMismatch { expected: Fingerprint, got: Fingerprint },

    #[error("Server presented no certificate")]
    NoPeerCertificate,

    #[error("companion error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("TLS setup failed: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Invalid fingerprint: {0}")]
    Fingerprint(#[from] CoreError),
}

pub type Result<T> = std::result::Result<T, ClientError>;

fn http_client(verifier: Arc<dyn ServerCertVerifier>) -> Result<Client> {
    let tls = rustls::ClientConfig::builder_with_provider(tls::provider())
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();

    Ok(Client::builder()
        .use_preconfigured_tls(tls)
        .tls_info(true)
        .timeout(CLIENT_TIMEOUT)
        .build()?)
}

/// Validate and normalize a companion base URL (`https://host:port`, no trailing `/`)
fn base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ClientError::InvalidConfig("url is required".to_string()));
    }

    let url = Url::parse(trimmed)
        .map_err(|e| ClientError::InvalidConfig(format!("invalid url {trimmed}: {e}")))?;
    if url.scheme() != "https" {
        return Err(ClientError::InvalidConfig(format!(
            "url must use https, got {}",
            url.scheme()
        )));
    }

    Ok(trimmed.to_string())
}

async fn expect_ok(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status == StatusCode::OK {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        body: body.trim().to_string(),
    })
}

/// Read the companion's certificate fingerprint **without** verifying it
///
/// The only unverified call in the protocol. The result must be shown to (or
/// otherwise confirmed by) the operator before it is trusted.
pub async fn fetch_fingerprint(url: &str) -> Result<Fingerprint> {
    let base = base_url(url)?;
    warn!(url = %base, "fetching certificate fingerprint without verification");

    let client = http_client(Arc::new(FetchVerifier::new()))?;
    let resp = client.get(format!("{base}{}", routes::HEALTH)).send().await?;

    let der = resp
        .extensions()
        .get::<reqwest::tls::TlsInfo>()
        .and_then(|info| info.peer_certificate())
        .ok_or(ClientError::NoPeerCertificate)?;

    let fingerprint = Fingerprint::of_der(der);
    info!(url = %base, %fingerprint, "fetched certificate fingerprint");
    Ok(fingerprint)
}

/// Client pinned to one companion certificate
pub struct PinnedClient {
    base: String,
    token: String,
    verifier: Arc<PinnedVerifier>,
    http: Client,
    timeout: Duration,
}

impl std::fmt::Debug for PinnedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedClient")
            .field("base", &self.base)
            .field("fingerprint", &self.verifier.expected())
            .finish_non_exhaustive()
    }
}

impl PinnedClient {
    /// `fingerprint` is case-insensitive and may contain `:` separators
    pub fn new(url: &str, token: &str, fingerprint: &str) -> Result<Self> {
        let base = base_url(url)?;
        if token.is_empty() {
            return Err(ClientError::InvalidConfig("token is required".to_string()));
        }
        let expected: Fingerprint = fingerprint.parse()?;

        let verifier = Arc::new(PinnedVerifier::new(expected));
        let http = http_client(verifier.clone())?;

        Ok(Self {
            base,
            token: token.to_string(),
            verifier,
            http,
            timeout: CLIENT_TIMEOUT,
        })
    }

    /// Per-request deadline; must not exceed [`CLIENT_TIMEOUT`] to have an effect
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.min(CLIENT_TIMEOUT);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.verifier.expected()
    }

    /// Health check over the pinned session
    pub async fn ping(&self) -> Result<()> {
        let resp = self
            .http
            .get(format!("{}{}", self.base, routes::HEALTH))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        expect_ok(resp).await?;
        debug!(url = %self.base, "companion reachable");
        Ok(())
    }

    /// Ask the companion to run `action`
    ///
    /// Success means the command was validated and scheduled, not that it ran.
    pub async fn power(&self, action: PowerAction) -> Result<ApiResponse> {
        let resp = self
            .http
            .post(format!("{}{}/{}", self.base, routes::PREFIX, action))
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let body = expect_ok(resp).await?.json::<ApiResponse>().await?;
        info!(url = %self.base, %action, message = %body.message, "power command accepted");
        Ok(body)
    }

    /// Turn a handshake rejected by the pin into [`ClientError::FingerprintMismatch`]
    fn classify(&self, err: reqwest::Error) -> ClientError {
        match verifier::rejected_fingerprint(&err) {
            Some(got) => ClientError::FingerprintMismatch {
                expected: self.verifier.expected(),
                got,
            },
            None => ClientError::Transport(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FP: &str = "AB12000000000000000000000000000000000000000000000000000000000000";

    #[test]
    fn test_base_url_trims_trailing_slash() {
        assert_eq!(base_url("https://10.0.0.2:8443/").unwrap(), "https://10.0.0.2:8443");
        assert_eq!(base_url("https://host:8443").unwrap(), "https://host:8443");
    }

    #[test]
    fn test_base_url_rejects_bad_input() {
        assert!(matches!(base_url(""), Err(ClientError::InvalidConfig(_))));
        assert!(matches!(base_url("/"), Err(ClientError::InvalidConfig(_))));
        assert!(matches!(base_url("not a url"), Err(ClientError::InvalidConfig(_))));
        assert!(matches!(base_url("http://host:8443"), Err(ClientError::InvalidConfig(_))));
    }

    #[test]
    fn test_new_requires_token() {
        let result = PinnedClient::new("https://host:8443", "", FP);
        assert!(matches!(result, Err(ClientError::InvalidConfig(_))));
    }

    #[test]
    fn test_new_rejects_bad_fingerprint() {
        let result = PinnedClient::new("https://host:8443", "token", "abc");
        assert!(matches!(result, Err(ClientError::Fingerprint(_))));
    }

    #[test]
    fn test_fingerprint_forms_pin_identically() {
        let colon = FP
            .as_bytes()
            .chunks(2)
            .map(|c| std::str::from_utf8(c).unwrap().to_lowercase())
            .collect::<Vec<_>>()
            .join(":");

        let a = PinnedClient::new("https://host:8443/", "t", FP).unwrap();
        let b = PinnedClient::new("https://host:8443", "t", &colon).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.base_url(), b.base_url());
    }

    #[test]
    fn test_timeout_is_capped() {
        let client = PinnedClient::new("https://host:8443", "t", FP)
            .unwrap()
            .with_timeout(Duration::from_secs(60));
        assert_eq!(client.timeout, CLIENT_TIMEOUT);
    }

    #[test]
    fn test_debug_hides_token() {
        let client = PinnedClient::new("https://host:8443", "super-secret", FP).unwrap();
        assert!(!format!("{:?}", client).contains("super-secret"));
    }

    #[tokio::test]
    async fn test_unreachable_is_transport_error() {
        // Port 9 on loopback is closed in test environments
        let client = PinnedClient::new("https://127.0.0.1:9", "t", FP).unwrap();
        assert!(matches!(client.ping().await, Err(ClientError::Transport(_))));
    }
}
