//! Certificate verifiers for the companion's self-signed identity
//!
//! The companion has no CA chain; trust is a single SHA-256 fingerprint recorded at
//! pairing. [`PinnedVerifier`] accepts exactly that certificate. [`FetchVerifier`]
//! accepts any certificate and exists only for the one unverified call that learns
//! the fingerprint in the first place.
//!
//! Both still check handshake signatures against the presented certificate, so a peer
//! must hold the private key for the certificate it shows.

use std::error::Error as StdError;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::DigitallySignedStruct;
use tracing::{debug, error};
use wolite_core::{tls, Fingerprint};

/// Prefix of the handshake error on a pin mismatch; the presented fingerprint follows
const MISMATCH: &str = "certificate fingerprint mismatch: ";

fn mismatch_error(actual: Fingerprint) -> rustls::Error {
    rustls::Error::General(format!("{MISMATCH}{actual}"))
}

/// Fingerprint rejected by a [`PinnedVerifier`], if `err` or one of its sources is that rejection
///
/// The fingerprint travels inside the error, so concurrent or later requests on the
/// same client never see another request's handshake.
pub(crate) fn rejected_fingerprint(err: &(dyn StdError + 'static)) -> Option<Fingerprint> {
    let mut source = Some(err);
    while let Some(e) = source {
        let text = e.to_string();
        if let Some(idx) = text.find(MISMATCH) {
            let hex: String = text[idx + MISMATCH.len()..]
                .chars()
                .take_while(char::is_ascii_hexdigit)
                .collect();
            if let Ok(fingerprint) = hex.parse() {
                return Some(fingerprint);
            }
        }
        source = e.source();
    }
    None
}

/// Accepts only the certificate whose fingerprint equals the pin
#[derive(Debug)]
pub struct PinnedVerifier {
    expected: Fingerprint,
    provider: Arc<CryptoProvider>,
}

impl PinnedVerifier {
    pub fn new(expected: Fingerprint) -> Self {
        Self {
            expected,
            provider: tls::provider(),
        }
    }

    pub fn expected(&self) -> Fingerprint {
        self.expected
    }
}

impl ServerCertVerifier for PinnedVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let actual = Fingerprint::of_der(end_entity.as_ref());
        if actual == self.expected {
            debug!(fingerprint = %actual, "pinned certificate matched");
            Ok(ServerCertVerified::assertion())
        } else {
            error!(expected = %self.expected, got = %actual, "certificate fingerprint mismatch");
            Err(mismatch_error(actual))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Accepts any certificate. Only for fetching a fingerprint before pairing.
#[derive(Debug)]
pub struct FetchVerifier {
    provider: Arc<CryptoProvider>,
}

impl FetchVerifier {
    pub fn new() -> Self {
        Self {
            provider: tls::provider(),
        }
    }
}

impl Default for FetchVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerCertVerifier for FetchVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(verifier: &dyn ServerCertVerifier, der: &[u8]) -> Result<ServerCertVerified, rustls::Error> {
        let cert = CertificateDer::from(der.to_vec());
        let name = ServerName::try_from("localhost").unwrap();
        verifier.verify_server_cert(&cert, &[], &name, &[], UnixTime::now())
    }

    #[test]
    fn test_pinned_accepts_matching_cert() {
        let verifier = PinnedVerifier::new(Fingerprint::of_der(b"cert-a"));
        assert!(check(&verifier, b"cert-a").is_ok());
    }

    #[test]
    fn test_pinned_rejection_names_presented_cert() {
        let verifier = PinnedVerifier::new(Fingerprint::of_der(b"cert-a"));
        let err = check(&verifier, b"cert-b").unwrap_err();

        assert_eq!(rejected_fingerprint(&err), Some(Fingerprint::of_der(b"cert-b")));
    }

    #[test]
    fn test_rejection_found_through_io_wrapper() {
        let verifier = PinnedVerifier::new(Fingerprint::of_der(b"cert-a"));
        let tls_err = check(&verifier, b"cert-b").unwrap_err();
        let wrapped = std::io::Error::new(std::io::ErrorKind::InvalidData, tls_err);

        assert_eq!(
            rejected_fingerprint(&wrapped),
            Some(Fingerprint::of_der(b"cert-b"))
        );
    }

    #[test]
    fn test_other_errors_are_not_rejections() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(rejected_fingerprint(&refused), None);

        let truncated = std::io::Error::other(MISMATCH);
        assert_eq!(rejected_fingerprint(&truncated), None);
    }

    #[test]
    fn test_fetch_accepts_anything() {
        assert!(check(&FetchVerifier::new(), b"whatever").is_ok());
    }

    #[test]
    fn test_schemes_advertised() {
        assert!(!PinnedVerifier::new(Fingerprint::of_der(b"x"))
            .supported_verify_schemes()
            .is_empty());
    }
}
