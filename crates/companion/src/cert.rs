//! Certificate storage and generation
//!
//! # CertStore
//!
//! Owns the companion's self-signed TLS identity. The certificate is the only
//! thing a controller ever pins, so it is generated once and reused across restarts.
//!
//! ## Files (under the config directory)
//!
//! - `cert.pem` - Certificate (PEM, 0600 on Unix)
//! - `key.pem` - Private key (PKCS#8 PEM, 0600 on Unix)
//!
//! ## Partial artifacts
//!
//! Both files are written via temp-file + rename, key first and certificate last.
//! A crash mid-generation leaves no certificate, which [`CertStore::exists`] reports
//! as absent. A certificate that is present but undecodable or outside its validity
//! window is an integrity error; it is never silently replaced because a new identity
//! would break every existing pin.

use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SanType, SerialNumber,
};
use rand::rngs::OsRng;
use rand::RngCore;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs1KeyDer, PrivatePkcs8KeyDer, PrivateSec1KeyDer};
use std::collections::BTreeSet;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use wolite_core::secure_fs;
use wolite_core::Fingerprint;

/// Certificate validity; there is no renewal, expiry requires `regen-cert`
const VALIDITY_DAYS: i64 = 730;

const ORGANIZATION: &str = "wolite";
const COMMON_NAME: &str = "wolite-companion";

#[derive(Debug, Error)]
pub enum CertError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Certificate generation failed: {0}")]
    Generate(#[from] rcgen::Error),

    #[error("Failed to decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    #[error("Certificate expired at {0}; run `wolite-companion regen-cert`")]
    Expired(String),

    #[error("Certificate not valid before {0}")]
    NotYetValid(String),

    #[error("Random source failure: {0}")]
    Random(String),
}

pub type Result<T> = std::result::Result<T, CertError>;

/// Decoded TLS identity ready for the HTTPS listener
pub struct Identity {
    pub cert: CertificateDer<'static>,
    pub key: PrivateKeyDer<'static>,
    pub fingerprint: Fingerprint,
}

/// Certificate storage
pub struct CertStore {
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl CertStore {
    /// Store using the default file names inside `dir`
    pub fn new(dir: &Path) -> Self {
        Self::with_paths(dir.join("cert.pem"), dir.join("key.pem"))
    }

    pub fn with_paths(cert_path: PathBuf, key_path: PathBuf) -> Self {
        Self {
            cert_path,
            key_path,
        }
    }

    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// True only when both artifacts exist and are non-empty
    pub fn exists(&self) -> bool {
        let present = |p: &Path| fs::metadata(p).map(|m| m.len() > 0).unwrap_or(false);
        present(&self.cert_path) && present(&self.key_path)
    }

    /// Generate a fresh keypair and self-signed certificate, replacing any existing pair
    ///
    /// SANs cover `127.0.0.1`, `::1`, `localhost` and every non-loopback address bound to
    /// a local interface right now, so the companion is reachable by LAN IP without reissue.
    pub fn generate(&self) -> Result<Fingerprint> {
        let mut params = CertificateParams::new(vec!["localhost".to_string()])?;

        params
            .distinguished_name
            .push(DnType::OrganizationName, ORGANIZATION);
        params.distinguished_name.push(DnType::CommonName, COMMON_NAME);

        let mut addrs: BTreeSet<IpAddr> = BTreeSet::new();
        addrs.insert(IpAddr::V4(Ipv4Addr::LOCALHOST));
        addrs.insert(IpAddr::V6(Ipv6Addr::LOCALHOST));
        addrs.extend(local_interface_addrs());
        params
            .subject_alt_names
            .extend(addrs.into_iter().map(SanType::IpAddress));

        // Self-signed: issuer = subject, allowed to sign itself
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
            KeyUsagePurpose::KeyCertSign,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.serial_number = Some(random_serial()?);

        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + Duration::days(VALIDITY_DAYS);

        // ECDSA P-256 (128-bit security, stronger than RSA-2048)
        let key_pair = KeyPair::generate()?;
        let cert = params.self_signed(&key_pair)?;

        self.write(&self.key_path, key_pair.serialize_pem().as_bytes())?;
        self.write(&self.cert_path, cert.pem().as_bytes())?;

        let fingerprint = Fingerprint::of_der(cert.der());
        info!(
            cert_path = %self.cert_path.display(),
            key_path = %self.key_path.display(),
            %fingerprint,
            "certificate generated"
        );
        Ok(fingerprint)
    }

    /// SHA-256 of the certificate's DER bytes (never the PEM text)
    pub fn fingerprint(&self) -> Result<Fingerprint> {
        let der = self.read_cert_der()?;
        Ok(Fingerprint::of_der(&der))
    }

    /// Load and validate the identity for serving
    ///
    /// # Errors
    /// - `Decode` if either file is not the expected PEM / X.509 content
    /// - `Expired` / `NotYetValid` if now is outside the certificate's validity window
    pub fn load(&self) -> Result<Identity> {
        let cert_der = self.read_cert_der()?;
        check_validity(&self.cert_path, &cert_der)?;

        let key = self.read_key_der()?;
        let fingerprint = Fingerprint::of_der(&cert_der);

        Ok(Identity {
            cert: CertificateDer::from(cert_der),
            key,
            fingerprint,
        })
    }

    /// Remove both artifacts (for `regen-cert`)
    pub fn clear(&self) -> Result<()> {
        for path in [&self.cert_path, &self.key_path] {
            secure_fs::remove_if_exists(path).map_err(|source| CertError::Io {
                path: path.clone(),
                source,
            })?;
        }
        Ok(())
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        secure_fs::write_private(path, contents).map_err(|source| CertError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn read_pem(&self, path: &Path) -> Result<pem::Pem> {
        let data = fs::read(path).map_err(|source| CertError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        pem::parse(data).map_err(|e| CertError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn read_cert_der(&self) -> Result<Vec<u8>> {
        let block = self.read_pem(&self.cert_path)?;
        if block.tag() != "CERTIFICATE" {
            return Err(CertError::Decode {
                path: self.cert_path.clone(),
                reason: format!("expected CERTIFICATE block, found {}", block.tag()),
            });
        }
        Ok(block.into_contents())
    }

    fn read_key_der(&self) -> Result<PrivateKeyDer<'static>> {
        let block = self.read_pem(&self.key_path)?;
        let key = match block.tag() {
            "PRIVATE KEY" => PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(block.into_contents())),
            "RSA PRIVATE KEY" => PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(block.into_contents())),
            "EC PRIVATE KEY" => PrivateKeyDer::Sec1(PrivateSec1KeyDer::from(block.into_contents())),
            other => {
                return Err(CertError::Decode {
                    path: self.key_path.clone(),
                    reason: format!("unsupported key block {}", other),
                })
            }
        };
        Ok(key)
    }
}

/// Uniformly random 128-bit serial, encoded as a non-negative DER integer
fn random_serial() -> Result<SerialNumber> {
    let mut bytes = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| CertError::Random(e.to_string()))?;
    Ok(SerialNumber::from_slice(&bytes))
}

/// Every non-loopback address currently bound to a local interface
fn local_interface_addrs() -> Vec<IpAddr> {
    match if_addrs::get_if_addrs() {
        Ok(ifaces) => ifaces
            .into_iter()
            .filter(|iface| !iface.is_loopback())
            .map(|iface| iface.ip())
            .collect(),
        Err(e) => {
            warn!(error = %e, "failed to enumerate network interfaces, SANs limited to loopback");
            Vec::new()
        }
    }
}

fn check_validity(path: &Path, der: &[u8]) -> Result<()> {
    let (_, cert) = x509_parser::parse_x509_certificate(der).map_err(|e| CertError::Decode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let validity = cert.validity();
    let now = OffsetDateTime::now_utc().unix_timestamp();

    if now < validity.not_before.timestamp() {
        return Err(CertError::NotYetValid(validity.not_before.to_string()));
    }
    if now > validity.not_after.timestamp() {
        return Err(CertError::Expired(validity.not_after.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};
    use x509_parser::extensions::GeneralName;

    fn store() -> (tempfile::TempDir, CertStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CertStore::new(dir.path());
        (dir, store)
    }

    fn write_with_validity(store: &CertStore, not_before: OffsetDateTime, not_after: OffsetDateTime) {
        let mut params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        params.not_before = not_before;
        params.not_after = not_after;
        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        fs::write(store.key_path(), key.serialize_pem()).unwrap();
        fs::write(store.cert_path(), cert.pem()).unwrap();
    }

    #[test]
    fn test_cert_store_paths() {
        let (_dir, store) = store();
        assert!(store.cert_path().ends_with("cert.pem"));
        assert!(store.key_path().ends_with("key.pem"));
    }

    #[test]
    fn test_load_rejects_expired_cert() {
        let (_dir, store) = store();
        let now = OffsetDateTime::now_utc();
        write_with_validity(&store, now - Duration::days(10), now - Duration::days(1));

        assert!(store.exists());
        assert!(matches!(store.load(), Err(CertError::Expired(_))));
    }

    #[test]
    fn test_load_rejects_not_yet_valid_cert() {
        let (_dir, store) = store();
        let now = OffsetDateTime::now_utc();
        write_with_validity(&store, now + Duration::days(1), now + Duration::days(10));

        assert!(store.exists());
        assert!(matches!(store.load(), Err(CertError::NotYetValid(_))));
    }

    #[test]
    fn test_exists_false_when_missing() {
        let (_dir, store) = store();
        assert!(!store.exists());
    }

    #[test]
    fn test_exists_false_with_only_key() {
        let (_dir, store) = store();
        fs::write(store.key_path(), b"key").unwrap();
        assert!(!store.exists());
    }

    #[test]
    fn test_exists_false_with_empty_cert() {
        let (_dir, store) = store();
        fs::write(store.key_path(), b"key").unwrap();
        fs::write(store.cert_path(), b"").unwrap();
        assert!(!store.exists());
    }

    #[test]
    fn test_generate_then_exists_and_load() {
        let (_dir, store) = store();
        let fp = store.generate().unwrap();
        assert!(store.exists());

        let identity = store.load().unwrap();
        assert_eq!(identity.fingerprint, fp);
        assert!(matches!(identity.key, PrivateKeyDer::Pkcs8(_)));
    }

    #[test]
    fn test_fingerprint_is_sha256_of_der_and_deterministic() {
        let (_dir, store) = store();
        store.generate().unwrap();

        let pem_text = fs::read(store.cert_path()).unwrap();
        let der = pem::parse(pem_text).unwrap().into_contents();
        let expected: [u8; 32] = Sha256::digest(&der).into();

        let first = store.fingerprint().unwrap();
        let second = store.fingerprint().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.as_bytes(), &expected);
    }

    #[test]
    fn test_generated_cert_attributes() {
        let (_dir, store) = store();
        store.generate().unwrap();
        let der = store.read_cert_der().unwrap();
        let (_, cert) = x509_parser::parse_x509_certificate(&der).unwrap();

        // Self-signed
        assert_eq!(cert.issuer(), cert.subject());

        let san = cert.subject_alternative_name().unwrap().unwrap();
        let names = &san.value.general_names;
        assert!(names.iter().any(|n| matches!(n, GeneralName::DNSName("localhost"))));
        assert!(names
            .iter()
            .any(|n| matches!(n, GeneralName::IPAddress(ip) if *ip == [127, 0, 0, 1])));
        assert!(names.iter().any(
            |n| matches!(n, GeneralName::IPAddress(ip) if *ip == Ipv6Addr::LOCALHOST.octets())
        ));

        let ku = cert.key_usage().unwrap().unwrap().value;
        assert!(ku.digital_signature());
        assert!(ku.key_encipherment());
        assert!(ku.key_cert_sign());

        let eku = cert.extended_key_usage().unwrap().unwrap().value;
        assert!(eku.server_auth);

        // Roughly two years of validity
        let v = cert.validity();
        let span = v.not_after.timestamp() - v.not_before.timestamp();
        assert_eq!(span, VALIDITY_DAYS * 24 * 3600);
    }

    #[test]
    fn test_serials_differ_between_generations() {
        let (_dir, store) = store();
        store.generate().unwrap();
        let first = store.read_cert_der().unwrap();
        store.generate().unwrap();
        let second = store.read_cert_der().unwrap();

        let (_, a) = x509_parser::parse_x509_certificate(&first).unwrap();
        let (_, b) = x509_parser::parse_x509_certificate(&second).unwrap();
        assert_ne!(a.raw_serial(), b.raw_serial());
    }

    #[test]
    fn test_load_rejects_garbage_cert() {
        let (_dir, store) = store();
        store.generate().unwrap();
        fs::write(store.cert_path(), b"not a pem file").unwrap();
        assert!(matches!(store.load(), Err(CertError::Decode { .. })));
    }

    #[test]
    fn test_load_rejects_wrong_block_type() {
        let (_dir, store) = store();
        store.generate().unwrap();
        let key_pem = fs::read(store.key_path()).unwrap();
        fs::write(store.cert_path(), key_pem).unwrap();
        assert!(matches!(store.fingerprint(), Err(CertError::Decode { .. })));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let (_dir, store) = store();
        store.generate().unwrap();
        store.clear().unwrap();
        assert!(!store.exists());
        assert!(store.clear().is_ok());
    }
}
