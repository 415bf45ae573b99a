//! Certificates, distinguished names and the stores that resolve them.
//!
//! Certificates bind a subject name to an Ed25519 verification key and an
//! X25519 encryption key, signed by the issuer's Ed25519 key over the
//! canonical JSON encoding of the certificate body. A certificate may carry
//! its private key material, which marks it as usable for signing and
//! decryption.

pub mod name;
pub mod pem;
pub mod resolver;
pub mod store;

pub use name::DistinguishedName;
pub use resolver::{
    CertificateResolver, MultiDomainTrustAnchorResolver, TrustAnchorResolver,
    UniformTrustAnchorResolver,
};
pub use store::{FileCertificateStore, InMemoryCertificateStore};

use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, Error, Result};

pub const KEY_SIZE: usize = 32;
pub const CERTIFICATE_VERSION: u8 = 1;
const DEFAULT_VALIDITY_DAYS: i64 = 365;

/// SHA-256 over the public encoding of a certificate.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Thumbprint([u8; 32]);

impl Thumbprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_hex(value: &str) -> Result<Self> {
        let bytes = hex::decode(value)
            .map_err(|e| Error::Certificate(format!("invalid thumbprint: {e}")))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Certificate("thumbprint must be 32 bytes".to_string()))?;
        Ok(Thumbprint(array))
    }
}

impl fmt::Display for Thumbprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Thumbprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thumbprint({})", &hex::encode(self.0)[..16])
    }
}

/// The signed portion of a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateBody {
    pub version: u8,
    pub serial_number: String,
    pub subject: DistinguishedName,
    pub issuer: DistinguishedName,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    #[serde(with = "hex_key")]
    pub signing_key: [u8; KEY_SIZE],
    #[serde(with = "hex_key")]
    pub encryption_key: [u8; KEY_SIZE],
    pub is_ca: bool,
}

impl CertificateBody {
    fn to_signed_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| Error::Certificate(format!("cannot encode certificate body: {e}")))
    }
}

/// Private key material paired with a certificate.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey {
    signing: [u8; KEY_SIZE],
    encryption: [u8; KEY_SIZE],
}

impl PrivateKey {
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        let encryption = StaticSecret::random_from_rng(OsRng);
        Self {
            signing: signing.to_bytes(),
            encryption: encryption.to_bytes(),
        }
    }

    pub fn from_bytes(signing: [u8; KEY_SIZE], encryption: [u8; KEY_SIZE]) -> Self {
        Self {
            signing,
            encryption,
        }
    }

    pub fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.signing)
    }

    pub fn encryption_secret(&self) -> StaticSecret {
        StaticSecret::from(self.encryption)
    }

    pub fn signing_public(&self) -> [u8; KEY_SIZE] {
        self.signing_key().verifying_key().to_bytes()
    }

    pub fn encryption_public(&self) -> [u8; KEY_SIZE] {
        X25519PublicKey::from(&self.encryption_secret()).to_bytes()
    }

    pub(crate) fn signing_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.signing
    }

    pub(crate) fn encryption_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.encryption
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey([REDACTED])")
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Certificate {
    body: CertificateBody,
    #[serde(with = "hex::serde")]
    signature: Vec<u8>,
    #[serde(skip)]
    private_key: Option<Arc<PrivateKey>>,
}

impl Certificate {
    pub fn body(&self) -> &CertificateBody {
        &self.body
    }

    pub fn subject(&self) -> &DistinguishedName {
        &self.body.subject
    }

    pub fn issuer(&self) -> &DistinguishedName {
        &self.body.issuer
    }

    pub fn serial_number(&self) -> &str {
        &self.body.serial_number
    }

    pub fn is_ca(&self) -> bool {
        self.body.is_ca
    }

    pub fn is_self_signed(&self) -> bool {
        self.body.issuer == self.body.subject
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn has_private_key(&self) -> bool {
        self.private_key.is_some()
    }

    pub fn private_key(&self) -> Option<&PrivateKey> {
        self.private_key.as_deref()
    }

    /// Attaches private key material after checking it matches the public keys.
    pub fn with_private_key(mut self, key: PrivateKey) -> Result<Self> {
        if key.signing_public() != self.body.signing_key
            || key.encryption_public() != self.body.encryption_key
        {
            return Err(Error::Certificate(format!(
                "private key does not match certificate {}",
                self.body.subject
            )));
        }
        self.private_key = Some(Arc::new(key));
        Ok(self)
    }

    /// The certificate without private key material.
    pub fn public(&self) -> Certificate {
        Certificate {
            body: self.body.clone(),
            signature: self.signature.clone(),
            private_key: None,
        }
    }

    pub fn thumbprint(&self) -> Thumbprint {
        let mut hasher = Sha256::new();
        // the body encoding cannot fail for well-formed values; fall back to
        // hashing the serial so a thumbprint is always defined
        match self.body.to_signed_bytes() {
            Ok(bytes) => hasher.update(bytes),
            Err(_) => hasher.update(self.body.serial_number.as_bytes()),
        }
        hasher.update(&self.signature);
        Thumbprint(hasher.finalize().into())
    }

    pub fn verifying_key(&self) -> std::result::Result<VerifyingKey, CryptoError> {
        VerifyingKey::from_bytes(&self.body.signing_key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }

    pub fn encryption_key(&self) -> X25519PublicKey {
        X25519PublicKey::from(self.body.encryption_key)
    }

    /// Checks this certificate's signature with `issuer`'s public key.
    pub fn verify_issued_by(&self, issuer: &Certificate) -> Result<()> {
        let key = issuer.verifying_key()?;
        let signature = Signature::from_slice(&self.signature)
            .map_err(|_| CryptoError::SignatureVerification)?;
        let bytes = self.body.to_signed_bytes()?;
        key.verify(&bytes, &signature)
            .map_err(|_| Error::Crypto(CryptoError::SignatureVerification))
    }

    pub fn is_valid_at(&self, when: DateTime<Utc>) -> bool {
        self.body.not_before <= when && when <= self.body.not_after
    }

    /// True when the subject names this address or its domain.
    pub fn matches_address(&self, address: &str) -> bool {
        let domain = address.rsplit_once('@').map(|(_, d)| d);
        [self.body.subject.email(), self.body.subject.common_name()]
            .into_iter()
            .flatten()
            .any(|name| {
                name.eq_ignore_ascii_case(address)
                    || domain.is_some_and(|d| name.eq_ignore_ascii_case(d))
            })
    }

    /// True when the subject names exactly this address (not just its domain).
    pub fn is_address_certificate(&self, address: &str) -> bool {
        [self.body.subject.email(), self.body.subject.common_name()]
            .into_iter()
            .flatten()
            .any(|name| name.eq_ignore_ascii_case(address))
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.body == other.body && self.signature == other.signature
    }
}

impl Eq for Certificate {}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.body.subject.to_string())
            .field("issuer", &self.body.issuer.to_string())
            .field("serial", &self.body.serial_number)
            .field("private", &self.has_private_key())
            .finish()
    }
}

impl fmt::Display for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (issuer: {})", self.body.subject, self.body.issuer)
    }
}

/// Issues certificates.
#[derive(Debug, Clone)]
pub struct CertificateBuilder {
    subject: DistinguishedName,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    is_ca: bool,
    serial_number: Option<String>,
}

impl CertificateBuilder {
    pub fn new(subject: DistinguishedName) -> Self {
        let now = Utc::now();
        Self {
            subject,
            not_before: now - Duration::minutes(5),
            not_after: now + Duration::days(DEFAULT_VALIDITY_DAYS),
            is_ca: false,
            serial_number: None,
        }
    }

    pub fn ca(mut self, is_ca: bool) -> Self {
        self.is_ca = is_ca;
        self
    }

    pub fn validity(mut self, not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> Self {
        self.not_before = not_before;
        self.not_after = not_after;
        self
    }

    pub fn valid_for_days(mut self, days: i64) -> Self {
        self.not_after = self.not_before + Duration::days(days);
        self
    }

    pub fn serial_number(mut self, serial: impl Into<String>) -> Self {
        self.serial_number = Some(serial.into());
        self
    }

    /// Self-signed certificate carrying its private key.
    pub fn self_signed(self) -> Result<Certificate> {
        let key = PrivateKey::generate();
        let issuer = self.subject.clone();
        let certificate = self.sign_body(issuer, &key, &key)?;
        certificate.with_private_key(key)
    }

    /// Certificate signed by `issuer`, which must carry its private key.
    pub fn issued_by(self, issuer: &Certificate) -> Result<Certificate> {
        let signer = issuer
            .private_key()
            .ok_or(CryptoError::MissingPrivateKey)?
            .clone();
        self.issue(issuer.subject().clone(), &signer)
    }

    /// Certificate naming `issuer_name` and signed with `signer`.
    pub fn issue(self, issuer_name: DistinguishedName, signer: &PrivateKey) -> Result<Certificate> {
        let key = PrivateKey::generate();
        let certificate = self.sign_body(issuer_name, &key, signer)?;
        certificate.with_private_key(key)
    }

    fn sign_body(
        self,
        issuer: DistinguishedName,
        subject_key: &PrivateKey,
        signer: &PrivateKey,
    ) -> Result<Certificate> {
        let serial_number = self.serial_number.unwrap_or_else(|| {
            let serial: [u8; 16] = rand::random();
            hex::encode(serial)
        });
        let body = CertificateBody {
            version: CERTIFICATE_VERSION,
            serial_number,
            subject: self.subject,
            issuer,
            not_before: self.not_before,
            not_after: self.not_after,
            signing_key: subject_key.signing_public(),
            encryption_key: subject_key.encryption_public(),
            is_ca: self.is_ca,
        };
        let signature = signer.signing_key().sign(&body.to_signed_bytes()?);
        Ok(Certificate {
            body,
            signature: signature.to_bytes().to_vec(),
            private_key: None,
        })
    }
}

/// Unique certificates by thumbprint, keeping first-seen order.
pub fn dedup_certificates(certificates: impl IntoIterator<Item = Certificate>) -> Vec<Certificate> {
    let mut seen = std::collections::HashSet::new();
    certificates
        .into_iter()
        .filter(|c| seen.insert(c.thumbprint()))
        .collect()
}

mod hex_key {
    use super::KEY_SIZE;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        key: &[u8; KEY_SIZE],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(key))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<[u8; KEY_SIZE], D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("key must be 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> Certificate {
        CertificateBuilder::new(DistinguishedName::new().with_common_name("Root CA"))
            .ca(true)
            .self_signed()
            .unwrap()
    }

    #[test]
    fn test_self_signed() {
        let root = root();
        assert!(root.is_self_signed());
        assert!(root.has_private_key());
        assert!(root.verify_issued_by(&root).is_ok());
    }

    #[test]
    fn test_issued_certificate_verifies_against_issuer_only() {
        let root = self::root();
        let other = self::root();
        let leaf = CertificateBuilder::new(DistinguishedName::for_address("b@y.com"))
            .issued_by(&root)
            .unwrap();
        assert_eq!(leaf.issuer(), root.subject());
        assert!(!leaf.is_self_signed());
        assert!(leaf.verify_issued_by(&root).is_ok());
        assert!(leaf.verify_issued_by(&other).is_err());
    }

    #[test]
    fn test_issuer_without_private_key() {
        let root = root().public();
        let result = CertificateBuilder::new(DistinguishedName::for_address("b@y.com"))
            .issued_by(&root);
        assert!(matches!(
            result,
            Err(Error::Crypto(CryptoError::MissingPrivateKey))
        ));
    }

    #[test]
    fn test_thumbprint_ignores_private_key() {
        let root = root();
        assert_eq!(root.thumbprint(), root.public().thumbprint());
        assert_ne!(root.thumbprint(), self::root().thumbprint());
        assert_eq!(
            Thumbprint::from_hex(&root.thumbprint().to_string()).unwrap(),
            root.thumbprint()
        );
    }

    #[test]
    fn test_tampered_body_fails_verification() {
        let root = root();
        let mut leaf = CertificateBuilder::new(DistinguishedName::for_address("b@y.com"))
            .issued_by(&root)
            .unwrap();
        leaf.body.subject = DistinguishedName::for_address("mallory@y.com");
        assert!(leaf.verify_issued_by(&root).is_err());
    }

    #[test]
    fn test_validity_window() {
        let now = Utc::now();
        let cert = CertificateBuilder::new(DistinguishedName::for_address("a@x.com"))
            .validity(now - Duration::days(10), now - Duration::days(1))
            .self_signed()
            .unwrap();
        assert!(!cert.is_valid_at(now));
        assert!(cert.is_valid_at(now - Duration::days(5)));
    }

    #[test]
    fn test_address_matching() {
        let address_cert = CertificateBuilder::new(DistinguishedName::for_address("a@x.com"))
            .self_signed()
            .unwrap();
        let org_cert = CertificateBuilder::new(DistinguishedName::new().with_common_name("x.com"))
            .self_signed()
            .unwrap();
        assert!(address_cert.matches_address("A@X.com"));
        assert!(!address_cert.matches_address("b@x.com"));
        assert!(org_cert.matches_address("b@x.com"));
        assert!(!org_cert.is_address_certificate("b@x.com"));
    }

    #[test]
    fn test_mismatched_private_key_rejected() {
        let cert = root().public();
        assert!(cert.with_private_key(PrivateKey::generate()).is_err());
    }

    #[test]
    fn test_json_roundtrip_drops_private_key() {
        let cert = root();
        let json = serde_json::to_string(&cert).unwrap();
        let decoded: Certificate = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, cert);
        assert!(!decoded.has_private_key());
    }

    #[test]
    fn test_dedup_certificates() {
        let a = root();
        let b = root();
        let deduped = dedup_certificates(vec![a.clone(), b.clone(), a.public()]);
        assert_eq!(deduped, vec![a, b]);
    }
}
