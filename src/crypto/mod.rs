//! Signing, encryption and signature parsing over MIME entities.

pub mod smime;

pub use smime::SmimeCryptographer;

use ed25519_dalek::{Signature, Verifier};
use sha2::{Digest, Sha256};

use crate::address::DirectAddress;
use crate::cert::Certificate;
use crate::error::{Error, MimeError, Result};
use crate::mail::MimeEntity;

pub const MULTIPART_SIGNED: &str = "multipart/signed";
pub const PKCS7_SIGNATURE: &str = "application/pkcs7-signature";
pub const PKCS7_MIME: &str = "application/pkcs7-mime";
pub const SMIME_TYPE: &str = "smime-type";
pub const SIGNED_DATA: &str = "signed-data";
pub const ENVELOPED_DATA: &str = "enveloped-data";
pub const MICALG_SHA256: &str = "sha-256";

const LEGACY_PKCS7_SIGNATURE: &str = "application/x-pkcs7-signature";
const LEGACY_PKCS7_MIME: &str = "application/x-pkcs7-mime";

/// Cryptographic operations the agent performs on messages.
pub trait Cryptographer: Send + Sync {
    /// Detached signature over the exact bytes of `content`.
    fn sign(&self, content: &MimeEntity, signers: &[Certificate]) -> Result<SignedEntity>;

    /// Encrypts `content` so that any of `recipients` can decrypt it.
    fn encrypt(&self, content: &MimeEntity, recipients: &[Certificate]) -> Result<MimeEntity>;

    /// Decrypts with one private certificate.
    fn decrypt(&self, encrypted: &MimeEntity, certificate: &Certificate) -> Result<MimeEntity>;

    /// Reads an opaque `signed-data` entity.
    fn deserialize_enveloped_signature(&self, entity: &MimeEntity) -> Result<SignedData>;

    /// Reads the signature part of a `multipart/signed` entity.
    fn deserialize_signature_envelope(&self, signed: &SignedEntity) -> Result<SignedData>;
}

fn mimetype_in(entity: &MimeEntity, accepted: &[&str]) -> bool {
    let content_type = entity.content_type();
    accepted
        .iter()
        .any(|m| content_type.mimetype.eq_ignore_ascii_case(m))
}

fn smime_type(entity: &MimeEntity) -> Option<String> {
    entity
        .content_type()
        .params
        .get(SMIME_TYPE)
        .map(|v| v.to_ascii_lowercase())
}

pub fn is_multipart_signature(entity: &MimeEntity) -> bool {
    mimetype_in(entity, &[MULTIPART_SIGNED])
}

pub fn is_enveloped_signature(entity: &MimeEntity) -> bool {
    mimetype_in(entity, &[PKCS7_MIME, LEGACY_PKCS7_MIME])
        && smime_type(entity).as_deref() == Some(SIGNED_DATA)
}

/// `application/pkcs7-mime` without an `smime-type` is taken as encrypted.
pub fn is_encrypted(entity: &MimeEntity) -> bool {
    mimetype_in(entity, &[PKCS7_MIME, LEGACY_PKCS7_MIME])
        && matches!(smime_type(entity).as_deref(), None | Some(ENVELOPED_DATA))
}

pub fn is_signature_part(entity: &MimeEntity) -> bool {
    mimetype_in(entity, &[PKCS7_SIGNATURE, LEGACY_PKCS7_SIGNATURE])
}

pub fn content_digest(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// A `multipart/signed` message: the content part, kept byte-exact, and the
/// detached signature part.
#[derive(Debug, Clone)]
pub struct SignedEntity {
    content: MimeEntity,
    content_bytes: Vec<u8>,
    signature: MimeEntity,
}

impl SignedEntity {
    pub fn new(content: MimeEntity, signature: MimeEntity) -> Self {
        let content_bytes = content.to_bytes();
        Self {
            content,
            content_bytes,
            signature,
        }
    }

    /// Splits a `multipart/signed` entity into its two parts.
    pub fn load(entity: &MimeEntity) -> Result<Self> {
        if !is_multipart_signature(entity) {
            return Err(Error::mime(MimeError::ContentTypeMismatch));
        }
        let mut parts = entity.raw_parts()?;
        if parts.len() != 2 {
            return Err(Error::mime(MimeError::InvalidBody));
        }
        let signature_bytes = parts.pop().unwrap_or_default();
        let content_bytes = parts.pop().unwrap_or_default();
        let content = MimeEntity::parse_canonical(&content_bytes)?;
        let signature = MimeEntity::parse_canonical(&signature_bytes)?;
        if !is_signature_part(&signature) {
            return Err(Error::mime(MimeError::ContentTypeMismatch));
        }
        Ok(Self {
            content,
            content_bytes,
            signature,
        })
    }

    pub fn content(&self) -> &MimeEntity {
        &self.content
    }

    /// The signed bytes exactly as they appear on the wire.
    pub fn content_bytes(&self) -> &[u8] {
        &self.content_bytes
    }

    pub fn signature(&self) -> &MimeEntity {
        &self.signature
    }

    pub fn to_entity(&self) -> MimeEntity {
        let content_type = format!(
            "{MULTIPART_SIGNED}; protocol=\"{PKCS7_SIGNATURE}\"; micalg={MICALG_SHA256}"
        );
        MimeEntity::multipart(
            &content_type,
            &[self.content_bytes.clone(), self.signature.to_bytes()],
        )
    }
}

/// One signer's signature over a message digest.
#[derive(Debug, Clone)]
pub struct MessageSignature {
    certificate: Certificate,
    signature: Vec<u8>,
    digest: [u8; 32],
}

impl MessageSignature {
    pub fn new(certificate: Certificate, signature: Vec<u8>, digest: [u8; 32]) -> Self {
        Self {
            certificate,
            signature,
            digest,
        }
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// True when the signature verifies under the signer certificate's key.
    pub fn check_signature(&self) -> bool {
        let Ok(key) = self.certificate.verifying_key() else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&self.signature) else {
            return false;
        };
        key.verify(&self.digest, &signature).is_ok()
    }

    /// True when the signer certificate is one of those bound to `sender`.
    pub fn check_thumbprint(&self, sender: &DirectAddress) -> bool {
        let thumbprint = self.certificate.thumbprint();
        sender
            .certificates()
            .iter()
            .any(|c| c.thumbprint() == thumbprint)
    }

    pub fn is_from(&self, sender: &DirectAddress) -> bool {
        self.certificate.matches_address(sender.address())
    }
}

/// Parsed signature information together with the signed content.
#[derive(Debug, Clone)]
pub struct SignedData {
    content: MimeEntity,
    signatures: Vec<MessageSignature>,
}

impl SignedData {
    pub fn new(content: MimeEntity, signatures: Vec<MessageSignature>) -> Self {
        Self {
            content,
            signatures,
        }
    }

    pub fn content(&self) -> &MimeEntity {
        &self.content
    }

    pub fn into_content(self) -> MimeEntity {
        self.content
    }

    pub fn signatures(&self) -> &[MessageSignature] {
        &self.signatures
    }

    pub fn signer_certificates(&self) -> Vec<Certificate> {
        self.signatures
            .iter()
            .map(|s| s.certificate.clone())
            .collect()
    }
}

/// Content-Type header value for an `application/pkcs7-mime` entity.
pub(crate) fn pkcs7_mime_type(smime_type: &str) -> String {
    format!("{PKCS7_MIME}; {SMIME_TYPE}={smime_type}; name=\"smime.p7m\"")
}
