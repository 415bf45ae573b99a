//! S/MIME media types around an Ed25519 / X25519 payload.
//!
//! Signatures are Ed25519 over the SHA-256 digest of the signed bytes and
//! carry the signer certificates. Encryption uses a random content key with
//! XChaCha20-Poly1305; the key is wrapped for every recipient using an
//! ephemeral X25519 agreement.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};
use ed25519_dalek::Signer;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};
use zeroize::Zeroizing;

use crate::cert::{Certificate, Thumbprint, KEY_SIZE};
use crate::crypto::{
    content_digest, is_encrypted, is_enveloped_signature, is_signature_part, pkcs7_mime_type,
    Cryptographer, MessageSignature, SignedData, SignedEntity, ENVELOPED_DATA, MICALG_SHA256,
    PKCS7_SIGNATURE, SIGNED_DATA,
};
use crate::error::{CryptoError, Error, MimeError, Result};
use crate::mail::entity::{decode_base64_body, encode_base64_lines};
use crate::mail::{
    Headers, MimeEntity, CONTENT_DISPOSITION, CONTENT_TRANSFER_ENCODING, CONTENT_TYPE,
};

const PAYLOAD_VERSION: u8 = 1;
const NONCE_SIZE: usize = 24;
const CONTENT_ALGORITHM: &str = "xchacha20-poly1305";
const KEY_WRAP_LABEL: &[u8] = b"direct-agent key wrap v1";

#[derive(Serialize, Deserialize)]
struct SignerInfo {
    certificate: Certificate,
    digest_algorithm: String,
    #[serde(with = "hex::serde")]
    signature: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct SignaturePayload {
    version: u8,
    signers: Vec<SignerInfo>,
}

#[derive(Serialize, Deserialize)]
struct EnvelopedSignaturePayload {
    content: String,
    signature: SignaturePayload,
}

#[derive(Serialize, Deserialize)]
struct RecipientInfo {
    thumbprint: String,
    #[serde(with = "hex::serde")]
    ephemeral_key: Vec<u8>,
    #[serde(with = "hex::serde")]
    nonce: Vec<u8>,
    #[serde(with = "hex::serde")]
    wrapped_key: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct EnvelopedPayload {
    version: u8,
    content_algorithm: String,
    recipients: Vec<RecipientInfo>,
    #[serde(with = "hex::serde")]
    nonce: Vec<u8>,
    ciphertext: String,
}

/// The stock [`Cryptographer`].
#[derive(Debug, Clone, Default)]
pub struct SmimeCryptographer;

impl SmimeCryptographer {
    pub fn new() -> Self {
        Self
    }

    /// Opaque signature: content and signatures travel in one
    /// `application/pkcs7-mime; smime-type=signed-data` entity.
    pub fn sign_enveloped(
        &self,
        content: &MimeEntity,
        signers: &[Certificate],
    ) -> Result<MimeEntity> {
        let content_bytes = content.to_bytes();
        let payload = EnvelopedSignaturePayload {
            content: STANDARD.encode(&content_bytes),
            signature: sign_bytes(&content_bytes, signers)?,
        };
        Ok(pkcs7_entity(&pkcs7_mime_type(SIGNED_DATA), &to_json(&payload)?))
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| CryptoError::Encoding(e.to_string()).into())
}

fn from_json<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| CryptoError::Encoding(e.to_string()).into())
}

fn pkcs7_entity(content_type: &str, payload: &[u8]) -> MimeEntity {
    let mut headers = Headers::new();
    headers.set(CONTENT_TYPE, content_type);
    headers.set(CONTENT_TRANSFER_ENCODING, "base64");
    headers.set(CONTENT_DISPOSITION, "attachment; filename=\"smime.p7m\"");
    MimeEntity::new(headers, encode_base64_lines(payload))
}

fn sign_bytes(content: &[u8], signers: &[Certificate]) -> Result<SignaturePayload> {
    if signers.is_empty() {
        return Err(CryptoError::NoCertificates.into());
    }
    let digest = content_digest(content);
    let mut infos = Vec::with_capacity(signers.len());
    for signer in signers {
        let key = signer.private_key().ok_or(CryptoError::MissingPrivateKey)?;
        let signature = key.signing_key().sign(&digest);
        infos.push(SignerInfo {
            certificate: signer.public(),
            digest_algorithm: MICALG_SHA256.to_string(),
            signature: signature.to_bytes().to_vec(),
        });
    }
    Ok(SignaturePayload {
        version: PAYLOAD_VERSION,
        signers: infos,
    })
}

fn message_signatures(content: &[u8], payload: SignaturePayload) -> Vec<MessageSignature> {
    let digest = content_digest(content);
    payload
        .signers
        .into_iter()
        .filter(|info| {
            let supported = info.digest_algorithm.eq_ignore_ascii_case(MICALG_SHA256);
            if !supported {
                log::debug!(
                    "Ignoring signer {} with digest algorithm {}",
                    info.certificate.subject(),
                    info.digest_algorithm
                );
            }
            supported
        })
        .map(|info| MessageSignature::new(info.certificate, info.signature, digest))
        .collect()
}

fn key_encryption_key(
    shared: &[u8],
    ephemeral: &X25519PublicKey,
    recipient: &X25519PublicKey,
) -> Zeroizing<[u8; KEY_SIZE]> {
    let mut hasher = Sha256::new();
    hasher.update(KEY_WRAP_LABEL);
    hasher.update(shared);
    hasher.update(ephemeral.as_bytes());
    hasher.update(recipient.as_bytes());
    Zeroizing::new(hasher.finalize().into())
}

fn random_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

fn wrap_key(content_key: &[u8; KEY_SIZE], recipient: &Certificate) -> Result<RecipientInfo> {
    let recipient_key = recipient.encryption_key();
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = X25519PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&recipient_key);
    let kek = key_encryption_key(shared.as_bytes(), &ephemeral_public, &recipient_key);

    let nonce = random_nonce();
    let wrapped_key = XChaCha20Poly1305::new(Key::from_slice(&kek[..]))
        .encrypt(XNonce::from_slice(&nonce), &content_key[..])
        .map_err(|_| CryptoError::Encryption("key wrap failed".to_string()))?;

    Ok(RecipientInfo {
        thumbprint: recipient.thumbprint().to_string(),
        ephemeral_key: ephemeral_public.as_bytes().to_vec(),
        nonce: nonce.to_vec(),
        wrapped_key,
    })
}

fn unwrap_key(
    info: &RecipientInfo,
    certificate: &Certificate,
) -> Option<Zeroizing<[u8; KEY_SIZE]>> {
    let private = certificate.private_key()?;
    let ephemeral_bytes: [u8; KEY_SIZE] = info.ephemeral_key.as_slice().try_into().ok()?;
    if info.nonce.len() != NONCE_SIZE {
        return None;
    }
    let ephemeral = X25519PublicKey::from(ephemeral_bytes);
    let shared = private.encryption_secret().diffie_hellman(&ephemeral);
    let kek = key_encryption_key(shared.as_bytes(), &ephemeral, &certificate.encryption_key());

    let key = Zeroizing::new(
        XChaCha20Poly1305::new(Key::from_slice(&kek[..]))
            .decrypt(XNonce::from_slice(&info.nonce), info.wrapped_key.as_slice())
            .ok()?,
    );
    let array: [u8; KEY_SIZE] = key.as_slice().try_into().ok()?;
    Some(Zeroizing::new(array))
}

impl Cryptographer for SmimeCryptographer {
    fn sign(&self, content: &MimeEntity, signers: &[Certificate]) -> Result<SignedEntity> {
        let content_bytes = content.to_bytes();
        let payload = sign_bytes(&content_bytes, signers)?;

        let mut headers = Headers::new();
        headers.set(CONTENT_TYPE, format!("{PKCS7_SIGNATURE}; name=\"smime.p7s\""));
        headers.set(CONTENT_TRANSFER_ENCODING, "base64");
        headers.set(CONTENT_DISPOSITION, "attachment; filename=\"smime.p7s\"");
        let signature = MimeEntity::new(headers, encode_base64_lines(&to_json(&payload)?));

        Ok(SignedEntity::new(content.clone(), signature))
    }

    fn encrypt(&self, content: &MimeEntity, recipients: &[Certificate]) -> Result<MimeEntity> {
        if recipients.is_empty() {
            return Err(CryptoError::NoCertificates.into());
        }
        let mut content_key = Zeroizing::new([0u8; KEY_SIZE]);
        OsRng.fill_bytes(&mut content_key[..]);

        let nonce = random_nonce();
        let ciphertext = XChaCha20Poly1305::new(Key::from_slice(&content_key[..]))
            .encrypt(XNonce::from_slice(&nonce), content.to_bytes().as_slice())
            .map_err(|_| CryptoError::Encryption("content encryption failed".to_string()))?;

        let recipients = recipients
            .iter()
            .map(|r| wrap_key(&content_key, r))
            .collect::<Result<Vec<_>>>()?;

        let payload = EnvelopedPayload {
            version: PAYLOAD_VERSION,
            content_algorithm: CONTENT_ALGORITHM.to_string(),
            recipients,
            nonce: nonce.to_vec(),
            ciphertext: STANDARD.encode(ciphertext),
        };
        Ok(pkcs7_entity(&pkcs7_mime_type(ENVELOPED_DATA), &to_json(&payload)?))
    }

    fn decrypt(&self, encrypted: &MimeEntity, certificate: &Certificate) -> Result<MimeEntity> {
        if !certificate.has_private_key() {
            return Err(CryptoError::MissingPrivateKey.into());
        }
        if !is_encrypted(encrypted) {
            return Err(Error::mime(MimeError::ContentTypeMismatch));
        }
        let payload: EnvelopedPayload = from_json(&decode_base64_body(encrypted.body())?)?;
        if payload.content_algorithm != CONTENT_ALGORITHM || payload.nonce.len() != NONCE_SIZE {
            return Err(CryptoError::Decryption.into());
        }

        let thumbprint = certificate.thumbprint();
        let content_key = payload
            .recipients
            .iter()
            .filter(|info| {
                Thumbprint::from_hex(&info.thumbprint).is_ok_and(|t| t == thumbprint)
            })
            .find_map(|info| unwrap_key(info, certificate))
            .ok_or(CryptoError::Decryption)?;

        let ciphertext = STANDARD
            .decode(payload.ciphertext.as_bytes())
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        let plaintext = XChaCha20Poly1305::new(Key::from_slice(&content_key[..]))
            .decrypt(XNonce::from_slice(&payload.nonce), ciphertext.as_slice())
            .map_err(|_| CryptoError::Decryption)?;

        MimeEntity::parse_canonical(&plaintext)
    }

    fn deserialize_enveloped_signature(&self, entity: &MimeEntity) -> Result<SignedData> {
        if !is_enveloped_signature(entity) {
            return Err(Error::mime(MimeError::ContentTypeMismatch));
        }
        let payload: EnvelopedSignaturePayload = from_json(&decode_base64_body(entity.body())?)?;
        let content_bytes = STANDARD
            .decode(payload.content.as_bytes())
            .map_err(|e| Error::mime_with(MimeError::InvalidBody, e))?;
        let content = MimeEntity::parse_canonical(&content_bytes)?;
        let signatures = message_signatures(&content_bytes, payload.signature);
        Ok(SignedData::new(content, signatures))
    }

    fn deserialize_signature_envelope(&self, signed: &SignedEntity) -> Result<SignedData> {
        if !is_signature_part(signed.signature()) {
            return Err(Error::mime(MimeError::ContentTypeMismatch));
        }
        let payload: SignaturePayload = from_json(&decode_base64_body(signed.signature().body())?)?;
        let signatures = message_signatures(signed.content_bytes(), payload);
        Ok(SignedData::new(signed.content().clone(), signatures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::{CertificateBuilder, DistinguishedName};

    fn cert(address: &str) -> Certificate {
        CertificateBuilder::new(DistinguishedName::for_address(address))
            .self_signed()
            .unwrap()
    }

    fn content() -> MimeEntity {
        "Content-Type: text/plain\r\n\r\nBlood pressure 120/80\r\n"
            .parse()
            .unwrap()
    }

    #[test]
    fn test_encrypt_decrypt() {
        let crypto = SmimeCryptographer::new();
        let bob = cert("b@y.com");
        let carol = cert("c@y.com");
        let encrypted = crypto
            .encrypt(&content(), &[bob.public(), carol.public()])
            .unwrap();
        assert!(is_encrypted(&encrypted));
        assert!(!encrypted.body_text().contains("Blood pressure"));

        assert_eq!(crypto.decrypt(&encrypted, &bob).unwrap(), content());
        assert_eq!(crypto.decrypt(&encrypted, &carol).unwrap(), content());
    }

    #[test]
    fn test_decrypt_with_wrong_certificate() {
        let crypto = SmimeCryptographer::new();
        let encrypted = crypto.encrypt(&content(), &[cert("b@y.com").public()]).unwrap();
        let mallory = cert("m@y.com");
        assert!(matches!(
            crypto.decrypt(&encrypted, &mallory),
            Err(Error::Crypto(CryptoError::Decryption))
        ));
        assert!(matches!(
            crypto.decrypt(&encrypted, &mallory.public()),
            Err(Error::Crypto(CryptoError::MissingPrivateKey))
        ));
    }

    #[test]
    fn test_encrypt_requires_recipients() {
        let crypto = SmimeCryptographer::new();
        assert!(matches!(
            crypto.encrypt(&content(), &[]),
            Err(Error::Crypto(CryptoError::NoCertificates))
        ));
    }

    #[test]
    fn test_detached_signature_roundtrip() {
        let crypto = SmimeCryptographer::new();
        let alice = cert("a@x.com");
        let signed = crypto.sign(&content(), &[alice.clone()]).unwrap();

        let loaded = SignedEntity::load(&signed.to_entity()).unwrap();
        let data = crypto.deserialize_signature_envelope(&loaded).unwrap();
        assert_eq!(data.content(), &content());
        assert_eq!(data.signatures().len(), 1);
        assert!(data.signatures()[0].check_signature());
        assert_eq!(data.signatures()[0].certificate(), &alice);
    }

    #[test]
    fn test_tampered_content_fails_verification() {
        let crypto = SmimeCryptographer::new();
        let signed = crypto.sign(&content(), &[cert("a@x.com")]).unwrap();
        let tampered_content: MimeEntity =
            "Content-Type: text/plain\r\n\r\nBlood pressure 180/80\r\n"
                .parse()
                .unwrap();
        let tampered = SignedEntity::new(tampered_content, signed.signature().clone());
        let data = crypto.deserialize_signature_envelope(&tampered).unwrap();
        assert!(!data.signatures()[0].check_signature());
    }

    #[test]
    fn test_sign_requires_private_key() {
        let crypto = SmimeCryptographer::new();
        assert!(matches!(
            crypto.sign(&content(), &[cert("a@x.com").public()]),
            Err(Error::Crypto(CryptoError::MissingPrivateKey))
        ));
    }

    #[test]
    fn test_enveloped_signature_roundtrip() {
        let crypto = SmimeCryptographer::new();
        let alice = cert("a@x.com");
        let entity = crypto.sign_enveloped(&content(), &[alice]).unwrap();
        assert!(is_enveloped_signature(&entity));
        let data = crypto.deserialize_enveloped_signature(&entity).unwrap();
        assert_eq!(data.content(), &content());
        assert!(data.signatures()[0].check_signature());
    }
}
