//! ECDSA public keys.
//!
//! The public key used to verify the TESLA chain root key can be an ECDSA
//! P-256 or P-521 key. It is provisioned as a compressed SEC1 point (the
//! format used in DSM-PKR messages), as a DER SubjectPublicKeyInfo blob or as
//! a PEM file.

use crate::crypto::{self, EcdsaFunction};
use crate::error::{Error, Result};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use spki::der::pem::LineEnding;
use spki::{DecodePublicKey, EncodePublicKey};

/// Size of a compressed P-256 point in bytes.
pub const P256_COMPRESSED_BYTES: usize = 33;
/// Size of a compressed P-521 point in bytes.
pub const P521_COMPRESSED_BYTES: usize = 67;

/// ECDSA public key.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PublicKey {
    /// ECDSA P-256 public key.
    P256(p256::PublicKey),
    /// ECDSA P-521 public key.
    P521(p521::PublicKey),
}

/// Decodes a public key.
///
/// The input can be a compressed SEC1 point (33 bytes for P-256, 67 bytes for
/// P-521, starting with 0x02 or 0x03) or a DER encoded SubjectPublicKeyInfo.
/// Any other input gives [`Error::UnsupportedKeyFormat`].
pub fn decode_public_key(bytes: &[u8]) -> Result<PublicKey> {
    match (bytes.first(), bytes.len()) {
        (Some(0x02 | 0x03), P256_COMPRESSED_BYTES) => p256::PublicKey::from_sec1_bytes(bytes)
            .map(PublicKey::P256)
            .map_err(|_| Error::UnsupportedKeyFormat),
        (Some(0x02 | 0x03), P521_COMPRESSED_BYTES) => p521::PublicKey::from_sec1_bytes(bytes)
            .map(PublicKey::P521)
            .map_err(|_| Error::UnsupportedKeyFormat),
        (Some(0x30), _) => {
            if let Ok(key) = p256::PublicKey::from_public_key_der(bytes) {
                Ok(PublicKey::P256(key))
            } else if let Ok(key) = p521::PublicKey::from_public_key_der(bytes) {
                Ok(PublicKey::P521(key))
            } else {
                log::debug!("DER blob is not a P-256 or P-521 public key");
                Err(Error::UnsupportedKeyFormat)
            }
        }
        _ => Err(Error::UnsupportedKeyFormat),
    }
}

impl PublicKey {
    /// Decodes a public key from a PEM "PUBLIC KEY" document.
    pub fn decode_pem(pem: &str) -> Result<PublicKey> {
        match p256::PublicKey::from_public_key_pem(pem) {
            Ok(key) => Ok(PublicKey::P256(key)),
            Err(_) => p521::PublicKey::from_public_key_pem(pem)
                .map(PublicKey::P521)
                .map_err(|e| Error::Decode(e.to_string())),
        }
    }

    /// Encodes the public key as a PEM "PUBLIC KEY" document.
    ///
    /// The output uses LF line endings. Encoding the same key always gives
    /// the same string.
    pub fn encode_pem(&self) -> Result<String> {
        let pem = match self {
            PublicKey::P256(key) => key.to_public_key_pem(LineEnding::LF),
            PublicKey::P521(key) => key.to_public_key_pem(LineEnding::LF),
        };
        pem.map_err(|e| Error::Encode(e.to_string()))
    }

    /// Returns the key as a compressed SEC1 point.
    pub fn to_compressed(&self) -> Vec<u8> {
        match self {
            PublicKey::P256(key) => key.to_encoded_point(true).as_bytes().to_vec(),
            PublicKey::P521(key) => key.to_encoded_point(true).as_bytes().to_vec(),
        }
    }

    /// Returns a human readable name of the key type.
    pub fn key_type(&self) -> &'static str {
        match self {
            PublicKey::P256(_) => "ECDSA P-256",
            PublicKey::P521(_) => "ECDSA P-521",
        }
    }

    /// Returns the ECDSA function used with this key.
    pub fn ecdsa_function(&self) -> EcdsaFunction {
        match self {
            PublicKey::P256(_) => EcdsaFunction::P256Sha256,
            PublicKey::P521(_) => EcdsaFunction::P521Sha512,
        }
    }

    /// Verifies an ECDSA signature over `message` with this key.
    ///
    /// See [`crypto::verify_ecdsa_p256`] and [`crypto::verify_ecdsa_p521`].
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<bool> {
        match self {
            PublicKey::P256(key) => {
                let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(
                    key.to_encoded_point(false).as_bytes(),
                )
                .map_err(|_| Error::UnsupportedKeyFormat)?;
                crypto::verify_ecdsa_p256(message, signature, &key)
            }
            PublicKey::P521(key) => {
                let key = p521::ecdsa::VerifyingKey::from_sec1_bytes(
                    key.to_encoded_point(false).as_bytes(),
                )
                .map_err(|_| Error::UnsupportedKeyFormat)?;
                crypto::verify_ecdsa_p521(message, signature, &key)
            }
        }
    }
}
