//! Cryptographic primitives.
//!
//! Stateless hash, MAC and signature functions used by OSNMA. The algorithm
//! choices broadcast in the DSM-KROOT (hash function, MAC function) and the
//! type of the public key are represented by the [`HashFunction`],
//! [`MacFunction`] and [`EcdsaFunction`] enums, which dispatch to the
//! concrete implementations.

use crate::error::{Error, Result};
use aes::Aes128;
use cmac::Cmac;
use crypto_common::KeyInit;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use sha3::Sha3_256;
use signature::Verifier;

/// Size of the output of the hash functions in bytes.
pub const HASH_BYTES: usize = 32;
/// Size of a raw ECDSA P-256 signature (r || s) in bytes.
pub const P256_SIGNATURE_BYTES: usize = 64;
/// Size of a raw ECDSA P-521 signature (r || s) in bytes.
pub const P521_SIGNATURE_BYTES: usize = 132;
/// Size of the AES-128 key used by CMAC-AES.
pub const CMAC_KEY_BYTES: usize = 16;

/// Hash function used by the TESLA chain one-way function.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum HashFunction {
    /// SHA-256.
    Sha256,
    /// SHA3-256.
    Sha3_256,
}

impl HashFunction {
    /// Computes the hash of `data`.
    pub fn digest(self, data: &[u8]) -> [u8; HASH_BYTES] {
        match self {
            HashFunction::Sha256 => hash_sha256(data),
            HashFunction::Sha3_256 => hash_sha3_256(data),
        }
    }
}

/// MAC function used to compute the tags.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum MacFunction {
    /// HMAC-SHA-256.
    HmacSha256,
    /// CMAC-AES-128.
    CmacAes,
}

impl MacFunction {
    /// Computes the MAC of `message` with `key`.
    ///
    /// The full MAC output is returned (32 bytes for HMAC-SHA-256, 16 bytes
    /// for CMAC-AES). Tags are truncations of this output.
    pub fn compute(self, key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
        match self {
            MacFunction::HmacSha256 => Ok(hmac_sha256(key, message).to_vec()),
            MacFunction::CmacAes => cmac_aes128(key, message).map(|mac| mac.to_vec()),
        }
    }
}

/// ECDSA variant used to sign the chain root key.
///
/// The variant is determined by the type of the public key.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum EcdsaFunction {
    /// ECDSA P-256 with SHA-256.
    P256Sha256,
    /// ECDSA P-521 with SHA-512.
    P521Sha512,
}

impl EcdsaFunction {
    /// Size of the raw signature in bytes.
    pub fn signature_bytes(self) -> usize {
        match self {
            EcdsaFunction::P256Sha256 => P256_SIGNATURE_BYTES,
            EcdsaFunction::P521Sha512 => P521_SIGNATURE_BYTES,
        }
    }
}

/// Computes the SHA-256 hash of `data`.
pub fn hash_sha256(data: &[u8]) -> [u8; HASH_BYTES] {
    Sha256::digest(data).into()
}

/// Computes the SHA3-256 hash of `data`.
pub fn hash_sha3_256(data: &[u8]) -> [u8; HASH_BYTES] {
    Sha3_256::digest(data).into()
}

/// Computes HMAC-SHA-256.
///
/// Keys of any length are accepted.
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; HASH_BYTES] {
    let mut mac =
        <Hmac<Sha256> as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// Computes CMAC-AES-128.
///
/// Returns [`Error::InvalidKeyLength`] unless `key` is 16 bytes long.
pub fn cmac_aes128(key: &[u8], message: &[u8]) -> Result<[u8; 16]> {
    if key.len() != CMAC_KEY_BYTES {
        return Err(Error::InvalidKeyLength);
    }
    let mut mac = <Cmac<Aes128> as KeyInit>::new_from_slice(key)
        .map_err(|_| Error::InvalidKeyLength)?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().into())
}

/// Verifies an ECDSA P-256 signature.
///
/// The signature is the raw big-endian concatenation of r and s. The message
/// is hashed with SHA-256. Returns [`Error::MalformedSignature`] if the
/// signature length is wrong. Any other failure is reported as `Ok(false)`.
pub fn verify_ecdsa_p256(
    message: &[u8],
    signature: &[u8],
    public_key: &p256::ecdsa::VerifyingKey,
) -> Result<bool> {
    if signature.len() != P256_SIGNATURE_BYTES {
        return Err(Error::MalformedSignature);
    }
    let Ok(signature) = p256::ecdsa::Signature::from_slice(signature) else {
        log::debug!("P-256 signature scalars out of range");
        return Ok(false);
    };
    Ok(public_key.verify(message, &signature).is_ok())
}

/// Verifies an ECDSA P-521 signature.
///
/// The signature is the raw big-endian concatenation of r and s. The message
/// is hashed with SHA-512. Returns [`Error::MalformedSignature`] if the
/// signature length is wrong. Any other failure is reported as `Ok(false)`.
pub fn verify_ecdsa_p521(
    message: &[u8],
    signature: &[u8],
    public_key: &p521::ecdsa::VerifyingKey,
) -> Result<bool> {
    if signature.len() != P521_SIGNATURE_BYTES {
        return Err(Error::MalformedSignature);
    }
    let Ok(signature) = p521::ecdsa::Signature::from_slice(signature) else {
        log::debug!("P-521 signature scalars out of range");
        return Ok(false);
    };
    Ok(public_key.verify(message, &signature).is_ok())
}
