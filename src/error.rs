//! Error type.
//!
//! Cryptographic verification failures on individual tags are not errors:
//! they are reported as a [`TagState`](crate::tags::TagState). The variants
//! of [`Error`] describe data that cannot be processed at all (structural
//! problems), failures of the chain root, and persistence problems.

use std::fmt;

/// Errors produced by this crate.
#[derive(Debug)]
pub enum Error {
    /// The ECDSA signature of the chain root key did not verify.
    RootAuthenticationFailed,
    /// A disclosed key does not hash back to the trusted chain.
    ///
    /// Not returned by the verifiers, which give a failed
    /// [`TagState`](crate::tags::TagState) instead. Obtained by converting a
    /// [`FailReason`](crate::tags::FailReason).
    ChainBroken,
    /// A recomputed MAC does not match the broadcast tag.
    ///
    /// Obtained by converting a [`FailReason`](crate::tags::FailReason).
    MacMismatch,
    /// The signature has the wrong length for the curve.
    MalformedSignature,
    /// The public key encoding is not supported.
    UnsupportedKeyFormat,
    /// The key has the wrong length for the algorithm.
    InvalidKeyLength,
    /// The string is not valid hexadecimal.
    InvalidHexString,
    /// A field needed to interpret a message has a reserved value.
    ReservedField,
    /// The satellite number is outside the range E01-E36.
    InvalidSvn,
    /// A message or record is too short for its declared contents.
    InvalidLength,
    /// The navigation data record does not belong to the tag.
    RecordMismatch,
    /// No public key has been provisioned.
    MissingPublicKey,
    /// The Merkle tree root computed from a DSM-PKR is wrong.
    MerkleTreeMismatch,
    /// A persisted key could not be decoded.
    Decode(String),
    /// A key could not be encoded for persistence.
    Encode(String),
    /// Filesystem error during persistence.
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::RootAuthenticationFailed => "root key signature verification failed".fmt(f),
            Error::ChainBroken => "key does not belong to the trusted chain".fmt(f),
            Error::MacMismatch => "MAC does not match the tag".fmt(f),
            Error::MalformedSignature => "signature has a wrong length".fmt(f),
            Error::UnsupportedKeyFormat => "unsupported public key format".fmt(f),
            Error::InvalidKeyLength => "invalid key length".fmt(f),
            Error::InvalidHexString => "invalid hexadecimal string".fmt(f),
            Error::ReservedField => "reserved value present in some field".fmt(f),
            Error::InvalidSvn => "SVN out of range".fmt(f),
            Error::InvalidLength => "message too short".fmt(f),
            Error::RecordMismatch => "navigation data does not correspond to the tag".fmt(f),
            Error::MissingPublicKey => "no public key available".fmt(f),
            Error::MerkleTreeMismatch => "wrong calculated Merkle tree root".fmt(f),
            Error::Decode(e) => write!(f, "could not decode public key: {e}"),
            Error::Encode(e) => write!(f, "could not encode public key: {e}"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::Io(e)
    }
}

/// Result type used throughout this crate.
pub type Result<T> = core::result::Result<T, Error>;
