//! Validation status.
//!
//! Marker types used as a type parameter on TESLA keys. A key read from the
//! broadcast stream starts as [`NotValidated`] and can only become
//! [`Validated`] through a signature check of the chain root or a one-way
//! function check against another validated key. Only validated keys can be
//! used to check MAC tags, so a tag can never be accepted with a key that has
//! not been traced back to the public key.

/// Validated status.
///
/// The object holding it has gone through all the required cryptographic
/// checks.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Validated {}

/// Not validated status.
///
/// The object holding it has not been traced back to a trusted source yet.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct NotValidated {}
