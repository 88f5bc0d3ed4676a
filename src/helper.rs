//! Hexadecimal conversion helpers.
//!
//! Used for diagnostics, command line arguments and test fixtures.

use crate::error::{Error, Result};

/// Encodes bytes as a lowercase hexadecimal string.
///
/// # Examples
///
/// ```
/// use osnma_core::helper::hex_encode;
///
/// assert_eq!(hex_encode(&[0x18, 0x94, 0xa1]), "1894a1");
/// ```
pub fn hex_encode(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decodes a hexadecimal string.
///
/// Upper and lower case digits are accepted. ASCII whitespace is ignored, so
/// that values can be written in groups of bytes.
///
/// Returns [`Error::InvalidHexString`] if the number of digits is odd or if a
/// character is not a hexadecimal digit.
///
/// # Examples
///
/// ```
/// use osnma_core::helper::hex_decode;
///
/// assert_eq!(hex_decode("18 94 A1").unwrap(), vec![0x18, 0x94, 0xa1]);
/// assert!(hex_decode("189").is_err());
/// ```
pub fn hex_decode(s: &str) -> Result<Vec<u8>> {
    let digits: String = s.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    hex::decode(digits).map_err(|e| {
        log::debug!("could not decode hex string {s:?}: {e}");
        Error::InvalidHexString
    })
}
