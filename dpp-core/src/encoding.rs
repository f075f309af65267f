//! Encoding utilities: base64, base64url and hex.
//!
//! Bootstrapping URIs and certificate bags use standard base64 with
//! padding. JWS segments, kid values and `ssid64` use base64url without
//! padding. Configuration commands carry SSIDs and passphrases as hex.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;

use crate::errors::DppError;

/// Encode bytes to standard base64 (RFC 4648, with padding).
pub fn to_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode standard base64 to bytes.
///
/// # Errors
/// Returns `DppError::Encoding` on invalid base64 input.
pub fn from_base64(encoded: &str) -> Result<Vec<u8>, DppError> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| DppError::Encoding(format!("invalid base64: {e}")))
}

/// Encode bytes to base64url without padding.
pub fn to_base64url(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decode base64url. Trailing `=` padding is tolerated.
pub fn from_base64url(encoded: &str) -> Result<Vec<u8>, DppError> {
    URL_SAFE_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .map_err(|e| DppError::Encoding(format!("invalid base64url: {e}")))
}

/// Encode bytes to lowercase hex string.
pub fn to_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

/// Decode hex string to bytes.
///
/// # Errors
/// Returns `DppError::Encoding` on odd length or non-hex characters.
pub fn from_hex(encoded: &str) -> Result<Vec<u8>, DppError> {
    if encoded.len() % 2 != 0 {
        return Err(DppError::Encoding("odd-length hex string".into()));
    }
    if !encoded.is_ascii() {
        return Err(DppError::Encoding("non-ascii hex string".into()));
    }
    (0..encoded.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&encoded[i..i + 2], 16)
                .map_err(|e| DppError::Encoding(format!("invalid hex: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let input = b"DPP test";
        let hex = to_hex(input);
        assert_eq!(hex, "4450502074657374");
        assert_eq!(from_hex(&hex).unwrap(), input);
    }

    #[test]
    fn hex_rejects_bad_input() {
        assert!(from_hex("abc").is_err());
        assert!(from_hex("zz").is_err());
        assert!(from_hex("é1").is_err());
    }

    #[test]
    fn base64_known_value() {
        assert_eq!(to_base64(b"ab"), "YWI=");
        assert_eq!(from_base64("YWI=").unwrap(), b"ab");
    }

    #[test]
    fn base64url_has_no_padding() {
        assert_eq!(to_base64url(&[0xfb, 0xff]), "-_8");
        assert_eq!(from_base64url("-_8").unwrap(), vec![0xfb, 0xff]);
        assert_eq!(from_base64url("-_8=").unwrap(), vec![0xfb, 0xff]);
    }

    #[test]
    fn base64_rejects_garbage() {
        assert!(matches!(from_base64("!!!"), Err(DppError::Encoding(_))));
    }
}
