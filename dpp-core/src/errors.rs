//! Error types for dpp-core.
//!
//! `DppError` covers local failures (crypto, encoding, bootstrapping).
//! `CodecError` is the attribute-level parse failure; a codec error means
//! "ignore this message", never "tear the session down".
//!
//! `StatusCode` is the DPP Status attribute registry exchanged on the wire.

use crate::attributes::AttrId;
use crate::fault::FaultPoint;

/// Unified error type for dpp-core operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DppError {
    /// Decrypt or verify mismatch. Never accompanied by partial output.
    #[error("Authentication failure: {0}")]
    AuthFailure(String),

    /// Curve named but not usable by this build, or unknown group.
    #[error("Unsupported curve: {0}")]
    UnsupportedCurve(String),

    /// Two keys that must share a curve do not.
    #[error("Curve mismatch: expected {expected}, got {actual}")]
    CurveMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// Malformed key, point or scalar.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Malformed bootstrapping URI. Nothing is registered.
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    /// Unknown bootstrap or configurator id.
    #[error("Unknown id: {0}")]
    UnknownId(u32),

    /// Encoding error (base64, hex, JSON).
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Attribute-level failure.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A fault armed on the injection port fired.
    #[error("Injected fault at {0:?}")]
    InjectedFault(FaultPoint),
}

/// Attribute codec failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// A declared length runs past the end of the buffer.
    #[error("Truncated attribute at offset {offset}")]
    Truncated { offset: usize },

    /// A mandatory attribute for this message kind is absent.
    #[error("Missing attribute {0:?}")]
    MissingAttribute(AttrId),

    /// An attribute is present but its value is malformed.
    #[error("Invalid attribute {0:?}")]
    InvalidAttribute(AttrId),

    /// Frame too short or header fields do not describe a DPP frame.
    #[error("Invalid frame header")]
    InvalidHeader,

    /// Attribute value does not fit the 16-bit length field.
    #[error("Attribute too long: {0} bytes")]
    TooLong(usize),
}

/// DPP Status attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StatusCode {
    Ok = 0,
    NotCompatible = 1,
    AuthFailure = 2,
    UnwrapFailure = 3,
    BadGroup = 4,
    ConfigureFailure = 5,
    ResponsePending = 6,
    InvalidConnector = 7,
    NoMatch = 8,
    ConfigRejected = 9,
    NoAp = 10,
    ConfigurePending = 11,
    CsrNeeded = 12,
    CsrBad = 13,
}

/// Canonical status names, indexed by wire value.
pub const STATUS_NAMES: [&str; 14] = [
    "OK",
    "NOT_COMPATIBLE",
    "AUTH_FAILURE",
    "UNWRAP_FAILURE",
    "BAD_GROUP",
    "CONFIGURE_FAILURE",
    "RESPONSE_PENDING",
    "INVALID_CONNECTOR",
    "NO_MATCH",
    "CONFIG_REJECTED",
    "NO_AP",
    "CONFIGURE_PENDING",
    "CSR_NEEDED",
    "CSR_BAD",
];

impl StatusCode {
    /// Wire value.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Canonical name as printed in event logs.
    pub fn name(self) -> &'static str {
        STATUS_NAMES[self as usize]
    }
}

impl TryFrom<u8> for StatusCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        let status = match value {
            0 => StatusCode::Ok,
            1 => StatusCode::NotCompatible,
            2 => StatusCode::AuthFailure,
            3 => StatusCode::UnwrapFailure,
            4 => StatusCode::BadGroup,
            5 => StatusCode::ConfigureFailure,
            6 => StatusCode::ResponsePending,
            7 => StatusCode::InvalidConnector,
            8 => StatusCode::NoMatch,
            9 => StatusCode::ConfigRejected,
            10 => StatusCode::NoAp,
            11 => StatusCode::ConfigurePending,
            12 => StatusCode::CsrNeeded,
            13 => StatusCode::CsrBad,
            other => return Err(other),
        };
        Ok(status)
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u8())
    }
}

/// Returns `true` if `value` is a defined DPP status code.
pub fn is_valid_status(value: u8) -> bool {
    (value as usize) < STATUS_NAMES.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_format() {
        let err = DppError::AuthFailure("AES-SIV decrypt".into());
        assert_eq!(err.to_string(), "Authentication failure: AES-SIV decrypt");

        let err = DppError::Codec(CodecError::Truncated { offset: 4 });
        assert_eq!(err.to_string(), "Truncated attribute at offset 4");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DppError>();
        assert_send_sync::<CodecError>();
    }

    #[test]
    fn status_registry_has_14_codes() {
        assert_eq!(STATUS_NAMES.len(), 14);
        for v in 0..14u8 {
            let status = StatusCode::try_from(v).unwrap();
            assert_eq!(status.as_u8(), v);
            assert_eq!(status.name(), STATUS_NAMES[v as usize]);
        }
    }

    #[test]
    fn status_registry_rejects_unknown() {
        assert!(!is_valid_status(14));
        assert!(!is_valid_status(255));
        assert_eq!(StatusCode::try_from(200), Err(200));
    }

    #[test]
    fn status_values_match_wire() {
        assert_eq!(StatusCode::InvalidConnector.as_u8(), 7);
        assert_eq!(StatusCode::NoMatch.as_u8(), 8);
        assert_eq!(StatusCode::CsrBad.to_string(), "CSR_BAD (13)");
    }
}
