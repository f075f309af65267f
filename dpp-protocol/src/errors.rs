//! Error types for dpp-protocol.
//!
//! `ProtocolError` is returned by the engine's request API (bad id, busy
//! peer, invalid parameters). `FailureReason` is the terminal reason a
//! session records; it is reported in events, never returned as `Err`
//! from frame processing.

use dpp_core::errors::{CodecError, DppError, StatusCode};
use dpp_core::fault::FaultPoint;

use crate::connector::ConnectorError;

/// Request-level failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A session with this peer is already running.
    #[error("Already in exchange with {peer}")]
    AlreadyInExchange { peer: String },

    #[error("Unknown bootstrap id {0}")]
    UnknownBootstrap(u32),

    #[error("Unknown configurator id {0}")]
    UnknownConfigurator(u32),

    #[error("Unknown network profile {0}")]
    UnknownProfile(u32),

    /// Bootstrap entry exists but has no private key.
    #[error("Bootstrap id {0} is not an own key")]
    NotOwnKey(u32),

    /// Configuration parameters rejected before any frame was sent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation needs a state the engine is not in.
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    #[error(transparent)]
    Core(#[from] DppError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Connector(#[from] ConnectorError),
}

/// Why a session ended in failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    #[error("No Auth Confirm received")]
    NoConfirmReceived,

    #[error("No response to Authentication Request")]
    AuthInitFailed,

    #[error("I-auth mismatch")]
    IAuthMismatch,

    #[error("R-auth mismatch")]
    RAuthMismatch,

    #[error("AES-SIV decryption failed: {0}")]
    Unwrap(&'static str),

    #[error("Nonce mismatch")]
    NonceMismatch,

    #[error("Peer not compatible")]
    NotCompatible,

    #[error("Invalid peer protocol key")]
    InvalidPeerKey,

    #[error("Curve mismatch")]
    CurveMismatch,

    #[error("Peer reported status {0}")]
    PeerStatus(StatusCode),

    /// Malformed message in a terminal exchange step.
    #[error("Malformed message: {0}")]
    Malformed(CodecError),

    #[error("Timeout")]
    Timeout,

    #[error("Possible PKEX code mismatch")]
    PossibleCodeMismatch,

    #[error("PKEX group mismatch: own {own}, peer {peer}")]
    BadGroup { own: u16, peer: u16 },

    #[error("Configuration rejected: {0}")]
    Config(String),

    #[error("Connector: {0}")]
    Connector(ConnectorError),

    #[error("Injected fault at {0:?}")]
    Injected(FaultPoint),

    #[error("Aborted")]
    Aborted,
}

/// Why a received frame was ignored without changing session state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Dropped {
    #[error("malformed: {0}")]
    Malformed(#[from] CodecError),

    /// Hash or transaction does not name anything we own.
    #[error("not addressed to us")]
    NotForUs,

    /// Valid frame for a state the session is no longer in (duplicate).
    #[error("unexpected in current state")]
    Unexpected,

    #[error("crypto: {0}")]
    Crypto(DppError),

    /// Source has used up its attempt budget.
    #[error("attempt limit reached")]
    Limited,

    /// Frame of a protocol version this engine does not speak (PKEX v1).
    #[error("unsupported protocol version")]
    Unsupported,
}

impl FailureReason {
    /// Map a local crypto error hit mid-handshake.
    pub fn from_crypto(err: &DppError, unwrap_step: &'static str) -> Self {
        match err {
            DppError::AuthFailure(_) => FailureReason::Unwrap(unwrap_step),
            DppError::CurveMismatch { .. } | DppError::UnsupportedCurve(_) => {
                FailureReason::CurveMismatch
            }
            DppError::InjectedFault(point) => FailureReason::Injected(*point),
            DppError::Codec(codec) => FailureReason::Malformed(codec.clone()),
            _ => FailureReason::InvalidPeerKey,
        }
    }

    /// Whether retrying with different parameters could help (policy),
    /// as opposed to a cryptographic failure.
    pub fn is_policy(&self) -> bool {
        matches!(
            self,
            FailureReason::NotCompatible
                | FailureReason::PeerStatus(_)
                | FailureReason::Config(_)
                | FailureReason::Connector(ConnectorError::Expired)
                | FailureReason::Connector(ConnectorError::NoMatchingGroup)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_strings() {
        assert_eq!(
            FailureReason::NoConfirmReceived.to_string(),
            "No Auth Confirm received"
        );
        assert_eq!(FailureReason::IAuthMismatch.to_string(), "I-auth mismatch");
        assert_eq!(
            FailureReason::PeerStatus(StatusCode::NotCompatible).to_string(),
            "Peer reported status NOT_COMPATIBLE (1)"
        );
    }

    #[test]
    fn crypto_errors_map_to_specific_reasons() {
        assert_eq!(
            FailureReason::from_crypto(&DppError::AuthFailure("x".into()), "k2"),
            FailureReason::Unwrap("k2")
        );
        assert_eq!(
            FailureReason::from_crypto(
                &DppError::CurveMismatch {
                    expected: "a",
                    actual: "b"
                },
                "k1"
            ),
            FailureReason::CurveMismatch
        );
    }

    #[test]
    fn policy_is_distinct_from_crypto() {
        assert!(FailureReason::NotCompatible.is_policy());
        assert!(FailureReason::Connector(ConnectorError::Expired).is_policy());
        assert!(!FailureReason::IAuthMismatch.is_policy());
        assert!(!FailureReason::Unwrap("ke").is_policy());
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProtocolError>();
        assert_send_sync::<FailureReason>();
    }
}
