//! DPP Core: wire format, crypto adapter and bootstrapping.
//!
//! This crate holds everything in the Device Provisioning Protocol that
//! is not a state machine: the attribute codec, the frame header, the
//! curve-parameterised crypto primitives, JWS/JWK handling and the
//! bootstrap key store. `dpp-protocol` builds the handshakes on top.
//!
//! # Module Map
//!
//! | Module | Concern |
//! |--------|---------|
//! | [`constants`] | OUI, frame and capability constants, timing defaults |
//! | [`errors`] | `DppError`, `CodecError`, DPP status registry |
//! | [`encoding`] | base64, base64url, hex |
//! | [`hash`] | SHA-256 helpers |
//! | [`attributes`] | TLV attribute codec |
//! | [`frame`] | Public action frame header |
//! | [`crypto`] | ECDH, point arithmetic, HKDF, HMAC, AES-SIV |
//! | [`jws`] | Compact JWS and EC JWK |
//! | [`bootstrap`] | Bootstrap keys, URIs, channel lists |
//! | [`fault`] | Fault-injection port |

/// Protocol constants.
pub mod constants;

/// Error types and the DPP status registry.
pub mod errors;

/// Encoding utilities: base64, base64url and hex.
pub mod encoding;

/// Hashing utilities: SHA-256.
pub mod hash;

/// DPP attribute TLV codec.
pub mod attributes;

/// DPP public action frame header.
pub mod frame;

/// Crypto primitives: NIST curves, HKDF, AES-SIV.
pub mod crypto;

/// JWS compact serialization and JWKs.
pub mod jws;

/// Bootstrapping manager: QR, PKEX and NFC keys.
pub mod bootstrap;

/// Injectable failures for tests.
pub mod fault;

pub use attributes::{AttrId, Attributes};
pub use crypto::{Curve, KeyPair, PublicKey};
pub use errors::{CodecError, DppError, StatusCode};
pub use frame::{DppFrame, FrameType};
