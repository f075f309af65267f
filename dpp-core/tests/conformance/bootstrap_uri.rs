//! Conformance: bootstrap URI parsing and key hashes.
//!
//! The URIs below carry keys produced by other stacks (a P-256 QR code
//! and an OpenSSL brainpoolP256r1 key). Key hashes must be SHA-256 over
//! the DER exactly as carried in `K:`.

use dpp_core::bootstrap::{channel_to_freq, freq_to_channel, BootstrapManager, BootstrapParams};
use dpp_core::crypto::Curve;
use dpp_core::encoding::to_hex;
use dpp_core::errors::DppError;

const URI: &str = "DPP:C:81/1,115/36;K:MDkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDIgADM2206avxHJaHXgLMkq/24e0rsrfMP9K1Tm8gx+ovP0I=;;";
const KEY_HASH: &str = "bc4cbe2a7f4735f6db5ea817ee468d46110e47fa58833f4ecaacce775b657302";
const CHIRP_HASH: &str = "826b2bffc761da0840bdde90a504fc1f2a243c77e2ed054d4ba2774f4ee571d3";

#[test]
fn conformance_uri_key_and_chirp_hash() {
    let mut mgr = BootstrapManager::new();
    let id = mgr.parse_uri(URI).unwrap();
    let bi = mgr.get(id).unwrap();
    assert_eq!(bi.curve(), Curve::P256);
    assert_eq!(bi.freqs, vec![2412, 5180]);
    assert_eq!(to_hex(bi.key_hash()), KEY_HASH);
    assert_eq!(to_hex(bi.chirp_hash()), CHIRP_HASH);
    assert!(!bi.is_own());
}

const BP256_URI: &str = "DPP:K:MDowFAYHKoZIzj0CAQYJKyQDAwIIAQEHAyIAAz6Z9biGnTf8GMfPeTIcA4UblaYiU79xab4OdZfY/qtd;;";
const BP256_KEY_HASH: &str = "227d1cba9b4b963660739c47a0a7f90dc24fc50f6503c3195545ae7501f3c58a";
const BP256_CHIRP_HASH: &str = "b3c2a3968909ebddaf53508562e1c9c0c5bca42c67207e33eeb13038162a7524";

#[test]
fn conformance_brainpool_uri_key_and_chirp_hash() {
    let mut mgr = BootstrapManager::new();
    let id = mgr.parse_uri(BP256_URI).unwrap();
    let bi = mgr.get(id).unwrap();
    assert_eq!(bi.curve(), Curve::BrainpoolP256r1);
    assert_eq!(to_hex(bi.key_hash()), BP256_KEY_HASH);
    assert_eq!(to_hex(bi.chirp_hash()), BP256_CHIRP_HASH);
    // Our own encoding of the same point is byte-identical.
    assert_eq!(bi.public.to_spki_der().unwrap(), bi.spki_der());
}

#[test]
fn conformance_own_uri_uses_compressed_point() {
    let mut mgr = BootstrapManager::new();
    for curve in Curve::ALL {
        let id = mgr
            .generate(BootstrapParams {
                curve,
                ..BootstrapParams::default()
            })
            .unwrap();
        let own = mgr.get(id).unwrap();
        let spki_len = own.spki_der().len();
        // Header plus a compressed point: 0x02/0x03 and x.
        let expected = match curve {
            Curve::P256 => 26 + 33,
            Curve::P384 => 23 + 49,
            Curve::P521 => 23 + 67,
            Curve::BrainpoolP256r1 => 27 + 33,
            Curve::BrainpoolP384r1 => 27 + 49,
            Curve::BrainpoolP512r1 => 27 + 65,
        };
        assert_eq!(spki_len, expected, "{curve}");

        let mut other = BootstrapManager::new();
        let peer = other.parse_uri(&own.uri()).unwrap();
        let peer = other.get(peer).unwrap();
        assert_eq!(peer.public, own.public, "{curve}");
        assert_eq!(peer.key_hash(), own.key_hash(), "{curve}");
    }
}

#[test]
fn conformance_uri_rejections_register_nothing() {
    let bad = [
        "",
        "DPP:K:AAAA;",
        "QR:K:MDkw;;",
        "DPP:C:81/1;;",
        "DPP:C:81;K:MDkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDIgADM2206avxHJaHXgLMkq/24e0rsrfMP9K1Tm8gx+ovP0I=;;",
        "DPP:M:0011;K:MDkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDIgADM2206avxHJaHXgLMkq/24e0rsrfMP9K1Tm8gx+ovP0I=;;",
        "DPP:K:not-base64!;;",
    ];
    let mut mgr = BootstrapManager::new();
    for uri in bad {
        assert!(
            matches!(mgr.parse_uri(uri), Err(DppError::InvalidUri(_))),
            "accepted {uri:?}"
        );
    }
    assert!(mgr.is_empty());
}

#[test]
fn conformance_unknown_channels_are_skipped() {
    let uri = URI.replace("C:81/1,115/36", "C:81/1,200/7,81/1");
    let mut mgr = BootstrapManager::new();
    let id = mgr.parse_uri(&uri).unwrap();
    assert_eq!(mgr.get(id).unwrap().freqs, vec![2412]);
}

#[test]
fn conformance_channel_map() {
    assert_eq!(channel_to_freq(81, 1), Some(2412));
    assert_eq!(channel_to_freq(81, 6), Some(2437));
    assert_eq!(channel_to_freq(81, 11), Some(2462));
    assert_eq!(channel_to_freq(82, 14), Some(2484));
    assert_eq!(channel_to_freq(115, 36), Some(5180));
    assert_eq!(channel_to_freq(115, 44), Some(5220));
    assert_eq!(channel_to_freq(124, 149), Some(5745));
    assert_eq!(channel_to_freq(81, 14), None);
    assert_eq!(freq_to_channel(2437), Some((81, 6)));
    assert_eq!(freq_to_channel(5745), Some((124, 149)));
    assert_eq!(freq_to_channel(2413), None);
}
