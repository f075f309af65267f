//! Conformance: public action frame layout.
//!
//! `04 09 50 6f 9a 1a 01 <type> <attributes>`

use dpp_core::attributes::{AttrId, Attributes};
use dpp_core::errors::CodecError;
use dpp_core::frame::{DppFrame, FrameType};

#[test]
fn conformance_action_frame_prefix() {
    let frame = DppFrame::new(
        FrameType::AuthConf,
        Attributes::new().with(AttrId::Status, vec![0]),
    );
    assert_eq!(
        frame.to_action_bytes().unwrap(),
        vec![0x04, 0x09, 0x50, 0x6f, 0x9a, 0x1a, 0x01, 0x02, 0x00, 0x10, 0x01, 0x00, 0x00]
    );
}

#[test]
fn conformance_frame_type_values() {
    let expected = [
        (FrameType::AuthReq, 0),
        (FrameType::AuthResp, 1),
        (FrameType::AuthConf, 2),
        (FrameType::PeerDiscReq, 5),
        (FrameType::PeerDiscResp, 6),
        (FrameType::PkexV1ExchReq, 7),
        (FrameType::PkexExchResp, 8),
        (FrameType::PkexCommitRevealReq, 9),
        (FrameType::PkexCommitRevealResp, 10),
        (FrameType::ConfigurationResult, 11),
        (FrameType::ConnectionStatusResult, 12),
        (FrameType::PresenceAnnouncement, 13),
        (FrameType::ReconfigAnnouncement, 14),
        (FrameType::ReconfigAuthReq, 15),
        (FrameType::ReconfigAuthResp, 16),
        (FrameType::ReconfigAuthConf, 17),
        (FrameType::PkexExchReq, 18),
    ];
    for (ty, value) in expected {
        assert_eq!(ty as u8, value);
        assert_eq!(FrameType::try_from(value).unwrap(), ty);
    }
    assert!(FrameType::try_from(3).is_err());
    assert!(FrameType::try_from(19).is_err());
}

#[test]
fn conformance_foreign_headers_rejected() {
    let mut bytes = DppFrame::new(FrameType::AuthReq, Attributes::new())
        .to_action_bytes()
        .unwrap();
    // Wrong OUI type: not a DPP frame.
    bytes[5] = 0x1b;
    assert_eq!(DppFrame::from_action_bytes(&bytes), Err(CodecError::InvalidHeader));
    assert_eq!(DppFrame::from_action_bytes(&[0x04]), Err(CodecError::InvalidHeader));
}

#[test]
fn conformance_truncated_attribute_is_codec_error() {
    let mut bytes = DppFrame::new(
        FrameType::AuthReq,
        Attributes::new().with(AttrId::Status, vec![0]),
    )
    .to_action_bytes()
    .unwrap();
    bytes.pop();
    assert!(matches!(
        DppFrame::from_action_bytes(&bytes),
        Err(CodecError::Truncated { .. })
    ));
}
