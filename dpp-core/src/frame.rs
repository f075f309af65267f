//! DPP public action frame header.
//!
//! On air a DPP frame is a vendor-specific public action frame:
//!
//! ```text
//! category(4) | action(9) | OUI 50:6f:9a | type 0x1a | suite 1 | frame type | attributes
//! ```
//!
//! The six bytes from OUI through frame type form the header that is the
//! first associated-data component for every wrapped attribute.

use crate::attributes::Attributes;
use crate::constants::{
    CRYPTO_SUITE, DPP_HDR_LEN, DPP_OUI_TYPE, WFA_OUI, WLAN_ACTION_PUBLIC, WLAN_PA_VENDOR_SPECIFIC,
};
use crate::errors::CodecError;

/// DPP public action frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    AuthReq = 0,
    AuthResp = 1,
    AuthConf = 2,
    PeerDiscReq = 5,
    PeerDiscResp = 6,
    PkexV1ExchReq = 7,
    PkexExchResp = 8,
    PkexCommitRevealReq = 9,
    PkexCommitRevealResp = 10,
    ConfigurationResult = 11,
    ConnectionStatusResult = 12,
    PresenceAnnouncement = 13,
    ReconfigAnnouncement = 14,
    ReconfigAuthReq = 15,
    ReconfigAuthResp = 16,
    ReconfigAuthConf = 17,
    PkexExchReq = 18,
}

impl TryFrom<u8> for FrameType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        let ty = match value {
            0 => FrameType::AuthReq,
            1 => FrameType::AuthResp,
            2 => FrameType::AuthConf,
            5 => FrameType::PeerDiscReq,
            6 => FrameType::PeerDiscResp,
            7 => FrameType::PkexV1ExchReq,
            8 => FrameType::PkexExchResp,
            9 => FrameType::PkexCommitRevealReq,
            10 => FrameType::PkexCommitRevealResp,
            11 => FrameType::ConfigurationResult,
            12 => FrameType::ConnectionStatusResult,
            13 => FrameType::PresenceAnnouncement,
            14 => FrameType::ReconfigAnnouncement,
            15 => FrameType::ReconfigAuthReq,
            16 => FrameType::ReconfigAuthResp,
            17 => FrameType::ReconfigAuthConf,
            18 => FrameType::PkexExchReq,
            _ => return Err(CodecError::InvalidHeader),
        };
        Ok(ty)
    }
}

/// The 6-byte DPP header used as associated data.
pub fn header(frame_type: FrameType) -> [u8; DPP_HDR_LEN] {
    [
        WFA_OUI[0],
        WFA_OUI[1],
        WFA_OUI[2],
        DPP_OUI_TYPE,
        CRYPTO_SUITE,
        frame_type as u8,
    ]
}

/// A parsed DPP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DppFrame {
    pub frame_type: FrameType,
    pub attrs: Attributes,
}

impl DppFrame {
    pub fn new(frame_type: FrameType, attrs: Attributes) -> Self {
        Self { frame_type, attrs }
    }

    /// Associated-data header for this frame.
    pub fn header(&self) -> [u8; DPP_HDR_LEN] {
        header(self.frame_type)
    }

    /// Serialize as a full public action frame body.
    pub fn to_action_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let body = self.attrs.encode()?;
        let mut out = Vec::with_capacity(2 + DPP_HDR_LEN + body.len());
        out.push(WLAN_ACTION_PUBLIC);
        out.push(WLAN_PA_VENDOR_SPECIFIC);
        out.extend_from_slice(&self.header());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Parse a public action frame body.
    pub fn from_action_bytes(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < 2 || buf[0] != WLAN_ACTION_PUBLIC || buf[1] != WLAN_PA_VENDOR_SPECIFIC {
            return Err(CodecError::InvalidHeader);
        }
        Self::from_header_bytes(&buf[2..])
    }

    /// Serialize starting at the OUI (the TCP encapsulation drops the
    /// category and keeps the public action field outside).
    pub fn to_header_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let body = self.attrs.encode()?;
        let mut out = Vec::with_capacity(DPP_HDR_LEN + body.len());
        out.extend_from_slice(&self.header());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Parse bytes starting at the OUI.
    pub fn from_header_bytes(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < DPP_HDR_LEN
            || buf[..3] != WFA_OUI
            || buf[3] != DPP_OUI_TYPE
            || buf[4] != CRYPTO_SUITE
        {
            return Err(CodecError::InvalidHeader);
        }
        let frame_type = FrameType::try_from(buf[5])?;
        let attrs = Attributes::decode(&buf[DPP_HDR_LEN..])?;
        Ok(Self { frame_type, attrs })
    }
}
