//! Wrapped Data helpers shared by every message builder.
//!
//! For action frames the associated data is two components: the 6-byte
//! DPP header and the encoded attributes preceding Wrapped Data. GAS
//! payloads pass their own AD list. The decrypted plaintext is itself an
//! attribute list.

use dpp_core::attributes::{AttrId, Attributes};
use dpp_core::crypto::{aes_siv_decrypt, aes_siv_encrypt};
use dpp_core::errors::{CodecError, DppError};
use dpp_core::fault::{FaultInjector, FaultPoint};
use dpp_core::frame::{header, DppFrame, FrameType};

/// Encrypt `inner` under `key` with explicit AD components.
pub fn seal(
    key: &[u8],
    aad: &[&[u8]],
    inner: &Attributes,
    faults: &FaultInjector,
) -> Result<Vec<u8>, DppError> {
    faults.check(FaultPoint::Encrypt)?;
    aes_siv_encrypt(key, aad, &inner.encode()?)
}

/// Decrypt and decode a wrapped attribute list.
pub fn open(
    key: &[u8],
    aad: &[&[u8]],
    sealed: &[u8],
    faults: &FaultInjector,
) -> Result<Attributes, DppError> {
    faults.check(FaultPoint::Decrypt)?;
    let plain = aes_siv_decrypt(key, aad, sealed)?;
    Ok(Attributes::decode(&plain)?)
}

/// Append Wrapped Data to a frame's attributes, using the frame AD.
pub fn seal_into_frame(
    frame_type: FrameType,
    attrs: &mut Attributes,
    key: &[u8],
    inner: &Attributes,
    faults: &FaultInjector,
) -> Result<(), DppError> {
    let hdr = header(frame_type);
    let before = attrs.encode()?;
    let sealed = seal(key, &[&hdr, &before], inner, faults)?;
    attrs.push(AttrId::WrappedData, sealed);
    Ok(())
}

/// Build a complete frame whose last attribute wraps `inner`.
pub fn build_frame(
    frame_type: FrameType,
    mut attrs: Attributes,
    key: &[u8],
    inner: &Attributes,
    faults: &FaultInjector,
) -> Result<DppFrame, DppError> {
    seal_into_frame(frame_type, &mut attrs, key, inner, faults)?;
    Ok(DppFrame::new(frame_type, attrs))
}

/// Open a frame's Wrapped Data with the frame AD.
pub fn open_frame(
    frame: &DppFrame,
    key: &[u8],
    faults: &FaultInjector,
) -> Result<Attributes, DppError> {
    let sealed = frame
        .attrs
        .get(AttrId::WrappedData)
        .ok_or(CodecError::MissingAttribute(AttrId::WrappedData))?;
    let hdr = frame.header();
    let before = frame.attrs.encode_before(AttrId::WrappedData)?;
    open(key, &[&hdr, &before], sealed, faults)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpp_core::crypto::random_bytes;

    #[test]
    fn frame_ad_covers_clear_attributes() {
        let key = random_bytes(32);
        let faults = FaultInjector::disabled();
        let inner = Attributes::new().with(AttrId::INonce, vec![1u8; 16]);
        let clear = Attributes::new().with(AttrId::Status, vec![0u8]);
        let frame = build_frame(FrameType::AuthConf, clear, &key, &inner, &faults).unwrap();
        assert_eq!(open_frame(&frame, &key, &faults).unwrap(), inner);

        // Flip a clear attribute: AD no longer matches.
        let mut tampered = Attributes::new().with(AttrId::Status, vec![1u8]);
        tampered.push(
            AttrId::WrappedData,
            frame.attrs.get(AttrId::WrappedData).unwrap().to_vec(),
        );
        let tampered = DppFrame::new(FrameType::AuthConf, tampered);
        assert!(matches!(
            open_frame(&tampered, &key, &faults),
            Err(DppError::AuthFailure(_))
        ));

        // Same bytes under a different frame type: header AD differs.
        let retyped = DppFrame::new(FrameType::AuthResp, frame.attrs.clone());
        assert!(open_frame(&retyped, &key, &faults).is_err());
    }

    #[test]
    fn missing_wrapped_data_is_codec_error() {
        let frame = DppFrame::new(FrameType::AuthConf, Attributes::new());
        assert_eq!(
            open_frame(&frame, &[0u8; 32], &FaultInjector::disabled()),
            Err(DppError::Codec(CodecError::MissingAttribute(
                AttrId::WrappedData
            )))
        );
    }

    #[test]
    fn injected_decrypt_fault() {
        let faults = FaultInjector::enabled();
        faults.arm(FaultPoint::Decrypt, 1);
        assert_eq!(
            open(&[0u8; 32], &[], &[0u8; 32], &faults),
            Err(DppError::InjectedFault(FaultPoint::Decrypt))
        );
    }
}
