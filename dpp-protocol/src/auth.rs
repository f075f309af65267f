//! DPP Authentication: the three-message Request/Response/Confirm
//! handshake, plus the status-only Response variants.
//!
//! An [`AuthSession`] is a pure state machine. It consumes decoded
//! frames and produces frames to send; retransmission, channel walking
//! and timers belong to the engine.
//!
//! Key schedule:
//!
//! ```text
//! k1 = HKDF(<>, "first intermediate key", M.x)        M = pI*BR = bR*PI
//! k2 = HKDF(<>, "second intermediate key", N.x)       N = pI*PR = pR*PI
//! bk = HKDF-Extract(I-nonce | R-nonce, M.x | N.x [| L.x])
//! ke = HKDF-Expand(bk, "DPP Key", hash_len)
//! ```
//!
//! `L` only exists for mutual authentication, where the Responder knows
//! the Initiator's bootstrap key.
//!
//! Frame handling rules:
//! - frames for a state the session has left are [`Dropped::Unexpected`]
//!   and change nothing, so duplicates are harmless;
//! - the first status-bearing Response decides the outcome, except that
//!   RESPONSE_PENDING keeps the Initiator waiting for a final Response;
//! - any crypto failure after keys start being derived is terminal.

use dpp_core::attributes::{AttrId, Attributes};
use dpp_core::bootstrap::{BootstrapInfo, BootstrapManager};
use dpp_core::crypto::{
    hash_vector, hkdf, hkdf_expand, hkdf_extract, random_bytes, scalar_add, Curve, KeyPair,
    PublicKey,
};
use dpp_core::errors::{CodecError, DppError, StatusCode};
use dpp_core::fault::{FaultInjector, FaultPoint};
use dpp_core::frame::{DppFrame, FrameType};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::capability::{negotiate_initiator, negotiate_responder, Capability, Negotiation, Role};
use crate::errors::{Dropped, FailureReason, ProtocolError};
use crate::wrapped::{build_frame, open, open_frame, seal};

const K1_INFO: &[u8] = b"first intermediate key";
const K2_INFO: &[u8] = b"second intermediate key";
const KE_INFO: &[u8] = b"DPP Key";

/// Local policy for one handshake.
#[derive(Debug, Clone, Copy)]
pub struct AuthParams {
    pub capability: Capability,
    /// Protocol version to announce. Version 1 omits the attribute.
    pub version: u8,
    /// Responder requires the Initiator's bootstrap key (mutual auth).
    pub qr_mutual: bool,
}

impl Default for AuthParams {
    fn default() -> Self {
        Self {
            capability: Capability::default(),
            version: dpp_core::constants::DPP_VERSION,
            qr_mutual: false,
        }
    }
}

/// Which end of the handshake this session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Initiator,
    Responder,
}

/// Handshake state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// Initiator sent a Request. `pending` is set after RESPONSE_PENDING.
    AwaitingResponse { pending: bool },
    /// Responder sent a full Response.
    AwaitingConfirm,
    /// Responder answered RESPONSE_PENDING and waits for the peer key.
    AwaitingPeerBootstrap,
    Authenticated,
    Failed(FailureReason),
}

/// What the Responder does with an Authentication Request.
#[derive(Debug)]
pub enum RequestOutcome {
    /// Send this full Response and wait for the Confirm.
    Respond(DppFrame),
    /// Send this RESPONSE_PENDING and wait for the Initiator's key.
    Pending(DppFrame),
    /// Send this NOT_COMPATIBLE Response. The session is already failed.
    NotCompatible(DppFrame),
}

/// What the Initiator does with an Authentication Response.
#[derive(Debug)]
pub enum ResponseOutcome {
    /// Send this Confirm. The session is authenticated.
    Authenticated(DppFrame),
    /// Responder is waiting for an out-of-band bootstrap.
    Pending,
    /// The session failed. Some failures still owe the peer a Confirm.
    Failed {
        reason: FailureReason,
        confirm: Option<DppFrame>,
    },
}

/// Outcome of a Confirm at the Responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Authenticated,
    Failed(FailureReason),
}

/// One authentication exchange with one peer.
pub struct AuthSession {
    side: Side,
    state: AuthState,
    curve: Curve,
    params: AuthParams,
    /// bI at the Initiator, bR at the Responder.
    own_bootstrap: Option<KeyPair>,
    /// BR at the Initiator, BI at the Responder (when known).
    peer_bootstrap: Option<PublicKey>,
    r_hash: [u8; 32],
    i_hash: Option<[u8; 32]>,
    protocol_key: KeyPair,
    peer_protocol_key: Option<PublicKey>,
    i_nonce: Zeroizing<Vec<u8>>,
    r_nonce: Zeroizing<Vec<u8>>,
    peer_capab: u8,
    own_role: Option<Role>,
    peer_version: u8,
    mutual: bool,
    mx: Zeroizing<Vec<u8>>,
    k1: Zeroizing<Vec<u8>>,
    k2: Zeroizing<Vec<u8>>,
    ke: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("side", &self.side)
            .field("state", &self.state)
            .field("curve", &self.curve)
            .field("own_role", &self.own_role)
            .field("mutual", &self.mutual)
            .finish_non_exhaustive()
    }
}

fn ecdh(
    faults: &FaultInjector,
    key: &KeyPair,
    peer: &PublicKey,
) -> Result<Zeroizing<Vec<u8>>, DppError> {
    faults.check(FaultPoint::Ecdh)?;
    key.ecdh(peer)
}

fn generate(faults: &FaultInjector, curve: Curve) -> Result<KeyPair, DppError> {
    faults.check(FaultPoint::GenerateKey)?;
    KeyPair::generate(curve)
}

fn hash32(bytes: &[u8]) -> Result<[u8; 32], CodecError> {
    bytes
        .try_into()
        .map_err(|_| CodecError::InvalidAttribute(AttrId::RBootstrapKeyHash))
}

/// Parse a protocol key, reporting a length that fits another curve as a
/// curve mismatch rather than a bad key.
fn parse_protocol_key(curve: Curve, xy: &[u8]) -> Result<PublicKey, DppError> {
    if xy.len() != 2 * curve.prime_len() {
        let actual = Curve::ALL
            .iter()
            .find(|c| 2 * c.prime_len() == xy.len())
            .map_or("unknown", |c| c.name());
        return Err(DppError::CurveMismatch {
            expected: curve.name(),
            actual,
        });
    }
    PublicKey::from_xy(curve, xy)
}

pub(crate) fn derive_k1(curve: Curve, mx: &[u8]) -> Result<Zeroizing<Vec<u8>>, DppError> {
    hkdf(curve, None, mx, K1_INFO, curve.hash_len())
}

pub(crate) fn derive_k2(curve: Curve, nx: &[u8]) -> Result<Zeroizing<Vec<u8>>, DppError> {
    hkdf(curve, None, nx, K2_INFO, curve.hash_len())
}

pub(crate) fn derive_ke(
    curve: Curve,
    i_nonce: &[u8],
    r_nonce: &[u8],
    mx: &[u8],
    nx: &[u8],
    lx: Option<&[u8]>,
) -> Result<Zeroizing<Vec<u8>>, DppError> {
    let salt = [i_nonce, r_nonce].concat();
    let mut ikm = Zeroizing::new([mx, nx].concat());
    if let Some(lx) = lx {
        ikm.extend_from_slice(lx);
    }
    let bk = hkdf_extract(curve, &salt, &ikm);
    hkdf_expand(curve, &bk, KE_INFO, curve.hash_len())
}

struct Transcript<'a> {
    i_nonce: &'a [u8],
    r_nonce: &'a [u8],
    pi: &'a PublicKey,
    pr: &'a PublicKey,
    bi: Option<&'a PublicKey>,
    br: &'a PublicKey,
}

impl Transcript<'_> {
    fn r_auth(&self, curve: Curve) -> Vec<u8> {
        let mut parts: Vec<&[u8]> = vec![self.i_nonce, self.r_nonce, self.pi.x(), self.pr.x()];
        if let Some(bi) = self.bi {
            parts.push(bi.x());
        }
        parts.push(self.br.x());
        parts.push(&[0u8]);
        hash_vector(curve, &parts)
    }

    fn i_auth(&self, curve: Curve) -> Vec<u8> {
        let mut parts: Vec<&[u8]> = vec![self.r_nonce, self.i_nonce, self.pr.x(), self.pi.x()];
        parts.push(self.br.x());
        if let Some(bi) = self.bi {
            parts.push(bi.x());
        }
        parts.push(&[1u8]);
        hash_vector(curve, &parts)
    }
}

fn push_version(attrs: &mut Attributes, version: u8) {
    if version >= 2 {
        attrs.push_u8(AttrId::ProtocolVersion, version);
    }
}

fn peer_version(attrs: &Attributes) -> u8 {
    attrs
        .get(AttrId::ProtocolVersion)
        .and_then(|v| v.first().copied())
        .unwrap_or(1)
}

impl AuthSession {
    /// Start a handshake as Initiator towards `peer`.
    ///
    /// `own` is the local bootstrap entry to advertise for mutual
    /// authentication; without it the exchange is Responder-only.
    pub fn initiate(
        own: Option<&BootstrapInfo>,
        peer: &BootstrapInfo,
        params: AuthParams,
        faults: &FaultInjector,
    ) -> Result<(Self, DppFrame), ProtocolError> {
        let curve = peer.curve();
        if let Some(own) = own {
            if own.curve() != curve {
                return Err(DppError::CurveMismatch {
                    expected: curve.name(),
                    actual: own.curve().name(),
                }
                .into());
            }
        }
        faults.check(FaultPoint::Alloc)?;
        let protocol_key = generate(faults, curve)?;
        let i_nonce = random_bytes(curve.nonce_len());
        let mx = ecdh(faults, &protocol_key, &peer.public)?;
        let k1 = derive_k1(curve, &mx)?;

        let r_hash = *peer.key_hash();
        let i_hash = own.map(|o| *o.key_hash());
        let mut clear = Attributes::new().with(AttrId::RBootstrapKeyHash, r_hash.to_vec());
        if let Some(h) = &i_hash {
            clear.push(AttrId::IBootstrapKeyHash, h.to_vec());
        }
        clear.push(AttrId::IProtocolKey, protocol_key.public().xy().to_vec());
        push_version(&mut clear, params.version);
        let mut inner = Attributes::new().with(AttrId::INonce, i_nonce.to_vec());
        inner.push_u8(AttrId::ICapabilities, params.capability.bits());
        let frame = build_frame(FrameType::AuthReq, clear, &k1, &inner, faults)?;

        debug!(curve = %curve, mutual = i_hash.is_some(), "auth request built");
        let session = Self {
            side: Side::Initiator,
            state: AuthState::AwaitingResponse { pending: false },
            curve,
            params,
            own_bootstrap: own.and_then(|o| o.key.clone()),
            peer_bootstrap: Some(peer.public.clone()),
            r_hash,
            i_hash,
            protocol_key,
            peer_protocol_key: None,
            i_nonce,
            r_nonce: Zeroizing::new(Vec::new()),
            peer_capab: 0,
            own_role: None,
            peer_version: 1,
            mutual: false,
            mx,
            k1,
            k2: Zeroizing::new(Vec::new()),
            ke: Zeroizing::new(Vec::new()),
        };
        Ok((session, frame))
    }

    /// Responder: handle an Authentication Request addressed to one of
    /// the own bootstrap keys in `bootstraps`.
    pub fn respond(
        bootstraps: &BootstrapManager,
        frame: &DppFrame,
        params: AuthParams,
        faults: &FaultInjector,
    ) -> Result<(Self, RequestOutcome), Dropped> {
        let attrs = &frame.attrs;
        let r_hash = hash32(attrs.require_len(AttrId::RBootstrapKeyHash, 32)?)?;
        let i_hash: Option<[u8; 32]> = match attrs.get(AttrId::IBootstrapKeyHash) {
            Some(h) => Some(
                h.try_into()
                    .map_err(|_| CodecError::InvalidAttribute(AttrId::IBootstrapKeyHash))?,
            ),
            None => None,
        };
        let (own, peer) = bootstraps.find_pair(i_hash.as_ref().map(|h| &h[..]), &r_hash);
        let own = own.ok_or(Dropped::NotForUs)?;
        let own_key = own.key.clone().ok_or(Dropped::NotForUs)?;
        let curve = own.curve();

        let pi = parse_protocol_key(curve, attrs.require(AttrId::IProtocolKey)?)
            .map_err(Dropped::Crypto)?;
        let mx = ecdh(faults, &own_key, &pi).map_err(Dropped::Crypto)?;
        let k1 = derive_k1(curve, &mx).map_err(Dropped::Crypto)?;
        let inner = open_frame(frame, &k1, faults).map_err(|e| match e {
            DppError::Codec(c) => Dropped::Malformed(c),
            other => Dropped::Crypto(other),
        })?;
        let i_nonce =
            Zeroizing::new(inner.require_len(AttrId::INonce, curve.nonce_len())?.to_vec());
        let peer_capab = inner.require_u8(AttrId::ICapabilities)?;

        let mut session = Self {
            side: Side::Responder,
            state: AuthState::AwaitingConfirm,
            curve,
            params,
            own_bootstrap: Some(own_key),
            peer_bootstrap: peer.map(|p| p.public.clone()),
            r_hash,
            i_hash: peer.map(|p| *p.key_hash()),
            protocol_key: generate(faults, curve).map_err(Dropped::Crypto)?,
            peer_protocol_key: Some(pi),
            i_nonce,
            r_nonce: Zeroizing::new(Vec::new()),
            peer_capab,
            own_role: None,
            peer_version: peer_version(attrs),
            mutual: false,
            mx,
            k1,
            k2: Zeroizing::new(Vec::new()),
            ke: Zeroizing::new(Vec::new()),
        };

        match negotiate_responder(params.capability, peer_capab) {
            Ok(role) => session.own_role = Some(role),
            Err(Negotiation::InvalidPeerCapability) => {
                return Err(CodecError::InvalidAttribute(AttrId::ICapabilities).into())
            }
            Err(Negotiation::NotCompatible) => {
                info!(peer_capab, "auth request: roles not compatible");
                let frame = session
                    .build_status_response(StatusCode::NotCompatible, faults)
                    .map_err(Dropped::Crypto)?;
                session.state = AuthState::Failed(FailureReason::NotCompatible);
                return Ok((session, RequestOutcome::NotCompatible(frame)));
            }
        }

        if params.qr_mutual && session.peer_bootstrap.is_none() {
            info!("auth request: waiting for initiator bootstrap key");
            let frame = session
                .build_status_response(StatusCode::ResponsePending, faults)
                .map_err(Dropped::Crypto)?;
            session.state = AuthState::AwaitingPeerBootstrap;
            return Ok((session, RequestOutcome::Pending(frame)));
        }

        let frame = session.build_response(faults).map_err(Dropped::Crypto)?;
        Ok((session, RequestOutcome::Respond(frame)))
    }

    /// Responder: the Initiator's bootstrap key became known after a
    /// RESPONSE_PENDING. Returns the full Response to send.
    pub fn resume_with_peer(
        &mut self,
        peer: &BootstrapInfo,
        faults: &FaultInjector,
    ) -> Result<DppFrame, ProtocolError> {
        if self.state != AuthState::AwaitingPeerBootstrap {
            return Err(ProtocolError::InvalidState("not waiting for a peer bootstrap"));
        }
        if peer.curve() != self.curve {
            return Err(DppError::CurveMismatch {
                expected: self.curve.name(),
                actual: peer.curve().name(),
            }
            .into());
        }
        self.peer_bootstrap = Some(peer.public.clone());
        self.i_hash = Some(*peer.key_hash());
        let frame = self.build_response(faults)?;
        self.state = AuthState::AwaitingConfirm;
        Ok(frame)
    }

    /// Status-only Response: R-nonce and R-auth are never produced.
    fn build_status_response(
        &self,
        status: StatusCode,
        faults: &FaultInjector,
    ) -> Result<DppFrame, DppError> {
        faults.check(FaultPoint::Alloc)?;
        let mut clear = Attributes::new();
        clear.push_u8(AttrId::Status, status.as_u8());
        clear.push(AttrId::RBootstrapKeyHash, self.r_hash.to_vec());
        if let Some(h) = &self.i_hash {
            clear.push(AttrId::IBootstrapKeyHash, h.to_vec());
        }
        push_version(&mut clear, self.params.version);
        let mut inner = Attributes::new().with(AttrId::INonce, self.i_nonce.to_vec());
        inner.push_u8(AttrId::RCapabilities, self.params.capability.bits());
        build_frame(FrameType::AuthResp, clear, &self.k1, &inner, faults)
    }

    fn build_response(&mut self, faults: &FaultInjector) -> Result<DppFrame, DppError> {
        faults.check(FaultPoint::Alloc)?;
        let curve = self.curve;
        let role = self.own_role.ok_or(DppError::AuthFailure("role not negotiated".into()))?;
        let pi = self
            .peer_protocol_key
            .clone()
            .ok_or(DppError::AuthFailure("missing initiator protocol key".into()))?;
        let br_key = self
            .own_bootstrap
            .clone()
            .ok_or(DppError::AuthFailure("missing own bootstrap key".into()))?;

        let r_nonce = random_bytes(curve.nonce_len());
        let nx = ecdh(faults, &self.protocol_key, &pi)?;
        let lx = match &self.peer_bootstrap {
            Some(bi) => {
                faults.check(FaultPoint::Ecdh)?;
                let sum =
                    scalar_add(curve, br_key.secret_bytes(), self.protocol_key.secret_bytes())?;
                Some(Zeroizing::new(bi.mul_scalar(&sum)?.x().to_vec()))
            }
            None => None,
        };
        let k2 = derive_k2(curve, &nx)?;
        let ke = derive_ke(
            curve,
            &self.i_nonce,
            &r_nonce,
            &self.mx,
            &nx,
            lx.as_deref().map(|v| v.as_slice()),
        )?;

        let r_auth = Transcript {
            i_nonce: &self.i_nonce,
            r_nonce: &r_nonce,
            pi: &pi,
            pr: self.protocol_key.public(),
            bi: self.peer_bootstrap.as_ref(),
            br: br_key.public(),
        }
        .r_auth(curve);
        let secondary = seal(
            &ke,
            &[],
            &Attributes::new().with(AttrId::RAuthTag, r_auth),
            faults,
        )?;

        let mut clear = Attributes::new();
        clear.push_u8(AttrId::Status, StatusCode::Ok.as_u8());
        clear.push(AttrId::RBootstrapKeyHash, self.r_hash.to_vec());
        if let Some(h) = &self.i_hash {
            clear.push(AttrId::IBootstrapKeyHash, h.to_vec());
        }
        clear.push(AttrId::RProtocolKey, self.protocol_key.public().xy().to_vec());
        push_version(&mut clear, self.params.version);

        let mut inner = Attributes::new()
            .with(AttrId::RNonce, r_nonce.to_vec())
            .with(AttrId::INonce, self.i_nonce.to_vec());
        inner.push_u8(AttrId::RCapabilities, role.bits());
        inner.push(AttrId::WrappedData, secondary);
        let frame = build_frame(FrameType::AuthResp, clear, &k2, &inner, faults)?;

        self.mutual = lx.is_some();
        self.r_nonce = r_nonce;
        self.k2 = k2;
        self.ke = ke;
        debug!(curve = %curve, mutual = self.mutual, role = ?role, "auth response built");
        Ok(frame)
    }

    /// Initiator: handle an Authentication Response.
    pub fn rx_response(
        &mut self,
        frame: &DppFrame,
        faults: &FaultInjector,
    ) -> Result<ResponseOutcome, Dropped> {
        let pending = match self.state {
            AuthState::AwaitingResponse { pending } if self.side == Side::Initiator => pending,
            _ => return Err(Dropped::Unexpected),
        };
        let attrs = &frame.attrs;
        let status = attrs.require_u8(AttrId::Status)?;
        let r_hash = attrs.require_len(AttrId::RBootstrapKeyHash, 32)?;
        if r_hash != self.r_hash {
            return Err(Dropped::NotForUs);
        }
        if let Some(h) = attrs.get(AttrId::IBootstrapKeyHash) {
            if self.i_hash.map_or(true, |own| own[..] != *h) {
                return Err(Dropped::NotForUs);
            }
        }
        let status = StatusCode::try_from(status)
            .map_err(|_| CodecError::InvalidAttribute(AttrId::Status))?;

        match status {
            StatusCode::Ok => Ok(self.complete_response(frame, faults)),
            StatusCode::NotCompatible | StatusCode::ResponsePending => {
                if status == StatusCode::ResponsePending && pending {
                    return Err(Dropped::Unexpected);
                }
                let inner = match open_frame(frame, &self.k1, faults) {
                    Ok(inner) => inner,
                    Err(e) => return Ok(self.fail_response(FailureReason::from_crypto(&e, "k1"))),
                };
                let echoed = inner.require(AttrId::INonce)?;
                if echoed != self.i_nonce.as_slice() {
                    return Ok(self.fail_response(FailureReason::NonceMismatch));
                }
                self.peer_capab = inner.require_u8(AttrId::RCapabilities)?;
                self.peer_version = peer_version(attrs);
                if status == StatusCode::NotCompatible {
                    info!(peer_capab = self.peer_capab, "peer reported not compatible");
                    Ok(self.fail_response(FailureReason::NotCompatible))
                } else {
                    info!("peer waiting for our bootstrap key");
                    self.state = AuthState::AwaitingResponse { pending: true };
                    Ok(ResponseOutcome::Pending)
                }
            }
            other => Ok(self.fail_response(FailureReason::PeerStatus(other))),
        }
    }

    fn fail_response(&mut self, reason: FailureReason) -> ResponseOutcome {
        warn!(%reason, "authentication failed");
        self.state = AuthState::Failed(reason.clone());
        ResponseOutcome::Failed {
            reason,
            confirm: None,
        }
    }

    fn complete_response(&mut self, frame: &DppFrame, faults: &FaultInjector) -> ResponseOutcome {
        match self.try_complete_response(frame, faults) {
            Ok(outcome) => outcome,
            Err(reason) => self.fail_response(reason),
        }
    }

    fn try_complete_response(
        &mut self,
        frame: &DppFrame,
        faults: &FaultInjector,
    ) -> Result<ResponseOutcome, FailureReason> {
        let curve = self.curve;
        let attrs = &frame.attrs;
        let pr_bytes = attrs
            .require(AttrId::RProtocolKey)
            .map_err(FailureReason::Malformed)?;
        let pr = parse_protocol_key(curve, pr_bytes)
            .map_err(|e| FailureReason::from_crypto(&e, "k2"))?;
        let nx = ecdh(faults, &self.protocol_key, &pr)
            .map_err(|e| FailureReason::from_crypto(&e, "k2"))?;
        let k2 = derive_k2(curve, &nx).map_err(|e| FailureReason::from_crypto(&e, "k2"))?;
        let inner =
            open_frame(frame, &k2, faults).map_err(|e| FailureReason::from_crypto(&e, "k2"))?;

        let r_nonce = inner
            .require_len(AttrId::RNonce, curve.nonce_len())
            .map_err(FailureReason::Malformed)?
            .to_vec();
        let i_nonce = inner.require(AttrId::INonce).map_err(FailureReason::Malformed)?;
        if i_nonce != self.i_nonce.as_slice() {
            return Err(FailureReason::NonceMismatch);
        }
        let r_capab = inner
            .require_u8(AttrId::RCapabilities)
            .map_err(FailureReason::Malformed)?;
        let role = match negotiate_initiator(self.params.capability, r_capab) {
            Ok(role) => role,
            Err(Negotiation::InvalidPeerCapability) => {
                return Err(FailureReason::Malformed(CodecError::InvalidAttribute(
                    AttrId::RCapabilities,
                )))
            }
            Err(Negotiation::NotCompatible) => return Err(FailureReason::NotCompatible),
        };

        let br = self
            .peer_bootstrap
            .clone()
            .ok_or(FailureReason::InvalidPeerKey)?;
        let mutual = attrs.contains(AttrId::IBootstrapKeyHash);
        let lx = if mutual {
            let bi = self.own_bootstrap.as_ref().ok_or(FailureReason::InvalidPeerKey)?;
            let sum = br.add(&pr).map_err(|e| FailureReason::from_crypto(&e, "ke"))?;
            Some(ecdh(faults, bi, &sum).map_err(|e| FailureReason::from_crypto(&e, "ke"))?)
        } else {
            None
        };
        let ke = derive_ke(
            curve,
            &self.i_nonce,
            &r_nonce,
            &self.mx,
            &nx,
            lx.as_deref().map(|v| v.as_slice()),
        )
        .map_err(|e| FailureReason::from_crypto(&e, "ke"))?;

        let secondary = inner
            .require(AttrId::WrappedData)
            .map_err(FailureReason::Malformed)?;
        let secondary = open(&ke, &[], secondary, faults)
            .map_err(|e| FailureReason::from_crypto(&e, "ke"))?;
        let r_auth = secondary
            .require(AttrId::RAuthTag)
            .map_err(FailureReason::Malformed)?;

        let bi_public = self.own_bootstrap.as_ref().map(|k| k.public().clone());
        let transcript = Transcript {
            i_nonce: &self.i_nonce,
            r_nonce: &r_nonce,
            pi: self.protocol_key.public(),
            pr: &pr,
            bi: if mutual { bi_public.as_ref() } else { None },
            br: &br,
        };
        if r_auth != transcript.r_auth(curve).as_slice() {
            warn!("R-auth mismatch");
            let confirm = self.build_failure_confirm(&k2, &r_nonce, faults).ok();
            self.state = AuthState::Failed(FailureReason::RAuthMismatch);
            return Ok(ResponseOutcome::Failed {
                reason: FailureReason::RAuthMismatch,
                confirm,
            });
        }
        let i_auth = transcript.i_auth(curve);

        let mut clear = Attributes::new();
        clear.push_u8(AttrId::Status, StatusCode::Ok.as_u8());
        clear.push(AttrId::RBootstrapKeyHash, self.r_hash.to_vec());
        if mutual {
            if let Some(h) = &self.i_hash {
                clear.push(AttrId::IBootstrapKeyHash, h.to_vec());
            }
        }
        let confirm = faults
            .check(FaultPoint::Alloc)
            .and_then(|()| {
                build_frame(
                    FrameType::AuthConf,
                    clear,
                    &ke,
                    &Attributes::new().with(AttrId::IAuthTag, i_auth),
                    faults,
                )
            })
            .map_err(|e| FailureReason::from_crypto(&e, "ke"))?;

        self.peer_protocol_key = Some(pr);
        self.r_nonce = Zeroizing::new(r_nonce);
        self.peer_capab = r_capab;
        self.own_role = Some(role);
        self.peer_version = peer_version(attrs);
        self.mutual = mutual;
        self.k2 = k2;
        self.ke = ke;
        self.state = AuthState::Authenticated;
        info!(role = ?role, mutual, "authentication succeeded (initiator)");
        Ok(ResponseOutcome::Authenticated(confirm))
    }

    fn build_failure_confirm(
        &self,
        k2: &[u8],
        r_nonce: &[u8],
        faults: &FaultInjector,
    ) -> Result<DppFrame, DppError> {
        let mut clear = Attributes::new();
        clear.push_u8(AttrId::Status, StatusCode::AuthFailure.as_u8());
        clear.push(AttrId::RBootstrapKeyHash, self.r_hash.to_vec());
        build_frame(
            FrameType::AuthConf,
            clear,
            k2,
            &Attributes::new().with(AttrId::RNonce, r_nonce.to_vec()),
            faults,
        )
    }

    /// Responder: handle an Authentication Confirm. A malformed Confirm
    /// is terminal since there is no later message to wait for.
    pub fn rx_confirm(
        &mut self,
        frame: &DppFrame,
        faults: &FaultInjector,
    ) -> Result<ConfirmOutcome, Dropped> {
        if self.side != Side::Responder || self.state != AuthState::AwaitingConfirm {
            return Err(Dropped::Unexpected);
        }
        let r_hash = frame.attrs.require_len(AttrId::RBootstrapKeyHash, 32)?;
        if r_hash != self.r_hash {
            return Err(Dropped::NotForUs);
        }
        let outcome = match self.check_confirm(frame, faults) {
            Ok(()) => {
                info!(
                    role = ?self.own_role,
                    mutual = self.mutual,
                    "authentication succeeded (responder)"
                );
                self.state = AuthState::Authenticated;
                ConfirmOutcome::Authenticated
            }
            Err(reason) => {
                warn!(%reason, "authentication confirm rejected");
                self.state = AuthState::Failed(reason.clone());
                ConfirmOutcome::Failed(reason)
            }
        };
        Ok(outcome)
    }

    fn check_confirm(&self, frame: &DppFrame, faults: &FaultInjector) -> Result<(), FailureReason> {
        let status = frame
            .attrs
            .require_u8(AttrId::Status)
            .map_err(FailureReason::Malformed)?;
        let status = StatusCode::try_from(status)
            .map_err(|_| FailureReason::Malformed(CodecError::InvalidAttribute(AttrId::Status)))?;
        if status != StatusCode::Ok {
            // The failure variant is wrapped with k2 and echoes R-nonce.
            let inner = open_frame(frame, &self.k2, faults)
                .map_err(|e| FailureReason::from_crypto(&e, "k2"))?;
            let r_nonce = inner.require(AttrId::RNonce).map_err(FailureReason::Malformed)?;
            if r_nonce != self.r_nonce.as_slice() {
                return Err(FailureReason::NonceMismatch);
            }
            return Err(FailureReason::PeerStatus(status));
        }
        let inner =
            open_frame(frame, &self.ke, faults).map_err(|e| FailureReason::from_crypto(&e, "ke"))?;
        let i_auth = inner.require(AttrId::IAuthTag).map_err(FailureReason::Malformed)?;
        let (Some(pi), Some(own)) = (&self.peer_protocol_key, &self.own_bootstrap) else {
            return Err(FailureReason::InvalidPeerKey);
        };
        let expected = Transcript {
            i_nonce: &self.i_nonce,
            r_nonce: &self.r_nonce,
            pi,
            pr: self.protocol_key.public(),
            bi: if self.mutual { self.peer_bootstrap.as_ref() } else { None },
            br: own.public(),
        }
        .i_auth(self.curve);
        if i_auth != expected.as_slice() {
            return Err(FailureReason::IAuthMismatch);
        }
        Ok(())
    }

    /// Mark the session failed (timeouts, aborts).
    pub fn fail(&mut self, reason: FailureReason) {
        self.state = AuthState::Failed(reason);
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == AuthState::Authenticated
    }

    pub fn curve(&self) -> Curve {
        self.curve
    }

    /// Session key for the configuration exchange. Empty until derived.
    pub fn ke(&self) -> &[u8] {
        &self.ke
    }

    pub fn own_role(&self) -> Option<Role> {
        self.own_role
    }

    /// Our ephemeral key. An Enrollee's becomes its netAccessKey.
    pub fn protocol_key(&self) -> &KeyPair {
        &self.protocol_key
    }

    pub fn peer_protocol_key(&self) -> Option<&PublicKey> {
        self.peer_protocol_key.as_ref()
    }

    /// Version the peer announced, 1 when it sent none.
    pub fn peer_version(&self) -> u8 {
        self.peer_version
    }

    /// Whether the Responder proved knowledge of both bootstrap keys.
    pub fn is_mutual(&self) -> bool {
        self.mutual
    }

    /// Hash of the Responder bootstrap key this session is bound to.
    pub fn r_hash(&self) -> &[u8; 32] {
        &self.r_hash
    }

    /// Hash of the Initiator bootstrap key, when one was named.
    pub fn i_hash(&self) -> Option<&[u8; 32]> {
        self.i_hash.as_ref()
    }

    /// Hash of the peer's bootstrap key from this side's point of view.
    pub fn peer_hash(&self) -> Option<&[u8; 32]> {
        match self.side {
            Side::Initiator => Some(&self.r_hash),
            Side::Responder => self.i_hash.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpp_core::bootstrap::{BootstrapParams, BootstrapType};

    struct Pair {
        initiator: BootstrapManager,
        responder: BootstrapManager,
        r_id: u32,
        i_own: u32,
    }

    /// Responder publishes a QR key; Initiator scans it and owns a key of
    /// its own that the Responder may or may not know.
    fn setup(curve: Curve, responder_knows_initiator: bool) -> Pair {
        let mut initiator = BootstrapManager::new();
        let mut responder = BootstrapManager::new();
        let params = BootstrapParams {
            kind: Some(BootstrapType::QrCode),
            curve,
            ..Default::default()
        };
        let r_own = responder.generate(params.clone()).unwrap();
        let r_uri = responder.get_uri(r_own).unwrap();
        let r_id = initiator.parse_uri(&r_uri).unwrap();
        let i_own = initiator.generate(params).unwrap();
        if responder_knows_initiator {
            let i_uri = initiator.get_uri(i_own).unwrap();
            responder.parse_uri(&i_uri).unwrap();
        }
        Pair {
            initiator,
            responder,
            r_id,
            i_own,
        }
    }

    fn configurator() -> AuthParams {
        AuthParams {
            capability: Capability::Configurator,
            ..Default::default()
        }
    }

    fn start(pair: &Pair, mutual: bool) -> (AuthSession, DppFrame) {
        let own = mutual.then(|| pair.initiator.get(pair.i_own).unwrap());
        let peer = pair.initiator.get(pair.r_id).unwrap();
        AuthSession::initiate(own, peer, configurator(), &FaultInjector::disabled()).unwrap()
    }

    fn respond(pair: &Pair, req: &DppFrame, params: AuthParams) -> (AuthSession, RequestOutcome) {
        AuthSession::respond(&pair.responder, req, params, &FaultInjector::disabled()).unwrap()
    }

    fn run(curve: Curve, mutual: bool) {
        let faults = FaultInjector::disabled();
        let pair = setup(curve, mutual);
        let (mut init, req) = start(&pair, mutual);
        let (mut resp, outcome) = respond(&pair, &req, AuthParams::default());
        let RequestOutcome::Respond(resp_frame) = outcome else {
            panic!("expected full response");
        };
        let ResponseOutcome::Authenticated(conf) = init.rx_response(&resp_frame, &faults).unwrap()
        else {
            panic!("initiator did not authenticate");
        };
        assert_eq!(resp.rx_confirm(&conf, &faults).unwrap(), ConfirmOutcome::Authenticated);
        assert_eq!(init.ke(), resp.ke());
        assert_eq!(init.own_role(), Some(Role::Configurator));
        assert_eq!(resp.own_role(), Some(Role::Enrollee));
        assert_eq!(init.is_mutual(), mutual);
        assert_eq!(resp.is_mutual(), mutual);
        assert_eq!(init.peer_version(), 2);
    }

    #[test]
    fn handshake_all_curves() {
        for curve in Curve::ALL {
            run(curve, false);
        }
    }

    #[test]
    fn mutual_handshake() {
        run(Curve::P256, true);
        run(Curve::P384, true);
        run(Curve::BrainpoolP512r1, true);
    }

    #[test]
    fn duplicate_frames_do_not_advance_state() {
        let faults = FaultInjector::disabled();
        let pair = setup(Curve::P256, false);
        let (mut init, req) = start(&pair, false);
        let (mut resp, RequestOutcome::Respond(resp_frame)) =
            respond(&pair, &req, AuthParams::default())
        else {
            panic!("expected full response");
        };
        let ResponseOutcome::Authenticated(conf) = init.rx_response(&resp_frame, &faults).unwrap()
        else {
            panic!("initiator did not authenticate");
        };
        let ke = init.ke().to_vec();
        assert_eq!(init.rx_response(&resp_frame, &faults).unwrap_err(), Dropped::Unexpected);
        assert_eq!(init.ke(), ke.as_slice());

        resp.rx_confirm(&conf, &faults).unwrap();
        assert_eq!(resp.rx_confirm(&conf, &faults).unwrap_err(), Dropped::Unexpected);
        assert!(resp.is_authenticated());
    }

    #[test]
    fn incompatible_roles_get_status_only_response() {
        let faults = FaultInjector::disabled();
        let pair = setup(Curve::P256, false);
        let (mut init, req) = start(&pair, false);
        let (resp, outcome) = respond(&pair, &req, configurator());
        let RequestOutcome::NotCompatible(frame) = outcome else {
            panic!("expected NOT_COMPATIBLE");
        };
        assert_eq!(frame.attrs.get(AttrId::Status), Some(&[1u8][..]));
        assert!(!frame.attrs.contains(AttrId::RProtocolKey));
        assert_eq!(resp.state(), &AuthState::Failed(FailureReason::NotCompatible));
        match init.rx_response(&frame, &faults).unwrap() {
            ResponseOutcome::Failed { reason, confirm } => {
                assert_eq!(reason, FailureReason::NotCompatible);
                assert!(confirm.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
        // First status-bearing response decided it; later ones are ignored.
        assert_eq!(init.rx_response(&frame, &faults).unwrap_err(), Dropped::Unexpected);
    }

    #[test]
    fn response_pending_then_resume() {
        let faults = FaultInjector::disabled();
        let mut pair = setup(Curve::P256, false);
        let (mut init, req) = start(&pair, true);
        let params = AuthParams {
            qr_mutual: true,
            ..Default::default()
        };
        let (mut resp, RequestOutcome::Pending(pending)) = respond(&pair, &req, params) else {
            panic!("expected RESPONSE_PENDING");
        };
        assert!(matches!(init.rx_response(&pending, &faults).unwrap(), ResponseOutcome::Pending));
        assert_eq!(init.rx_response(&pending, &faults).unwrap_err(), Dropped::Unexpected);

        // Operator scans the Initiator's QR code.
        let i_uri = pair.initiator.get_uri(pair.i_own).unwrap();
        let peer_id = pair.responder.parse_uri(&i_uri).unwrap();
        let full = resp
            .resume_with_peer(pair.responder.get(peer_id).unwrap(), &faults)
            .unwrap();
        let ResponseOutcome::Authenticated(conf) = init.rx_response(&full, &faults).unwrap() else {
            panic!("initiator did not authenticate");
        };
        assert_eq!(resp.rx_confirm(&conf, &faults).unwrap(), ConfirmOutcome::Authenticated);
        assert!(init.is_mutual() && resp.is_mutual());
    }

    #[test]
    fn tampered_confirm_is_i_auth_failure() {
        let faults = FaultInjector::disabled();
        let pair = setup(Curve::P256, false);
        let (mut init, req) = start(&pair, false);
        let (mut resp, RequestOutcome::Respond(resp_frame)) =
            respond(&pair, &req, AuthParams::default())
        else {
            panic!("expected full response");
        };
        init.rx_response(&resp_frame, &faults).unwrap();

        // A Confirm sealed under the right key but carrying a wrong tag.
        let mut clear = Attributes::new();
        clear.push_u8(AttrId::Status, 0);
        clear.push(AttrId::RBootstrapKeyHash, resp.r_hash().to_vec());
        let bogus = build_frame(
            FrameType::AuthConf,
            clear,
            resp.ke(),
            &Attributes::new().with(AttrId::IAuthTag, vec![0u8; 32]),
            &faults,
        )
        .unwrap();
        assert_eq!(
            resp.rx_confirm(&bogus, &faults).unwrap(),
            ConfirmOutcome::Failed(FailureReason::IAuthMismatch)
        );
    }

    #[test]
    fn malformed_confirm_is_terminal() {
        let faults = FaultInjector::disabled();
        let pair = setup(Curve::P256, false);
        let (_init, req) = start(&pair, false);
        let (mut resp, _) = respond(&pair, &req, AuthParams::default());
        let frame = DppFrame::new(
            FrameType::AuthConf,
            Attributes::new().with(AttrId::RBootstrapKeyHash, resp.r_hash().to_vec()),
        );
        assert_eq!(
            resp.rx_confirm(&frame, &faults).unwrap(),
            ConfirmOutcome::Failed(FailureReason::Malformed(CodecError::MissingAttribute(
                AttrId::Status
            )))
        );
    }

    #[test]
    fn request_for_unknown_key_is_not_for_us() {
        let pair = setup(Curve::P256, false);
        let (_init, req) = start(&pair, false);
        let other = BootstrapManager::new();
        assert_eq!(
            AuthSession::respond(&other, &req, AuthParams::default(), &FaultInjector::disabled())
                .unwrap_err(),
            Dropped::NotForUs
        );
    }

    #[test]
    fn protocol_key_on_wrong_curve_is_curve_mismatch() {
        let pair = setup(Curve::P256, false);
        let (_init, req) = start(&pair, false);
        let mut attrs = Attributes::new();
        for attr in req.attrs.iter() {
            let value = if attr.id == AttrId::IProtocolKey {
                vec![0u8; 96]
            } else {
                attr.value.clone()
            };
            attrs.push(attr.id, value);
        }
        let err = AuthSession::respond(
            &pair.responder,
            &DppFrame::new(FrameType::AuthReq, attrs),
            AuthParams::default(),
            &FaultInjector::disabled(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            Dropped::Crypto(DppError::CurveMismatch {
                expected: "prime256v1",
                actual: "secp384r1"
            })
        );
    }

    #[test]
    fn injected_alloc_failure_aborts_cleanly() {
        let faults = FaultInjector::enabled();
        faults.arm(FaultPoint::Alloc, 1);
        let pair = setup(Curve::P256, false);
        let own = None;
        let peer = pair.initiator.get(pair.r_id).unwrap();
        let err = AuthSession::initiate(own, peer, configurator(), &faults).unwrap_err();
        assert_eq!(err, ProtocolError::Core(DppError::InjectedFault(FaultPoint::Alloc)));
    }
}
