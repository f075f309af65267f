//! PKEX: bootstrapping from a shared code instead of a QR scan.
//!
//! ```text
//! Initiator                                     Responder
//!   M = X + Qi     -- Exchange Req {group, id, M} -->
//!                                               X' = M - Qi, N = Y + Qr
//!                  <-- Exchange Resp {status, N} --
//!   Y' = N - Qr, z = HKDF(<>, M.x|N.x|code, K.x)
//!                  -- Commit-Reveal Req {A, u}(z) -->
//!                  <-- Commit-Reveal Resp {B, v}(z) --
//! ```
//!
//! Qi and Qr bind the code (and identifier) to fixed per-role curve
//! elements. A wrong code yields a different z, so it is detected at the
//! first wrapped message as a possible code mismatch.

use std::collections::HashMap;

use dpp_core::attributes::{AttrId, Attributes};
use dpp_core::bootstrap::BootstrapInfo;
use dpp_core::constants::DPP_VERSION;
use dpp_core::crypto::{
    hash_to_element, hash_vector, hkdf, hmac, scalar_from_digest, Curve, KeyPair, PublicKey,
};
use dpp_core::errors::{CodecError, DppError, StatusCode};
use dpp_core::fault::{FaultInjector, FaultPoint};
use dpp_core::frame::{DppFrame, FrameType};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::auth::Side;
use crate::errors::{Dropped, FailureReason, ProtocolError};
use crate::wrapped::{build_frame, open_frame};

const INITIATOR_ELEMENT: &[u8] = b"DPP PKEX initiator element";
const RESPONDER_ELEMENT: &[u8] = b"DPP PKEX responder element";

/// The shared secret and its optional identifier.
#[derive(Clone)]
pub struct PkexCode {
    pub identifier: Option<String>,
    pub code: Zeroizing<String>,
}

impl PkexCode {
    pub fn new(identifier: Option<&str>, code: &str) -> Self {
        Self {
            identifier: identifier.map(str::to_string),
            code: Zeroizing::new(code.to_string()),
        }
    }

    fn hash_parts(&self) -> Vec<&[u8]> {
        let mut parts: Vec<&[u8]> = Vec::with_capacity(2);
        if let Some(id) = &self.identifier {
            parts.push(id.as_bytes());
        }
        parts.push(self.code.as_bytes());
        parts
    }

    /// `H([identifier |] code) * element`
    fn role_point(&self, curve: Curve, label: &[u8]) -> Result<PublicKey, DppError> {
        let element = hash_to_element(curve, label)?;
        let digest = hash_vector(curve, &self.hash_parts());
        let scalar = scalar_from_digest(curve, &digest)?;
        element.mul_scalar(&scalar)
    }
}

impl std::fmt::Debug for PkexCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkexCode")
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PkexState {
    ExchangeSent,
    ExchangeReceived,
    CommitRevealSent,
    Done,
    Failed(FailureReason),
}

/// Result of a received PKEX message that changed state.
#[derive(Debug, Clone)]
pub enum PkexOutcome {
    Send(DppFrame),
    /// `frame` is the final response, if this side sends one.
    Done {
        frame: Option<DppFrame>,
        peer_bootstrap: PublicKey,
    },
    Failed(FailureReason),
}

/// Responder's answer to an Exchange Request.
#[derive(Debug)]
pub enum PkexRequestOutcome {
    Respond(Box<PkexSession>, DppFrame),
    /// Requested group differs from ours. No session is created.
    BadGroup(DppFrame),
}

pub struct PkexSession {
    side: Side,
    state: PkexState,
    curve: Curve,
    code: PkexCode,
    own_bootstrap: KeyPair,
    ephemeral: KeyPair,
    /// X for the Initiator, X' for the Responder.
    x_point: Option<PublicKey>,
    /// Y for the Responder, Y' for the Initiator.
    y_point: Option<PublicKey>,
    m: Vec<u8>,
    z: Zeroizing<Vec<u8>>,
    peer_version: u8,
    peer_bootstrap: Option<PublicKey>,
    last_sent: Option<DppFrame>,
}

impl std::fmt::Debug for PkexSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkexSession")
            .field("side", &self.side)
            .field("state", &self.state)
            .field("curve", &self.curve)
            .field("code", &self.code)
            .finish_non_exhaustive()
    }
}

fn generate(faults: &FaultInjector, curve: Curve) -> Result<KeyPair, DppError> {
    faults.check(FaultPoint::GenerateKey)?;
    KeyPair::generate(curve)
}

fn ecdh(
    faults: &FaultInjector,
    key: &KeyPair,
    peer: &PublicKey,
) -> Result<Zeroizing<Vec<u8>>, DppError> {
    faults.check(FaultPoint::Ecdh)?;
    key.ecdh(peer)
}

fn derive_z(
    curve: Curve,
    m: &[u8],
    n: &[u8],
    code: &str,
    kx: &[u8],
) -> Result<Zeroizing<Vec<u8>>, DppError> {
    let mut info = Vec::with_capacity(m.len() + n.len() + code.len());
    info.extend_from_slice(m);
    info.extend_from_slice(n);
    info.extend_from_slice(code.as_bytes());
    hkdf(curve, None, kx, &info, curve.hash_len())
}

fn own_key(own: &BootstrapInfo) -> Result<&KeyPair, ProtocolError> {
    own.key.as_ref().ok_or(ProtocolError::NotOwnKey(own.id))
}

fn x_coord(xy: &[u8], curve: Curve) -> &[u8] {
    &xy[..curve.prime_len().min(xy.len())]
}

impl PkexSession {
    /// Start as Initiator with the own PKEX bootstrap key.
    pub fn initiate(
        own: &BootstrapInfo,
        code: PkexCode,
        faults: &FaultInjector,
    ) -> Result<(Self, DppFrame), ProtocolError> {
        let own_bootstrap = own_key(own)?.clone();
        let curve = own_bootstrap.curve();
        faults.check(FaultPoint::Alloc)?;
        let ephemeral = generate(faults, curve)?;
        let qi = code.role_point(curve, INITIATOR_ELEMENT)?;
        let m = ephemeral.public().add(&qi)?;

        let mut attrs = Attributes::new();
        attrs.push_u8(AttrId::ProtocolVersion, DPP_VERSION);
        attrs.push_u16(AttrId::FiniteCyclicGroup, curve.ike_group());
        if let Some(id) = &code.identifier {
            attrs.push(AttrId::CodeIdentifier, id.as_bytes());
        }
        attrs.push(AttrId::EncryptedKey, m.xy());
        let frame = DppFrame::new(FrameType::PkexExchReq, attrs);
        info!(curve = curve.name(), identifier = ?code.identifier, "PKEX exchange request");

        let session = Self {
            side: Side::Initiator,
            state: PkexState::ExchangeSent,
            curve,
            code,
            own_bootstrap,
            x_point: Some(ephemeral.public().clone()),
            ephemeral,
            y_point: None,
            m: m.xy().to_vec(),
            z: Zeroizing::new(Vec::new()),
            peer_version: 1,
            peer_bootstrap: None,
            last_sent: Some(frame.clone()),
        };
        Ok((session, frame))
    }

    /// Answer an Exchange Request addressed to `code`.
    pub fn respond(
        own: &BootstrapInfo,
        code: &PkexCode,
        frame: &DppFrame,
        faults: &FaultInjector,
    ) -> Result<PkexRequestOutcome, Dropped> {
        if frame.frame_type != FrameType::PkexExchReq {
            return Err(Dropped::Unexpected);
        }
        let own_bootstrap = own.key.clone().ok_or(Dropped::NotForUs)?;
        let curve = own_bootstrap.curve();
        let attrs = &frame.attrs;
        let group = attrs.require_u16(AttrId::FiniteCyclicGroup)?;
        let peer_id = attrs
            .get(AttrId::CodeIdentifier)
            .map(|id| {
                std::str::from_utf8(id)
                    .map_err(|_| CodecError::InvalidAttribute(AttrId::CodeIdentifier))
            })
            .transpose()?;
        if peer_id != code.identifier.as_deref() {
            debug!(?peer_id, "PKEX code identifier does not match");
            return Err(Dropped::NotForUs);
        }
        let m_raw = attrs.require(AttrId::EncryptedKey)?;
        let peer_version = attrs
            .get(AttrId::ProtocolVersion)
            .and_then(|v| v.first().copied())
            .unwrap_or(1);

        if group != curve.ike_group() {
            warn!(own = curve.ike_group(), peer = group, "PKEX group mismatch");
            let mut resp = Attributes::new();
            resp.push_u8(AttrId::Status, StatusCode::BadGroup.as_u8());
            resp.push_u16(AttrId::FiniteCyclicGroup, curve.ike_group());
            return Ok(PkexRequestOutcome::BadGroup(DppFrame::new(
                FrameType::PkexExchResp,
                resp,
            )));
        }
        if m_raw.len() != 2 * curve.prime_len() {
            return Err(CodecError::InvalidAttribute(AttrId::EncryptedKey).into());
        }

        let build = || -> Result<(Self, DppFrame), DppError> {
            faults.check(FaultPoint::Alloc)?;
            let m = PublicKey::from_xy(curve, m_raw)?;
            let qi = code.role_point(curve, INITIATOR_ELEMENT)?;
            let x_prime = m.sub(&qi)?;
            let ephemeral = generate(faults, curve)?;
            let qr = code.role_point(curve, RESPONDER_ELEMENT)?;
            let n = ephemeral.public().add(&qr)?;
            let kx = ecdh(faults, &ephemeral, &x_prime)?;
            let z = derive_z(curve, m.x(), n.x(), &code.code, &kx)?;

            let mut resp = Attributes::new();
            resp.push_u8(AttrId::Status, StatusCode::Ok.as_u8());
            resp.push_u8(AttrId::ProtocolVersion, DPP_VERSION);
            if let Some(id) = &code.identifier {
                resp.push(AttrId::CodeIdentifier, id.as_bytes());
            }
            resp.push(AttrId::EncryptedKey, n.xy());
            let resp = DppFrame::new(FrameType::PkexExchResp, resp);
            let session = Self {
                side: Side::Responder,
                state: PkexState::ExchangeReceived,
                curve,
                code: code.clone(),
                own_bootstrap: own_bootstrap.clone(),
                y_point: Some(ephemeral.public().clone()),
                ephemeral,
                x_point: Some(x_prime),
                m: m_raw.to_vec(),
                z,
                peer_version,
                peer_bootstrap: None,
                last_sent: Some(resp.clone()),
            };
            Ok((session, resp))
        };
        let (session, resp) = build().map_err(Dropped::Crypto)?;
        info!(curve = curve.name(), "PKEX exchange response");
        Ok(PkexRequestOutcome::Respond(Box::new(session), resp))
    }

    /// Whether `frame` repeats the Exchange Request this session answered.
    pub fn is_repeated_request(&self, frame: &DppFrame) -> bool {
        self.side == Side::Responder
            && frame.frame_type == FrameType::PkexExchReq
            && frame.attrs.get(AttrId::EncryptedKey) == Some(self.m.as_slice())
    }

    /// Initiator: Exchange Response received.
    pub fn rx_exchange_resp(
        &mut self,
        frame: &DppFrame,
        faults: &FaultInjector,
    ) -> Result<PkexOutcome, Dropped> {
        if self.side != Side::Initiator || self.state != PkexState::ExchangeSent {
            return Err(Dropped::Unexpected);
        }
        let attrs = &frame.attrs;
        let status = attrs.require_u8(AttrId::Status)?;
        let status = StatusCode::try_from(status)
            .map_err(|_| CodecError::InvalidAttribute(AttrId::Status))?;
        match status {
            StatusCode::Ok => {}
            StatusCode::BadGroup => {
                let peer = attrs.require_u16(AttrId::FiniteCyclicGroup)?;
                let reason = FailureReason::BadGroup {
                    own: self.curve.ike_group(),
                    peer,
                };
                warn!(%reason, "PKEX rejected");
                return Ok(self.fail(reason));
            }
            other => return Ok(self.fail(FailureReason::PeerStatus(other))),
        }
        let peer_id = attrs.get(AttrId::CodeIdentifier);
        if peer_id.is_some() && peer_id != self.code.identifier.as_deref().map(str::as_bytes) {
            return Err(Dropped::NotForUs);
        }
        let n_raw = attrs.require_len(AttrId::EncryptedKey, 2 * self.curve.prime_len())?;
        self.peer_version = attrs
            .get(AttrId::ProtocolVersion)
            .and_then(|v| v.first().copied())
            .unwrap_or(1);

        match self.commit(n_raw, faults) {
            Ok(frame) => {
                self.state = PkexState::CommitRevealSent;
                self.last_sent = Some(frame.clone());
                debug!("PKEX commit-reveal request");
                Ok(PkexOutcome::Send(frame))
            }
            Err(DppError::Codec(e)) => Err(e.into()),
            Err(e) => Ok(self.fail(FailureReason::from_crypto(&e, "z"))),
        }
    }

    /// Derive z from N and build the Commit-Reveal Request.
    fn commit(&mut self, n_raw: &[u8], faults: &FaultInjector) -> Result<DppFrame, DppError> {
        faults.check(FaultPoint::Alloc)?;
        let n = PublicKey::from_xy(self.curve, n_raw)?;
        let qr = self.code.role_point(self.curve, RESPONDER_ELEMENT)?;
        let y_prime = n.sub(&qr)?;
        let kx = ecdh(faults, &self.ephemeral, &y_prime)?;
        let z = derive_z(self.curve, x_coord(&self.m, self.curve), n.x(), &self.code.code, &kx)?;
        let jx = ecdh(faults, &self.own_bootstrap, &y_prime)?;
        let a = self.own_bootstrap.public();
        let x = self.ephemeral.public();
        let u = hmac(self.curve, &jx, &[a.x(), y_prime.x(), x.x()])?;
        let inner = Attributes::new()
            .with(AttrId::BootstrapKey, a.xy())
            .with(AttrId::IAuthTag, u);
        let frame = build_frame(
            FrameType::PkexCommitRevealReq,
            Attributes::new(),
            &z,
            &inner,
            faults,
        )?;
        self.z = z;
        self.y_point = Some(y_prime);
        Ok(frame)
    }

    /// Responder: Commit-Reveal Request received.
    pub fn rx_commit_reveal_req(
        &mut self,
        frame: &DppFrame,
        faults: &FaultInjector,
    ) -> Result<PkexOutcome, Dropped> {
        if self.side != Side::Responder || self.state != PkexState::ExchangeReceived {
            return Err(Dropped::Unexpected);
        }
        let inner = match open_frame(frame, &self.z, faults) {
            Ok(inner) => inner,
            Err(DppError::Codec(e)) => return Err(e.into()),
            Err(DppError::AuthFailure(_)) => {
                warn!("PKEX commit-reveal did not decrypt");
                return Ok(self.fail(FailureReason::PossibleCodeMismatch));
            }
            Err(e) => return Ok(self.fail(FailureReason::from_crypto(&e, "z"))),
        };
        let a_raw = inner.require_len(AttrId::BootstrapKey, 2 * self.curve.prime_len())?;
        let u = inner.require(AttrId::IAuthTag)?;

        let (x_prime, y) = match (&self.x_point, &self.y_point) {
            (Some(x), Some(y)) => (x.clone(), y.clone()),
            _ => return Err(Dropped::Unexpected),
        };
        let step = || -> Result<Result<(PublicKey, DppFrame), FailureReason>, DppError> {
            let a = PublicKey::from_xy(self.curve, a_raw)?;
            let jx = ecdh(faults, &self.ephemeral, &a)?;
            let expected = hmac(self.curve, &jx, &[a.x(), y.x(), x_prime.x()])?;
            if expected != u {
                return Ok(Err(FailureReason::IAuthMismatch));
            }
            let lx = ecdh(faults, &self.own_bootstrap, &x_prime)?;
            let b = self.own_bootstrap.public();
            let v = hmac(self.curve, &lx, &[b.x(), x_prime.x(), y.x()])?;
            let inner = Attributes::new()
                .with(AttrId::BootstrapKey, b.xy())
                .with(AttrId::RAuthTag, v);
            let frame = build_frame(
                FrameType::PkexCommitRevealResp,
                Attributes::new(),
                &self.z,
                &inner,
                faults,
            )?;
            Ok(Ok((a, frame)))
        };
        match step() {
            Ok(Ok((a, frame))) => {
                self.state = PkexState::Done;
                self.peer_bootstrap = Some(a.clone());
                self.last_sent = Some(frame.clone());
                info!("PKEX complete (responder)");
                Ok(PkexOutcome::Done {
                    frame: Some(frame),
                    peer_bootstrap: a,
                })
            }
            Ok(Err(reason)) => Ok(self.fail(reason)),
            Err(e) => Ok(self.fail(FailureReason::from_crypto(&e, "z"))),
        }
    }

    /// Initiator: Commit-Reveal Response received.
    pub fn rx_commit_reveal_resp(
        &mut self,
        frame: &DppFrame,
        faults: &FaultInjector,
    ) -> Result<PkexOutcome, Dropped> {
        if self.side != Side::Initiator || self.state != PkexState::CommitRevealSent {
            return Err(Dropped::Unexpected);
        }
        let inner = match open_frame(frame, &self.z, faults) {
            Ok(inner) => inner,
            Err(DppError::Codec(e)) => return Err(e.into()),
            Err(DppError::AuthFailure(_)) => {
                warn!("PKEX commit-reveal response did not decrypt");
                return Ok(self.fail(FailureReason::PossibleCodeMismatch));
            }
            Err(e) => return Ok(self.fail(FailureReason::from_crypto(&e, "z"))),
        };
        let b_raw = inner.require_len(AttrId::BootstrapKey, 2 * self.curve.prime_len())?;
        let v = inner.require(AttrId::RAuthTag)?;
        let y_prime = self.y_point.clone().ok_or(Dropped::Unexpected)?;

        let step = || -> Result<Option<PublicKey>, DppError> {
            let b = PublicKey::from_xy(self.curve, b_raw)?;
            let lx = ecdh(faults, &self.ephemeral, &b)?;
            let x = self.ephemeral.public();
            let expected = hmac(self.curve, &lx, &[b.x(), x.x(), y_prime.x()])?;
            Ok((expected == v).then_some(b))
        };
        match step() {
            Ok(Some(b)) => {
                self.state = PkexState::Done;
                self.peer_bootstrap = Some(b.clone());
                info!("PKEX complete (initiator)");
                Ok(PkexOutcome::Done {
                    frame: None,
                    peer_bootstrap: b,
                })
            }
            Ok(None) => Ok(self.fail(FailureReason::RAuthMismatch)),
            Err(e) => Ok(self.fail(FailureReason::from_crypto(&e, "z"))),
        }
    }

    fn fail(&mut self, reason: FailureReason) -> PkexOutcome {
        self.state = PkexState::Failed(reason.clone());
        PkexOutcome::Failed(reason)
    }

    /// Mark the session failed (timeouts, aborts).
    pub fn abort(&mut self, reason: FailureReason) {
        self.state = PkexState::Failed(reason);
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn state(&self) -> &PkexState {
        &self.state
    }

    pub fn curve(&self) -> Curve {
        self.curve
    }

    pub fn peer_version(&self) -> u8 {
        self.peer_version
    }

    pub fn peer_bootstrap(&self) -> Option<&PublicKey> {
        self.peer_bootstrap.as_ref()
    }

    /// Last frame this side sent, for retransmission.
    pub fn last_sent(&self) -> Option<&DppFrame> {
        self.last_sent.as_ref()
    }
}

/// Per-source failure budget for a Responder's code.
#[derive(Debug, Clone)]
pub struct PkexLimiter {
    limit: u32,
    failures: HashMap<String, u32>,
}

impl PkexLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            failures: HashMap::new(),
        }
    }

    pub fn allows(&self, source: &str) -> bool {
        self.failures.get(source).copied().unwrap_or(0) < self.limit
    }

    /// Count a failure. Returns the new total for `source`.
    pub fn record_failure(&mut self, source: &str) -> u32 {
        let count = self.failures.entry(source.to_string()).or_insert(0);
        *count += 1;
        if *count >= self.limit {
            warn!(source, limit = self.limit, "PKEX attempt limit reached");
        }
        *count
    }

    pub fn reset(&mut self) {
        self.failures.clear();
    }
}
