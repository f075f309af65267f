//! Reconfiguration of an already provisioned Enrollee.
//!
//! ```text
//! Enrollee                                       Configurator
//!   -- Reconfig Announcement {C-sign hash, group} -->
//!   <-- Reconfig Auth Req {tid, ver, C-Connector, C-nonce} --
//!   -- Reconfig Auth Resp {tid, ver, E-Connector, E-nonce, P'e,
//!                          Wrapped{C-nonce}(ke)} -->
//!   <-- Reconfig Auth Conf Wrapped{tid, ver, C-nonce, E-nonce, flags}(ke) --
//! ```
//!
//! Then a normal Configuration exchange runs under `ke`. The Enrollee's
//! Connector may have expired; only its signature is checked.
//!
//! `ke = HKDF(C-nonce | E-nonce, M.x | N.x, "dpp reconfig key")` with
//! `M = P'e * C-nak` (fresh Enrollee key) and `N = E-nak * C-nak` (the
//! key the old Connector names).

use dpp_core::attributes::{AttrId, Attributes};
use dpp_core::constants::DPP_VERSION;
use dpp_core::crypto::{hkdf, random_bytes, Curve, KeyPair, PublicKey};
use dpp_core::errors::{CodecError, DppError};
use dpp_core::fault::{FaultInjector, FaultPoint};
use dpp_core::frame::{DppFrame, FrameType};
use dpp_core::jws::kid_hash;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::auth::Side;
use crate::config::{Configurator, NetworkProfile};
use crate::connector::{decode_claims, groups_match, verify_signed, ConnectorError};
use crate::errors::{Dropped, FailureReason, ProtocolError};
use crate::wrapped::{build_frame, open_frame};

const RECONFIG_KEY_INFO: &[u8] = b"dpp reconfig key";

/// Connector key handling requested in Reconfig Auth Conf.
pub const FLAG_REPLACE_KEY: u8 = 0x01;

/// Contents of a Reconfig Announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconfigAnnouncement {
    pub csign_hash: [u8; 32],
    pub group: u16,
}

pub fn build_announcement(csign: &PublicKey, curve: Curve) -> DppFrame {
    let mut attrs = Attributes::new().with(AttrId::CSignKeyHash, kid_hash(csign).to_vec());
    attrs.push_u16(AttrId::FiniteCyclicGroup, curve.ike_group());
    DppFrame::new(FrameType::ReconfigAnnouncement, attrs)
}

pub fn parse_announcement(frame: &DppFrame) -> Result<ReconfigAnnouncement, CodecError> {
    let hash = frame.attrs.require_len(AttrId::CSignKeyHash, 32)?;
    let group = frame.attrs.require_u16(AttrId::FiniteCyclicGroup)?;
    let mut csign_hash = [0u8; 32];
    csign_hash.copy_from_slice(hash);
    Ok(ReconfigAnnouncement { csign_hash, group })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconfigState {
    AwaitingResponse,
    AwaitingConfirm,
    Authenticated,
    Failed(FailureReason),
}

#[derive(Debug, Clone)]
pub enum ReconfigOutcome {
    /// Configurator: send the Confirm, then serve the Config Request.
    Authenticated(DppFrame),
    Failed(FailureReason),
}

pub struct ReconfigSession {
    side: Side,
    state: ReconfigState,
    curve: Curve,
    transaction_id: u8,
    c_nonce: Zeroizing<Vec<u8>>,
    e_nonce: Zeroizing<Vec<u8>>,
    ke: Zeroizing<Vec<u8>>,
    /// Configurator: its Connector key. Enrollee: the fresh protocol key.
    own_key: KeyPair,
    /// Configurator: the Enrollee's fresh protocol key.
    peer_key: Option<PublicKey>,
    peer_version: u8,
    flags: u8,
    last_sent: Option<DppFrame>,
}

impl std::fmt::Debug for ReconfigSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconfigSession")
            .field("side", &self.side)
            .field("state", &self.state)
            .field("transaction_id", &self.transaction_id)
            .finish_non_exhaustive()
    }
}

fn derive_ke(
    curve: Curve,
    c_nonce: &[u8],
    e_nonce: &[u8],
    mx: &[u8],
    nx: &[u8],
) -> Result<Zeroizing<Vec<u8>>, DppError> {
    let mut salt = Vec::with_capacity(c_nonce.len() + e_nonce.len());
    salt.extend_from_slice(c_nonce);
    salt.extend_from_slice(e_nonce);
    let mut ikm = Zeroizing::new(Vec::with_capacity(mx.len() + nx.len()));
    ikm.extend_from_slice(mx);
    ikm.extend_from_slice(nx);
    hkdf(curve, Some(&salt), &ikm, RECONFIG_KEY_INFO, curve.hash_len())
}

fn ecdh(
    faults: &FaultInjector,
    key: &KeyPair,
    peer: &PublicKey,
) -> Result<Zeroizing<Vec<u8>>, DppError> {
    faults.check(FaultPoint::Ecdh)?;
    key.ecdh(peer)
}

fn version_of(attrs: &Attributes) -> u8 {
    attrs
        .get(AttrId::ProtocolVersion)
        .and_then(|v| v.first().copied())
        .unwrap_or(1)
}

impl ReconfigSession {
    /// Configurator: answer an announcement with a Reconfig Auth Req.
    pub fn initiate(
        configurator: &Configurator,
        transaction_id: u8,
        faults: &FaultInjector,
    ) -> Result<(Self, DppFrame), ProtocolError> {
        faults.check(FaultPoint::Alloc)?;
        let curve = configurator.curve();
        let c_nonce = random_bytes(curve.nonce_len());
        let mut attrs = Attributes::new();
        attrs.push_u8(AttrId::TransactionId, transaction_id);
        attrs.push_u8(AttrId::ProtocolVersion, DPP_VERSION);
        attrs.push(AttrId::Connector, configurator.connector().as_bytes());
        attrs.push(AttrId::ConfiguratorNonce, c_nonce.to_vec());
        let frame = DppFrame::new(FrameType::ReconfigAuthReq, attrs);
        info!(transaction_id, "reconfig auth request");
        let session = Self {
            side: Side::Initiator,
            state: ReconfigState::AwaitingResponse,
            curve,
            transaction_id,
            c_nonce,
            e_nonce: Zeroizing::new(Vec::new()),
            ke: Zeroizing::new(Vec::new()),
            own_key: configurator.connector_key().clone(),
            peer_key: None,
            peer_version: 1,
            flags: FLAG_REPLACE_KEY,
            last_sent: Some(frame.clone()),
        };
        Ok((session, frame))
    }

    /// Enrollee: accept a Reconfig Auth Req for `profile`.
    pub fn respond(
        profile: &NetworkProfile,
        frame: &DppFrame,
        faults: &FaultInjector,
    ) -> Result<(Self, DppFrame), Dropped> {
        if frame.frame_type != FrameType::ReconfigAuthReq {
            return Err(Dropped::Unexpected);
        }
        let dpp = profile.object.credential.dpp().ok_or(Dropped::NotForUs)?;
        let e_nak = profile.net_access_key.as_ref().ok_or(Dropped::NotForUs)?;
        let attrs = &frame.attrs;
        let transaction_id = attrs.require_u8(AttrId::TransactionId)?;
        let c_connector = std::str::from_utf8(attrs.require(AttrId::Connector)?)
            .map_err(|_| CodecError::InvalidAttribute(AttrId::Connector))?;
        let curve = e_nak.curve();
        let c_nonce = attrs.require_len(AttrId::ConfiguratorNonce, curve.nonce_len())?;
        let peer_version = version_of(attrs);

        let own = decode_claims(&dpp.connector).map_err(|_| Dropped::NotForUs)?;
        let claims = verify_signed(c_connector, &dpp.csign).map_err(|e| {
            debug!(%e, "C-Connector rejected");
            Dropped::NotForUs
        })?;
        if !groups_match(&own.groups, &claims.groups, true) {
            debug!("C-Connector does not name a configurator for our groups");
            return Err(Dropped::NotForUs);
        }
        let c_nak = claims
            .net_access_key
            .to_public()
            .map_err(Dropped::Crypto)?;
        if c_nak.curve() != curve {
            return Err(Dropped::Crypto(DppError::CurveMismatch {
                expected: curve.name(),
                actual: c_nak.curve().name(),
            }));
        }

        let build = || -> Result<(Self, DppFrame), DppError> {
            faults.check(FaultPoint::Alloc)?;
            faults.check(FaultPoint::GenerateKey)?;
            let new_key = KeyPair::generate(curve)?;
            let e_nonce = random_bytes(curve.nonce_len());
            let mx = ecdh(faults, &new_key, &c_nak)?;
            let nx = ecdh(faults, e_nak, &c_nak)?;
            let ke = derive_ke(curve, c_nonce, &e_nonce, &mx, &nx)?;

            let mut clear = Attributes::new();
            clear.push_u8(AttrId::TransactionId, transaction_id);
            clear.push_u8(AttrId::ProtocolVersion, DPP_VERSION);
            clear.push(AttrId::Connector, dpp.connector.as_bytes());
            clear.push(AttrId::EnrolleeNonce, e_nonce.to_vec());
            clear.push(AttrId::RProtocolKey, new_key.public().xy());
            let inner = Attributes::new().with(AttrId::ConfiguratorNonce, c_nonce.to_vec());
            let resp = build_frame(FrameType::ReconfigAuthResp, clear, &ke, &inner, faults)?;
            let session = Self {
                side: Side::Responder,
                state: ReconfigState::AwaitingConfirm,
                curve,
                transaction_id,
                c_nonce: Zeroizing::new(c_nonce.to_vec()),
                e_nonce,
                ke,
                own_key: new_key,
                peer_key: Some(c_nak.clone()),
                peer_version,
                flags: 0,
                last_sent: Some(resp.clone()),
            };
            Ok((session, resp))
        };
        let (session, resp) = build().map_err(Dropped::Crypto)?;
        info!(transaction_id, "reconfig auth response");
        Ok((session, resp))
    }

    /// Configurator: Reconfig Auth Resp received.
    pub fn rx_auth_resp(
        &mut self,
        frame: &DppFrame,
        csign: &PublicKey,
        faults: &FaultInjector,
    ) -> Result<ReconfigOutcome, Dropped> {
        if self.side != Side::Initiator || self.state != ReconfigState::AwaitingResponse {
            return Err(Dropped::Unexpected);
        }
        let attrs = &frame.attrs;
        if attrs.require_u8(AttrId::TransactionId)? != self.transaction_id {
            return Err(Dropped::NotForUs);
        }
        let e_connector = std::str::from_utf8(attrs.require(AttrId::Connector)?)
            .map_err(|_| CodecError::InvalidAttribute(AttrId::Connector))?;
        let e_nonce = attrs.require_len(AttrId::EnrolleeNonce, self.curve.nonce_len())?;
        let new_key = attrs.require_len(AttrId::RProtocolKey, 2 * self.curve.prime_len())?;
        self.peer_version = version_of(attrs);

        // Expiry is not checked on reconfiguration.
        let claims = match verify_signed(e_connector, csign) {
            Ok(claims) => claims,
            Err(e) => {
                warn!(%e, "E-Connector rejected");
                return Ok(self.fail(FailureReason::Connector(e)));
            }
        };
        let e_nak = match claims.net_access_key.to_public() {
            Ok(key) if key.curve() == self.curve => key,
            Ok(_) => return Ok(self.fail(FailureReason::Connector(ConnectorError::CurveMismatch))),
            Err(_) => {
                return Ok(self.fail(FailureReason::Connector(
                    ConnectorError::InvalidNetAccessKey,
                )))
            }
        };

        let step = || -> Result<(PublicKey, Zeroizing<Vec<u8>>, Attributes), DppError> {
            let new_key = PublicKey::from_xy(self.curve, new_key)?;
            let mx = ecdh(faults, &self.own_key, &new_key)?;
            let nx = ecdh(faults, &self.own_key, &e_nak)?;
            let ke = derive_ke(self.curve, &self.c_nonce, e_nonce, &mx, &nx)?;
            let inner = open_frame(frame, &ke, faults)?;
            Ok((new_key, ke, inner))
        };
        let (new_key, ke, inner) = match step() {
            Ok(v) => v,
            Err(DppError::Codec(e)) => return Err(e.into()),
            Err(e) => return Ok(self.fail(FailureReason::from_crypto(&e, "ke"))),
        };
        if inner.require(AttrId::ConfiguratorNonce)? != self.c_nonce.as_slice() {
            return Ok(self.fail(FailureReason::NonceMismatch));
        }

        let mut conf = Attributes::new();
        conf.push_u8(AttrId::TransactionId, self.transaction_id);
        conf.push_u8(AttrId::ProtocolVersion, DPP_VERSION);
        conf.push(AttrId::ConfiguratorNonce, self.c_nonce.to_vec());
        conf.push(AttrId::EnrolleeNonce, e_nonce);
        conf.push_u8(AttrId::ReconfigFlags, self.flags);
        let built = build_frame(FrameType::ReconfigAuthConf, Attributes::new(), &ke, &conf, faults);
        let frame = match built {
            Ok(frame) => frame,
            Err(e) => return Ok(self.fail(FailureReason::from_crypto(&e, "ke"))),
        };
        self.e_nonce = Zeroizing::new(e_nonce.to_vec());
        self.ke = ke;
        self.peer_key = Some(new_key);
        self.state = ReconfigState::Authenticated;
        self.last_sent = Some(frame.clone());
        info!(transaction_id = self.transaction_id, "reconfig authenticated (configurator)");
        Ok(ReconfigOutcome::Authenticated(frame))
    }

    /// Enrollee: Reconfig Auth Conf received.
    pub fn rx_auth_conf(
        &mut self,
        frame: &DppFrame,
        faults: &FaultInjector,
    ) -> Result<ReconfigOutcome, Dropped> {
        if self.side != Side::Responder || self.state != ReconfigState::AwaitingConfirm {
            return Err(Dropped::Unexpected);
        }
        let inner = match open_frame(frame, &self.ke, faults) {
            Ok(inner) => inner,
            Err(DppError::Codec(e)) => return Err(e.into()),
            Err(e) => return Ok(self.fail(FailureReason::from_crypto(&e, "ke"))),
        };
        let tid = inner.require_u8(AttrId::TransactionId)?;
        let c_nonce = inner.require(AttrId::ConfiguratorNonce)?;
        let e_nonce = inner.require(AttrId::EnrolleeNonce)?;
        let flags = inner.require_u8(AttrId::ReconfigFlags)?;
        if tid != self.transaction_id
            || c_nonce != self.c_nonce.as_slice()
            || e_nonce != self.e_nonce.as_slice()
        {
            return Ok(self.fail(FailureReason::NonceMismatch));
        }
        self.flags = flags;
        self.state = ReconfigState::Authenticated;
        info!(transaction_id = tid, flags, "reconfig authenticated (enrollee)");
        Ok(ReconfigOutcome::Authenticated(frame.clone()))
    }

    fn fail(&mut self, reason: FailureReason) -> ReconfigOutcome {
        self.state = ReconfigState::Failed(reason.clone());
        ReconfigOutcome::Failed(reason)
    }

    pub fn abort(&mut self, reason: FailureReason) {
        self.state = ReconfigState::Failed(reason);
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn state(&self) -> &ReconfigState {
        &self.state
    }

    pub fn curve(&self) -> Curve {
        self.curve
    }

    pub fn transaction_id(&self) -> u8 {
        self.transaction_id
    }

    pub fn ke(&self) -> &[u8] {
        &self.ke
    }

    pub fn peer_version(&self) -> u8 {
        self.peer_version
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Enrollee: key to be named by the new Connector.
    pub fn own_key(&self) -> &KeyPair {
        &self.own_key
    }

    /// Configurator: the Enrollee's fresh protocol key.
    pub fn peer_key(&self) -> Option<&PublicKey> {
        self.peer_key.as_ref()
    }

    pub fn last_sent(&self) -> Option<&DppFrame> {
        self.last_sent.as_ref()
    }
}
