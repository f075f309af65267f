//! Connectors and Network Introduction.
//!
//! A Connector is a compact JWS, signed by the Configurator's C-sign key,
//! whose payload names the device's groups and its netAccessKey. Two
//! provisioned peers exchange Connectors in Peer Discovery and derive a
//! PMK/PMKID from their netAccessKeys without rerunning Authentication.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use dpp_core::attributes::{AttrId, Attributes};
use dpp_core::crypto::{hkdf, Curve, KeyPair, PublicKey};
use dpp_core::constants::PMKID_LEN;
use dpp_core::errors::{CodecError, DppError, StatusCode};
use dpp_core::fault::{FaultInjector, FaultPoint};
use dpp_core::frame::{DppFrame, FrameType};
use dpp_core::hash::sha256_vector;
use dpp_core::jws::{self, kid_for, CompactJws, Jwk, JwsHeader};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

const PMK_INFO: &[u8] = b"DPP PMK";
const JWS_TYP: &str = "dppCon";

/// Connector validation failures. Each maps to a DPP status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectorError {
    #[error("malformed connector: {0}")]
    Malformed(String),

    #[error("kid does not name the C-sign key")]
    KidMismatch,

    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlg(String),

    #[error("signature verification failed")]
    BadSignature,

    #[error("connector has no groups")]
    NoGroups,

    #[error("invalid netAccessKey")]
    InvalidNetAccessKey,

    #[error("connector has expired")]
    Expired,

    #[error("no compatible group and netRole")]
    NoMatchingGroup,

    #[error("netAccessKey curves differ")]
    CurveMismatch,

    /// The netAccessKey in the Connector is not the key in use on the link.
    #[error("peer connector validation failed")]
    PeerConnectorValidationFailed,
}

impl ConnectorError {
    /// Status reported to the peer in Peer Discovery.
    pub fn status(&self) -> StatusCode {
        match self {
            ConnectorError::NoMatchingGroup => StatusCode::NoMatch,
            _ => StatusCode::InvalidConnector,
        }
    }
}

/// Network role named in a Connector group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetRole {
    Sta,
    Ap,
    Configurator,
}

impl NetRole {
    pub fn as_str(self) -> &'static str {
        match self {
            NetRole::Sta => "sta",
            NetRole::Ap => "ap",
            NetRole::Configurator => "configurator",
        }
    }

    /// Station and AP introduce to each other; nothing else does.
    fn compatible(self, other: NetRole) -> bool {
        matches!(
            (self, other),
            (NetRole::Sta, NetRole::Ap) | (NetRole::Ap, NetRole::Sta)
        )
    }
}

impl std::str::FromStr for NetRole {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sta" => Ok(NetRole::Sta),
            "ap" => Ok(NetRole::Ap),
            "configurator" => Ok(NetRole::Configurator),
            other => Err(ConnectorError::Malformed(format!("unknown netRole {other}"))),
        }
    }
}

/// One `groups` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    #[serde(rename = "groupId")]
    pub group_id: String,
    #[serde(rename = "netRole")]
    pub net_role: NetRole,
}

impl Group {
    pub fn new(group_id: impl Into<String>, net_role: NetRole) -> Self {
        Self {
            group_id: group_id.into(),
            net_role,
        }
    }
}

/// Connector payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorClaims {
    pub groups: Vec<Group>,
    #[serde(rename = "netAccessKey")]
    pub net_access_key: Jwk,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u8>,
}

impl ConnectorClaims {
    pub fn new(groups: Vec<Group>, net_access_key: &PublicKey) -> Self {
        Self {
            groups,
            net_access_key: Jwk::from_public(net_access_key, None),
            expiry: None,
            version: None,
        }
    }
}

/// Sign a Connector with the C-sign key.
pub fn sign(
    csign: &KeyPair,
    claims: &ConnectorClaims,
    faults: &FaultInjector,
) -> Result<String, DppError> {
    faults.check(FaultPoint::Sign)?;
    let header = JwsHeader {
        typ: JWS_TYP.into(),
        kid: kid_for(csign.public()),
        alg: csign.curve().jws_alg().into(),
    };
    let payload = serde_json::to_vec(claims).map_err(|e| DppError::Encoding(e.to_string()))?;
    jws::sign(csign, &header, &payload)
}

/// Decode a Connector payload without checking the signature. Used for
/// our own Connector, which we trust.
pub fn decode_claims(connector: &str) -> Result<ConnectorClaims, ConnectorError> {
    let jws = CompactJws::parse(connector).map_err(|e| ConnectorError::Malformed(e.to_string()))?;
    serde_json::from_slice(&jws.payload).map_err(|e| ConnectorError::Malformed(e.to_string()))
}

/// Check header, kid and signature, then decode the claims. Expiry and
/// groups are the caller's concern since their order matters.
pub fn verify_signed(
    connector: &str,
    csign: &PublicKey,
) -> Result<ConnectorClaims, ConnectorError> {
    let jws = CompactJws::parse(connector).map_err(|e| ConnectorError::Malformed(e.to_string()))?;
    if jws.header.typ != JWS_TYP {
        return Err(ConnectorError::Malformed(format!("typ {}", jws.header.typ)));
    }
    if jws.header.kid != kid_for(csign) {
        return Err(ConnectorError::KidMismatch);
    }
    jws.verify(csign).map_err(|e| match e {
        DppError::UnsupportedCurve(_) => ConnectorError::UnsupportedAlg(jws.header.alg.clone()),
        _ => ConnectorError::BadSignature,
    })?;
    let claims: ConnectorClaims =
        serde_json::from_slice(&jws.payload).map_err(|e| ConnectorError::Malformed(e.to_string()))?;
    if claims.groups.is_empty() {
        return Err(ConnectorError::NoGroups);
    }
    Ok(claims)
}

/// A Connector that passed every check.
#[derive(Debug, Clone)]
pub struct ValidConnector {
    pub claims: ConnectorClaims,
    pub net_access_key: PublicKey,
    pub expiry: Option<DateTime<Utc>>,
}

/// Full validation of a received Connector.
pub fn validate(
    connector: &str,
    csign: &PublicKey,
    now: DateTime<Utc>,
) -> Result<ValidConnector, ConnectorError> {
    let claims = verify_signed(connector, csign)?;
    let expiry = check_expiry(&claims, now)?;
    let net_access_key = claims
        .net_access_key
        .to_public()
        .map_err(|_| ConnectorError::InvalidNetAccessKey)?;
    Ok(ValidConnector {
        claims,
        net_access_key,
        expiry,
    })
}

fn check_expiry(
    claims: &ConnectorClaims,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ConnectorError> {
    match &claims.expiry {
        None => Ok(None),
        Some(ts) => match parse_expiry(ts) {
            Some(at) if at >= now => Ok(Some(at)),
            _ => {
                debug!(expiry = %ts, "connector expired");
                Err(ConnectorError::Expired)
            }
        },
    }
}

/// Parse `YYYY-MM-DDTHH:MM:SS` followed by nothing, `Z`, or `±HH[:MM]`.
/// `None` means the timestamp is unusable and the key counts as expired.
pub fn parse_expiry(ts: &str) -> Option<DateTime<Utc>> {
    if ts.len() < 19 || !ts.is_char_boundary(19) {
        return None;
    }
    let (base, zone) = ts.split_at(19);
    let naive = NaiveDateTime::parse_from_str(base, "%Y-%m-%dT%H:%M:%S").ok()?;
    let offset = match zone.as_bytes().first().copied() {
        None | Some(b'Z') => 0,
        Some(sign @ (b'+' | b'-')) => {
            let mut fields = zone[1..].split(':');
            let hours: i64 = fields.next()?.parse().ok()?;
            let minutes: i64 = match fields.next() {
                Some(m) => m.parse().ok()?,
                None => 0,
            };
            let secs = hours * 3600 + minutes * 60;
            if sign == b'+' {
                secs
            } else {
                -secs
            }
        }
        Some(_) => return None,
    };
    Some(Utc.from_utc_datetime(&naive) - chrono::Duration::seconds(offset))
}

/// Render a unix time as a Connector expiry.
pub fn format_expiry(unix_secs: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(unix_secs, 0)
        .map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string())
}

fn group_ids_match(a: &str, b: &str) -> bool {
    a == "*" || b == "*" || a == b
}

/// Does any peer group fit one of ours? Under reconfiguration the peer
/// only has to be a Configurator of a shared group.
pub fn groups_match(own: &[Group], peer: &[Group], reconfig: bool) -> bool {
    peer.iter().any(|p| {
        own.iter().any(|o| {
            group_ids_match(&o.group_id, &p.group_id)
                && if reconfig {
                    p.net_role == NetRole::Configurator
                } else {
                    o.net_role.compatible(p.net_role)
                }
        })
    })
}

/// PMK = HKDF(<>, "DPP PMK", N.x).
pub fn derive_pmk(curve: Curve, nx: &[u8]) -> Result<Zeroizing<Vec<u8>>, DppError> {
    hkdf(curve, None, nx, PMK_INFO, curve.hash_len())
}

/// PMKID = Truncate-128(SHA256(min(NK.x, PK.x) | max(NK.x, PK.x))).
pub fn derive_pmkid(a: &PublicKey, b: &PublicKey) -> [u8; PMKID_LEN] {
    let (lo, hi) = if a.x() <= b.x() {
        (a.x(), b.x())
    } else {
        (b.x(), a.x())
    };
    let digest = sha256_vector(&[lo, hi]);
    let mut pmkid = [0u8; PMKID_LEN];
    pmkid.copy_from_slice(&digest[..PMKID_LEN]);
    pmkid
}

/// The netAccessKey named by a Connector must be the key used on the link.
pub fn check_link_key(named: &PublicKey, link: &PublicKey) -> Result<(), ConnectorError> {
    if named == link {
        Ok(())
    } else {
        Err(ConnectorError::PeerConnectorValidationFailed)
    }
}

/// Result of a successful Network Introduction.
pub struct Introduction {
    pub pmk: Zeroizing<Vec<u8>>,
    pub pmkid: [u8; PMKID_LEN],
    pub peer_net_access_key: PublicKey,
    pub peer_version: Option<u8>,
    pub expiry: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Introduction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Introduction")
            .field("pmkid", &self.pmkid)
            .field("peer_version", &self.peer_version)
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

/// Validate `peer_connector` against our own provisioning and derive the
/// PMK/PMKID pair.
pub fn peer_intro(
    own_connector: &str,
    own_net_access_key: &KeyPair,
    csign: &PublicKey,
    peer_connector: &str,
    now: DateTime<Utc>,
    faults: &FaultInjector,
) -> Result<Introduction, ConnectorError> {
    let own = decode_claims(own_connector)?;
    let peer = verify_signed(peer_connector, csign)?;
    if !groups_match(&own.groups, &peer.groups, false) {
        debug!("peer connector has no compatible group");
        return Err(ConnectorError::NoMatchingGroup);
    }
    let expiry = check_expiry(&peer, now)?;
    let peer_key = peer
        .net_access_key
        .to_public()
        .map_err(|_| ConnectorError::InvalidNetAccessKey)?;
    if peer_key.curve() != own_net_access_key.curve() {
        return Err(ConnectorError::CurveMismatch);
    }
    faults
        .check(FaultPoint::Ecdh)
        .map_err(|_| ConnectorError::InvalidNetAccessKey)?;
    let nx = own_net_access_key
        .ecdh(&peer_key)
        .map_err(|_| ConnectorError::InvalidNetAccessKey)?;
    let pmk = derive_pmk(peer_key.curve(), &nx).map_err(|_| ConnectorError::InvalidNetAccessKey)?;
    let pmkid = derive_pmkid(own_net_access_key.public(), &peer_key);
    Ok(Introduction {
        pmk,
        pmkid,
        peer_net_access_key: peer_key,
        peer_version: peer.version,
        expiry,
    })
}

/// Peer Discovery Request contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerDiscovery {
    pub transaction_id: u8,
    pub connector: Option<String>,
    pub status: Option<StatusCode>,
    pub version: u8,
}

pub fn build_peer_disc_req(transaction_id: u8, connector: &str, version: u8) -> DppFrame {
    let mut attrs = Attributes::new();
    attrs.push_u8(AttrId::TransactionId, transaction_id);
    attrs.push(AttrId::Connector, connector.as_bytes().to_vec());
    if version >= 2 {
        attrs.push_u8(AttrId::ProtocolVersion, version);
    }
    DppFrame::new(FrameType::PeerDiscReq, attrs)
}

pub fn build_peer_disc_resp(
    transaction_id: u8,
    status: StatusCode,
    connector: Option<&str>,
    version: u8,
) -> DppFrame {
    let mut attrs = Attributes::new();
    attrs.push_u8(AttrId::TransactionId, transaction_id);
    attrs.push_u8(AttrId::Status, status.as_u8());
    if let Some(c) = connector {
        attrs.push(AttrId::Connector, c.as_bytes().to_vec());
    }
    if version >= 2 {
        attrs.push_u8(AttrId::ProtocolVersion, version);
    }
    DppFrame::new(FrameType::PeerDiscResp, attrs)
}

/// Parse either Peer Discovery frame. A Request must carry a Connector;
/// a Response must carry a Status, and a Connector when it is OK.
pub fn parse_peer_disc(frame: &DppFrame) -> Result<PeerDiscovery, CodecError> {
    let attrs = &frame.attrs;
    let transaction_id = attrs.require_u8(AttrId::TransactionId)?;
    let status = match frame.frame_type {
        FrameType::PeerDiscResp => Some(
            StatusCode::try_from(attrs.require_u8(AttrId::Status)?)
                .map_err(|_| CodecError::InvalidAttribute(AttrId::Status))?,
        ),
        _ => None,
    };
    let connector = match attrs.get(AttrId::Connector) {
        Some(bytes) => Some(
            String::from_utf8(bytes.to_vec())
                .map_err(|_| CodecError::InvalidAttribute(AttrId::Connector))?,
        ),
        None if status.map_or(true, |s| s == StatusCode::Ok) => {
            return Err(CodecError::MissingAttribute(AttrId::Connector))
        }
        None => None,
    };
    let version = attrs
        .get(AttrId::ProtocolVersion)
        .and_then(|v| v.first().copied())
        .unwrap_or(1);
    Ok(PeerDiscovery {
        transaction_id,
        connector,
        status,
        version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpp_core::encoding::to_base64url;

    struct Net {
        csign: KeyPair,
        sta_key: KeyPair,
        ap_key: KeyPair,
        sta: String,
        ap: String,
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn provision(sta_group: &str, ap_group: &str, curve: Curve) -> Net {
        let faults = FaultInjector::disabled();
        let csign = KeyPair::generate(Curve::P256).unwrap();
        let sta_key = KeyPair::generate(curve).unwrap();
        let ap_key = KeyPair::generate(Curve::P256).unwrap();
        let sta = sign(
            &csign,
            &ConnectorClaims::new(vec![Group::new(sta_group, NetRole::Sta)], sta_key.public()),
            &faults,
        )
        .unwrap();
        let ap = sign(
            &csign,
            &ConnectorClaims::new(vec![Group::new(ap_group, NetRole::Ap)], ap_key.public()),
            &faults,
        )
        .unwrap();
        Net {
            csign,
            sta_key,
            ap_key,
            sta,
            ap,
        }
    }

    #[test]
    fn introduction_derives_same_pmk_both_ways() {
        let faults = FaultInjector::disabled();
        let net = provision("*", "home", Curve::P256);
        let csign = net.csign.public();
        let at_sta = peer_intro(&net.sta, &net.sta_key, csign, &net.ap, now(), &faults).unwrap();
        let at_ap = peer_intro(&net.ap, &net.ap_key, csign, &net.sta, now(), &faults).unwrap();
        assert_eq!(at_sta.pmk.as_slice(), at_ap.pmk.as_slice());
        assert_eq!(at_sta.pmkid, at_ap.pmkid);
        assert_eq!(at_sta.pmk.len(), 32);
    }

    #[test]
    fn disjoint_groups_are_status_8() {
        let net = provision("office", "home", Curve::P256);
        let err = peer_intro(
            &net.sta,
            &net.sta_key,
            net.csign.public(),
            &net.ap,
            now(),
            &FaultInjector::disabled(),
        )
        .unwrap_err();
        assert_eq!(err, ConnectorError::NoMatchingGroup);
        assert_eq!(err.status(), StatusCode::NoMatch);
    }

    #[test]
    fn different_curves_are_status_7() {
        let net = provision("home", "home", Curve::P384);
        let err = peer_intro(
            &net.ap,
            &net.ap_key,
            net.csign.public(),
            &net.sta,
            now(),
            &FaultInjector::disabled(),
        )
        .unwrap_err();
        assert_eq!(err, ConnectorError::CurveMismatch);
        assert_eq!(err.status(), StatusCode::InvalidConnector);
    }

    #[test]
    fn garbage_signature_is_rejected() {
        let net = provision("home", "home", Curve::P256);
        let (prefix, _) = net.ap.rsplit_once('.').unwrap();
        let forged = format!("{prefix}.{}", to_base64url(&[7u8; 64]));
        assert_eq!(
            verify_signed(&forged, net.csign.public()).unwrap_err(),
            ConnectorError::BadSignature
        );
        let other = KeyPair::generate(Curve::P256).unwrap();
        assert_eq!(
            verify_signed(&net.ap, other.public()).unwrap_err(),
            ConnectorError::KidMismatch
        );
        assert!(matches!(
            verify_signed("not-a-jws", net.csign.public()),
            Err(ConnectorError::Malformed(_))
        ));
    }

    #[test]
    fn expired_connector_is_policy_failure() {
        let csign = KeyPair::generate(Curve::P256).unwrap();
        let key = KeyPair::generate(Curve::P256).unwrap();
        let mut claims = ConnectorClaims::new(vec![Group::new("*", NetRole::Sta)], key.public());
        claims.expiry = Some("2020-01-01T00:00:00Z".into());
        let c = sign(&csign, &claims, &FaultInjector::disabled()).unwrap();
        assert_eq!(
            validate(&c, csign.public(), now()).unwrap_err(),
            ConnectorError::Expired
        );
        claims.expiry = format_expiry(now().timestamp() + 3600);
        let c = sign(&csign, &claims, &FaultInjector::disabled()).unwrap();
        let valid = validate(&c, csign.public(), now()).unwrap();
        assert_eq!(&valid.net_access_key, key.public());
        assert!(valid.expiry.is_some());
    }

    #[test]
    fn expiry_timezones() {
        let utc = parse_expiry("2030-06-01T12:00:00Z").unwrap();
        assert_eq!(parse_expiry("2030-06-01T12:00:00"), Some(utc));
        assert_eq!(
            parse_expiry("2030-06-01T15:30:00+03:30").unwrap(),
            utc
        );
        assert_eq!(parse_expiry("2030-06-01T10:00:00-02").unwrap(), utc);
        assert_eq!(parse_expiry("2030-06-01"), None);
        assert_eq!(parse_expiry("2030-06-01T12:00:00X"), None);
    }

    #[test]
    fn reconfig_matches_configurator_role() {
        let own = [Group::new("home", NetRole::Sta)];
        let conf = [Group::new("home", NetRole::Configurator)];
        assert!(!groups_match(&own, &conf, false));
        assert!(groups_match(&own, &conf, true));
        assert!(groups_match(&own, &[Group::new("home", NetRole::Ap)], false));
        assert!(!groups_match(&own, &[Group::new("home", NetRole::Sta)], false));
    }

    #[test]
    fn link_key_must_match_connector() {
        let a = KeyPair::generate(Curve::P256).unwrap();
        let b = KeyPair::generate(Curve::P256).unwrap();
        assert!(check_link_key(a.public(), a.public()).is_ok());
        assert_eq!(
            check_link_key(a.public(), b.public()).unwrap_err(),
            ConnectorError::PeerConnectorValidationFailed
        );
        assert_eq!(derive_pmkid(a.public(), b.public()), derive_pmkid(b.public(), a.public()));
    }

    #[test]
    fn peer_discovery_frames() {
        let req = build_peer_disc_req(3, "a.b.c", 2);
        let parsed = parse_peer_disc(&req).unwrap();
        assert_eq!(parsed.transaction_id, 3);
        assert_eq!(parsed.connector.as_deref(), Some("a.b.c"));
        assert_eq!(parsed.version, 2);

        let fail = build_peer_disc_resp(3, StatusCode::NoMatch, None, 2);
        assert_eq!(parse_peer_disc(&fail).unwrap().status, Some(StatusCode::NoMatch));
        let bad = build_peer_disc_resp(3, StatusCode::Ok, None, 1);
        assert_eq!(
            parse_peer_disc(&bad).unwrap_err(),
            CodecError::MissingAttribute(AttrId::Connector)
        );
    }
}
