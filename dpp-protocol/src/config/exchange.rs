//! Config Request/Response over GAS, then Configuration Result and
//! Connection Status Result as action frames.
//!
//! ```text
//! Request:   Wrapped{E-nonce, Config Attributes JSON}(ke)          AD: none
//! Response:  Status, Wrapped{E-nonce, Config Object*, [SendConnStatus],
//!                            [CSR Attributes Request]}(ke)          AD: Status
//! Result:    Wrapped{Status, E-nonce}(ke)                          AD: frame
//! ConnStat:  Wrapped{E-nonce, Connection Status JSON}(ke)          AD: frame
//! ```

use chrono::{DateTime, Utc};
use dpp_core::attributes::{AttrId, Attributes};
use dpp_core::constants::MAX_CONF_OBJ;
use dpp_core::crypto::{random_bytes, Curve, PublicKey};
use dpp_core::encoding::{from_base64, from_base64url, to_base64, to_base64url};
use dpp_core::errors::{CodecError, DppError, StatusCode};
use dpp_core::fault::{FaultInjector, FaultPoint};
use dpp_core::frame::{DppFrame, FrameType};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::configurator::{build_config_object, Configurator};
use super::object::{ConfigObject, EnterpriseCredentials};
use super::params::ConfParams;
use super::{CertificateAuthority, ConfigError};
use crate::connector::{check_link_key, validate, NetRole};
use crate::errors::{Dropped, FailureReason};
use crate::wrapped::{build_frame, open, open_frame, seal};

const WIFI_TECH_INFRA: &str = "infra";

/// Config Attributes object sent by the Enrollee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigAttributes {
    pub name: String,
    #[serde(rename = "wi-fi_tech")]
    pub wifi_tech: String,
    #[serde(rename = "netRole")]
    pub net_role: NetRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mudurl: Option<String>,
    #[serde(rename = "bandSupport", default, skip_serializing_if = "Option::is_none")]
    pub band_support: Option<Vec<u32>>,
    /// Base64 DER PKCS#10.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pkcs10: Option<String>,
}

impl ConfigAttributes {
    pub fn new(name: impl Into<String>, net_role: NetRole) -> Self {
        Self {
            name: name.into(),
            wifi_tech: WIFI_TECH_INFRA.into(),
            net_role,
            mudurl: None,
            band_support: None,
            pkcs10: None,
        }
    }
}

/// Connection Status object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnStatus {
    pub result: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssid64: Option<String>,
    /// `opclass/channel[,opclass/channel]*`
    #[serde(rename = "channelList", default, skip_serializing_if = "Option::is_none")]
    pub channel_list: Option<String>,
}

impl ConnStatus {
    pub fn new(result: StatusCode, ssid: &[u8], channel_list: Option<String>) -> Self {
        Self {
            result: result.as_u8(),
            ssid64: (!ssid.is_empty()).then(|| to_base64url(ssid)),
            channel_list: channel_list.filter(|l| valid_channel_list(l)),
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        StatusCode::try_from(self.result).ok()
    }

    pub fn ssid(&self) -> Option<Vec<u8>> {
        self.ssid64.as_deref().and_then(|s| from_base64url(s).ok())
    }

    fn parse(json: &[u8]) -> Result<Self, ConfigError> {
        let mut status: ConnStatus =
            serde_json::from_slice(json).map_err(|e| ConfigError::Json(e.to_string()))?;
        if let Some(list) = &status.channel_list {
            if !valid_channel_list(list) {
                debug!(%list, "ignoring invalid channelList");
                status.channel_list = None;
            }
        }
        Ok(status)
    }
}

fn valid_channel_list(list: &str) -> bool {
    list.bytes().all(|b| b.is_ascii_digit() || b == b'/' || b == b',')
}

/// Accept a base64 PKCS#10 if it is a single well-formed DER SEQUENCE.
pub fn validate_csr(pkcs10: &str) -> Result<Vec<u8>, ConfigError> {
    let der = from_base64(pkcs10).map_err(|_| ConfigError::InvalidCsr("base64"))?;
    if der.len() < 2 || der[0] != 0x30 {
        return Err(ConfigError::InvalidCsr("not a SEQUENCE"));
    }
    let (len, hdr) = match der[1] {
        n if n < 0x80 => (n as usize, 2),
        n => {
            let octets = (n & 0x7f) as usize;
            if octets == 0 || octets > 4 || der.len() < 2 + octets {
                return Err(ConfigError::InvalidCsr("length"));
            }
            let len = der[2..2 + octets]
                .iter()
                .fold(0usize, |acc, b| (acc << 8) | *b as usize);
            (len, 2 + octets)
        }
    };
    if hdr + len != der.len() {
        return Err(ConfigError::InvalidCsr("length"));
    }
    Ok(der)
}

fn fresh_nonce(curve: Curve, faults: &FaultInjector) -> Result<Zeroizing<Vec<u8>>, DppError> {
    faults.check(FaultPoint::Alloc)?;
    Ok(random_bytes(curve.nonce_len()))
}

/// What the Enrollee learned from a Config Response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrolleeOutcome {
    Configured {
        objects: Vec<ConfigObject>,
        send_conn_status: bool,
    },
    /// Retry with a CSR built from these attributes.
    CsrNeeded { csr_attrs: Vec<u8> },
}

/// Enrollee side of one Configuration exchange.
#[derive(Debug)]
pub struct EnrolleeExchange {
    curve: Curve,
    ke: Zeroizing<Vec<u8>>,
    peer_version: u8,
    attrs: ConfigAttributes,
    /// Must be the netAccessKey of every Connector we accept.
    protocol_key: PublicKey,
    e_nonce: Zeroizing<Vec<u8>>,
}

impl EnrolleeExchange {
    pub fn new(
        curve: Curve,
        ke: &[u8],
        peer_version: u8,
        protocol_key: PublicKey,
        attrs: ConfigAttributes,
    ) -> Self {
        Self {
            curve,
            ke: Zeroizing::new(ke.to_vec()),
            peer_version,
            attrs,
            protocol_key,
            e_nonce: Zeroizing::new(Vec::new()),
        }
    }

    pub fn net_role(&self) -> NetRole {
        self.attrs.net_role
    }

    pub fn peer_version(&self) -> u8 {
        self.peer_version
    }

    /// Attach a PKCS#10 for the next request.
    pub fn set_csr(&mut self, csr_der: &[u8]) {
        self.attrs.pkcs10 = Some(to_base64(csr_der));
    }

    /// GAS query body. Every call uses a fresh E-nonce.
    pub fn request(&mut self, faults: &FaultInjector) -> Result<Vec<u8>, DppError> {
        self.e_nonce = fresh_nonce(self.curve, faults)?;
        let json =
            serde_json::to_vec(&self.attrs).map_err(|e| DppError::Encoding(e.to_string()))?;
        let inner = Attributes::new()
            .with(AttrId::EnrolleeNonce, self.e_nonce.to_vec())
            .with(AttrId::ConfigAttrObj, json);
        let sealed = seal(&self.ke, &[], &inner, faults)?;
        Ok(Attributes::new()
            .with(AttrId::WrappedData, sealed)
            .encode()?)
    }

    /// Process the Config Response body.
    pub fn rx_response(
        &mut self,
        body: &[u8],
        now: DateTime<Utc>,
        faults: &FaultInjector,
    ) -> Result<EnrolleeOutcome, FailureReason> {
        let attrs = Attributes::decode(body).map_err(FailureReason::Malformed)?;
        let status = attrs
            .require_u8(AttrId::Status)
            .map_err(FailureReason::Malformed)?;
        let status = StatusCode::try_from(status)
            .map_err(|_| FailureReason::Malformed(CodecError::InvalidAttribute(AttrId::Status)))?;
        let sealed = attrs
            .require(AttrId::WrappedData)
            .map_err(FailureReason::Malformed)?;
        let before = attrs
            .encode_before(AttrId::WrappedData)
            .map_err(FailureReason::Malformed)?;
        let inner = open(&self.ke, &[&before], sealed, faults)
            .map_err(|e| FailureReason::from_crypto(&e, "ke"))?;
        let e_nonce = inner
            .require(AttrId::EnrolleeNonce)
            .map_err(FailureReason::Malformed)?;
        if e_nonce != self.e_nonce.as_slice() {
            warn!("E-nonce mismatch in Config Response");
            return Err(FailureReason::NonceMismatch);
        }

        match status {
            StatusCode::Ok => {}
            StatusCode::CsrNeeded => {
                let csr_attrs = inner
                    .require(AttrId::CsrAttrsReq)
                    .map_err(FailureReason::Malformed)?;
                info!("configurator requested a CSR");
                return Ok(EnrolleeOutcome::CsrNeeded {
                    csr_attrs: csr_attrs.to_vec(),
                });
            }
            other => {
                warn!(status = %other, "configurator rejected the request");
                return Err(FailureReason::PeerStatus(other));
            }
        }

        let mut objects = Vec::new();
        for raw in inner.get_all(AttrId::ConfigObj).into_iter().take(MAX_CONF_OBJ) {
            let obj = ConfigObject::parse(raw, self.peer_version)?;
            if let Some(dpp) = obj.credential.dpp() {
                let valid =
                    validate(&dpp.connector, &dpp.csign, now).map_err(FailureReason::Connector)?;
                check_link_key(&valid.net_access_key, &self.protocol_key)
                    .map_err(FailureReason::Connector)?;
            }
            objects.push(obj);
        }
        if objects.is_empty() {
            return Err(FailureReason::Malformed(CodecError::MissingAttribute(
                AttrId::ConfigObj,
            )));
        }
        let send_conn_status = inner.contains(AttrId::SendConnStatus);
        info!(count = objects.len(), "configuration received");
        Ok(EnrolleeOutcome::Configured {
            objects,
            send_conn_status,
        })
    }

    /// Configuration Result frame.
    pub fn result_frame(
        &self,
        status: StatusCode,
        faults: &FaultInjector,
    ) -> Result<DppFrame, DppError> {
        let mut inner = Attributes::new();
        inner.push_u8(AttrId::Status, status.as_u8());
        inner.push(AttrId::EnrolleeNonce, self.e_nonce.to_vec());
        build_frame(
            FrameType::ConfigurationResult,
            Attributes::new(),
            &self.ke,
            &inner,
            faults,
        )
    }

    /// Connection Status Result frame.
    pub fn conn_status_frame(
        &self,
        status: &ConnStatus,
        faults: &FaultInjector,
    ) -> Result<DppFrame, DppError> {
        let json = serde_json::to_vec(status).map_err(|e| DppError::Encoding(e.to_string()))?;
        let inner = Attributes::new()
            .with(AttrId::EnrolleeNonce, self.e_nonce.to_vec())
            .with(AttrId::ConnStatus, json);
        build_frame(
            FrameType::ConnectionStatusResult,
            Attributes::new(),
            &self.ke,
            &inner,
            faults,
        )
    }
}

/// The Configurator's answer to one Config Request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigReply {
    pub body: Vec<u8>,
    pub status: StatusCode,
    pub objects: usize,
}

/// Configurator side of one Configuration exchange.
#[derive(Debug)]
pub struct ConfiguratorExchange {
    ke: Zeroizing<Vec<u8>>,
    peer_version: u8,
    peer_protocol_key: PublicKey,
    request: Option<(Zeroizing<Vec<u8>>, ConfigAttributes)>,
    conn_status_requested: bool,
}

impl ConfiguratorExchange {
    pub fn new(ke: &[u8], peer_version: u8, peer_protocol_key: PublicKey) -> Self {
        Self {
            ke: Zeroizing::new(ke.to_vec()),
            peer_version,
            peer_protocol_key,
            request: None,
            conn_status_requested: false,
        }
    }

    pub fn peer_version(&self) -> u8 {
        self.peer_version
    }

    /// Whether a Configuration Result should follow the response.
    pub fn expects_result(&self) -> bool {
        self.peer_version >= 2
    }

    pub fn conn_status_requested(&self) -> bool {
        self.conn_status_requested
    }

    /// Decode a Config Request. Bad requests are dropped.
    pub fn rx_request(
        &mut self,
        body: &[u8],
        faults: &FaultInjector,
    ) -> Result<&ConfigAttributes, Dropped> {
        let attrs = Attributes::decode(body)?;
        let sealed = attrs.require(AttrId::WrappedData)?;
        let inner = open(&self.ke, &[], sealed, faults).map_err(Dropped::Crypto)?;
        let e_nonce = inner.require(AttrId::EnrolleeNonce)?;
        if e_nonce.is_empty() || e_nonce.len() > 32 {
            return Err(CodecError::InvalidAttribute(AttrId::EnrolleeNonce).into());
        }
        let json = inner.require(AttrId::ConfigAttrObj)?;
        let request: ConfigAttributes = serde_json::from_slice(json)
            .map_err(|_| CodecError::InvalidAttribute(AttrId::ConfigAttrObj))?;
        if request.wifi_tech != WIFI_TECH_INFRA {
            debug!(tech = %request.wifi_tech, "unsupported wi-fi_tech");
            return Err(CodecError::InvalidAttribute(AttrId::ConfigAttrObj).into());
        }
        info!(name = %request.name, role = request.net_role.as_str(), "config request");
        let stored = self
            .request
            .insert((Zeroizing::new(e_nonce.to_vec()), request));
        Ok(&stored.1)
    }

    /// Build the Config Response body for the last request.
    pub fn respond(
        &mut self,
        params: &ConfParams,
        configurator: Option<&Configurator>,
        ca: Option<&dyn CertificateAuthority>,
        faults: &FaultInjector,
    ) -> Result<ConfigReply, DppError> {
        let (e_nonce, request) = self
            .request
            .as_ref()
            .ok_or(DppError::Codec(CodecError::MissingAttribute(AttrId::ConfigAttrObj)))?;

        let mut status = StatusCode::Ok;
        let mut enterprise: Option<EnterpriseCredentials> = None;
        if let Some(pkcs10) = &request.pkcs10 {
            match validate_csr(pkcs10) {
                Err(err) => {
                    warn!(%err, "rejecting CSR");
                    status = StatusCode::CsrBad;
                }
                Ok(der) => match ca.map(|ca| ca.sign_csr(&der)) {
                    Some(Ok(ent)) => enterprise = Some(ent),
                    Some(Err(err)) => {
                        warn!(%err, "certificate authority failed");
                        status = StatusCode::ConfigureFailure;
                    }
                    None => {
                        warn!("CSR received without a certificate authority");
                        status = StatusCode::ConfigureFailure;
                    }
                },
            }
        }

        let mut objects = Vec::new();
        let mut csr_attrs: Option<Vec<u8>> = None;
        if status == StatusCode::Ok {
            for net in params.for_role(request.net_role, self.peer_version) {
                if net.akm == super::Akm::Dot1x && enterprise.is_none() {
                    csr_attrs.get_or_insert_with(|| net.csr_attrs.clone().unwrap_or_default());
                    continue;
                }
                let built = build_config_object(
                    net,
                    configurator,
                    &self.peer_protocol_key,
                    self.peer_version,
                    enterprise.clone(),
                    faults,
                )
                .and_then(|obj| obj.to_json());
                match built {
                    Ok(json) => objects.push(json),
                    Err(ConfigError::Core(err)) => return Err(err),
                    Err(err) => warn!(%err, "skipping config object"),
                }
            }
            status = if !objects.is_empty() {
                StatusCode::Ok
            } else if csr_attrs.is_some() {
                StatusCode::CsrNeeded
            } else {
                StatusCode::ConfigureFailure
            };
        }

        let mut inner = Attributes::new().with(AttrId::EnrolleeNonce, e_nonce.to_vec());
        for json in &objects {
            inner.push(AttrId::ConfigObj, json.as_bytes());
        }
        self.conn_status_requested = params.send_conn_status
            && self.peer_version >= 2
            && request.net_role == NetRole::Sta
            && status == StatusCode::Ok;
        if self.conn_status_requested {
            inner.push(AttrId::SendConnStatus, Vec::new());
        }
        if status == StatusCode::CsrNeeded {
            inner.push(AttrId::CsrAttrsReq, csr_attrs.unwrap_or_default());
        }

        let mut clear = Attributes::new();
        clear.push_u8(AttrId::Status, status.as_u8());
        let before = clear.encode()?;
        let sealed = seal(&self.ke, &[&before], &inner, faults)?;
        clear.push(AttrId::WrappedData, sealed);
        info!(status = %status, objects = objects.len(), "config response");
        Ok(ConfigReply {
            body: clear.encode()?,
            status,
            objects: objects.len(),
        })
    }

    fn check_nonce(&self, inner: &Attributes) -> Result<(), FailureReason> {
        let e_nonce = inner
            .require(AttrId::EnrolleeNonce)
            .map_err(FailureReason::Malformed)?;
        match &self.request {
            Some((ours, _)) if ours.as_slice() == e_nonce => Ok(()),
            _ => Err(FailureReason::NonceMismatch),
        }
    }

    /// Process a Configuration Result frame.
    pub fn rx_result(
        &self,
        frame: &DppFrame,
        faults: &FaultInjector,
    ) -> Result<StatusCode, FailureReason> {
        let inner =
            open_frame(frame, &self.ke, faults).map_err(|e| FailureReason::from_crypto(&e, "ke"))?;
        self.check_nonce(&inner)?;
        let status = inner
            .require_u8(AttrId::Status)
            .map_err(FailureReason::Malformed)?;
        StatusCode::try_from(status)
            .map_err(|_| FailureReason::Malformed(CodecError::InvalidAttribute(AttrId::Status)))
    }

    /// Process a Connection Status Result frame.
    pub fn rx_conn_status(
        &self,
        frame: &DppFrame,
        faults: &FaultInjector,
    ) -> Result<ConnStatus, FailureReason> {
        let inner =
            open_frame(frame, &self.ke, faults).map_err(|e| FailureReason::from_crypto(&e, "ke"))?;
        self.check_nonce(&inner)?;
        let json = inner
            .require(AttrId::ConnStatus)
            .map_err(FailureReason::Malformed)?;
        Ok(ConnStatus::parse(json)?)
    }
}
