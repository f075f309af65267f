//! Configuration Object JSON.
//!
//! ```text
//! {"wi-fi_tech":"infra",
//!  "discovery":{"ssid":"..."}            or {"ssid64":"<base64url>"}
//!  "cred":{"akm":"psk","pass":"..."}     legacy
//!         {"akm":"dpp","signedConnector":"..","csign":{JWK},"ppKey":{JWK}}
//!         {"akm":"dot1x","entCreds":{..},"signedConnector":..,"csign":..}}
//! ```
//!
//! `parse(build(obj)) == obj` for every credential family.

use dpp_core::constants::{PASSPHRASE_MAX_LEN, PASSPHRASE_MIN_LEN, PSK_LEN, SSID_MAX_LEN};
use dpp_core::crypto::PublicKey;
use dpp_core::encoding::{from_base64, from_base64url, from_hex, to_base64, to_base64url, to_hex};
use dpp_core::jws::{kid_for, Jwk};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::akm::Akm;
use super::ConfigError;

const WIFI_TECH_INFRA: &str = "infra";
const EAP_TYPE_TLS: u32 = 13;

/// Passphrase or raw PSK for psk/sae networks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegacySecret {
    Passphrase(String),
    Psk([u8; PSK_LEN]),
}

impl LegacySecret {
    pub fn passphrase(pass: impl Into<String>) -> Result<Self, ConfigError> {
        let pass = pass.into();
        if !(PASSPHRASE_MIN_LEN..=PASSPHRASE_MAX_LEN).contains(&pass.len()) {
            return Err(ConfigError::InvalidPassphrase);
        }
        Ok(LegacySecret::Passphrase(pass))
    }

    pub fn psk_hex(hex: &str) -> Result<Self, ConfigError> {
        if hex.len() != PSK_LEN * 2 {
            return Err(ConfigError::InvalidPsk);
        }
        let raw = from_hex(hex).map_err(|_| ConfigError::InvalidPsk)?;
        let mut psk = [0u8; PSK_LEN];
        psk.copy_from_slice(&raw);
        Ok(LegacySecret::Psk(psk))
    }
}

/// The DPP part of a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DppCredential {
    pub connector: String,
    pub csign: PublicKey,
    /// Privacy protection key. Version 2 only.
    pub pp_key: Option<PublicKey>,
}

/// What an 802.1X Enrollee receives after its CSR was signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnterpriseCredentials {
    /// PKCS#7 certificate bag, DER.
    pub cert_bag: Vec<u8>,
    pub ca_cert: Option<Vec<u8>>,
    pub trusted_server_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Legacy {
        akm: Akm,
        secret: LegacySecret,
    },
    Dpp {
        akm: Akm,
        /// Present when `akm` also allows psk/sae.
        legacy: Option<LegacySecret>,
        dpp: DppCredential,
    },
    Dot1x {
        dpp: DppCredential,
        ent: EnterpriseCredentials,
    },
}

impl Credential {
    pub fn akm(&self) -> Akm {
        match self {
            Credential::Legacy { akm, .. } | Credential::Dpp { akm, .. } => *akm,
            Credential::Dot1x { .. } => Akm::Dot1x,
        }
    }

    pub fn dpp(&self) -> Option<&DppCredential> {
        match self {
            Credential::Legacy { .. } => None,
            Credential::Dpp { dpp, .. } | Credential::Dot1x { dpp, .. } => Some(dpp),
        }
    }

    pub fn legacy(&self) -> Option<&LegacySecret> {
        match self {
            Credential::Legacy { secret, .. } => Some(secret),
            Credential::Dpp { legacy, .. } => legacy.as_ref(),
            Credential::Dot1x { .. } => None,
        }
    }
}

/// One network the Enrollee was provisioned for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigObject {
    pub ssid: Vec<u8>,
    pub ssid_charset: Option<u32>,
    pub credential: Credential,
}

#[derive(Serialize, Deserialize)]
struct WireObject {
    #[serde(rename = "wi-fi_tech")]
    wifi_tech: String,
    discovery: WireDiscovery,
    cred: WireCred,
}

#[derive(Serialize, Deserialize)]
struct WireDiscovery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ssid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ssid64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ssid_charset: Option<u32>,
}

#[derive(Default, Serialize, Deserialize)]
struct WireCred {
    akm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pass: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    psk_hex: Option<String>,
    #[serde(rename = "entCreds", default, skip_serializing_if = "Option::is_none")]
    ent_creds: Option<WireEntCreds>,
    #[serde(rename = "signedConnector", default, skip_serializing_if = "Option::is_none")]
    signed_connector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    csign: Option<Jwk>,
    #[serde(rename = "ppKey", default, skip_serializing_if = "Option::is_none")]
    pp_key: Option<Jwk>,
}

#[derive(Serialize, Deserialize)]
struct WireEntCreds {
    #[serde(rename = "certBag")]
    cert_bag: String,
    #[serde(rename = "caCert", default, skip_serializing_if = "Option::is_none")]
    ca_cert: Option<String>,
    #[serde(
        rename = "trustedEapServerName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    trusted_eap_server_name: Option<String>,
    #[serde(rename = "eapMethods", default)]
    eap_methods: Vec<u32>,
}

impl ConfigObject {
    pub fn new(ssid: impl Into<Vec<u8>>, credential: Credential) -> Self {
        Self {
            ssid: ssid.into(),
            ssid_charset: None,
            credential,
        }
    }

    /// Serialize for the Config Object attribute.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        if self.ssid.is_empty() || self.ssid.len() > SSID_MAX_LEN {
            return Err(ConfigError::InvalidSsid);
        }
        let discovery = match std::str::from_utf8(&self.ssid) {
            Ok(text) if !text.chars().any(char::is_control) => WireDiscovery {
                ssid: Some(text.to_string()),
                ssid64: None,
                ssid_charset: self.ssid_charset,
            },
            _ => WireDiscovery {
                ssid: None,
                ssid64: Some(to_base64url(&self.ssid)),
                ssid_charset: self.ssid_charset,
            },
        };
        let mut cred = WireCred {
            akm: self.credential.akm().name().to_string(),
            ..WireCred::default()
        };
        if let Some(secret) = self.credential.legacy() {
            match secret {
                LegacySecret::Passphrase(pass) => cred.pass = Some(pass.clone()),
                LegacySecret::Psk(psk) => cred.psk_hex = Some(to_hex(psk)),
            }
        }
        if let Some(dpp) = self.credential.dpp() {
            if dpp.connector.contains(['"', '\n']) {
                return Err(ConfigError::InvalidConnector);
            }
            cred.signed_connector = Some(dpp.connector.clone());
            cred.csign = Some(Jwk::from_public(&dpp.csign, Some(kid_for(&dpp.csign))));
            cred.pp_key = dpp.pp_key.as_ref().map(|k| Jwk::from_public(k, None));
        }
        if let Credential::Dot1x { ent, .. } = &self.credential {
            cred.ent_creds = Some(WireEntCreds {
                cert_bag: to_base64(&ent.cert_bag),
                ca_cert: ent.ca_cert.as_deref().map(to_base64),
                trusted_eap_server_name: ent.trusted_server_name.clone(),
                eap_methods: vec![EAP_TYPE_TLS],
            });
        }
        let wire = WireObject {
            wifi_tech: WIFI_TECH_INFRA.into(),
            discovery,
            cred,
        };
        serde_json::to_string(&wire).map_err(|e| ConfigError::Json(e.to_string()))
    }

    /// Parse a received Config Object.
    ///
    /// A legacy AKM that also carries a Connector and C-sign key is a
    /// version 2 object and parses as DPP.
    pub fn parse(json: &[u8], peer_version: u8) -> Result<Self, ConfigError> {
        let wire: WireObject =
            serde_json::from_slice(json).map_err(|e| ConfigError::Json(e.to_string()))?;
        if wire.wifi_tech != WIFI_TECH_INFRA {
            return Err(ConfigError::UnsupportedTech(wire.wifi_tech));
        }
        let ssid = match (&wire.discovery.ssid64, &wire.discovery.ssid) {
            (Some(b64), _) => from_base64url(b64).map_err(|_| ConfigError::InvalidSsid)?,
            (None, Some(text)) => text.as_bytes().to_vec(),
            (None, None) => return Err(ConfigError::MissingField("ssid")),
        };
        if ssid.is_empty() || ssid.len() > SSID_MAX_LEN {
            return Err(ConfigError::InvalidSsid);
        }
        let akm: Akm = wire.cred.akm.parse()?;
        let has_dpp_fields = wire.cred.csign.is_some() && wire.cred.signed_connector.is_some();
        let credential = if akm == Akm::Dot1x {
            Credential::Dot1x {
                dpp: parse_dpp(&wire.cred)?,
                ent: parse_ent_creds(wire.cred.ent_creds.as_ref())?,
            }
        } else if akm.is_dpp() || (akm.is_legacy() && peer_version >= 2 && has_dpp_fields) {
            let legacy = if akm.is_legacy() {
                Some(parse_legacy(akm, &wire.cred)?)
            } else {
                None
            };
            Credential::Dpp {
                akm,
                legacy,
                dpp: parse_dpp(&wire.cred)?,
            }
        } else {
            Credential::Legacy {
                akm,
                secret: parse_legacy(akm, &wire.cred)?,
            }
        };
        Ok(Self {
            ssid,
            ssid_charset: wire.discovery.ssid_charset,
            credential,
        })
    }
}

fn parse_legacy(akm: Akm, cred: &WireCred) -> Result<LegacySecret, ConfigError> {
    if let Some(pass) = &cred.pass {
        return LegacySecret::passphrase(pass.clone());
    }
    if let Some(hex) = &cred.psk_hex {
        if akm.is_sae() && !akm.is_psk() {
            debug!(%akm, "psk_hex without a PSK AKM");
            return Err(ConfigError::InvalidPsk);
        }
        return LegacySecret::psk_hex(hex);
    }
    Err(ConfigError::MissingField("pass"))
}

fn parse_dpp(cred: &WireCred) -> Result<DppCredential, ConfigError> {
    let connector = cred
        .signed_connector
        .clone()
        .ok_or(ConfigError::MissingField("signedConnector"))?;
    if connector.contains(['"', '\n']) || connector.split('.').count() != 3 {
        return Err(ConfigError::InvalidConnector);
    }
    let csign = cred
        .csign
        .as_ref()
        .ok_or(ConfigError::MissingField("csign"))?
        .to_public()
        .map_err(|e| ConfigError::InvalidKey(e.to_string()))?;
    let pp_key = match &cred.pp_key {
        Some(jwk) => {
            let key = jwk
                .to_public()
                .map_err(|e| ConfigError::InvalidKey(e.to_string()))?;
            if key.curve() != csign.curve() {
                return Err(ConfigError::InvalidKey("ppKey curve differs from csign".into()));
            }
            Some(key)
        }
        None => None,
    };
    Ok(DppCredential {
        connector,
        csign,
        pp_key,
    })
}

fn parse_ent_creds(ent: Option<&WireEntCreds>) -> Result<EnterpriseCredentials, ConfigError> {
    let ent = ent.ok_or(ConfigError::MissingField("entCreds"))?;
    let cert_bag =
        from_base64(&ent.cert_bag).map_err(|_| ConfigError::InvalidEnterprise("certBag"))?;
    let ca_cert = ent
        .ca_cert
        .as_deref()
        .map(from_base64)
        .transpose()
        .map_err(|_| ConfigError::InvalidEnterprise("caCert"))?;
    if let Some(name) = &ent.trusted_eap_server_name {
        if name.chars().any(char::is_control) {
            return Err(ConfigError::InvalidEnterprise("trustedEapServerName"));
        }
    }
    if !ent.eap_methods.is_empty() && !ent.eap_methods.contains(&EAP_TYPE_TLS) {
        return Err(ConfigError::InvalidEnterprise("eapMethods"));
    }
    Ok(EnterpriseCredentials {
        cert_bag,
        ca_cert,
        trusted_server_name: ent.trusted_eap_server_name.clone(),
    })
}
