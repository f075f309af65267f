//! Configurator-side parameters for one exchange.
//!
//! Parsed from the command form
//! `conf=sta-psk ssid=<hex> pass=<hex> [conf=sta-dpp ...] configurator=<id>`.
//! Each `conf=` starts a network; the parameters after it apply to that
//! network.

use std::str::FromStr;

use dpp_core::constants::{MAX_CONF_OBJ, SSID_MAX_LEN};
use dpp_core::encoding::{from_base64, from_hex};

use super::akm::Akm;
use super::object::LegacySecret;
use super::ConfigError;
use crate::connector::NetRole;

/// One network to hand out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConf {
    pub net_role: NetRole,
    pub akm: Akm,
    pub ssid: Vec<u8>,
    pub ssid_charset: Option<u32>,
    pub secret: Option<LegacySecret>,
    pub group_id: Option<String>,
    /// Connector expiry, unix seconds.
    pub expiry: Option<i64>,
    /// DER CSR Attributes sent with CSR_NEEDED.
    pub csr_attrs: Option<Vec<u8>>,
}

impl NetworkConf {
    pub fn new(net_role: NetRole, akm: Akm, ssid: impl Into<Vec<u8>>) -> Self {
        Self {
            net_role,
            akm,
            ssid: ssid.into(),
            ssid_charset: None,
            secret: None,
            group_id: None,
            expiry: None,
            csr_attrs: None,
        }
    }

    pub fn with_secret(mut self, secret: LegacySecret) -> Self {
        self.secret = Some(secret);
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_expiry(mut self, unix_secs: i64) -> Self {
        self.expiry = Some(unix_secs);
        self
    }

    fn parse_conf(value: &str) -> Result<Self, ConfigError> {
        if value == "configurator" {
            return Ok(Self::new(NetRole::Configurator, Akm::Dpp, b"*".to_vec()));
        }
        let (role, akm) = if let Some(akm) = value.strip_prefix("sta-") {
            (NetRole::Sta, akm)
        } else if let Some(akm) = value.strip_prefix("ap-") {
            (NetRole::Ap, akm)
        } else {
            return Err(ConfigError::InvalidParam(format!("conf={value}")));
        };
        Ok(Self::new(role, akm.parse()?, Vec::new()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.net_role != NetRole::Configurator
            && (self.ssid.is_empty() || self.ssid.len() > SSID_MAX_LEN)
        {
            return Err(ConfigError::InvalidSsid);
        }
        if self.akm.is_legacy() {
            match &self.secret {
                None => return Err(ConfigError::MissingField("pass")),
                Some(LegacySecret::Psk(_)) if self.akm.is_sae() && !self.akm.is_psk() => {
                    return Err(ConfigError::InvalidPsk)
                }
                Some(_) => {}
            }
        }
        if matches!(self.expiry, Some(t) if t <= 0) {
            return Err(ConfigError::InvalidParam("expiry".into()));
        }
        Ok(())
    }
}

/// Everything the Configurator needs to answer a Config Request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfParams {
    pub networks: Vec<NetworkConf>,
    pub configurator: Option<u32>,
    /// Ask a station Enrollee for a Connection Status Result.
    pub send_conn_status: bool,
}

impl ConfParams {
    pub fn single(network: NetworkConf, configurator: Option<u32>) -> Self {
        Self {
            networks: vec![network],
            configurator,
            send_conn_status: false,
        }
    }

    /// Networks for an Enrollee asking for `role`, capped by peer version.
    pub fn for_role(&self, role: NetRole, peer_version: u8) -> impl Iterator<Item = &NetworkConf> {
        let cap = if peer_version >= 2 { MAX_CONF_OBJ } else { 1 };
        self.networks
            .iter()
            .filter(move |n| n.net_role == role)
            .take(cap)
    }

    pub fn needs_configurator(&self) -> bool {
        self.networks
            .iter()
            .any(|n| n.akm.is_dpp() || n.akm == Akm::Dot1x || n.net_role == NetRole::Configurator)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.networks.is_empty() {
            return Err(ConfigError::MissingField("conf"));
        }
        if self.networks.len() > MAX_CONF_OBJ {
            return Err(ConfigError::InvalidParam("too many conf objects".into()));
        }
        if self.needs_configurator() && self.configurator.is_none() {
            return Err(ConfigError::NoConfigurator);
        }
        self.networks.iter().try_for_each(NetworkConf::validate)
    }
}

impl FromStr for ConfParams {
    type Err = ConfigError;

    fn from_str(cmd: &str) -> Result<Self, Self::Err> {
        let mut params = ConfParams::default();
        for token in cmd.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            match key {
                "conf" => params.networks.push(NetworkConf::parse_conf(value)?),
                "configurator" => {
                    let id = value
                        .parse()
                        .map_err(|_| ConfigError::InvalidParam(token.into()))?;
                    params.configurator = Some(id);
                }
                "conn_status" => params.send_conn_status = value == "1",
                "ssid" | "ssid_charset" | "pass" | "psk" | "group_id" | "expiry" | "csrattrs" => {
                    let net = params
                        .networks
                        .last_mut()
                        .ok_or_else(|| ConfigError::InvalidParam(format!("{key} before conf=")))?;
                    apply(net, key, value)?;
                }
                _ => {}
            }
        }
        params.validate()?;
        Ok(params)
    }
}

fn apply(net: &mut NetworkConf, key: &str, value: &str) -> Result<(), ConfigError> {
    let bad = || ConfigError::InvalidParam(format!("{key}={value}"));
    match key {
        "ssid" => {
            net.ssid = from_hex(value).map_err(|_| ConfigError::InvalidSsid)?;
        }
        "ssid_charset" => net.ssid_charset = Some(value.parse().map_err(|_| bad())?),
        "pass" => {
            let raw = from_hex(value).map_err(|_| ConfigError::InvalidPassphrase)?;
            let pass = String::from_utf8(raw).map_err(|_| ConfigError::InvalidPassphrase)?;
            net.secret = Some(LegacySecret::passphrase(pass)?);
        }
        "psk" => net.secret = Some(LegacySecret::psk_hex(value)?),
        "group_id" => net.group_id = Some(value.to_string()),
        "expiry" => net.expiry = Some(value.parse().map_err(|_| bad())?),
        "csrattrs" => net.csr_attrs = Some(from_base64(value).map_err(|_| bad())?),
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpp_core::encoding::to_hex;

    #[test]
    fn parses_legacy_station_config() {
        let cmd = format!(
            "conf=sta-psk ssid={} pass={}",
            to_hex(b"test"),
            to_hex(b"secret passphrase")
        );
        let params: ConfParams = cmd.parse().unwrap();
        assert_eq!(params.networks.len(), 1);
        let net = &params.networks[0];
        assert_eq!(net.net_role, NetRole::Sta);
        assert_eq!(net.akm, Akm::Psk);
        assert_eq!(net.ssid, b"test");
        assert_eq!(
            net.secret,
            Some(LegacySecret::Passphrase("secret passphrase".into()))
        );
    }

    #[test]
    fn dpp_config_needs_configurator() {
        let cmd = format!("conf=sta-dpp ssid={}", to_hex(b"test"));
        assert_eq!(cmd.parse::<ConfParams>(), Err(ConfigError::NoConfigurator));
        let params: ConfParams = format!("{cmd} configurator=1 group_id=g1 expiry=2000000000")
            .parse()
            .unwrap();
        assert_eq!(params.configurator, Some(1));
        assert_eq!(params.networks[0].group_id.as_deref(), Some("g1"));
        assert_eq!(params.networks[0].expiry, Some(2_000_000_000));
    }

    #[test]
    fn two_networks_and_limit() {
        let ssid = to_hex(b"test");
        let pass = to_hex(b"12345678");
        let two = format!(
            "conf=sta-psk ssid={ssid} pass={pass} conf=sta-dpp ssid={ssid} configurator=1"
        );
        let params: ConfParams = two.parse().unwrap();
        assert_eq!(params.networks.len(), 2);
        assert_eq!(params.for_role(NetRole::Sta, 2).count(), 2);
        assert_eq!(params.for_role(NetRole::Sta, 1).count(), 1);
        assert_eq!(params.for_role(NetRole::Ap, 2).count(), 0);

        let three = format!("{two} conf=ap-psk ssid={ssid} pass={pass}");
        assert!(matches!(
            three.parse::<ConfParams>(),
            Err(ConfigError::InvalidParam(_))
        ));
    }

    #[test]
    fn rejects_bad_values() {
        let ssid = to_hex(b"test");
        assert_eq!(
            format!("conf=sta-psk ssid={ssid} pass={}", to_hex(b"short")).parse::<ConfParams>(),
            Err(ConfigError::InvalidPassphrase)
        );
        assert_eq!(
            format!("conf=sta-sae ssid={ssid} psk={}", "00".repeat(32)).parse::<ConfParams>(),
            Err(ConfigError::InvalidPsk)
        );
        assert_eq!(
            format!("conf=sta-psk ssid={}", to_hex(&[b'a'; 33])).parse::<ConfParams>(),
            Err(ConfigError::InvalidSsid)
        );
        assert!("ssid=00 conf=sta-psk".parse::<ConfParams>().is_err());
        assert!("conf=mesh-psk".parse::<ConfParams>().is_err());
    }

    #[test]
    fn configurator_role() {
        let params: ConfParams = "conf=configurator configurator=2".parse().unwrap();
        assert_eq!(params.networks[0].net_role, NetRole::Configurator);
        assert!(params.needs_configurator());
    }
}
