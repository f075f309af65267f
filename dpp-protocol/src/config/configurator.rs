//! Configurator keys and Configuration Object construction.

use std::collections::BTreeMap;

use dpp_core::bootstrap::Selector;
use dpp_core::constants::DPP_VERSION;
use dpp_core::crypto::{Curve, KeyPair, PublicKey};
use dpp_core::encoding::to_hex;
use dpp_core::errors::DppError;
use dpp_core::fault::{FaultInjector, FaultPoint};
use dpp_core::jws::{kid_for, kid_hash};
use tracing::{debug, info};

use super::akm::Akm;
use super::object::{ConfigObject, Credential, DppCredential, EnterpriseCredentials};
use super::params::NetworkConf;
use super::ConfigError;
use crate::connector::{self, format_expiry, ConnectorClaims, Group, NetRole};

/// A C-sign key with its privacy protection key and own Connector.
#[derive(Debug, Clone)]
pub struct Configurator {
    id: u32,
    csign: KeyPair,
    pp_key: KeyPair,
    kid: String,
    /// netAccessKey behind `connector`, used during reconfiguration.
    connector_key: KeyPair,
    connector: String,
}

fn generate(curve: Curve, faults: &FaultInjector) -> Result<KeyPair, DppError> {
    faults.check(FaultPoint::GenerateKey)?;
    KeyPair::generate(curve)
}

impl Configurator {
    /// New Configurator. A supplied C-sign key fixes the curve.
    pub fn new(
        id: u32,
        curve: Curve,
        csign_key: Option<&[u8]>,
        pp_key: Option<&[u8]>,
        faults: &FaultInjector,
    ) -> Result<Self, ConfigError> {
        let csign = match csign_key {
            Some(secret) => KeyPair::from_secret(curve, secret)?,
            None => generate(curve, faults)?,
        };
        let pp_key = match pp_key {
            Some(secret) => KeyPair::from_secret(curve, secret)?,
            None => generate(curve, faults)?,
        };
        let connector_key = generate(curve, faults)?;
        let mut claims = ConnectorClaims::new(
            vec![Group::new("*", NetRole::Configurator)],
            connector_key.public(),
        );
        claims.version = Some(DPP_VERSION);
        let connector = connector::sign(&csign, &claims, faults)?;
        let kid = kid_for(csign.public());
        info!(id, curve = curve.name(), %kid, "configurator added");
        Ok(Self {
            id,
            csign,
            pp_key,
            kid,
            connector_key,
            connector,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn curve(&self) -> Curve {
        self.csign.curve()
    }

    pub fn csign(&self) -> &PublicKey {
        self.csign.public()
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Raw SHA-256 of the C-sign key, as in a C-sign Key Hash attribute.
    pub fn csign_hash(&self) -> [u8; 32] {
        kid_hash(self.csign.public())
    }

    pub fn pp_key(&self) -> &PublicKey {
        self.pp_key.public()
    }

    /// The Configurator's own Connector (netRole `configurator`).
    pub fn connector(&self) -> &str {
        &self.connector
    }

    pub fn connector_key(&self) -> &KeyPair {
        &self.connector_key
    }

    /// C-sign private key, hex encoded.
    pub fn private_key_hex(&self) -> String {
        to_hex(self.csign.secret_bytes())
    }

    /// Sign a Connector binding `net_access_key` to `groups`.
    pub fn sign_connector(
        &self,
        groups: Vec<Group>,
        net_access_key: &PublicKey,
        expiry: Option<i64>,
        version: Option<u8>,
        faults: &FaultInjector,
    ) -> Result<String, ConfigError> {
        let mut claims = ConnectorClaims::new(groups, net_access_key);
        claims.expiry = match expiry {
            Some(t) => Some(format_expiry(t).ok_or(ConfigError::InvalidParam("expiry".into()))?),
            None => None,
        };
        claims.version = version;
        Ok(connector::sign(&self.csign, &claims, faults)?)
    }

    /// Provision the local device: a fresh netAccessKey and the
    /// Configuration Object built for it.
    pub fn self_configure(
        &self,
        conf: &NetworkConf,
        faults: &FaultInjector,
    ) -> Result<(ConfigObject, KeyPair), ConfigError> {
        let nak = generate(self.curve(), faults)?;
        let obj = build_config_object(conf, Some(self), nak.public(), DPP_VERSION, None, faults)?;
        Ok((obj, nak))
    }
}

/// Build the object handed to an Enrollee whose protocol key is
/// `peer_key`.
///
/// A version 2 peer gets a Connector even for a legacy AKM when a
/// Configurator is available. A version 1 peer never sees a mixed AKM.
pub fn build_config_object(
    conf: &NetworkConf,
    configurator: Option<&Configurator>,
    peer_key: &PublicKey,
    peer_version: u8,
    enterprise: Option<EnterpriseCredentials>,
    faults: &FaultInjector,
) -> Result<ConfigObject, ConfigError> {
    let akm = conf.akm.for_peer_version(peer_version);
    let dpp_cred = |c: &Configurator| -> Result<DppCredential, ConfigError> {
        let group = conf.group_id.clone().unwrap_or_else(|| "*".into());
        let version = (peer_version >= 2).then_some(peer_version);
        let connector = c.sign_connector(
            vec![Group::new(group, conf.net_role)],
            peer_key,
            conf.expiry,
            version,
            faults,
        )?;
        Ok(DppCredential {
            connector,
            csign: c.csign().clone(),
            pp_key: (peer_version >= 2).then(|| c.pp_key().clone()),
        })
    };

    let credential = if akm == Akm::Dot1x {
        let c = configurator.ok_or(ConfigError::NoConfigurator)?;
        let ent = enterprise.ok_or(ConfigError::MissingField("entCreds"))?;
        Credential::Dot1x {
            dpp: dpp_cred(c)?,
            ent,
        }
    } else if akm.is_dpp() || (peer_version >= 2 && configurator.is_some()) {
        let c = configurator.ok_or(ConfigError::NoConfigurator)?;
        let legacy = if akm.is_legacy() {
            Some(conf.secret.clone().ok_or(ConfigError::MissingField("pass"))?)
        } else {
            None
        };
        Credential::Dpp {
            akm,
            legacy,
            dpp: dpp_cred(c)?,
        }
    } else {
        Credential::Legacy {
            akm,
            secret: conf.secret.clone().ok_or(ConfigError::MissingField("pass"))?,
        }
    };
    debug!(akm = %akm, role = conf.net_role.as_str(), "built config object");
    Ok(ConfigObject {
        ssid: conf.ssid.clone(),
        ssid_charset: conf.ssid_charset,
        credential,
    })
}

/// Configurators by id.
#[derive(Debug, Clone, Default)]
pub struct ConfiguratorStore {
    next_id: u32,
    items: BTreeMap<u32, Configurator>,
}

impl ConfiguratorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        curve: Curve,
        csign_key: Option<&[u8]>,
        pp_key: Option<&[u8]>,
        faults: &FaultInjector,
    ) -> Result<u32, ConfigError> {
        let id = self.next_id + 1;
        let conf = Configurator::new(id, curve, csign_key, pp_key, faults)?;
        self.next_id = id;
        self.items.insert(id, conf);
        Ok(id)
    }

    pub fn remove(&mut self, which: Selector) -> Result<(), DppError> {
        match which {
            Selector::All => {
                self.items.clear();
                Ok(())
            }
            Selector::Id(id) => self
                .items
                .remove(&id)
                .map(|_| ())
                .ok_or(DppError::UnknownId(id)),
        }
    }

    pub fn get(&self, id: u32) -> Option<&Configurator> {
        self.items.get(&id)
    }

    pub fn get_key(&self, id: u32) -> Result<String, DppError> {
        self.get(id)
            .map(Configurator::private_key_hex)
            .ok_or(DppError::UnknownId(id))
    }

    /// The Configurator whose C-sign key hashes to `hash`.
    pub fn find_by_csign_hash(&self, hash: &[u8]) -> Option<&Configurator> {
        self.items.values().find(|c| c.csign_hash() == hash)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Configurator> {
        self.items.values()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::object::LegacySecret;
    use crate::connector::{decode_claims, validate};
    use chrono::Utc;

    fn faults() -> FaultInjector {
        FaultInjector::disabled()
    }

    #[test]
    fn kid_and_key_export() {
        let mut store = ConfiguratorStore::new();
        let id = store.add(Curve::P256, None, None, &faults()).unwrap();
        let conf = store.get(id).unwrap();
        assert_eq!(conf.kid(), kid_for(conf.csign()));
        let hex = store.get_key(id).unwrap();
        assert_eq!(hex.len(), 64);

        // Same key re-imported gives the same kid.
        let raw = dpp_core::encoding::from_hex(&hex).unwrap();
        let again = store.add(Curve::P256, Some(&raw), None, &faults()).unwrap();
        assert_eq!(store.get(again).unwrap().kid(), conf_kid(&store, id));
        assert!(store.find_by_csign_hash(&store.get(id).unwrap().csign_hash()).is_some());
    }

    fn conf_kid(store: &ConfiguratorStore, id: u32) -> String {
        store.get(id).unwrap().kid().to_string()
    }

    #[test]
    fn remove_by_id_and_all() {
        let mut store = ConfiguratorStore::new();
        let a = store.add(Curve::P256, None, None, &faults()).unwrap();
        let b = store.add(Curve::P384, None, None, &faults()).unwrap();
        assert_ne!(a, b);
        store.remove(Selector::Id(a)).unwrap();
        assert_eq!(store.remove(Selector::Id(a)), Err(DppError::UnknownId(a)));
        store.remove(Selector::All).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn own_connector_is_configurator_role() {
        let conf = Configurator::new(1, Curve::P256, None, None, &faults()).unwrap();
        let claims = decode_claims(conf.connector()).unwrap();
        assert_eq!(claims.groups, vec![Group::new("*", NetRole::Configurator)]);
    }

    #[test]
    fn dpp_object_binds_peer_key() {
        let conf = Configurator::new(1, Curve::P256, None, None, &faults()).unwrap();
        let peer = KeyPair::generate(Curve::P256).unwrap();
        let net = NetworkConf::new(NetRole::Sta, Akm::Dpp, b"test".to_vec()).with_group("g1");
        let obj =
            build_config_object(&net, Some(&conf), peer.public(), 2, None, &faults()).unwrap();
        let dpp = obj.credential.dpp().unwrap();
        let valid = validate(&dpp.connector, conf.csign(), Utc::now()).unwrap();
        assert_eq!(&valid.net_access_key, peer.public());
        assert_eq!(valid.claims.groups[0].group_id, "g1");
        assert!(dpp.pp_key.is_some());
    }

    #[test]
    fn legacy_akm_upgrades_for_version_two_only() {
        let conf = Configurator::new(1, Curve::P256, None, None, &faults()).unwrap();
        let peer = KeyPair::generate(Curve::P256).unwrap();
        let net = NetworkConf::new(NetRole::Sta, Akm::Psk, b"test".to_vec())
            .with_secret(LegacySecret::passphrase("12345678").unwrap());
        let v2 = build_config_object(&net, Some(&conf), peer.public(), 2, None, &faults()).unwrap();
        assert!(matches!(v2.credential, Credential::Dpp { akm: Akm::Psk, .. }));
        let v1 = build_config_object(&net, Some(&conf), peer.public(), 1, None, &faults()).unwrap();
        assert!(matches!(v1.credential, Credential::Legacy { .. }));
        let none = build_config_object(&net, None, peer.public(), 2, None, &faults()).unwrap();
        assert!(matches!(none.credential, Credential::Legacy { .. }));
    }

    #[test]
    fn dot1x_needs_certificate() {
        let conf = Configurator::new(1, Curve::P256, None, None, &faults()).unwrap();
        let peer = KeyPair::generate(Curve::P256).unwrap();
        let net = NetworkConf::new(NetRole::Sta, Akm::Dot1x, b"corp".to_vec());
        assert_eq!(
            build_config_object(&net, Some(&conf), peer.public(), 2, None, &faults()),
            Err(ConfigError::MissingField("entCreds"))
        );
    }

    #[test]
    fn self_configure_uses_fresh_key() {
        let conf = Configurator::new(1, Curve::P256, None, None, &faults()).unwrap();
        let net = NetworkConf::new(NetRole::Ap, Akm::Dpp, b"test".to_vec());
        let (obj, nak) = conf.self_configure(&net, &faults()).unwrap();
        let claims = decode_claims(&obj.credential.dpp().unwrap().connector).unwrap();
        assert_eq!(claims.net_access_key.to_public().unwrap(), *nak.public());
    }

    #[test]
    fn injected_sign_failure_propagates() {
        let f = FaultInjector::enabled();
        f.arm(FaultPoint::Sign, 1);
        assert_eq!(
            Configurator::new(1, Curve::P256, None, None, &f).err(),
            Some(ConfigError::Core(DppError::InjectedFault(FaultPoint::Sign)))
        );
    }
}
