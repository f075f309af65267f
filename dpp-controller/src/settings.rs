//! Controller settings, loaded from a JSON file.
//!
//! Every field has a default, so `{}` is a valid file: listen on the DPP
//! port, generate fresh P-256 keys and hand out nothing.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use dpp_core::constants::DPP_TCP_PORT;
use dpp_core::encoding::from_hex;
use dpp_protocol::{Capability, EngineSettings};
use serde::{Deserialize, Serialize};

use crate::error::ControllerError;

/// Default idle timeout for one connection (ms).
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 30_000;

/// Where frames carrying a given Responder bootstrap key hash go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// SHA-256 of the Controller's bootstrap key, hex.
    pub hash: String,
    pub addr: SocketAddr,
}

impl Route {
    pub fn hash_bytes(&self) -> Result<[u8; 32], ControllerError> {
        let bytes = from_hex(&self.hash)
            .map_err(|e| ControllerError::Settings(format!("route hash: {e}")))?;
        bytes
            .try_into()
            .map_err(|_| {
                ControllerError::Settings(format!("route hash {} is not 32 octets", self.hash))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    pub listen: SocketAddr,
    pub idle_timeout_ms: u64,
    /// Curve for the bootstrap and C-sign keys.
    pub curve: String,
    /// Bootstrap private key, hex. Generated when absent.
    pub bootstrap_key: Option<String>,
    /// C-sign private key, hex. Generated when absent.
    pub configurator_key: Option<String>,
    /// Configuration in command form, e.g. `conf=sta-psk ssid=<hex> pass=<hex>`.
    /// The local Configurator id is appended.
    pub conf: Option<String>,
    /// Relay routing table.
    pub routes: Vec<Route>,
    /// Where unroutable frames (announcements) go.
    pub default_route: Option<SocketAddr>,
    pub engine: EngineSettings,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DPP_TCP_PORT),
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            curve: "prime256v1".into(),
            bootstrap_key: None,
            configurator_key: None,
            conf: None,
            routes: Vec::new(),
            default_route: None,
            engine: EngineSettings {
                allowed_roles: Capability::Configurator,
                ..EngineSettings::default()
            },
        }
    }
}

impl ControllerSettings {
    pub fn load(path: &Path) -> Result<Self, ControllerError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ControllerError> {
        let settings: Self =
            serde_json::from_str(text).map_err(|e| ControllerError::Settings(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.idle_timeout_ms == 0 {
            return Err(ControllerError::Settings("idle_timeout_ms must be positive".into()));
        }
        for route in &self.routes {
            route.hash_bytes()?;
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.idle_timeout_ms)
    }
}
