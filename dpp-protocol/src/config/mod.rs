//! Configuration Exchange.
//!
//! The Enrollee asks for a network with a Config Request (GAS query),
//! the Configurator answers with one or two Configuration Objects, and
//! a version 2 Enrollee reports back with a Configuration Result and,
//! when asked, a Connection Status Result.
//!
//! # Layout
//!
//! - [`akm`]: AKM names and suite selectors.
//! - [`object`]: Configuration Object JSON.
//! - [`params`]: the `conf=... ssid=...` command form.
//! - [`configurator`]: C-sign keys and Connector signing.
//! - [`exchange`]: the wrapped request/response and result messages.

pub mod akm;
pub mod configurator;
pub mod exchange;
pub mod object;
pub mod params;

use dpp_core::crypto::KeyPair;
use dpp_core::errors::DppError;

use crate::connector::ConnectorError;
use crate::errors::FailureReason;

pub use akm::Akm;
pub use configurator::{build_config_object, Configurator, ConfiguratorStore};
pub use exchange::{
    validate_csr, ConfigAttributes, ConfigReply, ConfiguratorExchange, ConnStatus,
    EnrolleeExchange, EnrolleeOutcome,
};
pub use object::{ConfigObject, Credential, DppCredential, EnterpriseCredentials, LegacySecret};
pub use params::{ConfParams, NetworkConf};

/// Configuration building or parsing failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("unsupported wi-fi_tech {0}")]
    UnsupportedTech(String),

    #[error("invalid SSID")]
    InvalidSsid,

    #[error("passphrase must be 8..63 characters")]
    InvalidPassphrase,

    #[error("invalid PSK")]
    InvalidPsk,

    #[error("unsupported AKM {0}")]
    UnsupportedAkm(String),

    #[error("invalid signedConnector")]
    InvalidConnector,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid entCreds field {0}")]
    InvalidEnterprise(&'static str),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("no configurator for a DPP credential")]
    NoConfigurator,

    #[error("invalid CSR: {0}")]
    InvalidCsr(&'static str),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error(transparent)]
    Core(#[from] DppError),
}

impl From<ConfigError> for FailureReason {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Connector(c) => FailureReason::Connector(c),
            ConfigError::Core(DppError::InjectedFault(point)) => FailureReason::Injected(point),
            other => FailureReason::Config(other.to_string()),
        }
    }
}

/// Signs an Enrollee's PKCS#10 request. Backed by the EAP-TLS/RADIUS
/// side of the deployment.
pub trait CertificateAuthority: Send + Sync {
    fn sign_csr(&self, csr_der: &[u8]) -> Result<EnterpriseCredentials, String>;
}

/// Produces a PKCS#10 request for the Enrollee's certificate, given the
/// CSR Attributes the Configurator asked for.
pub trait CsrProvider: Send + Sync {
    fn generate_csr(&self, csr_attrs: &[u8]) -> Result<Vec<u8>, String>;
}

/// A stored network the Enrollee can join.
#[derive(Debug, Clone)]
pub struct NetworkProfile {
    pub id: u32,
    pub object: ConfigObject,
    /// Private half of the Connector's netAccessKey.
    pub net_access_key: Option<KeyPair>,
}

impl NetworkProfile {
    pub fn connector(&self) -> Option<&str> {
        self.object.credential.dpp().map(|d| d.connector.as_str())
    }
}
