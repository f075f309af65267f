//! Role capability and negotiation.
//!
//! Each side advertises a capability octet: Enrollee, Configurator, or
//! both bits ("Either"). Negotiation must leave exactly one Configurator
//! and one Enrollee; there is no runtime type inspection involved.

use dpp_core::constants::{CAPAB_CONFIGURATOR, CAPAB_ENROLLEE, CAPAB_ROLE_MASK};
use serde::{Deserialize, Serialize};

/// What a device is willing to be in an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Configurator,
    #[default]
    Enrollee,
    Either,
}

/// Settled role after negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Configurator,
    Enrollee,
}

impl Role {
    pub fn opposite(self) -> Role {
        match self {
            Role::Configurator => Role::Enrollee,
            Role::Enrollee => Role::Configurator,
        }
    }

    /// The single-bit capability octet announcing this role.
    pub fn bits(self) -> u8 {
        match self {
            Role::Configurator => CAPAB_CONFIGURATOR,
            Role::Enrollee => CAPAB_ENROLLEE,
        }
    }
}

impl Capability {
    /// Capability octet for I-/R-capabilities.
    pub fn bits(self) -> u8 {
        match self {
            Capability::Configurator => CAPAB_CONFIGURATOR,
            Capability::Enrollee => CAPAB_ENROLLEE,
            Capability::Either => CAPAB_CONFIGURATOR | CAPAB_ENROLLEE,
        }
    }

    /// Decode the role bits of a capability octet. Zero role bits is invalid.
    pub fn from_bits(bits: u8) -> Option<Capability> {
        match bits & CAPAB_ROLE_MASK {
            CAPAB_CONFIGURATOR => Some(Capability::Configurator),
            CAPAB_ENROLLEE => Some(Capability::Enrollee),
            CAPAB_ROLE_MASK => Some(Capability::Either),
            _ => None,
        }
    }

    pub fn allows(self, role: Role) -> bool {
        matches!(
            (self, role),
            (Capability::Either, _)
                | (Capability::Configurator, Role::Configurator)
                | (Capability::Enrollee, Role::Enrollee)
        )
    }
}

/// Why negotiation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiation {
    /// Peer capability octet has no role bits.
    InvalidPeerCapability,
    /// Both sides insist on the same role.
    NotCompatible,
}

/// Responder side: pick our role given the Initiator's announced capability.
///
/// When the Initiator announces Either, a Responder that may enroll does
/// so; otherwise it configures.
pub fn negotiate_responder(own: Capability, peer_bits: u8) -> Result<Role, Negotiation> {
    let peer = Capability::from_bits(peer_bits).ok_or(Negotiation::InvalidPeerCapability)?;
    let role = match peer {
        Capability::Configurator => Role::Enrollee,
        Capability::Enrollee => Role::Configurator,
        Capability::Either if own.allows(Role::Enrollee) => Role::Enrollee,
        Capability::Either => Role::Configurator,
    };
    if own.allows(role) {
        Ok(role)
    } else {
        Err(Negotiation::NotCompatible)
    }
}

/// Initiator side: settle our role from the Responder's single-role answer.
pub fn negotiate_initiator(own: Capability, peer_bits: u8) -> Result<Role, Negotiation> {
    let peer = Capability::from_bits(peer_bits).ok_or(Negotiation::InvalidPeerCapability)?;
    let role = match peer {
        Capability::Configurator => Role::Enrollee,
        Capability::Enrollee => Role::Configurator,
        Capability::Either => return Err(Negotiation::NotCompatible),
    };
    if own.allows(role) {
        Ok(role)
    } else {
        Err(Negotiation::NotCompatible)
    }
}
