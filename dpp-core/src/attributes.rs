//! Attribute codec: DPP TLV encoding.
//!
//! Wire format per attribute: `type:u16-le || length:u16-le || value`.
//! Attributes keep caller order, since the bytes preceding Wrapped Data
//! are the AES-SIV associated data and must be reproduced exactly.
//!
//! Decoding rules:
//! - A length running past the end of the buffer is `Truncated`.
//! - Fewer than four bytes left after the last attribute are trailing
//!   bytes: logged and ignored.
//! - Nothing may follow Wrapped Data.

use crate::errors::CodecError;

/// DPP attribute identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttrId {
    Status,
    IBootstrapKeyHash,
    RBootstrapKeyHash,
    IProtocolKey,
    WrappedData,
    INonce,
    ICapabilities,
    RNonce,
    RCapabilities,
    RProtocolKey,
    IAuthTag,
    RAuthTag,
    ConfigObj,
    Connector,
    ConfigAttrObj,
    BootstrapKey,
    OwnNetNkHash,
    FiniteCyclicGroup,
    EncryptedKey,
    EnrolleeNonce,
    CodeIdentifier,
    TransactionId,
    BootstrapInfo,
    Channel,
    ProtocolVersion,
    EnvelopedData,
    SendConnStatus,
    ConnStatus,
    ReconfigFlags,
    CSignKeyHash,
    CsrAttrsReq,
    ANonce,
    EPrimeId,
    ConfiguratorNonce,
    /// Any identifier this engine does not interpret. Kept for round-trips.
    Unknown(u16),
}

impl AttrId {
    /// Wire identifier.
    pub fn code(self) -> u16 {
        match self {
            AttrId::Status => 0x1000,
            AttrId::IBootstrapKeyHash => 0x1001,
            AttrId::RBootstrapKeyHash => 0x1002,
            AttrId::IProtocolKey => 0x1003,
            AttrId::WrappedData => 0x1004,
            AttrId::INonce => 0x1005,
            AttrId::ICapabilities => 0x1006,
            AttrId::RNonce => 0x1007,
            AttrId::RCapabilities => 0x1008,
            AttrId::RProtocolKey => 0x1009,
            AttrId::IAuthTag => 0x100a,
            AttrId::RAuthTag => 0x100b,
            AttrId::ConfigObj => 0x100c,
            AttrId::Connector => 0x100d,
            AttrId::ConfigAttrObj => 0x100e,
            AttrId::BootstrapKey => 0x100f,
            AttrId::OwnNetNkHash => 0x1011,
            AttrId::FiniteCyclicGroup => 0x1012,
            AttrId::EncryptedKey => 0x1013,
            AttrId::EnrolleeNonce => 0x1014,
            AttrId::CodeIdentifier => 0x1015,
            AttrId::TransactionId => 0x1016,
            AttrId::BootstrapInfo => 0x1017,
            AttrId::Channel => 0x1018,
            AttrId::ProtocolVersion => 0x1019,
            AttrId::EnvelopedData => 0x101a,
            AttrId::SendConnStatus => 0x101b,
            AttrId::ConnStatus => 0x101c,
            AttrId::ReconfigFlags => 0x101d,
            AttrId::CSignKeyHash => 0x101e,
            AttrId::CsrAttrsReq => 0x101f,
            AttrId::ANonce => 0x1020,
            AttrId::EPrimeId => 0x1021,
            AttrId::ConfiguratorNonce => 0x1022,
            AttrId::Unknown(code) => code,
        }
    }

    /// Map a wire identifier to an `AttrId`. Never fails.
    pub fn from_code(code: u16) -> Self {
        match code {
            0x1000 => AttrId::Status,
            0x1001 => AttrId::IBootstrapKeyHash,
            0x1002 => AttrId::RBootstrapKeyHash,
            0x1003 => AttrId::IProtocolKey,
            0x1004 => AttrId::WrappedData,
            0x1005 => AttrId::INonce,
            0x1006 => AttrId::ICapabilities,
            0x1007 => AttrId::RNonce,
            0x1008 => AttrId::RCapabilities,
            0x1009 => AttrId::RProtocolKey,
            0x100a => AttrId::IAuthTag,
            0x100b => AttrId::RAuthTag,
            0x100c => AttrId::ConfigObj,
            0x100d => AttrId::Connector,
            0x100e => AttrId::ConfigAttrObj,
            0x100f => AttrId::BootstrapKey,
            0x1011 => AttrId::OwnNetNkHash,
            0x1012 => AttrId::FiniteCyclicGroup,
            0x1013 => AttrId::EncryptedKey,
            0x1014 => AttrId::EnrolleeNonce,
            0x1015 => AttrId::CodeIdentifier,
            0x1016 => AttrId::TransactionId,
            0x1017 => AttrId::BootstrapInfo,
            0x1018 => AttrId::Channel,
            0x1019 => AttrId::ProtocolVersion,
            0x101a => AttrId::EnvelopedData,
            0x101b => AttrId::SendConnStatus,
            0x101c => AttrId::ConnStatus,
            0x101d => AttrId::ReconfigFlags,
            0x101e => AttrId::CSignKeyHash,
            0x101f => AttrId::CsrAttrsReq,
            0x1020 => AttrId::ANonce,
            0x1021 => AttrId::EPrimeId,
            0x1022 => AttrId::ConfiguratorNonce,
            other => AttrId::Unknown(other),
        }
    }
}

/// A single decoded attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub id: AttrId,
    pub value: Vec<u8>,
}

/// Ordered attribute list, the body of every DPP message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    items: Vec<Attribute>,
    trailing: usize,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an attribute, builder style.
    pub fn with(mut self, id: AttrId, value: impl Into<Vec<u8>>) -> Self {
        self.push(id, value);
        self
    }

    pub fn push(&mut self, id: AttrId, value: impl Into<Vec<u8>>) {
        self.items.push(Attribute {
            id,
            value: value.into(),
        });
    }

    pub fn push_u8(&mut self, id: AttrId, value: u8) {
        self.push(id, vec![value]);
    }

    pub fn push_u16(&mut self, id: AttrId, value: u16) {
        self.push(id, value.to_le_bytes().to_vec());
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of ignored bytes after the last attribute when decoded.
    pub fn trailing_bytes(&self) -> usize {
        self.trailing
    }

    /// First value for `id`.
    pub fn get(&self, id: AttrId) -> Option<&[u8]> {
        self.items
            .iter()
            .find(|a| a.id == id)
            .map(|a| a.value.as_slice())
    }

    /// Every value for `id`, in order. Used for repeated Config Objects.
    pub fn get_all(&self, id: AttrId) -> Vec<&[u8]> {
        self.items
            .iter()
            .filter(|a| a.id == id)
            .map(|a| a.value.as_slice())
            .collect()
    }

    pub fn contains(&self, id: AttrId) -> bool {
        self.get(id).is_some()
    }

    /// Mandatory attribute lookup.
    pub fn require(&self, id: AttrId) -> Result<&[u8], CodecError> {
        self.get(id).ok_or(CodecError::MissingAttribute(id))
    }

    /// Mandatory attribute with an exact length.
    pub fn require_len(&self, id: AttrId, len: usize) -> Result<&[u8], CodecError> {
        let value = self.require(id)?;
        if value.len() != len {
            return Err(CodecError::InvalidAttribute(id));
        }
        Ok(value)
    }

    /// Mandatory single-octet attribute.
    pub fn require_u8(&self, id: AttrId) -> Result<u8, CodecError> {
        Ok(self.require_len(id, 1)?[0])
    }

    /// Mandatory little-endian u16 attribute.
    pub fn require_u16(&self, id: AttrId) -> Result<u16, CodecError> {
        let v = self.require_len(id, 2)?;
        Ok(u16::from_le_bytes([v[0], v[1]]))
    }

    /// Check a full set of mandatory attributes at once.
    pub fn require_all(&self, ids: &[AttrId]) -> Result<(), CodecError> {
        for id in ids {
            self.require(*id)?;
        }
        Ok(())
    }

    /// Encode every attribute in order.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode(&self.items)
    }

    /// Encode the attributes that precede the first `id`. This is the
    /// associated data for the Wrapped Data attribute.
    pub fn encode_before(&self, id: AttrId) -> Result<Vec<u8>, CodecError> {
        let end = self
            .items
            .iter()
            .position(|a| a.id == id)
            .unwrap_or(self.items.len());
        encode(&self.items[..end])
    }

    /// Decode a TLV buffer.
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut items = Vec::new();
        let mut pos = 0;
        while buf.len() - pos >= 4 {
            let code = u16::from_le_bytes([buf[pos], buf[pos + 1]]);
            let len = u16::from_le_bytes([buf[pos + 2], buf[pos + 3]]) as usize;
            let start = pos + 4;
            if len > buf.len() - start {
                return Err(CodecError::Truncated { offset: pos });
            }
            let id = AttrId::from_code(code);
            if items
                .last()
                .is_some_and(|prev: &Attribute| prev.id == AttrId::WrappedData)
            {
                tracing::debug!(attr = code, "attribute after Wrapped Data");
                return Err(CodecError::InvalidAttribute(AttrId::WrappedData));
            }
            items.push(Attribute {
                id,
                value: buf[start..start + len].to_vec(),
            });
            pos = start + len;
        }
        let trailing = buf.len() - pos;
        if trailing > 0 {
            tracing::debug!(trailing, "ignoring trailing bytes after attributes");
        }
        Ok(Self { items, trailing })
    }
}

/// Encode a slice of attributes.
pub fn encode(attrs: &[Attribute]) -> Result<Vec<u8>, CodecError> {
    let total = attrs.iter().map(|a| 4 + a.value.len()).sum();
    let mut out = Vec::with_capacity(total);
    for attr in attrs {
        let len =
            u16::try_from(attr.value.len()).map_err(|_| CodecError::TooLong(attr.value.len()))?;
        out.extend_from_slice(&attr.id.code().to_le_bytes());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&attr.value);
    }
    Ok(out)
}
