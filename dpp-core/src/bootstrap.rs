//! Bootstrapping manager: own and peer bootstrap keys.
//!
//! Entries are created by [`BootstrapManager::generate`] (own keys, with a
//! private half) or by [`BootstrapManager::parse_uri`] and PKEX (peer
//! keys, public only). Ids are small integers handed out as `max + 1`.
//!
//! URI format:
//!
//! ```text
//! DPP:[C:<opclass/channel,...>;][M:<12 hex>;][I:<info>;][V:<version>;]K:<base64 SPKI>;;
//! ```
//!
//! Unknown fields are skipped. Unknown channels are skipped. A malformed
//! field rejects the whole URI and registers nothing.

use std::str::FromStr;

use crate::constants::{CHIRP_PREFIX, DPP_VERSION};
use crate::crypto::{Curve, KeyPair, PublicKey};
use crate::encoding::{from_base64, from_hex, to_base64, to_hex};
use crate::errors::DppError;
use crate::hash::{sha256, sha256_vector};

/// How a bootstrap key was (or will be) conveyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootstrapType {
    QrCode,
    Pkex,
    NfcUri,
}

impl BootstrapType {
    pub fn name(self) -> &'static str {
        match self {
            BootstrapType::QrCode => "QRCODE",
            BootstrapType::Pkex => "PKEX",
            BootstrapType::NfcUri => "NFC-URI",
        }
    }
}

impl FromStr for BootstrapType {
    type Err = DppError;

    fn from_str(s: &str) -> Result<Self, DppError> {
        match s {
            "qrcode" | "QRCODE" => Ok(BootstrapType::QrCode),
            "pkex" | "PKEX" => Ok(BootstrapType::Pkex),
            "nfc-uri" | "NFC-URI" => Ok(BootstrapType::NfcUri),
            other => Err(DppError::Encoding(format!("unknown bootstrap type {other}"))),
        }
    }
}

/// Target of [`BootstrapManager::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    All,
    Id(u32),
}

impl FromStr for Selector {
    type Err = DppError;

    fn from_str(s: &str) -> Result<Self, DppError> {
        if s == "*" {
            return Ok(Selector::All);
        }
        s.parse::<u32>()
            .map(Selector::Id)
            .map_err(|_| DppError::Encoding(format!("invalid id {s}")))
    }
}

/// One bootstrap entry.
#[derive(Debug, Clone)]
pub struct BootstrapInfo {
    pub id: u32,
    pub kind: BootstrapType,
    pub public: PublicKey,
    /// Present only for own entries.
    pub key: Option<KeyPair>,
    pub mac: Option<[u8; 6]>,
    /// Channel list as frequencies in MHz.
    pub freqs: Vec<u32>,
    pub info: Option<String>,
    pub version: u8,
    spki: Vec<u8>,
    key_hash: [u8; 32],
    chirp_hash: [u8; 32],
}

impl BootstrapInfo {
    fn new(
        kind: BootstrapType,
        public: PublicKey,
        key: Option<KeyPair>,
    ) -> Result<Self, DppError> {
        let spki = public.to_spki_der()?;
        let key_hash = sha256(&spki);
        let chirp_hash = sha256_vector(&[CHIRP_PREFIX, &spki]);
        Ok(Self {
            id: 0,
            kind,
            public,
            key,
            mac: None,
            freqs: Vec::new(),
            info: None,
            version: DPP_VERSION,
            spki,
            key_hash,
            chirp_hash,
        })
    }

    /// Keep the DER exactly as received so hashes match the sender's.
    fn with_received_spki(mut self, der: Vec<u8>) -> Self {
        self.key_hash = sha256(&der);
        self.chirp_hash = sha256_vector(&[CHIRP_PREFIX, &der]);
        self.spki = der;
        self
    }

    pub fn curve(&self) -> Curve {
        self.public.curve()
    }

    pub fn is_own(&self) -> bool {
        self.key.is_some()
    }

    /// SHA256 of the DER SubjectPublicKeyInfo.
    pub fn key_hash(&self) -> &[u8; 32] {
        &self.key_hash
    }

    /// SHA256("chirp" || DER), advertised in Presence Announcements.
    pub fn chirp_hash(&self) -> &[u8; 32] {
        &self.chirp_hash
    }

    pub fn spki_der(&self) -> &[u8] {
        &self.spki
    }

    /// Render the bootstrapping URI.
    pub fn uri(&self) -> String {
        let mut uri = String::from("DPP:");
        let chans: Vec<String> = self
            .freqs
            .iter()
            .filter_map(|f| freq_to_channel(*f))
            .map(|(class, chan)| format!("{class}/{chan}"))
            .collect();
        if !chans.is_empty() {
            uri.push_str(&format!("C:{};", chans.join(",")));
        }
        if let Some(mac) = self.mac {
            uri.push_str(&format!("M:{};", to_hex(&mac)));
        }
        if let Some(info) = &self.info {
            uri.push_str(&format!("I:{};", percent_encode(info)));
        }
        if self.version >= 2 {
            uri.push_str(&format!("V:{};", self.version));
        }
        uri.push_str(&format!("K:{};;", to_base64(&self.spki)));
        uri
    }

    /// Summary as reported by a bootstrap info query.
    pub fn summary(&self) -> BootstrapSummary {
        BootstrapSummary {
            kind: self.kind.name(),
            mac: self.mac.map(|m| format_mac(&m)),
            info: self.info.clone(),
            num_freq: self.freqs.len(),
            use_freq: self.freqs.first().copied(),
            curve: self.curve().name(),
            pkhash: to_hex(&self.key_hash),
            version: self.version,
        }
    }
}

/// Read-only view of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapSummary {
    pub kind: &'static str,
    pub mac: Option<String>,
    pub info: Option<String>,
    pub num_freq: usize,
    pub use_freq: Option<u32>,
    pub curve: &'static str,
    pub pkhash: String,
    pub version: u8,
}

/// Parameters for [`BootstrapManager::generate`].
#[derive(Debug, Clone, Default)]
pub struct BootstrapParams {
    pub kind: Option<BootstrapType>,
    pub curve: Curve,
    /// Existing private scalar; a fresh key is generated when absent.
    pub key: Option<Vec<u8>>,
    /// `opclass/channel[,opclass/channel]*`.
    pub chan: Option<String>,
    pub mac: Option<String>,
    pub info: Option<String>,
}

/// Owner of every bootstrap entry on this instance.
#[derive(Debug, Clone, Default)]
pub struct BootstrapManager {
    entries: Vec<BootstrapInfo>,
}

impl BootstrapManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u32 {
        self.entries.iter().map(|e| e.id).max().unwrap_or(0) + 1
    }

    fn insert(&mut self, mut entry: BootstrapInfo) -> u32 {
        entry.id = self.next_id();
        let id = entry.id;
        tracing::debug!(
            id,
            kind = entry.kind.name(),
            own = entry.is_own(),
            "bootstrap entry added"
        );
        self.entries.push(entry);
        id
    }

    /// Generate (or import) an own bootstrap key.
    pub fn generate(&mut self, params: BootstrapParams) -> Result<u32, DppError> {
        let kind = params.kind.unwrap_or(BootstrapType::QrCode);
        let key = match &params.key {
            Some(secret) => KeyPair::from_secret(params.curve, secret)?,
            None => KeyPair::generate(params.curve)?,
        };
        let mut entry = BootstrapInfo::new(kind, key.public().clone(), Some(key))?;
        if let Some(chan) = &params.chan {
            entry.freqs = parse_channel_list(chan)?;
        }
        if let Some(mac) = &params.mac {
            entry.mac = Some(parse_mac(mac)?);
        }
        if let Some(info) = &params.info {
            validate_info(info)?;
            entry.info = Some(info.clone());
        }
        Ok(self.insert(entry))
    }

    /// URI for an entry.
    pub fn get_uri(&self, id: u32) -> Result<String, DppError> {
        Ok(self.get(id).ok_or(DppError::UnknownId(id))?.uri())
    }

    /// Parse a QR-code URI and register the peer key.
    pub fn parse_uri(&mut self, uri: &str) -> Result<u32, DppError> {
        self.add_uri(uri, BootstrapType::QrCode)
    }

    /// Register a peer URI received over NFC.
    pub fn add_nfc_uri(&mut self, uri: &str) -> Result<u32, DppError> {
        self.add_uri(uri, BootstrapType::NfcUri)
    }

    fn add_uri(&mut self, uri: &str, kind: BootstrapType) -> Result<u32, DppError> {
        let entry = parse_uri(uri, kind)?;
        Ok(self.insert(entry))
    }

    /// Register a peer key learned through PKEX.
    pub fn add_pkex_peer(&mut self, public: PublicKey) -> Result<u32, DppError> {
        let entry = BootstrapInfo::new(BootstrapType::Pkex, public, None)?;
        Ok(self.insert(entry))
    }

    /// Remove one entry or all of them.
    pub fn remove(&mut self, which: Selector) -> Result<(), DppError> {
        match which {
            Selector::All => self.entries.clear(),
            Selector::Id(id) => {
                let before = self.entries.len();
                self.entries.retain(|e| e.id != id);
                if self.entries.len() == before {
                    return Err(DppError::UnknownId(id));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, id: u32) -> Option<&BootstrapInfo> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn info(&self, id: u32) -> Result<BootstrapSummary, DppError> {
        Ok(self.get(id).ok_or(DppError::UnknownId(id))?.summary())
    }

    pub fn iter(&self) -> impl Iterator<Item = &BootstrapInfo> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Own entry whose key hash is `hash`.
    pub fn find_own(&self, hash: &[u8]) -> Option<&BootstrapInfo> {
        self.entries
            .iter()
            .find(|e| e.is_own() && e.key_hash[..] == *hash)
    }

    /// Peer entry whose key hash is `hash`.
    pub fn find_peer(&self, hash: &[u8]) -> Option<&BootstrapInfo> {
        self.entries
            .iter()
            .find(|e| !e.is_own() && e.key_hash[..] == *hash)
    }

    /// Peer entry whose key hash equals `public`'s.
    pub fn find_peer_by_key(&self, public: &PublicKey) -> Option<&BootstrapInfo> {
        self.entries
            .iter()
            .find(|e| !e.is_own() && &e.public == public)
    }

    /// Resolve the (own, peer) pair named by an Authentication Request.
    pub fn find_pair(
        &self,
        i_hash: Option<&[u8]>,
        r_hash: &[u8],
    ) -> (Option<&BootstrapInfo>, Option<&BootstrapInfo>) {
        let own = self.find_own(r_hash);
        let peer = i_hash.and_then(|h| self.find_peer(h));
        (own, peer)
    }

    /// Peer entry whose chirp hash is `hash`.
    pub fn find_chirp(&self, hash: &[u8]) -> Option<&BootstrapInfo> {
        self.entries
            .iter()
            .find(|e| !e.is_own() && e.chirp_hash[..] == *hash)
    }

    /// Own entry whose chirp hash is `hash` (Relay/Controller routing).
    pub fn find_own_chirp(&self, hash: &[u8]) -> Option<&BootstrapInfo> {
        self.entries
            .iter()
            .find(|e| e.is_own() && e.chirp_hash[..] == *hash)
    }

    /// NFC negotiated handover: settle both entries on one common channel.
    ///
    /// Returns the selected frequency, or `None` when neither side
    /// constrains the channel.
    pub fn nfc_update(&mut self, own_id: u32, peer_id: u32) -> Result<Option<u32>, DppError> {
        let own = self.get(own_id).ok_or(DppError::UnknownId(own_id))?;
        let peer = self.get(peer_id).ok_or(DppError::UnknownId(peer_id))?;
        let chosen = match (own.freqs.is_empty(), peer.freqs.is_empty()) {
            (true, true) => None,
            (true, false) => peer.freqs.first().copied(),
            (false, true) => own.freqs.first().copied(),
            (false, false) => Some(
                own.freqs
                    .iter()
                    .copied()
                    .find(|f| peer.freqs.contains(f))
                    .ok_or_else(|| DppError::InvalidUri("no common channel".into()))?,
            ),
        };
        if let Some(freq) = chosen {
            for entry in self.entries.iter_mut() {
                if entry.id == own_id || entry.id == peer_id {
                    entry.freqs = vec![freq];
                }
            }
        }
        Ok(chosen)
    }
}

/// Parse a URI into an unregistered peer entry.
pub fn parse_uri(uri: &str, kind: BootstrapType) -> Result<BootstrapInfo, DppError> {
    let body = uri
        .strip_prefix("DPP:")
        .ok_or_else(|| DppError::InvalidUri("missing DPP: prefix".into()))?;
    if !body.ends_with(";;") {
        return Err(DppError::InvalidUri("missing ;; terminator".into()));
    }

    let mut freqs = Vec::new();
    let mut mac = None;
    let mut info = None;
    let mut version = 1u8;
    let mut key = None;

    for field in body[..body.len() - 1].split_terminator(';') {
        let Some((tag, value)) = field.split_once(':') else {
            return Err(DppError::InvalidUri(format!("malformed field {field:?}")));
        };
        match tag {
            "C" => freqs = parse_channel_list(value)?,
            "M" => mac = Some(parse_mac(value)?),
            "I" => {
                let decoded = percent_decode(value)?;
                validate_info(&decoded)?;
                info = Some(decoded);
            }
            "V" => {
                version = value
                    .parse()
                    .map_err(|_| DppError::InvalidUri(format!("invalid version {value}")))?;
            }
            "K" => key = Some(value),
            _ => tracing::debug!(tag, "ignoring unknown URI field"),
        }
    }

    let key = key.ok_or_else(|| DppError::InvalidUri("no public key".into()))?;
    let der = from_base64(key).map_err(|e| DppError::InvalidUri(e.to_string()))?;
    let public = PublicKey::from_spki_der(&der).map_err(|e| DppError::InvalidUri(e.to_string()))?;

    let mut entry = BootstrapInfo::new(kind, public, None)?.with_received_spki(der);
    entry.freqs = freqs;
    entry.mac = mac;
    entry.info = info;
    entry.version = version;
    Ok(entry)
}

/// Parse `opclass/channel[,opclass/channel]*` into frequencies.
///
/// Unknown (class, channel) pairs are dropped; syntax errors are not.
pub fn parse_channel_list(list: &str) -> Result<Vec<u32>, DppError> {
    let mut freqs = Vec::new();
    for item in list.split(',').filter(|s| !s.is_empty()) {
        let (class, chan) = item
            .split_once('/')
            .ok_or_else(|| DppError::InvalidUri(format!("channel {item:?} lacks opclass")))?;
        let class: u8 = class
            .parse()
            .map_err(|_| DppError::InvalidUri(format!("invalid opclass {class}")))?;
        let chan: u8 = chan
            .parse()
            .map_err(|_| DppError::InvalidUri(format!("invalid channel {chan}")))?;
        match channel_to_freq(class, chan) {
            Some(freq) if !freqs.contains(&freq) => freqs.push(freq),
            Some(_) => {}
            None => tracing::debug!(class, chan, "ignoring unknown channel"),
        }
    }
    Ok(freqs)
}

/// Global operating class + channel to MHz.
pub fn channel_to_freq(opclass: u8, chan: u8) -> Option<u32> {
    let chan32 = u32::from(chan);
    match opclass {
        81 if (1..=13).contains(&chan) => Some(2407 + 5 * chan32),
        82 if chan == 14 => Some(2484),
        115..=130 if (36..=177).contains(&chan) => Some(5000 + 5 * chan32),
        131..=136 if (1..=233).contains(&chan) => Some(5950 + 5 * chan32),
        180 if (1..=6).contains(&chan) => Some(56_160 + 2160 * chan32),
        _ => None,
    }
}

/// MHz to a (global operating class, channel) pair.
pub fn freq_to_channel(freq: u32) -> Option<(u8, u8)> {
    let pair = match freq {
        2412..=2472 if (freq - 2407) % 5 == 0 => (81, (freq - 2407) / 5),
        2484 => (82, 14),
        5180..=5885 if (freq - 5000) % 5 == 0 => {
            let chan = (freq - 5000) / 5;
            let class = match chan {
                36..=48 => 115,
                52..=64 => 118,
                100..=144 => 121,
                149..=161 => 124,
                _ => 125,
            };
            (class, chan)
        }
        5955..=7115 if (freq - 5950) % 5 == 0 => (131, (freq - 5950) / 5),
        58_320..=69_120 if (freq - 56_160) % 2160 == 0 => (180, (freq - 56_160) / 2160),
        _ => return None,
    };
    Some((pair.0, u8::try_from(pair.1).ok()?))
}

/// `aa:bb:cc:dd:ee:ff` or `aabbccddeeff`.
pub fn parse_mac(text: &str) -> Result<[u8; 6], DppError> {
    let hex: String = text.chars().filter(|c| *c != ':').collect();
    let bytes = from_hex(&hex).map_err(|_| DppError::InvalidUri(format!("invalid MAC {text}")))?;
    bytes
        .try_into()
        .map_err(|_| DppError::InvalidUri(format!("invalid MAC {text}")))
}

pub fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn validate_info(info: &str) -> Result<(), DppError> {
    if info.bytes().all(|b| (0x20..=0x7e).contains(&b)) {
        Ok(())
    } else {
        Err(DppError::InvalidUri("info must be printable ASCII".into()))
    }
}

fn percent_encode(info: &str) -> String {
    let mut out = String::with_capacity(info.len());
    for b in info.bytes() {
        if b == b';' || b == b'%' || !(0x20..=0x7e).contains(&b) {
            out.push_str(&format!("%{b:02X}"));
        } else {
            out.push(char::from(b));
        }
    }
    out
}

fn percent_decode(value: &str) -> Result<String, DppError> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let byte = bytes
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| DppError::InvalidUri("malformed percent escape".into()))?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| DppError::InvalidUri("info is not UTF-8".into()))
}
