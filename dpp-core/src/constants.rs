//! Protocol constants: canonical DPP values.
//!
//! Values follow the Wi-Fi Easy Connect wire format. Timing defaults are
//! the ones the engine falls back to when `EngineSettings` leaves a field
//! unset.

/// Wi-Fi Alliance OUI carried in every DPP public action frame.
pub const WFA_OUI: [u8; 3] = [0x50, 0x6f, 0x9a];

/// OUI type identifying DPP inside a vendor-specific public action frame.
pub const DPP_OUI_TYPE: u8 = 0x1a;

/// Crypto suite field. Only suite 1 is defined.
pub const CRYPTO_SUITE: u8 = 1;

/// Length of the DPP frame header (OUI, OUI type, crypto suite, frame type).
pub const DPP_HDR_LEN: usize = 6;

/// IEEE 802.11 public action category.
pub const WLAN_ACTION_PUBLIC: u8 = 4;

/// Public action field: vendor specific.
pub const WLAN_PA_VENDOR_SPECIFIC: u8 = 9;

/// Public action field: GAS initial request.
pub const WLAN_PA_GAS_INITIAL_REQ: u8 = 10;

/// Public action field: GAS initial response.
pub const WLAN_PA_GAS_INITIAL_RESP: u8 = 11;

/// Highest protocol version this engine speaks.
pub const DPP_VERSION: u8 = 2;

/// Bootstrap key hash length (SHA-256).
pub const SHA256_MAC_LEN: usize = 32;

/// PMKID length.
pub const PMKID_LEN: usize = 16;

/// Maximum SSID length in bytes.
pub const SSID_MAX_LEN: usize = 32;

/// Minimum and maximum WPA passphrase length.
pub const PASSPHRASE_MIN_LEN: usize = 8;
pub const PASSPHRASE_MAX_LEN: usize = 63;

/// Raw PSK length in bytes (64 hex characters).
pub const PSK_LEN: usize = 32;

/// Maximum number of configuration objects in one Configuration Response.
pub const MAX_CONF_OBJ: usize = 2;

/// TCP port a Controller listens on.
pub const DPP_TCP_PORT: u16 = 8908;

/// Capability bits in I-/R-capabilities.
pub const CAPAB_ENROLLEE: u8 = 0x01;
pub const CAPAB_CONFIGURATOR: u8 = 0x02;
pub const CAPAB_ROLE_MASK: u8 = CAPAB_ENROLLEE | CAPAB_CONFIGURATOR;

/// Default number of Auth Response transmissions before giving up.
pub const DEFAULT_RESP_MAX_TRIES: u32 = 5;

/// Default Auth Response retransmission interval (ms).
pub const DEFAULT_RESP_RETRY_TIME_MS: u64 = 1000;

/// Default number of Auth Request channel-list iterations.
pub const DEFAULT_INIT_MAX_TRIES: u32 = 5;

/// Default wait between Auth Request channel-list iterations (ms).
pub const DEFAULT_INIT_RETRY_TIME_MS: u64 = 10_000;

/// Default per-channel wait for a response to an Auth Request (ms).
pub const DEFAULT_RESP_WAIT_TIME_MS: u64 = 2000;

/// PKEX: maximum code-mismatch attempts from one source.
pub const DEFAULT_PKEX_T_LIMIT: u32 = 5;

/// Chirp: dwell time on each channel (ms).
pub const CHIRP_CHANNEL_WAIT_MS: u64 = 2000;

/// Chirp: pause between full channel rounds (ms).
pub const CHIRP_ROUND_WAIT_MS: u64 = 30_000;

/// Channels always included in a chirp or default init channel set (MHz).
pub const DEFAULT_CHANNELS: [u32; 3] = [2437, 5220, 5745];

/// Info string used when deriving the chirp key hash.
pub const CHIRP_PREFIX: &[u8] = b"chirp";
