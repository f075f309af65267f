//! Authentication and key management suites carried in `cred.akm`.
//!
//! An AKM is written either by name (`psk+sae`) or as a `+`-separated
//! list of 8-hex-digit RSN suite selectors (`000FAC02+000FAC06`).

use std::fmt;
use std::str::FromStr;

use super::ConfigError;

const SEL_DPP: &str = "506F9A02";
const SEL_PSK: &str = "000FAC02";
const SEL_PSK_SHA256: &str = "000FAC06";
const SEL_SAE: &str = "000FAC08";
const SEL_DOT1X: &str = "000FAC01";
const SEL_DOT1X_SHA256: &str = "000FAC05";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Akm {
    Psk,
    Sae,
    PskSae,
    Dpp,
    SaeDpp,
    PskSaeDpp,
    Dot1x,
}

impl Akm {
    pub fn name(self) -> &'static str {
        match self {
            Akm::Psk => "psk",
            Akm::Sae => "sae",
            Akm::PskSae => "psk+sae",
            Akm::Dpp => "dpp",
            Akm::SaeDpp => "dpp+sae",
            Akm::PskSaeDpp => "dpp+psk+sae",
            Akm::Dot1x => "dot1x",
        }
    }

    /// Suite selector form.
    pub fn selector(self) -> String {
        let parts: &[&str] = match self {
            Akm::Psk => &[SEL_PSK, SEL_PSK_SHA256],
            Akm::Sae => &[SEL_SAE],
            Akm::PskSae => &[SEL_PSK, SEL_PSK_SHA256, SEL_SAE],
            Akm::Dpp => &[SEL_DPP],
            Akm::SaeDpp => &[SEL_DPP, SEL_SAE],
            Akm::PskSaeDpp => &[SEL_DPP, SEL_SAE, SEL_PSK, SEL_PSK_SHA256],
            Akm::Dot1x => &[SEL_DOT1X, SEL_DOT1X_SHA256],
        };
        parts.join("+")
    }

    pub fn is_psk(self) -> bool {
        matches!(self, Akm::Psk | Akm::PskSae | Akm::PskSaeDpp)
    }

    pub fn is_sae(self) -> bool {
        matches!(self, Akm::Sae | Akm::PskSae | Akm::SaeDpp | Akm::PskSaeDpp)
    }

    /// Carries a passphrase or PSK.
    pub fn is_legacy(self) -> bool {
        self.is_psk() || self.is_sae()
    }

    pub fn is_dpp(self) -> bool {
        matches!(self, Akm::Dpp | Akm::SaeDpp | Akm::PskSaeDpp)
    }

    /// DPP mixed with a legacy suite. Only version 2 peers understand it.
    pub fn is_ver2(self) -> bool {
        matches!(self, Akm::SaeDpp | Akm::PskSaeDpp)
    }

    /// What a peer of `version` can be given.
    pub fn for_peer_version(self, version: u8) -> Akm {
        if version < 2 && self.is_ver2() {
            Akm::Dpp
        } else {
            self
        }
    }

    fn from_selectors(s: &str) -> Option<Akm> {
        let (mut psk, mut psk_sha256, mut sae, mut dpp, mut dot1x) =
            (false, false, false, false, false);
        for sel in s.split('+') {
            if sel.len() != 8 || !sel.bytes().all(|b| b.is_ascii_hexdigit()) {
                return None;
            }
            match sel.to_ascii_uppercase().as_str() {
                SEL_PSK => psk = true,
                SEL_PSK_SHA256 => psk_sha256 = true,
                SEL_SAE => sae = true,
                SEL_DPP => dpp = true,
                SEL_DOT1X | SEL_DOT1X_SHA256 => dot1x = true,
                _ => {}
            }
        }
        let psk = psk || psk_sha256;
        match (dpp, psk, sae, dot1x) {
            (_, _, _, true) => Some(Akm::Dot1x),
            (true, true, true, _) => Some(Akm::PskSaeDpp),
            (true, false, true, _) => Some(Akm::SaeDpp),
            (true, _, false, _) => Some(Akm::Dpp),
            (false, true, true, _) => Some(Akm::PskSae),
            (false, true, false, _) => Some(Akm::Psk),
            (false, false, true, _) => Some(Akm::Sae),
            _ => None,
        }
    }
}

impl FromStr for Akm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let akm = match s {
            "psk" => Akm::Psk,
            "sae" => Akm::Sae,
            "psk+sae" | "psk-sae" => Akm::PskSae,
            "dpp" => Akm::Dpp,
            "dpp+sae" | "dpp-sae" => Akm::SaeDpp,
            "dpp+psk+sae" | "dpp-psk-sae" => Akm::PskSaeDpp,
            "dot1x" => Akm::Dot1x,
            other => {
                return Akm::from_selectors(other)
                    .ok_or_else(|| ConfigError::UnsupportedAkm(other.to_string()))
            }
        };
        Ok(akm)
    }
}

impl fmt::Display for Akm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Akm; 7] = [
        Akm::Psk,
        Akm::Sae,
        Akm::PskSae,
        Akm::Dpp,
        Akm::SaeDpp,
        Akm::PskSaeDpp,
        Akm::Dot1x,
    ];

    #[test]
    fn names_and_selectors_parse_back() {
        for akm in ALL {
            assert_eq!(akm.name().parse::<Akm>().unwrap(), akm);
            assert_eq!(akm.selector().parse::<Akm>().unwrap(), akm);
        }
    }

    #[test]
    fn selectors_are_case_insensitive() {
        assert_eq!("000fac08".parse::<Akm>().unwrap(), Akm::Sae);
        assert_eq!("506f9a02+000FAC08".parse::<Akm>().unwrap(), Akm::SaeDpp);
    }

    #[test]
    fn malformed_selector_rejected() {
        assert!("000FAC0".parse::<Akm>().is_err());
        assert!("000FAC0Z".parse::<Akm>().is_err());
        assert!("00000000".parse::<Akm>().is_err());
        assert!("wep".parse::<Akm>().is_err());
    }

    #[test]
    fn version_one_peer_gets_plain_dpp() {
        assert_eq!(Akm::PskSaeDpp.for_peer_version(1), Akm::Dpp);
        assert_eq!(Akm::PskSaeDpp.for_peer_version(2), Akm::PskSaeDpp);
        assert_eq!(Akm::Psk.for_peer_version(1), Akm::Psk);
    }

    #[test]
    fn family_predicates() {
        assert!(Akm::PskSae.is_psk() && Akm::PskSae.is_sae());
        assert!(!Akm::Dpp.is_legacy());
        assert!(Akm::SaeDpp.is_dpp() && Akm::SaeDpp.is_legacy());
        assert!(!Akm::Dot1x.is_dpp());
    }
}
