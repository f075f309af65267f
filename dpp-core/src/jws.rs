//! JWS compact serialization and EC JWKs.
//!
//! Connectors are `base64url(header).base64url(payload).base64url(sig)`
//! where the signature is raw `r || s` (64 bytes for ES256, 96 for ES384,
//! 132 for ES512, and twice the field length for the Brainpool BS algs).
//! C-sign keys travel as JWKs with a `kid` equal to
//! `base64url(SHA256(uncompressed point))`.

use serde::{Deserialize, Serialize};

use crate::crypto::{brainpool_sign, brainpool_verify, Curve, KeyPair, PublicKey};
use crate::encoding::{from_base64url, to_base64url};
use crate::errors::DppError;
use crate::hash::sha256;

/// An elliptic-curve JSON Web Key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub y: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl Jwk {
    /// JWK for `key`, optionally tagged with a kid.
    pub fn from_public(key: &PublicKey, kid: Option<String>) -> Self {
        Self {
            kty: "EC".into(),
            crv: key.curve().jwk_crv().into(),
            x: to_base64url(key.x()),
            y: to_base64url(key.y()),
            kid,
        }
    }

    /// Decode and validate the point.
    pub fn to_public(&self) -> Result<PublicKey, DppError> {
        if self.kty != "EC" {
            return Err(DppError::InvalidKey(format!("unexpected kty {}", self.kty)));
        }
        let curve = Curve::from_name(&self.crv)?;
        let x = from_base64url(&self.x)?;
        let y = from_base64url(&self.y)?;
        if x.len() != curve.prime_len() || y.len() != curve.prime_len() {
            return Err(DppError::InvalidKey("JWK coordinate length".into()));
        }
        let mut xy = x;
        xy.extend_from_slice(&y);
        PublicKey::from_xy(curve, &xy)
    }
}

/// The key identifier for a C-sign key.
pub fn kid_for(key: &PublicKey) -> String {
    to_base64url(&kid_hash(key))
}

/// Raw SHA-256 behind the kid, as carried in C-sign Key Hash attributes.
pub fn kid_hash(key: &PublicKey) -> [u8; 32] {
    sha256(key.sec1())
}

/// Protected header of a DPP connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwsHeader {
    pub typ: String,
    pub kid: String,
    pub alg: String,
}

/// A split, decoded compact JWS.
#[derive(Debug, Clone)]
pub struct CompactJws {
    pub header: JwsHeader,
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
    signing_input: String,
}

macro_rules! ecdsa_ops {
    ($m:ident, $c:ident) => {
        mod $m {
            use super::DppError;
            use $c::ecdsa::signature::{Signer, Verifier};
            use $c::ecdsa::{Signature, SigningKey, VerifyingKey};

            pub fn sign(secret: &[u8], msg: &[u8]) -> Result<Vec<u8>, DppError> {
                let key = SigningKey::from_slice(secret)
                    .map_err(|_| DppError::InvalidKey("signing key".into()))?;
                let sig: Signature = key.sign(msg);
                Ok(sig.to_bytes().to_vec())
            }

            pub fn verify(public: &[u8], msg: &[u8], sig: &[u8]) -> Result<(), DppError> {
                let key = VerifyingKey::from_sec1_bytes(public)
                    .map_err(|_| DppError::InvalidKey("verifying key".into()))?;
                let sig = Signature::from_slice(sig)
                    .map_err(|_| DppError::AuthFailure("malformed signature".into()))?;
                key.verify(msg, &sig)
                    .map_err(|_| DppError::AuthFailure("signature mismatch".into()))
            }
        }
    };
}

ecdsa_ops!(es256, p256);
ecdsa_ops!(es384, p384);
ecdsa_ops!(es512, p521);

/// Sign `payload` under `header` with `signer`.
pub fn sign(signer: &KeyPair, header: &JwsHeader, payload: &[u8]) -> Result<String, DppError> {
    let header_json =
        serde_json::to_vec(header).map_err(|e| DppError::Encoding(e.to_string()))?;
    let signing_input = format!("{}.{}", to_base64url(&header_json), to_base64url(payload));
    let sig = match signer.curve() {
        Curve::P256 => es256::sign(signer.secret_bytes(), signing_input.as_bytes())?,
        Curve::P384 => es384::sign(signer.secret_bytes(), signing_input.as_bytes())?,
        Curve::P521 => es512::sign(signer.secret_bytes(), signing_input.as_bytes())?,
        bp => brainpool_sign(bp, signer.secret_bytes(), signing_input.as_bytes())?,
    };
    Ok(format!("{signing_input}.{}", to_base64url(&sig)))
}

impl CompactJws {
    /// Split and decode. Does not verify.
    pub fn parse(compact: &str) -> Result<Self, DppError> {
        let mut parts = compact.split('.');
        let (Some(h), Some(p), Some(s), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(DppError::Encoding("JWS must have three segments".into()));
        };
        let header: JwsHeader = serde_json::from_slice(&from_base64url(h)?)
            .map_err(|e| DppError::Encoding(format!("JWS header: {e}")))?;
        Ok(Self {
            header,
            payload: from_base64url(p)?,
            signature: from_base64url(s)?,
            signing_input: format!("{h}.{p}"),
        })
    }

    /// Verify against `key`. The header alg must match the key's curve.
    pub fn verify(&self, key: &PublicKey) -> Result<(), DppError> {
        let curve = key.curve();
        if self.header.alg != curve.jws_alg() {
            return Err(DppError::UnsupportedCurve(format!(
                "alg {} with {} key",
                self.header.alg,
                curve.name()
            )));
        }
        if self.signature.len() != 2 * curve.prime_len() {
            return Err(DppError::AuthFailure("signature length".into()));
        }
        let msg = self.signing_input.as_bytes();
        match curve {
            Curve::P256 => es256::verify(key.sec1(), msg, &self.signature),
            Curve::P384 => es384::verify(key.sec1(), msg, &self.signature),
            Curve::P521 => es512::verify(key.sec1(), msg, &self.signature),
            _ => brainpool_verify(key, msg, &self.signature),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_for(key: &KeyPair) -> JwsHeader {
        JwsHeader {
            typ: "dppCon".into(),
            kid: kid_for(key.public()),
            alg: key.curve().jws_alg().into(),
        }
    }

    #[test]
    fn sign_verify_all_curves() {
        for curve in Curve::ALL {
            let key = KeyPair::generate(curve).unwrap();
            let jws = sign(&key, &header_for(&key), br#"{"a":1}"#).unwrap();
            let parsed = CompactJws::parse(&jws).unwrap();
            assert_eq!(parsed.payload, br#"{"a":1}"#);
            assert_eq!(parsed.signature.len(), 2 * curve.prime_len());
            parsed.verify(key.public()).unwrap();
        }
    }

    #[test]
    fn garbage_signature_never_verifies() {
        let key = KeyPair::generate(Curve::P256).unwrap();
        let jws = sign(&key, &header_for(&key), b"{}").unwrap();
        let (prefix, _) = jws.rsplit_once('.').unwrap();
        let forged = format!("{prefix}.{}", to_base64url(&[0x11u8; 64]));
        let parsed = CompactJws::parse(&forged).unwrap();
        assert!(matches!(
            parsed.verify(key.public()),
            Err(DppError::AuthFailure(_))
        ));

        let other = KeyPair::generate(Curve::P256).unwrap();
        let parsed = CompactJws::parse(&jws).unwrap();
        assert!(parsed.verify(other.public()).is_err());
    }

    #[test]
    fn alg_must_match_key_curve() {
        let key = KeyPair::generate(Curve::P384).unwrap();
        let jws = sign(&key, &header_for(&key), b"{}").unwrap();
        let p256 = KeyPair::generate(Curve::P256).unwrap();
        assert!(matches!(
            CompactJws::parse(&jws).unwrap().verify(p256.public()),
            Err(DppError::UnsupportedCurve(_))
        ));
    }

    #[test]
    fn malformed_compact_forms() {
        assert!(CompactJws::parse("a.b").is_err());
        assert!(CompactJws::parse("a.b.c.d").is_err());
        assert!(CompactJws::parse("!!.e30.AA").is_err());
    }

    #[test]
    fn jwk_round_trip_and_kid() {
        let key = KeyPair::generate(Curve::P256).unwrap();
        let kid = kid_for(key.public());
        assert_eq!(kid.len(), 43);
        let jwk = Jwk::from_public(key.public(), Some(kid.clone()));
        let json = serde_json::to_string(&jwk).unwrap();
        assert!(json.contains(r#""crv":"P-256""#));
        let back: Jwk = serde_json::from_str(&json).unwrap();
        assert_eq!(&back.to_public().unwrap(), key.public());
        assert_eq!(back.kid.as_deref(), Some(kid.as_str()));
    }
}
