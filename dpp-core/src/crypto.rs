//! Crypto primitives adapter: ECDH, point arithmetic, HKDF, HMAC, AES-SIV.
//!
//! All protocol code works on plain byte encodings:
//! - public keys are uncompressed SEC1 points (`0x04 || x || y`);
//! - private keys are big-endian scalars, zeroized on drop;
//! - protocol-key attributes carry `x || y` without the SEC1 prefix.
//!
//! The hash function follows the curve: SHA-256 for P-256, SHA-384 for
//! P-384, SHA-512 for P-521. Every decrypt or verify mismatch returns
//! `DppError::AuthFailure` and no partial plaintext.
//!
//! NIST curves run on the RustCrypto crates. Brainpool r1 curves run on
//! OpenSSL behind the same byte-level interface.

use aes_siv::siv::{Aes128Siv, Aes256Siv, Siv};
use aes_siv::KeyInit;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use openssl::nid::Nid;
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256, Sha384, Sha512};
use zeroize::Zeroizing;

use crate::errors::DppError;

type Aes192Siv = Siv<aes::Aes192, cmac::Cmac<aes::Aes192>>;

/// Run `$body` with `$h` bound to the curve's hash type.
macro_rules! with_hash {
    ($curve:expr, $h:ident => $body:expr) => {
        match $curve.hash_len() {
            32 => {
                type $h = Sha256;
                $body
            }
            48 => {
                type $h = Sha384;
                $body
            }
            _ => {
                type $h = Sha512;
                $body
            }
        }
    };
}

/// Elliptic curves a DPP bootstrap or protocol key may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Curve {
    #[default]
    P256,
    P384,
    P521,
    BrainpoolP256r1,
    BrainpoolP384r1,
    BrainpoolP512r1,
}

impl Curve {
    /// Every curve named by the protocol.
    pub const ALL: [Curve; 6] = [
        Curve::P256,
        Curve::P384,
        Curve::P521,
        Curve::BrainpoolP256r1,
        Curve::BrainpoolP384r1,
        Curve::BrainpoolP512r1,
    ];

    /// Canonical (OpenSSL-style) name.
    pub fn name(self) -> &'static str {
        match self {
            Curve::P256 => "prime256v1",
            Curve::P384 => "secp384r1",
            Curve::P521 => "secp521r1",
            Curve::BrainpoolP256r1 => "brainpoolP256r1",
            Curve::BrainpoolP384r1 => "brainpoolP384r1",
            Curve::BrainpoolP512r1 => "brainpoolP512r1",
        }
    }

    /// Accepts canonical names and the JWK `crv` spellings.
    pub fn from_name(name: &str) -> Result<Self, DppError> {
        let curve = match name {
            "prime256v1" | "P-256" | "secp256r1" => Curve::P256,
            "secp384r1" | "P-384" => Curve::P384,
            "secp521r1" | "P-521" => Curve::P521,
            "brainpoolP256r1" | "BP-256" => Curve::BrainpoolP256r1,
            "brainpoolP384r1" | "BP-384" => Curve::BrainpoolP384r1,
            "brainpoolP512r1" | "BP-512" => Curve::BrainpoolP512r1,
            other => return Err(DppError::UnsupportedCurve(other.to_string())),
        };
        Ok(curve)
    }

    /// IANA IKE group number, as carried in Finite Cyclic Group.
    pub fn ike_group(self) -> u16 {
        match self {
            Curve::P256 => 19,
            Curve::P384 => 20,
            Curve::P521 => 21,
            Curve::BrainpoolP256r1 => 28,
            Curve::BrainpoolP384r1 => 29,
            Curve::BrainpoolP512r1 => 30,
        }
    }

    pub fn from_ike_group(group: u16) -> Result<Self, DppError> {
        Curve::ALL
            .into_iter()
            .find(|c| c.ike_group() == group)
            .ok_or_else(|| DppError::UnsupportedCurve(format!("group {group}")))
    }

    /// JWK `crv` value.
    pub fn jwk_crv(self) -> &'static str {
        match self {
            Curve::P256 => "P-256",
            Curve::P384 => "P-384",
            Curve::P521 => "P-521",
            Curve::BrainpoolP256r1 => "BP-256",
            Curve::BrainpoolP384r1 => "BP-384",
            Curve::BrainpoolP512r1 => "BP-512",
        }
    }

    /// JWS `alg` used when this curve signs connectors.
    pub fn jws_alg(self) -> &'static str {
        match self {
            Curve::P256 => "ES256",
            Curve::P384 => "ES384",
            Curve::P521 => "ES512",
            Curve::BrainpoolP256r1 => "BS256",
            Curve::BrainpoolP384r1 => "BS384",
            Curve::BrainpoolP512r1 => "BS512",
        }
    }

    /// Field element length in bytes.
    pub fn prime_len(self) -> usize {
        match self {
            Curve::P256 | Curve::BrainpoolP256r1 => 32,
            Curve::P384 | Curve::BrainpoolP384r1 => 48,
            Curve::P521 => 66,
            Curve::BrainpoolP512r1 => 64,
        }
    }

    /// Output length of the curve's hash.
    pub fn hash_len(self) -> usize {
        match self {
            Curve::P256 | Curve::BrainpoolP256r1 => 32,
            Curve::P384 | Curve::BrainpoolP384r1 => 48,
            Curve::P521 | Curve::BrainpoolP512r1 => 64,
        }
    }

    /// I-nonce / R-nonce / E-nonce length.
    pub fn nonce_len(self) -> usize {
        self.hash_len() / 2
    }

    pub fn is_brainpool(self) -> bool {
        matches!(
            self,
            Curve::BrainpoolP256r1 | Curve::BrainpoolP384r1 | Curve::BrainpoolP512r1
        )
    }
}

impl std::fmt::Display for Curve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-curve arithmetic over concrete RustCrypto types.
macro_rules! nist_ops {
    ($m:ident, $c:ident, $spki:expr) => {
        mod $m {
            use super::DppError;
            use $c::elliptic_curve::ff::PrimeField;
            use $c::elliptic_curve::sec1::ToEncodedPoint;
            use $c::pkcs8::DecodePublicKey;
            use $c::{ProjectivePoint, PublicKey, SecretKey};
            use rand_core::OsRng;

            fn secret(bytes: &[u8]) -> Result<SecretKey, DppError> {
                SecretKey::from_slice(bytes)
                    .map_err(|_| DppError::InvalidKey("scalar out of range".into()))
            }

            fn public(bytes: &[u8]) -> Result<PublicKey, DppError> {
                PublicKey::from_sec1_bytes(bytes)
                    .map_err(|_| DppError::InvalidKey("point not on curve".into()))
            }

            fn encode(point: ProjectivePoint) -> Result<Vec<u8>, DppError> {
                let pk = PublicKey::from_affine(point.to_affine())
                    .map_err(|_| DppError::InvalidKey("point at infinity".into()))?;
                Ok(pk.to_encoded_point(false).as_bytes().to_vec())
            }

            pub fn generate() -> Result<(Vec<u8>, Vec<u8>), DppError> {
                let sk = SecretKey::random(&mut OsRng);
                let pk = sk.public_key().to_encoded_point(false).as_bytes().to_vec();
                Ok((sk.to_bytes().to_vec(), pk))
            }

            pub fn public_from_secret(s: &[u8]) -> Result<Vec<u8>, DppError> {
                Ok(secret(s)?
                    .public_key()
                    .to_encoded_point(false)
                    .as_bytes()
                    .to_vec())
            }

            pub fn normalize(p: &[u8]) -> Result<Vec<u8>, DppError> {
                Ok(public(p)?.to_encoded_point(false).as_bytes().to_vec())
            }

            pub fn compress(p: &[u8]) -> Result<Vec<u8>, DppError> {
                Ok(public(p)?.to_encoded_point(true).as_bytes().to_vec())
            }

            pub fn mul(s: &[u8], p: &[u8]) -> Result<Vec<u8>, DppError> {
                let s = secret(s)?;
                encode(public(p)?.to_projective() * *s.to_nonzero_scalar())
            }

            pub fn add(a: &[u8], b: &[u8]) -> Result<Vec<u8>, DppError> {
                encode(public(a)?.to_projective() + public(b)?.to_projective())
            }

            pub fn sub(a: &[u8], b: &[u8]) -> Result<Vec<u8>, DppError> {
                encode(public(a)?.to_projective() - public(b)?.to_projective())
            }

            pub fn scalar_add(a: &[u8], b: &[u8]) -> Result<Vec<u8>, DppError> {
                let sum = *secret(a)?.to_nonzero_scalar() + *secret(b)?.to_nonzero_scalar();
                Ok(sum.to_repr().to_vec())
            }

            pub fn validate_scalar(s: &[u8]) -> Result<Vec<u8>, DppError> {
                Ok(secret(s)?.to_bytes().to_vec())
            }

            /// SPKI with the point compressed, as carried in bootstrap URIs.
            pub fn to_spki(p: &[u8]) -> Result<Vec<u8>, DppError> {
                let point = public(p)?.to_encoded_point(true);
                let mut der = $spki.to_vec();
                der.extend_from_slice(point.as_bytes());
                Ok(der)
            }

            pub fn from_spki(der: &[u8]) -> Result<Vec<u8>, DppError> {
                PublicKey::from_public_key_der(der)
                    .map(|pk| pk.to_encoded_point(false).as_bytes().to_vec())
                    .map_err(|_| DppError::InvalidKey("not a SubjectPublicKeyInfo".into()))
            }
        }
    };
}

// SEQUENCE { AlgorithmIdentifier { id-ecPublicKey, curve OID }, BIT STRING header }
// for a compressed point of each curve.
const SPKI_P256: [u8; 26] = [
    0x30, 0x39, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x08,
    0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0x03, 0x22, 0x00,
];
const SPKI_P384: [u8; 23] = [
    0x30, 0x46, 0x30, 0x10, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x05,
    0x2b, 0x81, 0x04, 0x00, 0x22, 0x03, 0x32, 0x00,
];
const SPKI_P521: [u8; 23] = [
    0x30, 0x58, 0x30, 0x10, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x05,
    0x2b, 0x81, 0x04, 0x00, 0x23, 0x03, 0x44, 0x00,
];

const SPKI_BP256: [u8; 27] = [
    0x30, 0x3a, 0x30, 0x14, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x09,
    0x2b, 0x24, 0x03, 0x03, 0x02, 0x08, 0x01, 0x01, 0x07, 0x03, 0x22, 0x00,
];
const SPKI_BP384: [u8; 27] = [
    0x30, 0x4a, 0x30, 0x14, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x09,
    0x2b, 0x24, 0x03, 0x03, 0x02, 0x08, 0x01, 0x01, 0x0b, 0x03, 0x32, 0x00,
];
const SPKI_BP512: [u8; 27] = [
    0x30, 0x5a, 0x30, 0x14, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x09,
    0x2b, 0x24, 0x03, 0x03, 0x02, 0x08, 0x01, 0x01, 0x0d, 0x03, 0x42, 0x00,
];

nist_ops!(ops_p256, p256, super::SPKI_P256);
nist_ops!(ops_p384, p384, super::SPKI_P384);
nist_ops!(ops_p521, p521, super::SPKI_P521);

/// Brainpool arithmetic over OpenSSL, with the same operations and byte
/// forms as the NIST modules.
mod brainpool {
    use std::cmp::Ordering;

    use openssl::bn::{BigNum, BigNumContext, BigNumRef};
    use openssl::ec::{EcGroup, EcKey, EcPoint, EcPointRef, PointConversionForm};
    use openssl::ecdsa::EcdsaSig;
    use openssl::error::ErrorStack;
    use openssl::nid::Nid;
    use openssl::pkey::PKey;

    use super::DppError;

    const UNCOMPRESSED: PointConversionForm = PointConversionForm::UNCOMPRESSED;

    fn ossl(e: ErrorStack) -> DppError {
        DppError::InvalidKey(e.to_string())
    }

    pub struct Ctx {
        nid: Nid,
        len: usize,
        spki: &'static [u8],
        group: EcGroup,
        order: BigNum,
        bn: BigNumContext,
    }

    impl Ctx {
        pub fn new(nid: Nid, len: usize, spki: &'static [u8]) -> Result<Self, DppError> {
            let group = EcGroup::from_curve_name(nid)
                .map_err(|e| DppError::UnsupportedCurve(e.to_string()))?;
            let mut bn = BigNumContext::new().map_err(ossl)?;
            let mut order = BigNum::new().map_err(ossl)?;
            group.order(&mut order, &mut bn).map_err(ossl)?;
            Ok(Self {
                nid,
                len,
                spki,
                group,
                order,
                bn,
            })
        }

        fn point(&mut self, bytes: &[u8]) -> Result<EcPoint, DppError> {
            let point = EcPoint::from_bytes(&self.group, bytes, &mut self.bn)
                .map_err(|_| DppError::InvalidKey("point not on curve".into()))?;
            let on_curve = point.is_on_curve(&self.group, &mut self.bn).map_err(ossl)?;
            if !on_curve || point.is_infinity(&self.group) {
                return Err(DppError::InvalidKey("point not on curve".into()));
            }
            Ok(point)
        }

        fn scalar(&self, bytes: &[u8]) -> Result<BigNum, DppError> {
            let k = BigNum::from_slice(bytes).map_err(ossl)?;
            if k.num_bits() == 0 || k.ucmp(&self.order) != Ordering::Less {
                return Err(DppError::InvalidKey("scalar out of range".into()));
            }
            Ok(k)
        }

        fn scalar_bytes(&self, k: &BigNumRef) -> Result<Vec<u8>, DppError> {
            k.to_vec_padded(self.len as i32).map_err(ossl)
        }

        fn encode(
            &mut self,
            point: &EcPointRef,
            form: PointConversionForm,
        ) -> Result<Vec<u8>, DppError> {
            if point.is_infinity(&self.group) {
                return Err(DppError::InvalidKey("point at infinity".into()));
            }
            point.to_bytes(&self.group, form, &mut self.bn).map_err(ossl)
        }

        fn base_mul(&mut self, k: &BigNumRef) -> Result<EcPoint, DppError> {
            let mut point = EcPoint::new(&self.group).map_err(ossl)?;
            point.mul_generator(&self.group, k, &self.bn).map_err(ossl)?;
            Ok(point)
        }

        pub fn generate(&mut self) -> Result<(Vec<u8>, Vec<u8>), DppError> {
            let key = EcKey::generate(&self.group).map_err(ossl)?;
            let secret = self.scalar_bytes(key.private_key())?;
            let public = self.encode(key.public_key(), UNCOMPRESSED)?;
            Ok((secret, public))
        }

        pub fn public_from_secret(&mut self, s: &[u8]) -> Result<Vec<u8>, DppError> {
            let k = self.scalar(s)?;
            let point = self.base_mul(&k)?;
            self.encode(&point, UNCOMPRESSED)
        }

        pub fn normalize(&mut self, p: &[u8]) -> Result<Vec<u8>, DppError> {
            let point = self.point(p)?;
            self.encode(&point, UNCOMPRESSED)
        }

        pub fn compress(&mut self, p: &[u8]) -> Result<Vec<u8>, DppError> {
            let point = self.point(p)?;
            self.encode(&point, PointConversionForm::COMPRESSED)
        }

        pub fn mul(&mut self, s: &[u8], p: &[u8]) -> Result<Vec<u8>, DppError> {
            let k = self.scalar(s)?;
            let q = self.point(p)?;
            let mut r = EcPoint::new(&self.group).map_err(ossl)?;
            r.mul(&self.group, &q, &k, &self.bn).map_err(ossl)?;
            self.encode(&r, UNCOMPRESSED)
        }

        pub fn add(&mut self, a: &[u8], b: &[u8]) -> Result<Vec<u8>, DppError> {
            let a = self.point(a)?;
            let b = self.point(b)?;
            self.sum(&a, &b)
        }

        pub fn sub(&mut self, a: &[u8], b: &[u8]) -> Result<Vec<u8>, DppError> {
            let a = self.point(a)?;
            let mut b = self.point(b)?;
            b.invert(&self.group, &self.bn).map_err(ossl)?;
            self.sum(&a, &b)
        }

        fn sum(&mut self, a: &EcPointRef, b: &EcPointRef) -> Result<Vec<u8>, DppError> {
            let mut r = EcPoint::new(&self.group).map_err(ossl)?;
            r.add(&self.group, a, b, &mut self.bn).map_err(ossl)?;
            self.encode(&r, UNCOMPRESSED)
        }

        pub fn scalar_add(&mut self, a: &[u8], b: &[u8]) -> Result<Vec<u8>, DppError> {
            let a = self.scalar(a)?;
            let b = self.scalar(b)?;
            let mut sum = BigNum::new().map_err(ossl)?;
            sum.mod_add(&a, &b, &self.order, &mut self.bn).map_err(ossl)?;
            self.scalar_bytes(&sum)
        }

        pub fn validate_scalar(&mut self, s: &[u8]) -> Result<Vec<u8>, DppError> {
            let k = self.scalar(s)?;
            self.scalar_bytes(&k)
        }

        pub fn to_spki(&mut self, p: &[u8]) -> Result<Vec<u8>, DppError> {
            let compressed = self.compress(p)?;
            let mut der = self.spki.to_vec();
            der.extend_from_slice(&compressed);
            Ok(der)
        }

        pub fn from_spki(&mut self, der: &[u8]) -> Result<Vec<u8>, DppError> {
            let key = PKey::public_key_from_der(der)
                .and_then(|pkey| pkey.ec_key())
                .map_err(|_| DppError::InvalidKey("not a SubjectPublicKeyInfo".into()))?;
            if key.group().curve_name() != Some(self.nid) {
                return Err(DppError::InvalidKey("SubjectPublicKeyInfo on another curve".into()));
            }
            self.encode(key.public_key(), UNCOMPRESSED)
        }

        /// ECDSA over a precomputed digest, raw `r || s`.
        pub fn sign_digest(&mut self, s: &[u8], digest: &[u8]) -> Result<Vec<u8>, DppError> {
            let k = self.scalar(s)?;
            let public = self.base_mul(&k)?;
            let key = EcKey::from_private_components(&self.group, &k, &public).map_err(ossl)?;
            let sig = EcdsaSig::sign(digest, &key).map_err(ossl)?;
            let mut out = self.scalar_bytes(sig.r())?;
            out.extend_from_slice(&self.scalar_bytes(sig.s())?);
            Ok(out)
        }

        pub fn verify_digest(
            &mut self,
            p: &[u8],
            digest: &[u8],
            sig: &[u8],
        ) -> Result<(), DppError> {
            if sig.len() != 2 * self.len {
                return Err(DppError::AuthFailure("signature length".into()));
            }
            let q = self.point(p)?;
            let key = EcKey::from_public_key(&self.group, &q).map_err(ossl)?;
            let (r, s) = sig.split_at(self.len);
            let malformed = |_| DppError::AuthFailure("malformed signature".into());
            let r = BigNum::from_slice(r).map_err(malformed)?;
            let s = BigNum::from_slice(s).map_err(malformed)?;
            let sig = EcdsaSig::from_private_components(r, s).map_err(malformed)?;
            match sig.verify(digest, &key) {
                Ok(true) => Ok(()),
                _ => Err(DppError::AuthFailure("signature mismatch".into())),
            }
        }
    }
}

/// OpenSSL context for a Brainpool curve.
fn brainpool_ctx(curve: Curve) -> Result<brainpool::Ctx, DppError> {
    let (nid, spki): (Nid, &'static [u8]) = match curve {
        Curve::BrainpoolP256r1 => (Nid::BRAINPOOL_P256R1, &SPKI_BP256),
        Curve::BrainpoolP384r1 => (Nid::BRAINPOOL_P384R1, &SPKI_BP384),
        Curve::BrainpoolP512r1 => (Nid::BRAINPOOL_P512R1, &SPKI_BP512),
        other => return Err(DppError::UnsupportedCurve(other.name().to_string())),
    };
    brainpool::Ctx::new(nid, curve.prime_len(), spki)
}

/// Dispatch to the per-curve ops module.
macro_rules! dispatch {
    ($curve:expr, $f:ident ( $($arg:expr),* )) => {{
        let curve = $curve;
        match curve {
            Curve::P256 => ops_p256::$f($($arg),*),
            Curve::P384 => ops_p384::$f($($arg),*),
            Curve::P521 => ops_p521::$f($($arg),*),
            Curve::BrainpoolP256r1 | Curve::BrainpoolP384r1 | Curve::BrainpoolP512r1 => {
                brainpool_ctx(curve).and_then(|mut ctx| ctx.$f($($arg),*))
            }
        }
    }};
}

/// ECDSA with the curve hash over `msg`, raw `r || s`. Brainpool only;
/// NIST curves sign through their RustCrypto `ecdsa` modules.
pub fn brainpool_sign(curve: Curve, secret: &[u8], msg: &[u8]) -> Result<Vec<u8>, DppError> {
    brainpool_ctx(curve)?.sign_digest(secret, &hash_vector(curve, &[msg]))
}

/// Verify a raw `r || s` Brainpool ECDSA signature over `msg`.
pub fn brainpool_verify(key: &PublicKey, msg: &[u8], sig: &[u8]) -> Result<(), DppError> {
    let digest = hash_vector(key.curve, &[msg]);
    brainpool_ctx(key.curve)?.verify_digest(&key.point, &digest, sig)
}

/// An EC public key on a known curve.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    curve: Curve,
    point: Vec<u8>,
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey")
            .field("curve", &self.curve)
            .field("x", &crate::encoding::to_hex(self.x()))
            .finish()
    }
}

impl PublicKey {
    /// Parse SEC1 (compressed or uncompressed) and validate on-curve.
    pub fn from_sec1(curve: Curve, bytes: &[u8]) -> Result<Self, DppError> {
        let point = dispatch!(curve, normalize(bytes))?;
        Ok(Self { curve, point })
    }

    /// Parse the `x || y` form used by protocol-key attributes.
    pub fn from_xy(curve: Curve, xy: &[u8]) -> Result<Self, DppError> {
        if xy.len() != 2 * curve.prime_len() {
            return Err(DppError::InvalidKey(format!(
                "expected {} byte point, got {}",
                2 * curve.prime_len(),
                xy.len()
            )));
        }
        let mut sec1 = Vec::with_capacity(1 + xy.len());
        sec1.push(0x04);
        sec1.extend_from_slice(xy);
        Self::from_sec1(curve, &sec1)
    }

    /// Parse a DER SubjectPublicKeyInfo, detecting the curve.
    pub fn from_spki_der(der: &[u8]) -> Result<Self, DppError> {
        for curve in Curve::ALL {
            if let Ok(point) = dispatch!(curve, from_spki(der)) {
                return Ok(Self { curve, point });
            }
        }
        Err(DppError::InvalidKey("not an EC SubjectPublicKeyInfo".into()))
    }

    /// DER SubjectPublicKeyInfo. Bootstrap key hashes are taken over this.
    pub fn to_spki_der(&self) -> Result<Vec<u8>, DppError> {
        dispatch!(self.curve, to_spki(&self.point))
    }

    pub fn curve(&self) -> Curve {
        self.curve
    }

    /// Uncompressed SEC1 encoding.
    pub fn sec1(&self) -> &[u8] {
        &self.point
    }

    /// Compressed SEC1 encoding.
    pub fn sec1_compressed(&self) -> Result<Vec<u8>, DppError> {
        dispatch!(self.curve, compress(&self.point))
    }

    /// `x || y`, the protocol-key attribute form.
    pub fn xy(&self) -> &[u8] {
        &self.point[1..]
    }

    pub fn x(&self) -> &[u8] {
        &self.point[1..1 + self.curve.prime_len()]
    }

    pub fn y(&self) -> &[u8] {
        &self.point[1 + self.curve.prime_len()..]
    }

    /// `self + other`.
    pub fn add(&self, other: &PublicKey) -> Result<PublicKey, DppError> {
        ensure_same_curve(self.curve, other.curve)?;
        let point = dispatch!(self.curve, add(&self.point, &other.point))?;
        Ok(Self {
            curve: self.curve,
            point,
        })
    }

    /// `self - other`.
    pub fn sub(&self, other: &PublicKey) -> Result<PublicKey, DppError> {
        ensure_same_curve(self.curve, other.curve)?;
        let point = dispatch!(self.curve, sub(&self.point, &other.point))?;
        Ok(Self {
            curve: self.curve,
            point,
        })
    }

    /// `scalar * self` for a raw scalar on the same curve.
    pub fn mul_scalar(&self, scalar: &[u8]) -> Result<PublicKey, DppError> {
        let point = dispatch!(self.curve, mul(scalar, &self.point))?;
        Ok(Self {
            curve: self.curve,
            point,
        })
    }
}

/// EC key pair. The private scalar is zeroized on drop.
#[derive(Clone)]
pub struct KeyPair {
    secret: Zeroizing<Vec<u8>>,
    public: PublicKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Fresh random key pair.
    pub fn generate(curve: Curve) -> Result<Self, DppError> {
        let (secret, point) = dispatch!(curve, generate())?;
        Ok(Self {
            secret: Zeroizing::new(secret),
            public: PublicKey { curve, point },
        })
    }

    /// Rebuild from a big-endian private scalar.
    pub fn from_secret(curve: Curve, secret: &[u8]) -> Result<Self, DppError> {
        let secret = Zeroizing::new(dispatch!(curve, validate_scalar(secret))?);
        let point = dispatch!(curve, public_from_secret(&secret))?;
        Ok(Self {
            secret,
            public: PublicKey { curve, point },
        })
    }

    pub fn curve(&self) -> Curve {
        self.public.curve
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    /// Big-endian private scalar.
    pub fn secret_bytes(&self) -> &[u8] {
        &self.secret
    }

    /// Shared point `self.secret * peer`, checked for curve agreement first.
    pub fn ecdh_point(&self, peer: &PublicKey) -> Result<PublicKey, DppError> {
        ensure_same_curve(self.curve(), peer.curve)?;
        peer.mul_scalar(&self.secret)
    }

    /// x coordinate of `self.secret * peer`.
    pub fn ecdh(&self, peer: &PublicKey) -> Result<Zeroizing<Vec<u8>>, DppError> {
        let point = self.ecdh_point(peer)?;
        Ok(Zeroizing::new(point.x().to_vec()))
    }
}

/// `(a + b) mod q` on raw scalars.
pub fn scalar_add(curve: Curve, a: &[u8], b: &[u8]) -> Result<Zeroizing<Vec<u8>>, DppError> {
    Ok(Zeroizing::new(dispatch!(curve, scalar_add(a, b))?))
}

/// Interpret a digest as a scalar, re-hashing until it lands in range.
pub fn scalar_from_digest(curve: Curve, digest: &[u8]) -> Result<Zeroizing<Vec<u8>>, DppError> {
    let mut candidate = digest.to_vec();
    for _ in 0..16 {
        if let Ok(scalar) = dispatch!(curve, validate_scalar(&candidate)) {
            return Ok(Zeroizing::new(scalar));
        }
        candidate = hash_vector(curve, &[&candidate]);
    }
    Err(DppError::InvalidKey("digest never reduced to a scalar".into()))
}

/// Deterministic try-and-increment map from a label to a curve point.
///
/// Candidates are HKDF expansions of the label with a counter; the first
/// x coordinate that decompresses (even y) wins.
pub fn hash_to_element(curve: Curve, label: &[u8]) -> Result<PublicKey, DppError> {
    let prime_len = curve.prime_len();
    for counter in 1u8..=255 {
        let mut x = hkdf(curve, None, label, &[counter], prime_len)?;
        if curve == Curve::P521 {
            // Only the low bit of the leading octet is inside the field.
            x[0] &= 0x01;
        }
        let mut sec1 = Vec::with_capacity(1 + prime_len);
        sec1.push(0x02);
        sec1.extend_from_slice(&x);
        if let Ok(point) = PublicKey::from_sec1(curve, &sec1) {
            return Ok(point);
        }
    }
    Err(DppError::InvalidKey("hash_to_element exhausted".into()))
}

fn ensure_same_curve(expected: Curve, actual: Curve) -> Result<(), DppError> {
    if expected != actual {
        return Err(DppError::CurveMismatch {
            expected: expected.name(),
            actual: actual.name(),
        });
    }
    Ok(())
}

/// Curve hash over the concatenation of `parts`.
pub fn hash_vector(curve: Curve, parts: &[&[u8]]) -> Vec<u8> {
    with_hash!(curve, H => {
        let mut hasher = H::new();
        for part in parts {
            hasher.update(part);
        }
        hasher.finalize().to_vec()
    })
}

/// HKDF (extract then expand). `salt = None` is the empty salt `<>`.
pub fn hkdf(
    curve: Curve,
    salt: Option<&[u8]>,
    ikm: &[u8],
    info: &[u8],
    len: usize,
) -> Result<Zeroizing<Vec<u8>>, DppError> {
    let mut okm = Zeroizing::new(vec![0u8; len]);
    with_hash!(curve, H => {
        Hkdf::<H>::new(salt, ikm)
            .expand(info, &mut okm)
            .map_err(|_| DppError::InvalidKey(format!("HKDF output too long: {len}")))?
    });
    Ok(okm)
}

/// HKDF-Extract only. Returns the pseudorandom key.
pub fn hkdf_extract(curve: Curve, salt: &[u8], ikm: &[u8]) -> Zeroizing<Vec<u8>> {
    with_hash!(curve, H => {
        let (prk, _) = Hkdf::<H>::extract(Some(salt), ikm);
        Zeroizing::new(prk.to_vec())
    })
}

/// HKDF-Expand from an existing pseudorandom key.
pub fn hkdf_expand(
    curve: Curve,
    prk: &[u8],
    info: &[u8],
    len: usize,
) -> Result<Zeroizing<Vec<u8>>, DppError> {
    let mut okm = Zeroizing::new(vec![0u8; len]);
    with_hash!(curve, H => {
        Hkdf::<H>::from_prk(prk)
            .map_err(|_| DppError::InvalidKey("PRK too short".into()))?
            .expand(info, &mut okm)
            .map_err(|_| DppError::InvalidKey(format!("HKDF output too long: {len}")))?
    });
    Ok(okm)
}

/// HMAC with the curve hash over the concatenation of `parts`.
pub fn hmac(curve: Curve, key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>, DppError> {
    with_hash!(curve, H => {
        let mut mac = <Hmac<H> as Mac>::new_from_slice(key)
            .map_err(|_| DppError::InvalidKey("HMAC key".into()))?;
        for part in parts {
            mac.update(part);
        }
        Ok(mac.finalize().into_bytes().to_vec())
    })
}

macro_rules! siv_op {
    ($ty:ty, $key:expr, $op:ident, $aad:expr, $data:expr) => {{
        let mut siv = <$ty>::new_from_slice($key)
            .map_err(|_| DppError::InvalidKey("AES-SIV key length".into()))?;
        siv.$op($aad.iter(), $data)
    }};
}

/// AES-SIV encrypt. Output is `SIV(16) || ciphertext`.
///
/// The key length selects the variant: 32, 48 or 64 bytes for
/// AES-SIV-CMAC-256/384/512.
pub fn aes_siv_encrypt(key: &[u8], aad: &[&[u8]], plaintext: &[u8]) -> Result<Vec<u8>, DppError> {
    let out = match key.len() {
        32 => siv_op!(Aes128Siv, key, encrypt, aad, plaintext),
        48 => siv_op!(Aes192Siv, key, encrypt, aad, plaintext),
        64 => siv_op!(Aes256Siv, key, encrypt, aad, plaintext),
        n => return Err(DppError::InvalidKey(format!("AES-SIV key length {n}"))),
    };
    out.map_err(|_| DppError::AuthFailure("AES-SIV encrypt".into()))
}

/// AES-SIV decrypt. Any mismatch is `AuthFailure`.
pub fn aes_siv_decrypt(key: &[u8], aad: &[&[u8]], sealed: &[u8]) -> Result<Vec<u8>, DppError> {
    if sealed.len() < 16 {
        return Err(DppError::AuthFailure("wrapped data too short".into()));
    }
    let out = match key.len() {
        32 => siv_op!(Aes128Siv, key, decrypt, aad, sealed),
        48 => siv_op!(Aes192Siv, key, decrypt, aad, sealed),
        64 => siv_op!(Aes256Siv, key, decrypt, aad, sealed),
        n => return Err(DppError::InvalidKey(format!("AES-SIV key length {n}"))),
    };
    out.map_err(|_| DppError::AuthFailure("AES-SIV decrypt".into()))
}

/// Fill a fresh buffer from the OS CSPRNG.
pub fn random_bytes(len: usize) -> Zeroizing<Vec<u8>> {
    let mut buf = Zeroizing::new(vec![0u8; len]);
    OsRng.fill_bytes(&mut buf);
    buf
}
