// Copyright (c) 2026 Keeper
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! NIST-curve operations behind a single dispatch enum.
//!
//! Everything the rest of the crate needs from the curve crates funnels
//! through [`Curve`]: prehash ECDSA, scalar multiplication for key wrapping,
//! ephemeral key generation, and deterministic scalar derivation from a key
//! seed. Coordinates and signature halves travel as big integers, matching
//! the decimal key-file format.

use crate::core::errors::{Error, Kind};
use hkdf::Hkdf;
use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};
use sha2::Sha256;
use zeroize::Zeroizing;

/// The supported curves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Curve {
    /// NIST P-256, 32-byte field.
    P256,
    /// NIST P-384, 48-byte field.
    P384,
    /// NIST P-521, 66-byte field.
    P521,
}

impl Curve {
    /// The curve name as it appears in key files and packdata.
    pub fn name(self) -> &'static str {
        match self {
            Curve::P256 => "p256",
            Curve::P384 => "p384",
            Curve::P521 => "p521",
        }
    }

    /// Reverse of [`Curve::name`].
    pub fn from_name(s: &str) -> Option<Curve> {
        match s {
            "p256" => Some(Curve::P256),
            "p384" => Some(Curve::P384),
            "p521" => Some(Curve::P521),
            _ => None,
        }
    }

    /// Packdata curve id byte; doubles as the scheme version marker.
    pub fn id(self) -> u8 {
        match self {
            Curve::P256 => 1,
            Curve::P384 => 2,
            Curve::P521 => 3,
        }
    }

    /// Reverse of [`Curve::id`].
    pub fn from_id(b: u8) -> Option<Curve> {
        match b {
            1 => Some(Curve::P256),
            2 => Some(Curve::P384),
            3 => Some(Curve::P521),
            _ => None,
        }
    }

    /// Field element size in bytes.
    pub fn field_size(self) -> usize {
        match self {
            Curve::P256 => 32,
            Curve::P384 => 48,
            Curve::P521 => 66,
        }
    }
}

fn bad_point(op: &'static str) -> Error {
    Error::new(op, Kind::Invalid).detail("not a point on the curve")
}

fn bad_scalar(op: &'static str) -> Error {
    Error::new(op, Kind::Invalid).detail("invalid private scalar")
}

fn crypto_failed(op: &'static str) -> Error {
    Error::new(op, Kind::Internal).detail("curve operation failed")
}

/// Left-pad a big integer to exactly `len` big-endian bytes.
pub(crate) fn pad_to(n: &BigUint, len: usize) -> Result<Vec<u8>, Error> {
    let b = n.to_bytes_be();
    if b.len() > len {
        return Err(Error::new("curves.pad", Kind::Invalid).detail("integer too large for field"));
    }
    let mut out = vec![0u8; len - b.len()];
    out.extend_from_slice(&b);
    Ok(out)
}

macro_rules! curve_ops {
    ($modname:ident, $pkg:ident, $len:expr, $mask:expr, $name:literal) => {
        mod $modname {
            use super::*;
            use ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
            use elliptic_curve::sec1::ToEncodedPoint;
            use $pkg::ecdsa::{Signature, SigningKey, VerifyingKey};
            use $pkg::{FieldBytes, ProjectivePoint, PublicKey, SecretKey};

            pub(super) const LEN: usize = $len;

            fn sec1_uncompressed(x: &BigUint, y: &BigUint) -> Result<Vec<u8>, Error> {
                let mut out = Vec::with_capacity(1 + 2 * LEN);
                out.push(0x04);
                out.extend_from_slice(&pad_to(x, LEN)?);
                out.extend_from_slice(&pad_to(y, LEN)?);
                Ok(out)
            }

            fn point_coords(ep: &$pkg::EncodedPoint) -> Result<(BigUint, BigUint), Error> {
                let x = ep.x().ok_or_else(|| crypto_failed("curves.point"))?;
                let y = ep.y().ok_or_else(|| crypto_failed("curves.point"))?;
                Ok((BigUint::from_bytes_be(x), BigUint::from_bytes_be(y)))
            }

            pub(super) fn validate_point(x: &BigUint, y: &BigUint) -> Result<(), Error> {
                PublicKey::from_sec1_bytes(&sec1_uncompressed(x, y)?)
                    .map(|_| ())
                    .map_err(|_| bad_point("curves.validate"))
            }

            pub(super) fn public_from_secret(d: &[u8]) -> Result<(BigUint, BigUint), Error> {
                let sk = SecretKey::from_slice(d).map_err(|_| bad_scalar("curves.public"))?;
                point_coords(&sk.public_key().to_encoded_point(false))
            }

            pub(super) fn sign(d: &[u8], digest: &[u8; 32]) -> Result<(BigUint, BigUint), Error> {
                let signer =
                    SigningKey::from_slice(d).map_err(|_| bad_scalar("curves.sign"))?;
                let sig: Signature = signer
                    .sign_prehash(digest)
                    .map_err(|_| crypto_failed("curves.sign"))?;
                let (r, s) = sig.split_bytes();
                Ok((BigUint::from_bytes_be(&r), BigUint::from_bytes_be(&s)))
            }

            pub(super) fn verify(
                x: &BigUint,
                y: &BigUint,
                digest: &[u8; 32],
                r: &BigUint,
                s: &BigUint,
            ) -> Result<bool, Error> {
                let vk = VerifyingKey::from_sec1_bytes(&sec1_uncompressed(x, y)?)
                    .map_err(|_| bad_point("curves.verify"))?;
                let rb = FieldBytes::clone_from_slice(&pad_to(r, LEN)?);
                let sb = FieldBytes::clone_from_slice(&pad_to(s, LEN)?);
                let sig = match Signature::from_scalars(rb, sb) {
                    Ok(sig) => sig,
                    Err(_) => return Ok(false),
                };
                Ok(vk.verify_prehash(digest, &sig).is_ok())
            }

            pub(super) fn scalar_mult(
                d: &[u8],
                px: &BigUint,
                py: &BigUint,
            ) -> Result<(BigUint, BigUint), Error> {
                let sk = SecretKey::from_slice(d).map_err(|_| bad_scalar("curves.mult"))?;
                let pk = PublicKey::from_sec1_bytes(&sec1_uncompressed(px, py)?)
                    .map_err(|_| bad_point("curves.mult"))?;
                let shared = ProjectivePoint::from(*pk.as_affine()) * *sk.to_nonzero_scalar();
                point_coords(&shared.to_affine().to_encoded_point(false))
            }

            pub(super) fn ephemeral<R: RngCore + CryptoRng>(
                rng: &mut R,
            ) -> Result<(Zeroizing<Vec<u8>>, BigUint, BigUint), Error> {
                let sk = SecretKey::random(rng);
                let d = Zeroizing::new(sk.to_bytes().to_vec());
                let (x, y) = point_coords(&sk.public_key().to_encoded_point(false))?;
                Ok((d, x, y))
            }

            pub(super) fn scalar_from_seed(seed: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
                let hk = Hkdf::<Sha256>::new(None, seed);
                // Counter-mode rejection sampling; deterministic for a given
                // seed, and the mask keeps rejections rare even on P-521.
                for ctr in 0u32..1024 {
                    let mut buf = Zeroizing::new(vec![0u8; LEN]);
                    let mut info = Vec::with_capacity(32);
                    info.extend_from_slice(b"keeper-keygen-");
                    info.extend_from_slice($name.as_bytes());
                    info.extend_from_slice(&ctr.to_be_bytes());
                    hk.expand(&info, &mut buf)
                        .map_err(|_| crypto_failed("curves.derive"))?;
                    buf[0] &= $mask;
                    if SecretKey::from_slice(&buf).is_ok() {
                        return Ok(buf);
                    }
                }
                Err(crypto_failed("curves.derive"))
            }
        }
    };
}

curve_ops!(ops256, p256, 32, 0xff, "p256");
curve_ops!(ops384, p384, 48, 0xff, "p384");
curve_ops!(ops521, p521, 66, 0x01, "p521");

macro_rules! dispatch {
    ($self:expr, $f:ident ( $($arg:expr),* )) => {
        match $self {
            Curve::P256 => ops256::$f($($arg),*),
            Curve::P384 => ops384::$f($($arg),*),
            Curve::P521 => ops521::$f($($arg),*),
        }
    };
}

impl Curve {
    /// Check that `(x, y)` is a valid point on this curve.
    pub fn validate_point(self, x: &BigUint, y: &BigUint) -> Result<(), Error> {
        dispatch!(self, validate_point(x, y))
    }

    /// Public point of the private scalar `d` (big-endian, field-size bytes).
    pub fn public_from_secret(self, d: &[u8]) -> Result<(BigUint, BigUint), Error> {
        dispatch!(self, public_from_secret(d))
    }

    /// ECDSA over the 32-byte prehash `digest`.
    pub fn sign(self, d: &[u8], digest: &[u8; 32]) -> Result<(BigUint, BigUint), Error> {
        dispatch!(self, sign(d, digest))
    }

    /// Verify an ECDSA signature `(r, s)` over `digest` by the point `(x, y)`.
    pub fn verify(
        self,
        x: &BigUint,
        y: &BigUint,
        digest: &[u8; 32],
        r: &BigUint,
        s: &BigUint,
    ) -> Result<bool, Error> {
        dispatch!(self, verify(x, y, digest, r, s))
    }

    /// `d · P` for the point `P = (px, py)`; the ECDH step.
    pub fn scalar_mult(
        self,
        d: &[u8],
        px: &BigUint,
        py: &BigUint,
    ) -> Result<(BigUint, BigUint), Error> {
        dispatch!(self, scalar_mult(d, px, py))
    }

    /// Fresh ephemeral key pair: private scalar bytes plus public point.
    pub fn ephemeral<R: RngCore + CryptoRng>(
        self,
        rng: &mut R,
    ) -> Result<(Zeroizing<Vec<u8>>, BigUint, BigUint), Error> {
        dispatch!(self, ephemeral(rng))
    }

    /// Deterministically derive a private scalar from a 128-bit key seed.
    pub fn scalar_from_seed(self, seed: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
        dispatch!(self, scalar_from_seed(seed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn sign_verify_all_curves() {
        let digest = [7u8; 32];
        for curve in [Curve::P256, Curve::P384, Curve::P521] {
            let d = curve.scalar_from_seed(b"0123456789abcdef").unwrap();
            let (x, y) = curve.public_from_secret(&d).unwrap();
            curve.validate_point(&x, &y).unwrap();
            let (r, s) = curve.sign(&d, &digest).unwrap();
            assert!(curve.verify(&x, &y, &digest, &r, &s).unwrap());
            let mut other = digest;
            other[0] ^= 1;
            assert!(!curve.verify(&x, &y, &other, &r, &s).unwrap());
        }
    }

    #[test]
    fn ecdh_agrees() {
        for curve in [Curve::P256, Curve::P521] {
            let (da, ax, ay) = curve.ephemeral(&mut OsRng).unwrap();
            let (db, bx, by) = curve.ephemeral(&mut OsRng).unwrap();
            let (sx1, _) = curve.scalar_mult(&da, &bx, &by).unwrap();
            let (sx2, _) = curve.scalar_mult(&db, &ax, &ay).unwrap();
            assert_eq!(sx1, sx2);
        }
    }

    #[test]
    fn seed_derivation_is_deterministic() {
        let a = Curve::P256.scalar_from_seed(b"0123456789abcdef").unwrap();
        let b = Curve::P256.scalar_from_seed(b"0123456789abcdef").unwrap();
        assert_eq!(a.as_slice(), b.as_slice());
        let c = Curve::P256.scalar_from_seed(b"0123456789abcdeg").unwrap();
        assert_ne!(a.as_slice(), c.as_slice());
    }
}
