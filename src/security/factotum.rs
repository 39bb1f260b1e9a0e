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
#![deny(missing_docs)]

//! Factotum: sole custodian of a user's private keys.
//!
//! Loaded once at startup from a key directory and shared read-only for the
//! life of the process. Every signing and ECDH operation in the crate goes
//! through here; the private scalar never leaves this module.
//!
//! ## Key directory layout
//!
//! - `public.upspinkey`: `<curve>\n<X-decimal>\n<Y-decimal>\n`
//! - `secret.upspinkey`: `<D-decimal>\n`
//! - `secret2.upspinkey`: append-only archive of superseded pairs, each a
//!   `# EE <date>` marker line followed by the public and secret records.

use crate::core::errors::{Error, Kind};
use crate::core::types::{KeyHash, PathName, PublicKey, Time};
use crate::security::curves::{pad_to, Curve};
use num_bigint::BigUint;
use std::fmt;
use std::path::Path;
use tracing::debug;
use zeroize::Zeroizing;

/// An ECDSA signature, kept as the raw `(R, S)` pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    /// First half.
    pub r: BigUint,
    /// Second half.
    pub s: BigUint,
}

/// One key pair held by the factotum.
pub(crate) struct KeyPair {
    public: PublicKey,
    hash: KeyHash,
    curve: Curve,
    d: Zeroizing<Vec<u8>>,
}

impl KeyPair {
    /// Build a pair from the key-file text forms.
    fn from_text(public: &PublicKey, secret: &str) -> Result<KeyPair, Error> {
        const OP: &str = "factotum.keys";
        let (curve, x, y) = parse_public_key(public)?;
        let d_int = BigUint::parse_bytes(secret.trim().as_bytes(), 10)
            .ok_or_else(|| Error::new(OP, Kind::Invalid).detail("malformed secret key"))?;
        let d = Zeroizing::new(pad_to(&d_int, curve.field_size())?);
        // The secret must generate the public point it is filed under.
        let (px, py) = curve.public_from_secret(&d)?;
        if px != x || py != y {
            return Err(Error::new(OP, Kind::Invalid).detail("secret does not match public key"));
        }
        Ok(KeyPair {
            public: public.clone(),
            hash: KeyHash::of(public),
            curve,
            d,
        })
    }
}

/// Parse a public key's text form into curve and point.
pub fn parse_public_key(key: &PublicKey) -> Result<(Curve, BigUint, BigUint), Error> {
    const OP: &str = "factotum.parse_key";
    let text = key.as_str();
    if !text.ends_with('\n') {
        return Err(Error::new(OP, Kind::Invalid).detail("missing trailing newline"));
    }
    let mut lines = text.lines();
    let curve = lines
        .next()
        .and_then(Curve::from_name)
        .ok_or_else(|| Error::new(OP, Kind::Invalid).detail("unknown curve"))?;
    let mut coord = || {
        lines
            .next()
            .and_then(|l| BigUint::parse_bytes(l.trim().as_bytes(), 10))
            .ok_or_else(|| Error::new(OP, Kind::Invalid).detail("malformed coordinate"))
    };
    let x = coord()?;
    let y = coord()?;
    if lines.next().is_some() {
        return Err(Error::new(OP, Kind::Invalid).detail("trailing data"));
    }
    curve.validate_point(&x, &y)?;
    Ok((curve, x, y))
}

/// Render a public point in the key-file text form.
pub fn format_public_key(curve: Curve, x: &BigUint, y: &BigUint) -> PublicKey {
    PublicKey::from(format!(
        "{}\n{}\n{}\n",
        curve.name(),
        x.to_str_radix(10),
        y.to_str_radix(10)
    ))
}

/// The key custodian. Immutable once built; `push`/`pop` return new views.
pub struct Factotum {
    keys: Vec<KeyPair>,
}

impl fmt::Debug for Factotum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Factotum({}, {} keys)", self.keys[0].hash, self.keys.len())
    }
}

impl Factotum {
    /// Load the current pair and any archived pairs from a key directory.
    pub fn from_dir(dir: &Path) -> Result<Factotum, Error> {
        const OP: &str = "factotum.from_dir";
        let read = |name: &str| -> Result<String, Error> {
            std::fs::read_to_string(dir.join(name)).map_err(|e| {
                let kind = if e.kind() == std::io::ErrorKind::NotFound {
                    Kind::NotExist
                } else {
                    Kind::Io
                };
                Error::new(OP, kind).detail(format!("{name}: {e}"))
            })
        };
        let public = PublicKey::from(read("public.upspinkey")?);
        let secret = read("secret.upspinkey")?;
        let mut keys = vec![KeyPair::from_text(&public, &secret)?];

        match read("secret2.upspinkey") {
            Ok(archive) => {
                let mut archived = parse_archive(&archive)?;
                // The archive appends oldest first; search newest first.
                archived.reverse();
                keys.extend(archived);
            }
            Err(e) if e.is(Kind::NotExist) => {}
            Err(e) => return Err(e),
        }
        Ok(Factotum { keys })
    }

    /// Build from in-memory text forms; used by tools and tests.
    pub fn from_keys(public: &PublicKey, secret: &str) -> Result<Factotum, Error> {
        Ok(Factotum {
            keys: vec![KeyPair::from_text(public, secret)?],
        })
    }

    fn current(&self) -> &KeyPair {
        &self.keys[0]
    }

    /// The current public key.
    pub fn public_key(&self) -> &PublicKey {
        &self.current().public
    }

    /// Hash of the current public key.
    pub fn key_hash(&self) -> KeyHash {
        self.current().hash
    }

    /// Curve of the current key pair.
    pub fn curve(&self) -> Curve {
        self.current().curve
    }

    /// ECDSA sign a 32-byte digest with the current key; used for file
    /// signatures.
    pub fn sign(&self, digest: &[u8; 32]) -> Result<Signature, Error> {
        let k = self.current();
        let (r, s) = k
            .curve
            .sign(&k.d, digest)
            .map_err(|e| Error::new("factotum.sign", Kind::Other).wrap(e))?;
        Ok(Signature { r, s })
    }

    /// Cryptographically identical to [`Factotum::sign`]; a distinct entry
    /// point so authentication signatures audit separately from file ones.
    pub fn user_sign(&self, digest: &[u8; 32]) -> Result<Signature, Error> {
        debug!(key = %self.current().hash, "user authentication signature");
        let k = self.current();
        let (r, s) = k
            .curve
            .sign(&k.d, digest)
            .map_err(|e| Error::new("factotum.user_sign", Kind::Other).wrap(e))?;
        Ok(Signature { r, s })
    }

    /// ECDH step `d · P` using the held key identified by `key_hash`.
    /// Fails with `NotExist` if no held key matches.
    pub fn scalar_mult(
        &self,
        key_hash: &KeyHash,
        curve: Curve,
        px: &BigUint,
        py: &BigUint,
    ) -> Result<(BigUint, BigUint), Error> {
        const OP: &str = "factotum.scalar_mult";
        let k = self
            .keys
            .iter()
            .find(|k| k.hash == *key_hash)
            .ok_or_else(|| Error::new(OP, Kind::NotExist).detail("no such key"))?;
        if k.curve != curve {
            return Err(Error::new(OP, Kind::Invalid).detail("curve mismatch"));
        }
        k.curve
            .scalar_mult(&k.d, px, py)
            .map_err(|e| Error::new(OP, Kind::Other).wrap(e))
    }

    /// Find a held public key (current or archived) by hash.
    pub fn public_key_from_hash(&self, hash: &KeyHash) -> Result<&PublicKey, Error> {
        self.keys
            .iter()
            .find(|k| k.hash == *hash)
            .map(|k| &k.public)
            .ok_or_else(|| {
                Error::new("factotum.key_from_hash", Kind::NotExist).detail("no such key")
            })
    }

    /// A view with the previous key at the front, for countersigning.
    /// With a single key held, returns an identical view.
    pub fn pop(&self) -> Factotum {
        let keys = if self.keys.len() > 1 {
            self.keys[1..].iter().map(clone_pair).collect()
        } else {
            self.keys.iter().map(clone_pair).collect()
        };
        Factotum { keys }
    }

    /// A view with `public`/`secret` prepended as the new current pair.
    pub fn push(&self, public: &PublicKey, secret: &str) -> Result<Factotum, Error> {
        let mut keys = vec![KeyPair::from_text(public, secret)?];
        keys.extend(self.keys.iter().map(clone_pair));
        Ok(Factotum { keys })
    }
}

fn clone_pair(k: &KeyPair) -> KeyPair {
    KeyPair {
        public: k.public.clone(),
        hash: k.hash,
        curve: k.curve,
        d: k.d.clone(),
    }
}

fn parse_archive(archive: &str) -> Result<Vec<KeyPair>, Error> {
    const OP: &str = "factotum.archive";
    let mut out = Vec::new();
    let mut lines = archive.lines().peekable();
    while let Some(line) = lines.next() {
        if line.trim().is_empty() {
            continue;
        }
        if !line.starts_with("# EE") {
            return Err(Error::new(OP, Kind::Invalid).detail("missing record marker"));
        }
        let mut next = || {
            lines
                .next()
                .ok_or_else(|| Error::new(OP, Kind::Invalid).detail("truncated record"))
        };
        let public = PublicKey::from(format!("{}\n{}\n{}\n", next()?, next()?, next()?));
        let secret = next()?;
        out.push(KeyPair::from_text(&public, secret)?);
    }
    Ok(out)
}

/// Canonical digest signed for every packed file: a SHA-256 binding curve,
/// signed name, time, data key, and the cipher-sum of the block hashes.
pub fn ver_hash(
    curve: Curve,
    path: &PathName,
    time: Time,
    dkey: &[u8],
    cipher_sum: &[u8],
) -> [u8; 32] {
    let mut msg = Vec::with_capacity(64 + path.as_str().len() + dkey.len() + cipher_sum.len());
    msg.extend_from_slice(b"keeper-ee-verify-v1");
    msg.push(0);
    msg.extend_from_slice(curve.name().as_bytes());
    msg.push(0);
    msg.extend_from_slice(path.as_str().as_bytes());
    msg.push(0);
    msg.extend_from_slice(&time.0.to_be_bytes());
    msg.extend_from_slice(dkey);
    msg.extend_from_slice(cipher_sum);
    let d = ring::digest::digest(&ring::digest::SHA256, &msg);
    let mut out = [0u8; 32];
    out.copy_from_slice(d.as_ref());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::keygen;

    fn new_factotum(seed_byte: u8) -> Factotum {
        let g = keygen::generate(Curve::P256, Some([seed_byte; 16])).unwrap();
        Factotum::from_keys(&g.public, &g.secret).unwrap()
    }

    #[test]
    fn sign_and_verify_through_public_key() {
        let f = new_factotum(1);
        let digest = [9u8; 32];
        let sig = f.sign(&digest).unwrap();
        let (curve, x, y) = parse_public_key(f.public_key()).unwrap();
        assert!(curve.verify(&x, &y, &digest, &sig.r, &sig.s).unwrap());
    }

    #[test]
    fn scalar_mult_requires_known_hash() {
        let f = new_factotum(2);
        let (curve, x, y) = parse_public_key(f.public_key()).unwrap();
        let ok = f.scalar_mult(&f.key_hash(), curve, &x, &y);
        assert!(ok.is_ok());
        let missing = f.scalar_mult(&KeyHash([0u8; 32]), curve, &x, &y);
        assert!(missing.unwrap_err().is(Kind::NotExist));
    }

    #[test]
    fn push_and_pop_rotate_views() {
        let f1 = new_factotum(3);
        let g2 = keygen::generate(Curve::P256, Some([4; 16])).unwrap();
        let f2 = f1.push(&g2.public, &g2.secret).unwrap();
        assert_eq!(f2.public_key(), &g2.public);
        // The old key is still held for unwrapping.
        assert!(f2.public_key_from_hash(&f1.key_hash()).is_ok());
        // Pop exposes the previous key as current.
        assert_eq!(f2.pop().public_key(), f1.public_key());
    }

    #[test]
    fn archive_roundtrip_via_dir() {
        let dir = tempfile::tempdir().unwrap();
        let g1 = keygen::generate(Curve::P256, Some([5; 16])).unwrap();
        keygen::save(dir.path(), &g1, false).unwrap();
        let g2 = keygen::generate(Curve::P256, Some([6; 16])).unwrap();
        keygen::save(dir.path(), &g2, true).unwrap();

        let f = Factotum::from_dir(dir.path()).unwrap();
        assert_eq!(f.public_key(), &g2.public);
        let old_hash = KeyHash::of(&g1.public);
        assert_eq!(f.public_key_from_hash(&old_hash).unwrap(), &g1.public);
    }

    #[test]
    fn rejects_mismatched_pair() {
        let g1 = keygen::generate(Curve::P256, Some([7; 16])).unwrap();
        let g2 = keygen::generate(Curve::P256, Some([8; 16])).unwrap();
        assert!(Factotum::from_keys(&g1.public, &g2.secret).is_err());
    }
}
