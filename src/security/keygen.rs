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

//! Key generation and key-directory maintenance.
//!
//! The private scalar is derived deterministically from a 128-bit seed, so
//! the proquint rendering of the seed is a complete backup of the pair.
//! Rotation appends the superseded pair to `secret2.upspinkey` before the
//! new pair replaces the current files.

use crate::core::errors::{Error, Kind};
use crate::core::types::PublicKey;
use crate::security::curves::Curve;
use crate::security::factotum::format_public_key;
use crate::security::proquint;
use num_bigint::BigUint;
use ring::rand::{SecureRandom, SystemRandom};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use zeroize::Zeroize;

/// A freshly generated key pair in its file text forms.
pub struct Generated {
    /// Curve of the pair.
    pub curve: Curve,
    /// Public key text, as written to `public.upspinkey`.
    pub public: PublicKey,
    /// Private scalar in decimal, as written to `secret.upspinkey`.
    pub secret: String,
    /// Proquint rendering of the seed, for the user's paper backup.
    pub proquint: String,
}

/// Generate a key pair on `curve`, from `seed` if given, else from the
/// system CSPRNG.
pub fn generate(curve: Curve, seed: Option<[u8; 16]>) -> Result<Generated, Error> {
    const OP: &str = "keygen.generate";
    let mut seed = match seed {
        Some(s) => s,
        None => {
            let rng = SystemRandom::new();
            let mut s = [0u8; 16];
            rng.fill(&mut s)
                .map_err(|_| Error::new(OP, Kind::Internal).detail("rng failure"))?;
            s
        }
    };
    let d = curve.scalar_from_seed(&seed)?;
    let (x, y) = curve.public_from_secret(&d)?;
    let secret = BigUint::from_bytes_be(&d).to_str_radix(10);
    let out = Generated {
        curve,
        public: format_public_key(curve, &x, &y),
        secret,
        proquint: proquint::encode_seed(&seed),
    };
    seed.zeroize();
    Ok(out)
}

/// Regenerate the pair a proquint backup string describes.
pub fn recover(curve: Curve, backup: &str) -> Result<Generated, Error> {
    let seed = proquint::decode_seed(backup.trim()).ok_or_else(|| {
        Error::new("keygen.recover", Kind::Invalid).detail("malformed secret seed")
    })?;
    generate(curve, Some(seed))
}

/// Open a key file for writing, created owner-readable only.
fn open_private(path: &Path, append: bool) -> std::io::Result<std::fs::File> {
    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create(true);
    if append {
        opts.append(true);
    } else {
        opts.truncate(true);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    opts.open(path)
}

/// Replace `path` with `bytes` without a window where the file is partial:
/// the content lands in a private sibling first and is renamed over.
fn write_private(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    const OP: &str = "keygen.write";
    let io = |e: std::io::Error| Error::new(OP, Kind::Io).detail(e);
    let parent = path
        .parent()
        .ok_or_else(|| Error::new(OP, Kind::Invalid).detail("key file has no directory"))?;
    std::fs::create_dir_all(parent).map_err(io)?;

    let name = path
        .file_name()
        .ok_or_else(|| Error::new(OP, Kind::Invalid).detail("key file has no name"))?;
    let staged = parent.join(format!(".{}.new", name.to_string_lossy()));
    let mut f = open_private(&staged, false).map_err(io)?;
    f.write_all(bytes).and_then(|_| f.sync_all()).map_err(io)?;
    drop(f);
    std::fs::rename(&staged, path).map_err(io)
}

/// Write a key directory. With `rotate`, the pair currently on disk is first
/// appended to the `secret2.upspinkey` archive; without it, overwriting an
/// existing pair is refused.
pub fn save(dir: &Path, g: &Generated, rotate: bool) -> Result<(), Error> {
    const OP: &str = "keygen.save";
    let public_path = dir.join("public.upspinkey");
    let secret_path = dir.join("secret.upspinkey");

    if public_path.exists() {
        if !rotate {
            return Err(Error::new(OP, Kind::Exist)
                .detail(format!("{}: key files already exist", dir.display())));
        }
        archive_current(dir, &public_path, &secret_path)?;
    }

    write_private(&public_path, g.public.as_str().as_bytes())?;
    write_private(&secret_path, format!("{}\n", g.secret).as_bytes())?;
    Ok(())
}

fn archive_current(dir: &Path, public_path: &Path, secret_path: &Path) -> Result<(), Error> {
    const OP: &str = "keygen.archive";
    let io = |e: std::io::Error| Error::new(OP, Kind::Io).detail(e);

    let old_public = std::fs::read_to_string(public_path).map_err(io)?;
    let old_secret = std::fs::read_to_string(secret_path).map_err(io)?;
    let date = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let mut record = String::with_capacity(old_public.len() + old_secret.len() + 32);
    record.push_str(&format!("# EE {date}\n"));
    record.push_str(&old_public);
    if !old_public.ends_with('\n') {
        record.push('\n');
    }
    record.push_str(old_secret.trim_end());
    record.push('\n');

    let archive: PathBuf = dir.join("secret2.upspinkey");
    let mut f = open_private(&archive, true).map_err(io)?;
    f.write_all(record.as_bytes()).map_err(io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_recovers_same_pair() {
        let g = generate(Curve::P256, None).unwrap();
        let r = recover(Curve::P256, &g.proquint).unwrap();
        assert_eq!(g.public, r.public);
        assert_eq!(g.secret, r.secret);
    }

    #[test]
    fn save_refuses_silent_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let g1 = generate(Curve::P256, Some([1; 16])).unwrap();
        save(dir.path(), &g1, false).unwrap();
        let g2 = generate(Curve::P256, Some([2; 16])).unwrap();
        let err = save(dir.path(), &g2, false).unwrap_err();
        assert!(err.is(Kind::Exist));
        save(dir.path(), &g2, true).unwrap();
        let archive = std::fs::read_to_string(dir.path().join("secret2.upspinkey")).unwrap();
        assert!(archive.starts_with("# EE "));
        assert!(archive.contains(g1.secret.as_str()));
    }
}
