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

//! End-to-end encryption packing.
//!
//! A fresh 32-byte data key encrypts each block with AES-256-GCM, the nonce
//! being the block index. The entry's packdata carries the writer's ECDSA
//! signature over a digest binding name, time, data key, and the cipher-sum
//! of the block hashes, followed by one wrapped copy of the data key per
//! reader.
//!
//! ## Packdata layout (scheme v1)
//!
//! ```text
//! byte    curve_id                 // 1 p256, 2 p384, 3 p521; scheme marker
//! varint  len R, bytes             // signature
//! varint  len S, bytes
//! varint  len R2, bytes            // countersignature; empty if none
//! varint  len S2, bytes
//! varint  nWrapped
//!   32      keyHash                // SHA-256 of reader's public key text
//!   varint  len V.X, bytes         // ephemeral public point
//!   varint  len V.Y, bytes
//!   12      GCM nonce
//!   varint  len ciphertext, bytes  // AES-GCM of the data key
//! ```

use crate::core::config::Config;
use crate::core::errors::{Error, Kind};
use crate::core::types::{
    DirBlock, DirEntry, KeyHash, Location, Packing, PathName, PublicKey, Time,
};
use crate::pack::internal::{
    get_bytes, get_fixed, get_uvarint, put_bytes, put_uvarint, sha256, BlockReader, BlockWriter,
};
use crate::pack::{public_key_for, BlockPacker, BlockUnpacker, Packer};
use crate::security::curves::{pad_to, Curve};
use crate::security::factotum::{parse_public_key, ver_hash, Factotum, Signature};
use hkdf::Hkdf;
use num_bigint::BigUint;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use ring::aead;
use sha2::Sha256;
use std::sync::Arc;
use zeroize::Zeroizing;

const DKEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// The end-to-end encrypting packer.
pub struct EePack;

/// One per-reader encryption of the data key.
pub(crate) struct WrappedKey {
    pub(crate) key_hash: KeyHash,
    pub(crate) vx: BigUint,
    pub(crate) vy: BigUint,
    pub(crate) nonce: [u8; NONCE_LEN],
    pub(crate) ciphertext: Vec<u8>,
}

/// Parsed form of the EE/EEIntegrity packdata.
pub(crate) struct Packdata {
    pub(crate) curve: Curve,
    pub(crate) sig: Signature,
    pub(crate) sig2: Option<Signature>,
    pub(crate) wrapped: Vec<WrappedKey>,
}

impl Packdata {
    pub(crate) fn marshal(&self) -> Result<Vec<u8>, Error> {
        let mut out = Vec::with_capacity(256);
        out.push(self.curve.id());
        put_bytes(&mut out, &self.sig.r.to_bytes_be());
        put_bytes(&mut out, &self.sig.s.to_bytes_be());
        match &self.sig2 {
            Some(sig2) => {
                put_bytes(&mut out, &sig2.r.to_bytes_be());
                put_bytes(&mut out, &sig2.s.to_bytes_be());
            }
            None => {
                put_bytes(&mut out, &[]);
                put_bytes(&mut out, &[]);
            }
        }
        put_uvarint(&mut out, self.wrapped.len() as u64);
        for w in &self.wrapped {
            out.extend_from_slice(w.key_hash.as_bytes());
            put_bytes(&mut out, &w.vx.to_bytes_be());
            put_bytes(&mut out, &w.vy.to_bytes_be());
            out.extend_from_slice(&w.nonce);
            put_bytes(&mut out, &w.ciphertext);
        }
        Ok(out)
    }

    pub(crate) fn unmarshal(bytes: &[u8]) -> Result<Packdata, Error> {
        const OP: &str = "ee.packdata";
        let mut buf = bytes;
        let id = get_fixed(&mut buf, 1)?[0];
        let curve = Curve::from_id(id)
            .ok_or_else(|| Error::new(OP, Kind::Invalid).detail(format!("bad curve id {id}")))?;
        let r = get_bytes(&mut buf)?;
        let s = get_bytes(&mut buf)?;
        let sig = Signature {
            r: BigUint::from_bytes_be(&r),
            s: BigUint::from_bytes_be(&s),
        };
        let r2 = get_bytes(&mut buf)?;
        let s2 = get_bytes(&mut buf)?;
        let sig2 = if r2.is_empty() {
            None
        } else {
            Some(Signature {
                r: BigUint::from_bytes_be(&r2),
                s: BigUint::from_bytes_be(&s2),
            })
        };
        let n = get_uvarint(&mut buf)? as usize;
        if n > bytes.len() {
            return Err(Error::new(OP, Kind::Invalid).detail("wrapped count too large"));
        }
        let mut wrapped = Vec::with_capacity(n);
        for _ in 0..n {
            let hash = get_fixed(&mut buf, 32)?;
            let mut key_hash = [0u8; 32];
            key_hash.copy_from_slice(&hash);
            let vx = BigUint::from_bytes_be(&get_bytes(&mut buf)?);
            let vy = BigUint::from_bytes_be(&get_bytes(&mut buf)?);
            let nonce_bytes = get_fixed(&mut buf, NONCE_LEN)?;
            let mut nonce = [0u8; NONCE_LEN];
            nonce.copy_from_slice(&nonce_bytes);
            let ciphertext = get_bytes(&mut buf)?;
            wrapped.push(WrappedKey {
                key_hash: KeyHash(key_hash),
                vx,
                vy,
                nonce,
                ciphertext,
            });
        }
        if !buf.is_empty() {
            return Err(Error::new(OP, Kind::Invalid).detail("trailing packdata bytes"));
        }
        Ok(Packdata {
            curve,
            sig,
            sig2,
            wrapped,
        })
    }
}

fn aes_key(key: &[u8]) -> Result<aead::LessSafeKey, Error> {
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, key)
        .map_err(|_| Error::new("ee.aes", Kind::Internal).detail("bad AES key"))?;
    Ok(aead::LessSafeKey::new(unbound))
}

fn aes_seal(key: &aead::LessSafeKey, nonce: [u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>, Error> {
    let mut in_out = plaintext.to_vec();
    key.seal_in_place_append_tag(
        aead::Nonce::assume_unique_for_key(nonce),
        aead::Aad::empty(),
        &mut in_out,
    )
    .map_err(|_| Error::new("ee.seal", Kind::Internal).detail("seal failed"))?;
    Ok(in_out)
}

fn aes_open(key: &aead::LessSafeKey, nonce: [u8; NONCE_LEN], ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
    let mut in_out = ciphertext.to_vec();
    let plain = key
        .open_in_place(
            aead::Nonce::assume_unique_for_key(nonce),
            aead::Aad::empty(),
            &mut in_out,
        )
        .map_err(|_| Error::new("ee.open", Kind::Permission).detail("decryption failed"))?;
    Ok(plain.to_vec())
}

/// Per-block nonce: the little-endian block index. Unique because the data
/// key is fresh per pack.
fn block_nonce(index: u64) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..8].copy_from_slice(&index.to_le_bytes());
    nonce
}

/// Derive the key-encryption key from the shared point's X coordinate.
fn wrap_kdf(
    curve: Curve,
    reader_hash: &KeyHash,
    sx: &BigUint,
    nonce: &[u8; NONCE_LEN],
) -> Result<Zeroizing<[u8; 32]>, Error> {
    let ikm = Zeroizing::new(pad_to(sx, curve.field_size())?);
    let mut info = Vec::with_capacity(16 + 32 + NONCE_LEN);
    info.extend_from_slice(curve.name().as_bytes());
    info.extend_from_slice(reader_hash.as_bytes());
    info.extend_from_slice(nonce);
    let hk = Hkdf::<Sha256>::new(None, &ikm);
    let mut strong = Zeroizing::new([0u8; 32]);
    hk.expand(&info, strong.as_mut())
        .map_err(|_| Error::new("ee.kdf", Kind::Internal).detail("hkdf expand failed"))?;
    Ok(strong)
}

/// Encrypt `dkey` to `reader`: ephemeral ECDH on the reader's curve, HKDF of
/// the shared X coordinate, then AES-GCM.
fn wrap_key<R: RngCore + CryptoRng>(
    rng: &mut R,
    reader: &PublicKey,
    dkey: &[u8],
) -> Result<WrappedKey, Error> {
    let (curve, px, py) = parse_public_key(reader)?;
    let key_hash = KeyHash::of(reader);
    let (v, vx, vy) = curve.ephemeral(rng)?;
    let (sx, _sy) = curve.scalar_mult(&v, &px, &py)?;
    let mut nonce = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut nonce);
    let strong = wrap_kdf(curve, &key_hash, &sx, &nonce)?;
    let ciphertext = aes_seal(&aes_key(strong.as_ref())?, nonce, dkey)?;
    Ok(WrappedKey {
        key_hash,
        vx,
        vy,
        nonce,
        ciphertext,
    })
}

/// Recover the data key from the wrapped entry matching a key the factotum
/// holds; the ECDH step happens inside the factotum.
fn unwrap_key(f: &Factotum, w: &WrappedKey) -> Result<Zeroizing<Vec<u8>>, Error> {
    let reader_key = f.public_key_from_hash(&w.key_hash)?;
    let (curve, _, _) = parse_public_key(reader_key)?;
    let (sx, _sy) = f.scalar_mult(&w.key_hash, curve, &w.vx, &w.vy)?;
    let strong = wrap_kdf(curve, &w.key_hash, &sx, &w.nonce)?;
    let dkey = aes_open(&aes_key(strong.as_ref())?, w.nonce, &w.ciphertext)?;
    if dkey.len() != DKEY_LEN {
        return Err(Error::new("ee.unwrap", Kind::Invalid).detail("bad data key length"));
    }
    Ok(Zeroizing::new(dkey))
}

/// Find the wrapped entry for a key this factotum holds.
fn own_wrap<'a>(f: &Factotum, pd: &'a Packdata, name: &PathName) -> Result<&'a WrappedKey, Error> {
    pd.wrapped
        .iter()
        .find(|w| f.public_key_from_hash(&w.key_hash).is_ok())
        .ok_or_else(|| {
            Error::new("ee.unwrap", Kind::Permission)
                .path(name.clone())
                .detail("no wrapped key for this user")
        })
}

/// Cipher-sum over the concatenated per-block ciphertext hashes.
pub(crate) fn cipher_sum_of(entry: &DirEntry) -> Result<[u8; 32], Error> {
    let mut cat = Vec::with_capacity(entry.blocks.len() * 32);
    for b in &entry.blocks {
        if b.packdata.len() != 32 {
            return Err(Error::new("ee.ciphersum", Kind::Invalid)
                .path(entry.name.clone())
                .detail("block missing ciphertext hash"));
        }
        cat.extend_from_slice(&b.packdata);
    }
    Ok(sha256(&cat))
}

/// Verify the entry signature (or countersignature) against the writer's
/// current public key.
pub(crate) fn verify_signature(
    cfg: &Config,
    entry: &DirEntry,
    pd: &Packdata,
    dkey: &[u8],
) -> Result<(), Error> {
    const OP: &str = "ee.verify";
    let writer_key = public_key_for(cfg, &entry.writer)?;
    let (wcurve, wx, wy) = parse_public_key(&writer_key)?;
    let digest = ver_hash(pd.curve, &entry.signed_name, entry.time, dkey, &cipher_sum_of(entry)?);
    let mut ok = wcurve.verify(&wx, &wy, &digest, &pd.sig.r, &pd.sig.s)?;
    if !ok {
        if let Some(sig2) = &pd.sig2 {
            ok = wcurve.verify(&wx, &wy, &digest, &sig2.r, &sig2.s)?;
        }
    }
    if !ok {
        return Err(Error::new(OP, Kind::Invalid)
            .path(entry.name.clone())
            .user(entry.writer.clone())
            .detail("signature does not verify"));
    }
    Ok(())
}

struct EeBlockPacker<'a> {
    writer: BlockWriter<'a>,
    factotum: Arc<Factotum>,
    dkey: Zeroizing<Vec<u8>>,
    cipher: aead::LessSafeKey,
    block_hashes: Vec<u8>,
    index: u64,
}

impl BlockPacker for EeBlockPacker<'_> {
    fn pack(&mut self, cleartext: &[u8]) -> Result<Vec<u8>, Error> {
        let ciphertext = aes_seal(&self.cipher, block_nonce(self.index), cleartext)?;
        self.index += 1;
        let hash = sha256(&ciphertext);
        self.writer.add_block(cleartext.len() as u64, hash.to_vec())?;
        self.block_hashes.extend_from_slice(&hash);
        Ok(ciphertext)
    }

    fn set_location(&mut self, loc: Location) {
        self.writer.set_location(loc);
    }

    fn close(self: Box<Self>) -> Result<(), Error> {
        let EeBlockPacker {
            mut writer,
            factotum,
            dkey,
            block_hashes,
            ..
        } = *self;
        writer.finish()?;
        let cipher_sum = sha256(&block_hashes);
        let entry = writer.entry();
        let digest = ver_hash(
            factotum.curve(),
            &entry.signed_name,
            entry.time,
            &dkey,
            &cipher_sum,
        );
        let sig = factotum.sign(&digest)?;
        // Wrap for the writer; readers are added by share.
        let wrapped = vec![wrap_key(&mut OsRng, factotum.public_key(), &dkey)?];
        let pd = Packdata {
            curve: factotum.curve(),
            sig,
            sig2: None,
            wrapped,
        };
        entry.packdata = pd.marshal()?;
        Ok(())
    }
}

struct EeBlockUnpacker<'a> {
    reader: BlockReader<'a>,
    cipher: aead::LessSafeKey,
}

impl BlockUnpacker for EeBlockUnpacker<'_> {
    fn next_block(&mut self) -> Option<DirBlock> {
        self.reader.next_block().map(|(_, b)| b)
    }

    fn unpack(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        const OP: &str = "ee.unpack";
        let i = self
            .reader
            .current()
            .ok_or_else(|| Error::new(OP, Kind::Invalid).detail("unpack before next_block"))?;
        let entry = self.reader.entry();
        let want = &entry.blocks[i].packdata;
        if sha256(ciphertext) != want.as_slice() {
            return Err(Error::new(OP, Kind::Invalid)
                .path(entry.name.clone())
                .detail(format!("block {i} ciphertext hash mismatch")));
        }
        let clear = aes_open(&self.cipher, block_nonce(i as u64), ciphertext)?;
        if clear.len() as u64 != entry.blocks[i].size {
            return Err(Error::new(OP, Kind::Invalid)
                .path(entry.name.clone())
                .detail(format!("block {i} size mismatch")));
        }
        Ok(clear)
    }
}

impl EePack {
    /// [`Packer::share`] with a caller-supplied RNG, so tools and tests can
    /// drive rewrapping deterministically.
    pub fn share_with_rng<R: RngCore + CryptoRng>(
        &self,
        cfg: &Config,
        readers: &[PublicKey],
        packdata: &mut [Vec<u8>],
        rng: &mut R,
    ) -> Result<(), Error> {
        const OP: &str = "ee.share";
        let f: &Factotum = cfg.factotum()?.as_ref();
        for pd_bytes in packdata.iter_mut() {
            let mut pd = Packdata::unmarshal(pd_bytes)?;
            let w = own_wrap(f, &pd, &PathName::default())?;
            let dkey = unwrap_key(f, w)?;
            let mut wrapped = Vec::with_capacity(readers.len());
            for r in readers {
                wrapped.push(wrap_key(rng, r, &dkey).map_err(|e| {
                    Error::new(OP, Kind::Other).wrap(e)
                })?);
            }
            pd.wrapped = wrapped;
            *pd_bytes = pd.marshal()?;
        }
        Ok(())
    }
}

impl Packer for EePack {
    fn packing(&self) -> Packing {
        Packing::Ee
    }

    fn pack<'a>(
        &self,
        cfg: &Config,
        entry: &'a mut DirEntry,
    ) -> Result<Box<dyn BlockPacker + 'a>, Error> {
        let factotum = cfg.factotum()?.clone();
        entry.packing = Packing::Ee;
        entry.writer = cfg.user_name().clone();
        if entry.time == Time::default() {
            entry.time = Time::now();
        }
        let writer = BlockWriter::start("ee.pack", entry)?;
        let mut dkey = Zeroizing::new(vec![0u8; DKEY_LEN]);
        let rng = ring::rand::SystemRandom::new();
        ring::rand::SecureRandom::fill(&rng, dkey.as_mut_slice())
            .map_err(|_| Error::new("ee.pack", Kind::Internal).detail("rng failure"))?;
        let cipher = aes_key(&dkey)?;
        Ok(Box::new(EeBlockPacker {
            writer,
            factotum,
            dkey,
            cipher,
            block_hashes: Vec::new(),
            index: 0,
        }))
    }

    fn unpack<'a>(
        &self,
        cfg: &Config,
        entry: &'a DirEntry,
    ) -> Result<Box<dyn BlockUnpacker + 'a>, Error> {
        let f: &Factotum = cfg.factotum()?.as_ref();
        let pd = Packdata::unmarshal(&entry.packdata)?;
        let w = own_wrap(f, &pd, &entry.name)?;
        let dkey = unwrap_key(f, w)?;
        verify_signature(cfg, entry, &pd, &dkey)?;
        let cipher = aes_key(&dkey)?;
        Ok(Box::new(EeBlockUnpacker {
            reader: BlockReader::new(entry),
            cipher,
        }))
    }

    fn reader_hashes(&self, packdata: &[u8]) -> Result<Vec<KeyHash>, Error> {
        let pd = Packdata::unmarshal(packdata)?;
        Ok(pd.wrapped.iter().map(|w| w.key_hash).collect())
    }

    fn share(
        &self,
        cfg: &Config,
        readers: &[PublicKey],
        packdata: &mut [Vec<u8>],
    ) -> Result<(), Error> {
        self.share_with_rng(cfg, readers, packdata, &mut OsRng)
    }

    fn name(&self, _cfg: &Config, entry: &mut DirEntry, new_name: &PathName) -> Result<(), Error> {
        // The signature covers signed_name, which stays put; only the
        // visible name moves.
        Packdata::unmarshal(&entry.packdata)?;
        let parsed = crate::core::path::parse(new_name)?;
        entry.name = parsed.path().clone();
        Ok(())
    }

    fn countersign(
        &self,
        old: &PublicKey,
        f: &Factotum,
        entry: &mut DirEntry,
    ) -> Result<(), Error> {
        const OP: &str = "ee.countersign";
        let mut pd = Packdata::unmarshal(&entry.packdata)?;
        let w = own_wrap(f, &pd, &entry.name)?;
        let dkey = unwrap_key(f, w)?;
        let digest = ver_hash(
            pd.curve,
            &entry.signed_name,
            entry.time,
            &dkey,
            &cipher_sum_of(entry)?,
        );
        let (ocurve, ox, oy) = parse_public_key(old)?;
        if !ocurve.verify(&ox, &oy, &digest, &pd.sig.r, &pd.sig.s)? {
            return Err(Error::new(OP, Kind::Invalid)
                .path(entry.name.clone())
                .detail("existing signature does not verify with old key"));
        }
        pd.sig2 = Some(f.sign(&digest)?);
        entry.packdata = pd.marshal()?;
        Ok(())
    }

    fn pack_len(&self, _entry: &DirEntry, cleartext_len: usize) -> i64 {
        (cleartext_len + TAG_LEN) as i64
    }

    fn unpack_len(&self, _entry: &DirEntry, ciphertext_len: usize) -> i64 {
        match ciphertext_len.checked_sub(TAG_LEN) {
            Some(n) => n as i64,
            None => crate::pack::LEN_UNKNOWN,
        }
    }
}
