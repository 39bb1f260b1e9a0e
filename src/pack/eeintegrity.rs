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

//! Signed-cleartext packing: blocks are stored unencrypted but carry the
//! same signature and per-block hashes as the encrypting packer, so third
//! parties can read the bytes while tampering stays evident. Access and
//! Group files use this packing.

use crate::core::config::Config;
use crate::core::errors::{Error, Kind};
use crate::core::types::{DirBlock, DirEntry, KeyHash, Location, Packing, PathName, PublicKey, Time};
use crate::pack::ee::{cipher_sum_of, verify_signature, Packdata};
use crate::pack::internal::{sha256, BlockReader, BlockWriter};
use crate::pack::{BlockPacker, BlockUnpacker, Packer};
use crate::security::factotum::{parse_public_key, ver_hash, Factotum};
use std::sync::Arc;

/// The integrity-only packer.
pub struct EeIntegrityPack;

struct IntegrityBlockPacker<'a> {
    writer: BlockWriter<'a>,
    factotum: Arc<Factotum>,
    block_hashes: Vec<u8>,
}

impl BlockPacker for IntegrityBlockPacker<'_> {
    fn pack(&mut self, cleartext: &[u8]) -> Result<Vec<u8>, Error> {
        let hash = sha256(cleartext);
        self.writer.add_block(cleartext.len() as u64, hash.to_vec())?;
        self.block_hashes.extend_from_slice(&hash);
        Ok(cleartext.to_vec())
    }

    fn set_location(&mut self, loc: Location) {
        self.writer.set_location(loc);
    }

    fn close(self: Box<Self>) -> Result<(), Error> {
        let IntegrityBlockPacker {
            mut writer,
            factotum,
            block_hashes,
        } = *self;
        writer.finish()?;
        let cipher_sum = sha256(&block_hashes);
        let entry = writer.entry();
        let digest = ver_hash(
            factotum.curve(),
            &entry.signed_name,
            entry.time,
            &[],
            &cipher_sum,
        );
        let pd = Packdata {
            curve: factotum.curve(),
            sig: factotum.sign(&digest)?,
            sig2: None,
            wrapped: Vec::new(),
        };
        entry.packdata = pd.marshal()?;
        Ok(())
    }
}

struct IntegrityBlockUnpacker<'a> {
    reader: BlockReader<'a>,
}

impl BlockUnpacker for IntegrityBlockUnpacker<'_> {
    fn next_block(&mut self) -> Option<DirBlock> {
        self.reader.next_block().map(|(_, b)| b)
    }

    fn unpack(&mut self, data: &[u8]) -> Result<Vec<u8>, Error> {
        const OP: &str = "eeintegrity.unpack";
        let i = self
            .reader
            .current()
            .ok_or_else(|| Error::new(OP, Kind::Invalid).detail("unpack before next_block"))?;
        let entry = self.reader.entry();
        if sha256(data) != entry.blocks[i].packdata.as_slice() {
            return Err(Error::new(OP, Kind::Invalid)
                .path(entry.name.clone())
                .detail(format!("block {i} hash mismatch")));
        }
        if data.len() as u64 != entry.blocks[i].size {
            return Err(Error::new(OP, Kind::Invalid)
                .path(entry.name.clone())
                .detail(format!("block {i} size mismatch")));
        }
        Ok(data.to_vec())
    }
}

impl Packer for EeIntegrityPack {
    fn packing(&self) -> Packing {
        Packing::EeIntegrity
    }

    fn pack<'a>(
        &self,
        cfg: &Config,
        entry: &'a mut DirEntry,
    ) -> Result<Box<dyn BlockPacker + 'a>, Error> {
        let factotum = cfg.factotum()?.clone();
        entry.packing = Packing::EeIntegrity;
        entry.writer = cfg.user_name().clone();
        if entry.time == Time::default() {
            entry.time = Time::now();
        }
        let writer = BlockWriter::start("eeintegrity.pack", entry)?;
        Ok(Box::new(IntegrityBlockPacker {
            writer,
            factotum,
            block_hashes: Vec::new(),
        }))
    }

    fn unpack<'a>(
        &self,
        cfg: &Config,
        entry: &'a DirEntry,
    ) -> Result<Box<dyn BlockUnpacker + 'a>, Error> {
        let pd = Packdata::unmarshal(&entry.packdata)?;
        // No keys to unwrap; the signature binds an empty data key.
        verify_signature(cfg, entry, &pd, &[])?;
        Ok(Box::new(IntegrityBlockUnpacker {
            reader: BlockReader::new(entry),
        }))
    }

    fn reader_hashes(&self, packdata: &[u8]) -> Result<Vec<KeyHash>, Error> {
        let pd = Packdata::unmarshal(packdata)?;
        Ok(pd.wrapped.iter().map(|w| w.key_hash).collect())
    }

    fn share(
        &self,
        _cfg: &Config,
        _readers: &[PublicKey],
        _packdata: &mut [Vec<u8>],
    ) -> Result<(), Error> {
        Err(Error::new("eeintegrity.share", Kind::Unsupported)
            .detail("integrity pack holds no keys"))
    }

    fn name(&self, _cfg: &Config, entry: &mut DirEntry, new_name: &PathName) -> Result<(), Error> {
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
        const OP: &str = "eeintegrity.countersign";
        let mut pd = Packdata::unmarshal(&entry.packdata)?;
        let digest = ver_hash(
            pd.curve,
            &entry.signed_name,
            entry.time,
            &[],
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
        cleartext_len as i64
    }

    fn unpack_len(&self, _entry: &DirEntry, ciphertext_len: usize) -> i64 {
        ciphertext_len as i64
    }
}
