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

//! The identity packing: stored bytes are the cleartext, no signature.
//!
//! Used for directory records and files that must be readable by anyone
//! without key material.

use crate::core::config::Config;
use crate::core::errors::{Error, Kind};
use crate::core::types::{DirBlock, DirEntry, KeyHash, Location, Packing, PathName, PublicKey};
use crate::pack::internal::{BlockReader, BlockWriter};
use crate::pack::{BlockPacker, BlockUnpacker, Packer};
use crate::security::factotum::Factotum;

/// The plain packer.
pub struct PlainPack;

struct PlainBlockPacker<'a> {
    writer: BlockWriter<'a>,
}

impl BlockPacker for PlainBlockPacker<'_> {
    fn pack(&mut self, cleartext: &[u8]) -> Result<Vec<u8>, Error> {
        self.writer.add_block(cleartext.len() as u64, Vec::new())?;
        Ok(cleartext.to_vec())
    }

    fn set_location(&mut self, loc: Location) {
        self.writer.set_location(loc);
    }

    fn close(self: Box<Self>) -> Result<(), Error> {
        let PlainBlockPacker { mut writer } = *self;
        writer.finish()?;
        writer.entry().packdata.clear();
        Ok(())
    }
}

struct PlainBlockUnpacker<'a> {
    reader: BlockReader<'a>,
}

impl BlockUnpacker for PlainBlockUnpacker<'_> {
    fn next_block(&mut self) -> Option<DirBlock> {
        self.reader.next_block().map(|(_, b)| b)
    }

    fn unpack(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        let i = self.reader.current().ok_or_else(|| {
            Error::new("plain.unpack", Kind::Invalid).detail("unpack before next_block")
        })?;
        let want = self.reader.entry().blocks[i].size;
        if ciphertext.len() as u64 != want {
            return Err(Error::new("plain.unpack", Kind::Invalid)
                .path(self.reader.entry().name.clone())
                .detail(format!("block {i} has {} bytes, want {want}", ciphertext.len())));
        }
        Ok(ciphertext.to_vec())
    }
}

impl Packer for PlainPack {
    fn packing(&self) -> Packing {
        Packing::Plain
    }

    fn pack<'a>(
        &self,
        _cfg: &Config,
        entry: &'a mut DirEntry,
    ) -> Result<Box<dyn BlockPacker + 'a>, Error> {
        entry.packing = Packing::Plain;
        let writer = BlockWriter::start("plain.pack", entry)?;
        Ok(Box::new(PlainBlockPacker { writer }))
    }

    fn unpack<'a>(
        &self,
        _cfg: &Config,
        entry: &'a DirEntry,
    ) -> Result<Box<dyn BlockUnpacker + 'a>, Error> {
        Ok(Box::new(PlainBlockUnpacker {
            reader: BlockReader::new(entry),
        }))
    }

    fn reader_hashes(&self, _packdata: &[u8]) -> Result<Vec<KeyHash>, Error> {
        Ok(Vec::new())
    }

    fn share(
        &self,
        _cfg: &Config,
        _readers: &[PublicKey],
        _packdata: &mut [Vec<u8>],
    ) -> Result<(), Error> {
        Err(Error::new("plain.share", Kind::Unsupported).detail("plain pack holds no keys"))
    }

    fn name(&self, _cfg: &Config, entry: &mut DirEntry, new_name: &PathName) -> Result<(), Error> {
        // No signature to preserve; both names move together.
        let parsed = crate::core::path::parse(new_name)?;
        entry.name = parsed.path().clone();
        entry.signed_name = parsed.path().clone();
        Ok(())
    }

    fn countersign(
        &self,
        _old: &PublicKey,
        _f: &Factotum,
        _entry: &mut DirEntry,
    ) -> Result<(), Error> {
        Err(Error::new("plain.countersign", Kind::Unsupported).detail("plain pack is unsigned"))
    }

    fn pack_len(&self, _entry: &DirEntry, cleartext_len: usize) -> i64 {
        cleartext_len as i64
    }

    fn unpack_len(&self, _entry: &DirEntry, ciphertext_len: usize) -> i64 {
        ciphertext_len as i64
    }
}
