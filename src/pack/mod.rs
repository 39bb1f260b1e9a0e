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

//! The packing pipeline: how cleartext becomes stored bytes and back.
//!
//! A [`Packer`] is selected by a [`DirEntry`]'s packing id. Block packers
//! and unpackers are finite, single-pass, single-owner producers; repacking
//! requires a new instance.

pub mod ee;
pub mod eeintegrity;
mod internal;
pub mod plain;

use crate::core::config::Config;
use crate::core::errors::{Error, Kind};
use crate::core::types::{DirBlock, DirEntry, KeyHash, Location, Packing, PathName, PublicKey};
use crate::security::factotum::Factotum;
use crate::service::{bind, KeyServer};

/// Size value meaning "not known exactly".
pub const LEN_UNKNOWN: i64 = -1;

/// Incremental producer of packed blocks for one entry.
///
/// Each `pack` call appends exactly one block to the entry, with
/// `offset = previous total size`. The caller must store the returned bytes
/// and report where they landed via `set_location` before the next `pack`
/// or `close`.
pub trait BlockPacker {
    /// Pack one block of cleartext, returning the bytes to store.
    fn pack(&mut self, cleartext: &[u8]) -> Result<Vec<u8>, Error>;

    /// Record where the bytes of the last packed block were stored.
    fn set_location(&mut self, loc: Location);

    /// Finalize the entry. Fails if any block lacks a location.
    fn close(self: Box<Self>) -> Result<(), Error>;
}

/// Incremental consumer of packed blocks for one entry.
pub trait BlockUnpacker {
    /// The next block to fetch, or `None` when the entry is exhausted.
    fn next_block(&mut self) -> Option<DirBlock>;

    /// Unpack the fetched bytes of the block last returned by `next_block`.
    fn unpack(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, Error>;
}

/// One packing algorithm. Implementations are stateless and registered
/// process-wide; all per-file state lives in the block packers.
pub trait Packer: Send + Sync {
    /// The packing this packer implements.
    fn packing(&self) -> Packing;

    /// Start packing cleartext into `entry`, which must name a regular file.
    fn pack<'a>(
        &self,
        cfg: &Config,
        entry: &'a mut DirEntry,
    ) -> Result<Box<dyn BlockPacker + 'a>, Error>;

    /// Start unpacking `entry`'s blocks back into cleartext.
    fn unpack<'a>(
        &self,
        cfg: &Config,
        entry: &'a DirEntry,
    ) -> Result<Box<dyn BlockUnpacker + 'a>, Error>;

    /// The key hashes of every reader able to decrypt this packdata, without
    /// touching private keys. Empty for packings that hold no wrapped keys.
    fn reader_hashes(&self, packdata: &[u8]) -> Result<Vec<KeyHash>, Error>;

    /// Replace the wrapped-key list of each packdata so exactly `readers`
    /// can decrypt, preserving the data key. The writer should be included.
    fn share(
        &self,
        cfg: &Config,
        readers: &[PublicKey],
        packdata: &mut [Vec<u8>],
    ) -> Result<(), Error>;

    /// Rename the entry. Signature-bearing packings keep the signature valid
    /// by leaving `signed_name` alone; others rewrite both names.
    fn name(&self, cfg: &Config, entry: &mut DirEntry, new_name: &PathName) -> Result<(), Error>;

    /// During key rotation, re-sign `entry` with `f`'s current key, keeping
    /// the signature made by `old` verifiable as the secondary signature.
    fn countersign(
        &self,
        old: &PublicKey,
        f: &Factotum,
        entry: &mut DirEntry,
    ) -> Result<(), Error>;

    /// Exact packed size of a cleartext block, or [`LEN_UNKNOWN`].
    fn pack_len(&self, entry: &DirEntry, cleartext_len: usize) -> i64;

    /// Exact cleartext size of a packed block, or [`LEN_UNKNOWN`].
    fn unpack_len(&self, entry: &DirEntry, ciphertext_len: usize) -> i64;
}

/// Look up the packer registered for `packing`.
///
/// The table is fixed at bring-up: the debug id stays reserved and
/// unregistered here.
pub fn lookup(packing: Packing) -> Option<&'static dyn Packer> {
    match packing {
        Packing::Plain => Some(&plain::PlainPack),
        Packing::Ee => Some(&ee::EePack),
        Packing::EeIntegrity => Some(&eeintegrity::EeIntegrityPack),
        Packing::Debug => None,
    }
}

/// Look up the packer for an entry, failing with `Unsupported` when the
/// entry names a packing this process cannot handle.
pub fn lookup_entry(entry: &DirEntry) -> Result<&'static dyn Packer, Error> {
    lookup(entry.packing).ok_or_else(|| {
        Error::new("pack.lookup", Kind::Unsupported)
            .path(entry.name.clone())
            .detail(format!("no packer registered for {}", entry.packing))
    })
}

/// Fetch `user`'s current public key, short-circuiting to the local factotum
/// for the configured user.
pub(crate) fn public_key_for(cfg: &Config, user: &crate::core::types::UserName) -> Result<PublicKey, Error> {
    if user == cfg.user_name() {
        if let Ok(f) = cfg.factotum() {
            return Ok(f.public_key().clone());
        }
    }
    let key_server = bind::key_server(cfg, cfg.key_endpoint())?;
    let record = key_server.lookup(user);
    bind::release_key_server(cfg.key_endpoint());
    let record = record
        .map_err(|e| Error::new("pack.public_key", Kind::Other).user(user.clone()).wrap(e))?;
    Ok(record.public_key)
}
