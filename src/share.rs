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

//! Reconciling wrapped keys with Access readership.
//!
//! For every encrypted entry under a subtree, the set of key hashes in its
//! packdata must match the readers the governing Access file grants `read`
//! to. `scan` reports discrepancies, `fix` rewraps, `countersign` appends
//! second signatures during key rotation.

use crate::client::Client;
use crate::core::access::{Access, Right};
use crate::core::config::Config;
use crate::core::errors::{Error, Kind};
use crate::core::path;
use crate::core::types::{DirEntry, KeyHash, Packing, PathName, PublicKey, UserName};
use crate::pack::{self, Packer};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// The readership of a path: concrete users, their keys, and whether a
/// wildcard made the set non-enumerable.
pub struct Readers {
    /// Users granted read, the writer included.
    pub users: Vec<UserName>,
    /// Public keys of `users` that resolved at the key server.
    pub keys: Vec<PublicKey>,
    /// True if a `*@domain` wildcard grants read to users not in `users`.
    pub wildcard: bool,
}

/// Everyone the governing Access file grants read over `name`, plus the
/// calling user (so a writer can always decrypt their own files).
pub fn readers_for(client: &Client, name: &PathName) -> Result<Readers, Error> {
    let cfg = client.config();
    let mut wildcard = false;
    let mut users: Vec<UserName> = match client.which_access(name)? {
        None => vec![path::parse(name)?.user().clone()],
        Some(entry) => {
            let data = client.get(&entry.name)?;
            let parsed = Access::parse(&entry.name, &data)?;
            wildcard = parsed.has_wildcard(Right::Read);
            let mut load = |g: &PathName| client.get(g);
            parsed.users_with_right(Right::Read, &mut load)?
        }
    };
    if !users.contains(cfg.user_name()) {
        users.push(cfg.user_name().clone());
    }
    let mut keys = Vec::new();
    for u in &users {
        match client.public_key_of(u) {
            Ok(k) => keys.push(k),
            Err(e) => warn!(user = %u, error = %e, "reader has no public key; skipping"),
        }
    }
    Ok(Readers {
        users,
        keys,
        wildcard,
    })
}

/// One entry whose wrapped keys disagree with its readership.
#[derive(Debug)]
pub struct Discrepancy {
    /// The entry's name.
    pub name: PathName,
    /// Readers who should be able to decrypt but cannot.
    pub missing: Vec<KeyHash>,
    /// Key hashes wrapped in the entry that map to no current reader;
    /// stale readership or an unknown key.
    pub extra: Vec<KeyHash>,
    /// True if the writer's own current key cannot decrypt the entry.
    pub writer_missing: bool,
}

/// The reconciliation engine.
pub struct Sharer {
    client: Client,
}

impl Sharer {
    /// An engine running as `cfg`'s user.
    pub fn new(cfg: &Config) -> Sharer {
        Sharer {
            client: Client::new(cfg),
        }
    }

    fn walk(
        &self,
        dir_path: &PathName,
        visit: &mut dyn FnMut(&DirEntry) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let base = dir_path.as_str().trim_end_matches('/');
        let entries = self.client.glob(&format!("{base}/*"))?;
        for e in &entries {
            if e.is_link() {
                continue;
            }
            if e.is_dir() {
                self.walk(&e.name, visit)?;
            } else {
                visit(e)?;
            }
        }
        Ok(())
    }

    /// Compare one entry's wrapped keys against its readership. `None` means
    /// the entry is consistent or not encrypted.
    fn audit(&self, entry: &DirEntry) -> Result<Option<(Discrepancy, Vec<PublicKey>)>, Error> {
        if entry.packing != Packing::Ee || entry.is_incomplete() {
            return Ok(None);
        }
        let packer = pack::lookup(Packing::Ee)
            .ok_or_else(|| Error::new("share.audit", Kind::Internal).detail("ee packer missing"))?;
        let current: BTreeSet<KeyHash> =
            packer.reader_hashes(&entry.packdata)?.into_iter().collect();

        let readers = readers_for(&self.client, &entry.name)?;
        if readers.wildcard {
            warn!(path = %entry.name, "wildcard readers cannot be wrapped for");
        }
        let wanted: BTreeSet<KeyHash> = readers.keys.iter().map(KeyHash::of).collect();
        let writer_missing = match self.client.public_key_of(&entry.writer) {
            Ok(k) => !current.contains(&KeyHash::of(&k)),
            Err(_) => false,
        };

        let missing: Vec<KeyHash> = wanted.difference(&current).copied().collect();
        let extra: Vec<KeyHash> = current.difference(&wanted).copied().collect();
        if missing.is_empty() && extra.is_empty() && !writer_missing {
            return Ok(None);
        }
        let mut keys = readers.keys;
        if let Ok(k) = self.client.public_key_of(&entry.writer) {
            if !keys.contains(&k) {
                keys.push(k);
            }
        }
        Ok(Some((
            Discrepancy {
                name: entry.name.clone(),
                missing,
                extra,
                writer_missing,
            },
            keys,
        )))
    }

    /// Report every encrypted entry under `root` whose wrapped keys disagree
    /// with the Access readership, without changing anything.
    pub fn scan(&self, root: &PathName) -> Result<Vec<Discrepancy>, Error> {
        let mut found = Vec::new();
        self.walk(root, &mut |entry| {
            if let Some((d, _)) = self.audit(entry)? {
                found.push(d);
            }
            Ok(())
        })?;
        Ok(found)
    }

    /// Rewrap every inconsistent entry under `root`, returning how many
    /// entries changed. Entries this user cannot unwrap are reported and
    /// left alone.
    pub fn fix(&self, root: &PathName) -> Result<usize, Error> {
        let packer = pack::lookup(Packing::Ee)
            .ok_or_else(|| Error::new("share.fix", Kind::Internal).detail("ee packer missing"))?;
        let mut fixed = 0usize;
        self.walk(root, &mut |entry| {
            let Some((d, keys)) = self.audit(entry)? else {
                return Ok(());
            };
            let mut updated = entry.clone();
            let mut pds = vec![std::mem::take(&mut updated.packdata)];
            let shared = packer.share(self.client.config(), &keys, &mut pds);
            updated.packdata = pds.pop().unwrap_or_default();
            match shared {
                Ok(()) => {
                    self.client.put_entry(&updated)?;
                    info!(path = %d.name, readers = keys.len(), "rewrapped");
                    fixed += 1;
                }
                Err(e) if e.is(Kind::Permission) => {
                    warn!(path = %d.name, "cannot unwrap this entry; skipping");
                }
                Err(e) => return Err(e),
            }
            Ok(())
        })?;
        Ok(fixed)
    }

    /// During key rotation, add a signature by the current key to every
    /// entry this user wrote with a signing packing, leaving the previous
    /// key's signature verifiable. Returns how many entries were signed.
    pub fn countersign(&self, root: &PathName) -> Result<usize, Error> {
        const OP: &str = "share.countersign";
        let cfg = self.client.config();
        let f = cfg.factotum()?;
        let previous = f.pop();
        let old = previous.public_key().clone();
        if &old == f.public_key() {
            return Err(Error::new(OP, Kind::Invalid).detail("factotum holds no previous key"));
        }
        let mut signed = 0usize;
        self.walk(root, &mut |entry| {
            if &entry.writer != cfg.user_name() {
                return Ok(());
            }
            if !matches!(entry.packing, Packing::Ee | Packing::EeIntegrity) {
                return Ok(());
            }
            let packer = pack::lookup(entry.packing)
                .ok_or_else(|| Error::new(OP, Kind::Internal).detail("packer missing"))?;
            let mut updated = entry.clone();
            match packer.countersign(&old, f.as_ref(), &mut updated) {
                Ok(()) => {
                    self.client.put_entry(&updated)?;
                    signed += 1;
                    Ok(())
                }
                Err(e) if e.is(Kind::Permission) => {
                    warn!(path = %entry.name, "cannot unwrap for countersign; skipping");
                    Ok(())
                }
                Err(e) => Err(e),
            }
        })?;
        Ok(signed)
    }
}
