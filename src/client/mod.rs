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

//! The client façade: names in, cleartext out, and back again.
//!
//! Composes path parsing, the packers, the factotum, and the three services
//! into `get`, `put`, `make_directory`, `glob`, `put_link`, `delete`, and
//! `watch`, with link following bounded against cycles.

mod read;

use crate::core::access::{self, Access};
use crate::core::config::Config;
use crate::core::errors::{Error, Kind};
use crate::core::path::{self, Parsed};
use crate::core::types::{
    Attribute, DirEntry, Endpoint, Location, Packing, PathName, PublicKey, Time, UserName,
    SEQ_IGNORE, SEQ_NOT_EXIST,
};
use crate::pack::{self, Packer};
use crate::service::{bind, DirError, DirServer, Event, KeyServer, StoreServer};
use crate::share;
use read::StoreGetter;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Fixed cleartext block size for `put`. Entries record per-block sizes, so
/// any other writer's choice interoperates.
pub const BLOCK_SIZE: usize = 1 << 20;

/// Bound on link hops per operation.
const MAX_LINK_HOPS: usize = 32;

/// Attempts for idempotent directory reads hitting transient failures.
const DIR_RETRY_ATTEMPTS: u32 = 3;

/// A user's handle on the federated name space.
pub struct Client {
    cfg: Config,
    key_cache: Mutex<HashMap<UserName, PublicKey>>,
}

struct BoundStores<'a> {
    cfg: &'a Config,
}

impl StoreGetter for BoundStores<'_> {
    fn get(
        &self,
        loc: &Location,
    ) -> Result<(crate::service::Blob, crate::core::types::Refdata), Error> {
        let store = bind::store_server(self.cfg, &loc.endpoint)?;
        let got = store.get(&loc.reference);
        bind::release_store_server(&loc.endpoint);
        got
    }
}

impl Client {
    /// A client for `cfg`'s user.
    pub fn new(cfg: &Config) -> Client {
        Client {
            cfg: cfg.clone(),
            key_cache: Mutex::new(HashMap::new()),
        }
    }

    /// The configuration this client runs under.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    fn dir_endpoint_for(&self, user: &UserName) -> Result<Endpoint, Error> {
        if user == self.cfg.user_name() {
            return Ok(self.cfg.dir_endpoint().clone());
        }
        let ks = bind::key_server(&self.cfg, self.cfg.key_endpoint())?;
        let record = ks.lookup(user);
        bind::release_key_server(self.cfg.key_endpoint());
        record?
            .dirs
            .first()
            .cloned()
            .ok_or_else(|| {
                Error::new("client.dir_for", Kind::NotExist)
                    .user(user.clone())
                    .detail("user record has no directory endpoint")
            })
    }

    /// Run `f` against the directory server owning `parsed`, with scoped
    /// acquire/release of the handle.
    fn with_dir<T>(
        &self,
        parsed: &Parsed,
        f: impl FnOnce(&dyn DirServer) -> Result<T, DirError>,
    ) -> Result<T, DirError> {
        let ep = self.dir_endpoint_for(parsed.user())?;
        let dir = bind::dir_server(&self.cfg, &ep)?;
        let out = f(dir.as_ref());
        bind::release_dir_server(self.cfg.user_name(), &ep);
        out
    }

    /// Re-point `requested` through the link entry `link`.
    fn retarget(requested: &Parsed, link: &DirEntry) -> Result<Parsed, Error> {
        const OP: &str = "client.follow_link";
        let link_at = path::parse(&link.name)?;
        if requested.first(link_at.nelem()).path() != link_at.path() {
            return Err(Error::new(OP, Kind::Internal)
                .path(requested.path().clone())
                .detail("link entry is not a prefix of the requested path"));
        }
        let mut remainder = Vec::new();
        for i in link_at.nelem()..requested.nelem() {
            remainder.push(requested.elem(i).to_string());
        }
        let refs: Vec<&str> = remainder.iter().map(String::as_str).collect();
        let target = path::join(&link.link, &refs);
        path::parse(target)
    }

    /// Run a path-addressed directory operation, following links up to the
    /// hop bound.
    fn follow<T>(
        &self,
        op: &'static str,
        name: &PathName,
        mut f: impl FnMut(&dyn DirServer, &PathName) -> Result<T, DirError>,
    ) -> Result<T, Error> {
        let mut current = path::parse(name)?;
        for _ in 0..MAX_LINK_HOPS {
            let res = self.with_dir(&current, |dir| f(dir, current.path()));
            match res {
                Ok(v) => return Ok(v),
                Err(DirError::FollowLink(link)) => {
                    debug!(from = %current.path(), to = %link.link, "following link");
                    current = Self::retarget(&current, &link)?;
                }
                Err(DirError::Other(e)) => return Err(Error::new(op, Kind::Other).wrap(e)),
            }
        }
        Err(Error::new(op, Kind::BrokenLink)
            .path(name.clone())
            .detail("too many links"))
    }

    /// Like [`Client::with_dir`] but retrying transient failures; only for
    /// idempotent reads.
    fn with_dir_retry<T>(
        &self,
        parsed: &Parsed,
        mut f: impl FnMut(&dyn DirServer) -> Result<T, DirError>,
    ) -> Result<T, DirError> {
        let mut attempt = 0;
        loop {
            match self.with_dir(parsed, &mut f) {
                Err(DirError::Other(e))
                    if attempt + 1 < DIR_RETRY_ATTEMPTS
                        && matches!(e.kind(), Kind::Transient | Kind::Io) =>
                {
                    debug!(path = %parsed.path(), attempt, "retrying directory read");
                    std::thread::sleep(Duration::from_millis(100) * 2u32.pow(attempt));
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Fetch the entry for `name`. With `follow_final`, a link at the end of
    /// the path is resolved; without, the link entry itself is returned.
    pub fn lookup(&self, name: &PathName, follow_final: bool) -> Result<DirEntry, Error> {
        const OP: &str = "client.lookup";
        let mut current = path::parse(name)?;
        for _ in 0..MAX_LINK_HOPS {
            let res = self.with_dir_retry(&current, |dir| dir.lookup(current.path()));
            match res {
                Ok(entry) => return Ok(entry),
                Err(DirError::FollowLink(link)) => {
                    if !follow_final && link.name == *current.path() {
                        return Ok(*link);
                    }
                    current = Self::retarget(&current, &link)?;
                }
                Err(DirError::Other(e)) => return Err(Error::new(OP, Kind::Other).wrap(e)),
            }
        }
        Err(Error::new(OP, Kind::BrokenLink)
            .path(name.clone())
            .detail("too many links"))
    }

    /// Read and decrypt the whole file at `name`.
    pub fn get(&self, name: &PathName) -> Result<Vec<u8>, Error> {
        const OP: &str = "client.get";
        let entry = self.lookup(name, true)?;
        if entry.is_dir() {
            return Err(Error::new(OP, Kind::IsDir).path(name.clone()));
        }
        if entry.is_incomplete() {
            return Err(Error::new(OP, Kind::Permission)
                .path(name.clone())
                .user(self.cfg.user_name().clone())
                .detail("no read rights"));
        }
        let packer = pack::lookup_entry(&entry)?;
        let mut unpacker = packer.unpack(&self.cfg, &entry)?;
        let mut out = Vec::with_capacity(entry.size()? as usize);
        let stores = BoundStores { cfg: &self.cfg };
        while let Some(block) = unpacker.next_block() {
            let fetched = read::read_block(&stores, &block)
                .map_err(|e| Error::new(OP, Kind::Other).path(name.clone()).wrap(e))?;
            out.extend_from_slice(&unpacker.unpack(&fetched)?);
        }
        Ok(out)
    }

    /// Write `data` under `name`, packing per configuration. Access and
    /// Group files are validated and always stored world-readable.
    pub fn put(&self, name: &PathName, data: &[u8]) -> Result<DirEntry, Error> {
        const OP: &str = "client.put";
        let parsed = path::parse(name)?;
        let is_access = access::is_access_file(&parsed);
        let is_group = access::is_group_file(&parsed);

        // Malformed permission files must never land in the tree.
        if is_access {
            Access::parse(parsed.path(), data)?;
        }
        if is_group {
            access::validate_group(parsed.path(), data)?;
        }

        let packing = if is_access || is_group {
            Packing::EeIntegrity
        } else {
            self.cfg.packing()
        };

        let mut entry = DirEntry {
            signed_name: parsed.path().clone(),
            name: parsed.path().clone(),
            writer: self.cfg.user_name().clone(),
            packing,
            time: Time::now(),
            sequence: SEQ_IGNORE,
            attr: Attribute::None,
            blocks: Vec::new(),
            packdata: Vec::new(),
            link: PathName::default(),
        };

        let packer = pack::lookup(packing).ok_or_else(|| {
            Error::new(OP, Kind::Unsupported).detail(format!("no packer for {packing}"))
        })?;
        {
            let mut bp = packer.pack(&self.cfg, &mut entry)?;
            let store_ep = self.cfg.store_endpoint().clone();
            let store = bind::store_server(&self.cfg, &store_ep)?;
            let mut stored_all = || -> Result<(), Error> {
                for chunk in data.chunks(BLOCK_SIZE) {
                    let packed = bp.pack(chunk)?;
                    let refdata = store.put(&packed)?;
                    bp.set_location(Location {
                        endpoint: store_ep.clone(),
                        reference: refdata.reference,
                    });
                }
                bp.close()
            };
            let res = stored_all();
            bind::release_store_server(&store_ep);
            // A failed block aborts the whole put; nothing reaches the
            // directory and orphan blocks are left for store GC.
            res.map_err(|e| Error::new(OP, Kind::Other).path(name.clone()).wrap(e))?;
        }

        if packing == Packing::Ee {
            self.add_readers(&parsed, &mut entry)?;
        }

        let stored = self.put_entry(&entry)?;

        if is_group {
            // Invalidation may find nothing cached; that is fine.
            let _ = access::remove_group(parsed.path());
        }
        if is_access {
            // Readership changed: reconcile wrapped keys below this Access
            // file's directory. Best effort; a later share run self-heals.
            let scope = parsed.drop_n(1);
            if let Err(e) = share::Sharer::new(&self.cfg).fix(scope.path()) {
                warn!(path = %scope.path(), error = %e, "rewrap after Access change failed");
            }
        }
        Ok(stored)
    }

    /// Store an already-packed entry, following links. The entry's name is
    /// retargeted as links dictate; its signed name is left alone.
    pub fn put_entry(&self, entry: &DirEntry) -> Result<DirEntry, Error> {
        let name = entry.name.clone();
        self.follow("client.put_entry", &name, |dir, current| {
            let mut e = entry.clone();
            e.name = current.clone();
            dir.put(&e)
        })
    }

    /// Create the directory `name`; fails if it exists.
    pub fn make_directory(&self, name: &PathName) -> Result<DirEntry, Error> {
        let parsed = path::parse(name)?;
        let entry = DirEntry {
            signed_name: parsed.path().clone(),
            name: parsed.path().clone(),
            writer: self.cfg.user_name().clone(),
            packing: Packing::Plain,
            time: Time::now(),
            sequence: SEQ_NOT_EXIST,
            attr: Attribute::Directory,
            blocks: Vec::new(),
            packdata: Vec::new(),
            link: PathName::default(),
        };
        self.follow("client.make_directory", parsed.path(), |dir, current| {
            let mut e = entry.clone();
            e.name = current.clone();
            dir.put(&e)
        })
    }

    /// Create a link at `link_name` pointing to `old_name`.
    pub fn put_link(&self, old_name: &PathName, link_name: &PathName) -> Result<DirEntry, Error> {
        let target = path::parse(old_name)?;
        let parsed = path::parse(link_name)?;
        let entry = DirEntry {
            signed_name: parsed.path().clone(),
            name: parsed.path().clone(),
            writer: self.cfg.user_name().clone(),
            packing: Packing::Plain,
            time: Time::now(),
            sequence: SEQ_IGNORE,
            attr: Attribute::Link,
            blocks: Vec::new(),
            packdata: Vec::new(),
            link: target.path().clone(),
        };
        self.follow("client.put_link", parsed.path(), |dir, current| {
            let mut e = entry.clone();
            e.name = current.clone();
            dir.put(&e)
        })
    }

    /// Remove the entry for `name`. A link at the end of the path is
    /// removed itself, not followed.
    pub fn delete(&self, name: &PathName) -> Result<DirEntry, Error> {
        self.follow("client.delete", name, |dir, current| dir.delete(current))
    }

    /// Entries matching a shell-style pattern; the user component is
    /// literal. Links in the results are returned, not followed.
    pub fn glob(&self, pattern: &str) -> Result<Vec<DirEntry>, Error> {
        const OP: &str = "client.glob";
        let parsed = path::parse(pattern)?;
        self.with_dir(&parsed, |dir| Ok(dir.glob(pattern)?))
            .map_err(|e| match e {
                DirError::FollowLink(_) => Error::new(OP, Kind::Unsupported)
                    .detail("glob across links is not supported"),
                DirError::Other(e) => e,
            })
    }

    /// The Access entry governing `name`, or `None` for owner-only.
    pub fn which_access(&self, name: &PathName) -> Result<Option<DirEntry>, Error> {
        self.follow("client.which_access", name, |dir, current| {
            dir.which_access(current)
        })
    }

    /// Watch mutations under `name`; see [`DirServer::watch`].
    pub fn watch(
        &self,
        name: &PathName,
        order: i64,
        done: Arc<AtomicBool>,
    ) -> Result<mpsc::Receiver<Event>, Error> {
        let parsed = path::parse(name)?;
        self.with_dir(&parsed, |dir| Ok(dir.watch(parsed.path(), order, done)?))
            .map_err(|e| match e {
                DirError::FollowLink(_) => {
                    Error::new("client.watch", Kind::Unsupported).detail("cannot watch a link")
                }
                DirError::Other(e) => e,
            })
    }

    /// Public key of `user`, through a per-client cache.
    pub(crate) fn public_key_of(&self, user: &UserName) -> Result<PublicKey, Error> {
        if let Some(k) = self.key_cache_get(user) {
            return Ok(k);
        }
        let key = pack::public_key_for(&self.cfg, user)?;
        if let Ok(mut cache) = self.key_cache.lock() {
            cache.insert(user.clone(), key.clone());
        }
        Ok(key)
    }

    fn key_cache_get(&self, user: &UserName) -> Option<PublicKey> {
        self.key_cache.lock().ok()?.get(user).cloned()
    }

    /// Rewrap the entry's data key for everyone the governing Access file
    /// grants read to (the writer included).
    fn add_readers(&self, parsed: &Parsed, entry: &mut DirEntry) -> Result<(), Error> {
        const OP: &str = "client.add_readers";
        let readers = share::readers_for(self, parsed.path())?;
        if readers.keys.len() <= 1 && !readers.wildcard {
            // Owner-only; pack already wrapped for the writer.
            return Ok(());
        }
        if readers.wildcard {
            warn!(path = %parsed.path(), "wildcard readers cannot be enumerated for key wrapping");
        }
        let packer = pack::lookup(Packing::Ee)
            .ok_or_else(|| Error::new(OP, Kind::Internal).detail("ee packer missing"))?;
        let mut pds = vec![std::mem::take(&mut entry.packdata)];
        let res = packer.share(&self.cfg, &readers.keys, &mut pds);
        entry.packdata = pds.pop().unwrap_or_default();
        res.map_err(|e| Error::new(OP, Kind::Other).path(parsed.path().clone()).wrap(e))
    }
}
