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

//! The binder: a process-wide, reference-counted cache of dialed service
//! handles, keyed by endpoint (and by user for directory handles, which are
//! bound to the dialing identity).
//!
//! Every successful bind must be paired with a release; the last release
//! closes the handle and drops it from the cache.

use crate::core::config::Config;
use crate::core::errors::{Error, Kind};
use crate::core::types::{Endpoint, Transport, UserName};
use crate::service::{diskstore, inprocess, DirServer, KeyServer, Service, StoreServer};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tracing::debug;

struct Cached<S: ?Sized> {
    service: Arc<S>,
    refs: usize,
}

type StoreMap = HashMap<Endpoint, Cached<dyn StoreServer>>;
type DirMap = HashMap<(UserName, Endpoint), Cached<dyn DirServer>>;
type KeyMap = HashMap<Endpoint, Cached<dyn KeyServer>>;

fn lock<T>(m: &'static OnceLock<Mutex<T>>) -> MutexGuard<'static, T>
where
    T: Default,
{
    let m = m.get_or_init(|| Mutex::new(T::default()));
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn stores() -> MutexGuard<'static, StoreMap> {
    static STORES: OnceLock<Mutex<StoreMap>> = OnceLock::new();
    lock(&STORES)
}

fn dirs() -> MutexGuard<'static, DirMap> {
    static DIRS: OnceLock<Mutex<DirMap>> = OnceLock::new();
    lock(&DIRS)
}

fn keys() -> MutexGuard<'static, KeyMap> {
    static KEYS: OnceLock<Mutex<KeyMap>> = OnceLock::new();
    lock(&KEYS)
}

fn unsupported(op: &'static str, ep: &Endpoint) -> Error {
    Error::new(op, Kind::Unsupported).detail(format!("no dialer for endpoint {ep}"))
}

/// Dial (or re-use) the store server at `ep`.
pub fn store_server(_cfg: &Config, ep: &Endpoint) -> Result<Arc<dyn StoreServer>, Error> {
    let mut cache = stores();
    if let Some(c) = cache.get_mut(ep) {
        c.refs += 1;
        return Ok(c.service.clone());
    }
    let service: Arc<dyn StoreServer> = match ep.transport {
        Transport::InProcess => inprocess::store::new(),
        Transport::Disk => Arc::new(diskstore::DiskStore::open(ep)?),
        _ => return Err(unsupported("bind.store", ep)),
    };
    debug!(endpoint = %ep, "dialed store server");
    cache.insert(
        ep.clone(),
        Cached {
            service: service.clone(),
            refs: 1,
        },
    );
    Ok(service)
}

/// Release a store handle obtained from [`store_server`].
pub fn release_store_server(ep: &Endpoint) {
    let mut cache = stores();
    if let Some(c) = cache.get_mut(ep) {
        c.refs -= 1;
        if c.refs == 0 {
            c.service.close();
            cache.remove(ep);
            debug!(endpoint = %ep, "closed store server");
        }
    }
}

/// Dial (or re-use) the directory server at `ep` as `cfg`'s user.
pub fn dir_server(cfg: &Config, ep: &Endpoint) -> Result<Arc<dyn DirServer>, Error> {
    let key = (cfg.user_name().clone(), ep.clone());
    let mut cache = dirs();
    if let Some(c) = cache.get_mut(&key) {
        c.refs += 1;
        return Ok(c.service.clone());
    }
    let service: Arc<dyn DirServer> = match ep.transport {
        Transport::InProcess => inprocess::dir::new(cfg),
        _ => return Err(unsupported("bind.dir", ep)),
    };
    debug!(endpoint = %ep, user = %cfg.user_name(), "dialed dir server");
    cache.insert(
        key,
        Cached {
            service: service.clone(),
            refs: 1,
        },
    );
    Ok(service)
}

/// Release a directory handle obtained from [`dir_server`].
pub fn release_dir_server(user: &UserName, ep: &Endpoint) {
    let key = (user.clone(), ep.clone());
    let mut cache = dirs();
    if let Some(c) = cache.get_mut(&key) {
        c.refs -= 1;
        if c.refs == 0 {
            c.service.close();
            cache.remove(&key);
        }
    }
}

/// Dial (or re-use) the key server at `ep`.
pub fn key_server(_cfg: &Config, ep: &Endpoint) -> Result<Arc<dyn KeyServer>, Error> {
    let mut cache = keys();
    if let Some(c) = cache.get_mut(ep) {
        c.refs += 1;
        return Ok(c.service.clone());
    }
    let service: Arc<dyn KeyServer> = match ep.transport {
        Transport::InProcess => inprocess::key::new(),
        _ => return Err(unsupported("bind.key", ep)),
    };
    cache.insert(
        ep.clone(),
        Cached {
            service: service.clone(),
            refs: 1,
        },
    );
    Ok(service)
}

/// Release a key-server handle obtained from [`key_server`].
pub fn release_key_server(ep: &Endpoint) {
    let mut cache = keys();
    if let Some(c) = cache.get_mut(ep) {
        c.refs -= 1;
        if c.refs == 0 {
            c.service.close();
            cache.remove(ep);
        }
    }
}
