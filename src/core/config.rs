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

//! Per-user client configuration: identity, key custody, packing policy,
//! and the endpoints of the three cooperating services.
//!
//! ## File format (TOML)
//!
//! ```text
//! username    = "ann@example.com"
//! secrets     = "/home/ann/.keeper/keys"   # key directory (optional)
//! packing     = "ee"                       # optional, default "ee"
//! keyserver   = "inprocess"
//! dirserver   = "inprocess"
//! storeserver = "disk,/var/keeper/blobs"
//! ```

use crate::core::errors::{Error, Kind};
use crate::core::path;
use crate::core::types::{Endpoint, Packing, UserName};
use crate::security::factotum::Factotum;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

/// A user's client-side configuration. Cheap to clone; shared by reference
/// where concurrency needs it.
#[derive(Clone)]
pub struct Config {
    user_name: UserName,
    factotum: Option<Arc<Factotum>>,
    packing: Packing,
    key_endpoint: Endpoint,
    dir_endpoint: Endpoint,
    store_endpoint: Endpoint,
}

impl Config {
    /// Configuration for `user` with in-process endpoints and EE packing.
    pub fn new(user: impl Into<UserName>) -> Self {
        Config {
            user_name: user.into(),
            factotum: None,
            packing: Packing::Ee,
            key_endpoint: Endpoint::inprocess(),
            dir_endpoint: Endpoint::inprocess(),
            store_endpoint: Endpoint::inprocess(),
        }
    }

    /// The user this configuration belongs to.
    pub fn user_name(&self) -> &UserName {
        &self.user_name
    }

    /// The key custodian, or `NotExist` if none was configured.
    pub fn factotum(&self) -> Result<&Arc<Factotum>, Error> {
        self.factotum
            .as_ref()
            .ok_or_else(|| {
                Error::new("config.factotum", Kind::NotExist)
                    .user(self.user_name.clone())
                    .detail("no key directory configured")
            })
    }

    /// Default packing for new files.
    pub fn packing(&self) -> Packing {
        self.packing
    }

    /// Key server endpoint.
    pub fn key_endpoint(&self) -> &Endpoint {
        &self.key_endpoint
    }

    /// Directory server endpoint for this user's tree.
    pub fn dir_endpoint(&self) -> &Endpoint {
        &self.dir_endpoint
    }

    /// Store server endpoint this user writes to.
    pub fn store_endpoint(&self) -> &Endpoint {
        &self.store_endpoint
    }

    /// Replace the factotum.
    pub fn with_factotum(mut self, f: Arc<Factotum>) -> Self {
        self.factotum = Some(f);
        self
    }

    /// Replace the default packing.
    pub fn with_packing(mut self, p: Packing) -> Self {
        self.packing = p;
        self
    }

    /// Replace the key server endpoint.
    pub fn with_key_endpoint(mut self, e: Endpoint) -> Self {
        self.key_endpoint = e;
        self
    }

    /// Replace the directory server endpoint.
    pub fn with_dir_endpoint(mut self, e: Endpoint) -> Self {
        self.dir_endpoint = e;
        self
    }

    /// Replace the store server endpoint.
    pub fn with_store_endpoint(mut self, e: Endpoint) -> Self {
        self.store_endpoint = e;
        self
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    username: String,
    #[serde(default)]
    secrets: Option<String>,
    #[serde(default)]
    packing: Option<String>,
    #[serde(default)]
    keyserver: Option<String>,
    #[serde(default)]
    dirserver: Option<String>,
    #[serde(default)]
    storeserver: Option<String>,
}

impl Config {
    /// Load a configuration file, reading the key directory if one is named.
    pub fn from_file(file: impl AsRef<Path>) -> Result<Config, Error> {
        const OP: &str = "config.from_file";
        let raw = std::fs::read_to_string(file.as_ref())
            .map_err(|e| Error::new(OP, Kind::Io).detail(e))?;
        let cf: ConfigFile =
            toml::from_str(&raw).map_err(|e| Error::new(OP, Kind::Invalid).detail(e))?;

        let user = path::parse_user(&cf.username).map_err(|e| Error::new(OP, Kind::Other).wrap(e))?;
        let mut cfg = Config::new(user);

        if let Some(p) = cf.packing.as_deref() {
            cfg.packing = Packing::parse(p).ok_or_else(|| {
                Error::new(OP, Kind::Invalid).detail(format!("unknown packing {p:?}"))
            })?;
        }
        if let Some(e) = cf.keyserver.as_deref() {
            cfg.key_endpoint = Endpoint::parse(e)?;
        }
        if let Some(e) = cf.dirserver.as_deref() {
            cfg.dir_endpoint = Endpoint::parse(e)?;
        }
        if let Some(e) = cf.storeserver.as_deref() {
            cfg.store_endpoint = Endpoint::parse(e)?;
        }
        if let Some(dir) = cf.secrets.as_deref() {
            let f = Factotum::from_dir(Path::new(dir))
                .map_err(|e| Error::new(OP, Kind::Other).wrap(e))?;
            cfg.factotum = Some(Arc::new(f));
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Transport;

    #[test]
    fn parses_minimal_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("keeper.toml");
        std::fs::write(
            &p,
            "username = \"ann@Example.com\"\nstoreserver = \"disk,/tmp/blobs\"\n",
        )
        .unwrap();
        let cfg = Config::from_file(&p).unwrap();
        assert_eq!(cfg.user_name().as_str(), "ann@example.com");
        assert_eq!(cfg.packing(), Packing::Ee);
        assert_eq!(cfg.store_endpoint().transport, Transport::Disk);
        assert!(cfg.factotum().is_err());
    }

    #[test]
    fn rejects_unknown_packing() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("keeper.toml");
        std::fs::write(&p, "username = \"ann@example.com\"\npacking = \"rot13\"\n").unwrap();
        assert!(Config::from_file(&p).is_err());
    }
}
