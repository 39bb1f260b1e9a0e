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

//! On-disk content-addressed store backed by sled. The endpoint address is
//! the database directory.

use crate::core::errors::{Error, Kind};
use crate::core::types::{Endpoint, Refdata, Reference, Transport};
use crate::service::inprocess::store::reference_for;
use crate::service::{Blob, Service, StoreServer};
use std::time::Duration;
use tracing::info;

/// A sled-backed store server.
pub struct DiskStore {
    endpoint: Endpoint,
    db: sled::Db,
}

impl DiskStore {
    /// Open (creating if needed) the database named by `ep`'s address.
    pub fn open(ep: &Endpoint) -> Result<DiskStore, Error> {
        const OP: &str = "diskstore.open";
        if ep.transport != Transport::Disk || ep.addr.is_empty() {
            return Err(Error::new(OP, Kind::Invalid).detail(format!("bad endpoint {ep}")));
        }
        let db = sled::open(&ep.addr)
            .map_err(|e| Error::new(OP, Kind::Io).detail(format!("{}: {e}", ep.addr)))?;
        info!(path = %ep.addr, "disk store opened");
        Ok(DiskStore {
            endpoint: ep.clone(),
            db,
        })
    }
}

impl Service for DiskStore {
    fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    fn close(&self) {
        let _ = self.db.flush();
    }
}

impl StoreServer for DiskStore {
    fn put(&self, data: &[u8]) -> Result<Refdata, Error> {
        const OP: &str = "diskstore.put";
        let reference = reference_for(data);
        // Content-addressed: a reference that exists already holds these
        // exact bytes, so the write can be skipped.
        let existing = self
            .db
            .get(reference.as_str())
            .map_err(|_| Error::new(OP, Kind::Io))?;
        if existing.is_none() {
            self.db
                .insert(reference.as_str(), data)
                .map_err(|_| Error::new(OP, Kind::Io))?;
        }
        Ok(Refdata {
            reference,
            volatile: false,
            duration: Duration::ZERO,
        })
    }

    fn get(&self, reference: &Reference) -> Result<(Blob, Refdata), Error> {
        const OP: &str = "diskstore.get";
        let v = self
            .db
            .get(reference.as_str())
            .map_err(|_| Error::new(OP, Kind::Io))?
            .ok_or_else(|| Error::new(OP, Kind::NotExist).detail(reference))?;
        Ok((
            Blob::Bytes(v.to_vec()),
            Refdata {
                reference: reference.clone(),
                volatile: false,
                duration: Duration::ZERO,
            },
        ))
    }

    fn delete(&self, reference: &Reference) -> Result<(), Error> {
        const OP: &str = "diskstore.delete";
        match self
            .db
            .remove(reference.as_str())
            .map_err(|_| Error::new(OP, Kind::Io))?
        {
            Some(_) => Ok(()),
            None => Err(Error::new(OP, Kind::NotExist).detail(reference)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_roundtrip_and_dedupe() {
        let dir = tempfile::tempdir().unwrap();
        let ep = Endpoint::disk(dir.path().join("blobs").to_string_lossy().into_owned());
        let store = DiskStore::open(&ep).unwrap();

        let rd1 = store.put(b"some bytes").unwrap();
        let rd2 = store.put(b"some bytes").unwrap();
        assert_eq!(rd1.reference, rd2.reference);

        match store.get(&rd1.reference).unwrap().0 {
            Blob::Bytes(b) => assert_eq!(b, b"some bytes"),
            Blob::Redirect(_) => panic!("unexpected redirect"),
        }

        store.delete(&rd1.reference).unwrap();
        assert!(store.get(&rd1.reference).unwrap_err().is(Kind::NotExist));
    }
}
