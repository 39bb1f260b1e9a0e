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

//! In-memory content-addressed store.

use crate::core::errors::{Error, Kind};
use crate::core::types::{Endpoint, Refdata, Reference};
use crate::service::{Blob, Service, StoreServer};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

fn blobs() -> MutexGuard<'static, HashMap<Reference, Arc<Vec<u8>>>> {
    static BLOBS: OnceLock<Mutex<HashMap<Reference, Arc<Vec<u8>>>>> = OnceLock::new();
    let m = BLOBS.get_or_init(|| Mutex::new(HashMap::new()));
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Hex SHA-256 of `data`; the content address.
pub(crate) fn reference_for(data: &[u8]) -> Reference {
    let d = ring::digest::digest(&ring::digest::SHA256, data);
    Reference::from(hex::encode(d.as_ref()))
}

/// The in-process store handle.
pub struct InProcessStore;

/// Dial the process-wide store.
pub fn new() -> Arc<dyn StoreServer> {
    Arc::new(InProcessStore)
}

impl Service for InProcessStore {
    fn endpoint(&self) -> Endpoint {
        Endpoint::inprocess()
    }
}

impl StoreServer for InProcessStore {
    fn put(&self, data: &[u8]) -> Result<Refdata, Error> {
        let reference = reference_for(data);
        // Identical content converges on the same reference; a duplicate
        // put stores nothing.
        blobs()
            .entry(reference.clone())
            .or_insert_with(|| Arc::new(data.to_vec()));
        Ok(Refdata {
            reference,
            volatile: false,
            duration: Duration::ZERO,
        })
    }

    fn get(&self, reference: &Reference) -> Result<(Blob, Refdata), Error> {
        let data = blobs()
            .get(reference)
            .cloned()
            .ok_or_else(|| Error::new("store.get", Kind::NotExist).detail(reference))?;
        Ok((
            Blob::Bytes(data.as_ref().clone()),
            Refdata {
                reference: reference.clone(),
                volatile: false,
                duration: Duration::ZERO,
            },
        ))
    }

    fn delete(&self, reference: &Reference) -> Result<(), Error> {
        match blobs().remove(reference) {
            Some(_) => Ok(()),
            None => Err(Error::new("store.delete", Kind::NotExist).detail(reference)),
        }
    }
}
