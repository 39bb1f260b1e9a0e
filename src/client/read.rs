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

//! The reference resolver: turn a block's location into its stored bytes,
//! chasing redirection lists across store servers.
//!
//! Locations to try form a FIFO; a visited set terminates cycles, and each
//! block tries at most a fixed number of locations. Transient failures move
//! on to the next location; if every location fails, the first error is the
//! one reported.

use crate::core::errors::{Error, Kind};
use crate::core::types::{DirBlock, Location, Refdata};
use crate::service::Blob;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tracing::debug;

/// How a resolver reaches store servers; the client backs this with the
/// binder, tests with fakes.
pub(crate) trait StoreGetter {
    fn get(&self, loc: &Location) -> Result<(Blob, Refdata), Error>;
}

const MAX_LOCATIONS_PER_BLOCK: usize = 32;
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Retry an idempotent fetch on transient failure, with exponential backoff.
fn get_with_retry(
    stores: &dyn StoreGetter,
    loc: &Location,
) -> Result<(Blob, Refdata), Error> {
    let mut attempt = 0;
    loop {
        match stores.get(loc) {
            Ok(got) => return Ok(got),
            Err(e) if attempt + 1 < RETRY_ATTEMPTS && matches!(e.kind(), Kind::Transient | Kind::Io) => {
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                debug!(reference = %loc.reference, attempt, "retrying store get");
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Fetch the stored bytes of one block, following redirections.
pub(crate) fn read_block(stores: &dyn StoreGetter, block: &DirBlock) -> Result<Vec<u8>, Error> {
    const OP: &str = "client.read_block";
    let mut to_try: VecDeque<Location> = VecDeque::new();
    to_try.push_back(block.location.clone());
    let mut visited: HashSet<Location> = HashSet::new();
    let mut first_err: Option<Error> = None;

    while let Some(loc) = to_try.pop_front() {
        if visited.len() >= MAX_LOCATIONS_PER_BLOCK {
            break;
        }
        if !visited.insert(loc.clone()) {
            continue;
        }
        match get_with_retry(stores, &loc) {
            Ok((Blob::Bytes(bytes), _)) => return Ok(bytes),
            Ok((Blob::Redirect(more), _)) => {
                debug!(reference = %loc.reference, n = more.len(), "store redirected");
                to_try.extend(more);
            }
            Err(e) => {
                first_err.get_or_insert(e);
            }
        }
    }

    Err(match first_err {
        Some(e) => Error::new(OP, Kind::Other).wrap(e),
        None => Error::new(OP, Kind::NotExist)
            .detail(format!("no location held {}", block.location.reference)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Endpoint, Reference};
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeStores {
        // endpoint addr -> outcome for any reference
        replies: HashMap<String, Blob>,
        seen: Mutex<Vec<String>>,
    }

    impl StoreGetter for FakeStores {
        fn get(&self, loc: &Location) -> Result<(Blob, Refdata), Error> {
            self.seen.lock().unwrap().push(loc.endpoint.addr.clone());
            match self.replies.get(&loc.endpoint.addr) {
                Some(blob) => Ok((blob.clone(), Refdata::default())),
                None => Err(Error::new("fake.get", Kind::NotExist)),
            }
        }
    }

    fn loc(addr: &str) -> Location {
        Location {
            endpoint: Endpoint {
                transport: crate::core::types::Transport::Remote,
                addr: addr.to_string(),
            },
            reference: Reference::from("ref"),
        }
    }

    #[test]
    fn follows_redirections_and_terminates_cycles() {
        // loc1 redirects to [loc2, loc3]; loc2 redirects back to [loc1];
        // loc3 has the bytes.
        let mut replies = HashMap::new();
        replies.insert("loc1".to_string(), Blob::Redirect(vec![loc("loc2"), loc("loc3")]));
        replies.insert("loc2".to_string(), Blob::Redirect(vec![loc("loc1")]));
        replies.insert("loc3".to_string(), Blob::Bytes(b"payload".to_vec()));
        let stores = FakeStores {
            replies,
            seen: Mutex::new(Vec::new()),
        };
        let block = DirBlock {
            location: loc("loc1"),
            ..Default::default()
        };
        let got = read_block(&stores, &block).unwrap();
        assert_eq!(got, b"payload");
        // Each unique location visited at most once.
        let seen = stores.seen.lock().unwrap().clone();
        assert_eq!(seen, vec!["loc1", "loc2", "loc3"]);
    }

    #[test]
    fn reports_first_error_when_all_fail() {
        let mut replies = HashMap::new();
        replies.insert("a".to_string(), Blob::Redirect(vec![loc("b")]));
        let stores = FakeStores {
            replies,
            seen: Mutex::new(Vec::new()),
        };
        let block = DirBlock {
            location: loc("a"),
            ..Default::default()
        };
        let err = read_block(&stores, &block).unwrap_err();
        assert!(err.is(Kind::NotExist));
    }
}
