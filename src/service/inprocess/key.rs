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

//! In-memory key server: user name to public key and endpoints.

use crate::core::errors::{Error, Kind};
use crate::core::path;
use crate::core::types::{Endpoint, User, UserName};
use crate::service::{KeyServer, Service};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tracing::debug;

fn users() -> MutexGuard<'static, HashMap<UserName, User>> {
    static USERS: OnceLock<Mutex<HashMap<UserName, User>>> = OnceLock::new();
    let m = USERS.get_or_init(|| Mutex::new(HashMap::new()));
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// The in-process key server handle.
pub struct InProcessKey;

/// Dial the process-wide key server.
pub fn new() -> Arc<dyn KeyServer> {
    Arc::new(InProcessKey)
}

impl Service for InProcessKey {
    fn endpoint(&self) -> Endpoint {
        Endpoint::inprocess()
    }
}

impl KeyServer for InProcessKey {
    fn lookup(&self, user: &UserName) -> Result<User, Error> {
        users()
            .get(user)
            .cloned()
            .ok_or_else(|| Error::new("key.lookup", Kind::NotExist).user(user.clone()))
    }

    fn put(&self, user: &User) -> Result<(), Error> {
        let name = path::parse_user(&user.name)
            .map_err(|e| Error::new("key.put", Kind::Other).wrap(e))?;
        if user.public_key.is_empty() {
            return Err(Error::new("key.put", Kind::Invalid)
                .user(name.clone())
                .detail("empty public key"));
        }
        debug!(user = %name, "key server record updated");
        let mut record = user.clone();
        record.name = name.clone();
        users().insert(name, record);
        Ok(())
    }
}
