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

//! The three cooperating services and the binder that dials them.
//!
//! `DirServer`, `StoreServer`, and `KeyServer` are capability sets with
//! multiple concrete implementations; dispatch is on the endpoint's
//! transport tag at bind time, runtime polymorphism thereafter.

pub mod bind;
pub mod diskstore;
pub mod inprocess;

use crate::core::errors::{Error, Kind};
use crate::core::types::{DirEntry, Endpoint, PathName, Refdata, Reference, User, UserName};
use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc};
use thiserror::Error as ThisError;

/// Result of a store `get`: exactly one of the payload bytes or a list of
/// other locations to try.
#[derive(Clone, Debug)]
pub enum Blob {
    /// The stored bytes themselves.
    Bytes(Vec<u8>),
    /// Alternate locations where the reference may be found.
    Redirect(Vec<crate::core::types::Location>),
}

/// Error type for path-addressed directory operations, layering the
/// follow-link sentinel over the structured error.
#[derive(Debug, ThisError)]
pub enum DirError {
    /// The operation hit a link; re-issue against the link target. Carries
    /// the link's own entry.
    #[error("action incomplete: must follow link")]
    FollowLink(Box<DirEntry>),
    /// Any other failure.
    #[error(transparent)]
    Other(#[from] Error),
}

impl DirError {
    /// True if the effective kind of a non-link error is `kind`.
    pub fn is(&self, kind: Kind) -> bool {
        match self {
            DirError::FollowLink(_) => false,
            DirError::Other(e) => e.is(kind),
        }
    }
}

/// Shorthand for directory-operation results.
pub type DirResult<T> = Result<T, DirError>;

/// One notification from a directory watch.
#[derive(Debug)]
pub struct Event {
    /// The entry the event describes; absent on error events.
    pub entry: Option<DirEntry>,
    /// Monotonic order of the event in the server's log.
    pub order: i64,
    /// True if the entry was deleted.
    pub delete: bool,
    /// Set when the server had to abandon the watch.
    pub error: Option<Error>,
}

/// Common surface of every dialed service handle.
pub trait Service: Send + Sync {
    /// The endpoint this handle was dialed with.
    fn endpoint(&self) -> Endpoint;

    /// Release underlying resources; called by the binder on last release.
    fn close(&self) {}
}

/// A user's directory tree.
pub trait DirServer: Service {
    /// Fetch the entry for `name`.
    fn lookup(&self, name: &PathName) -> DirResult<DirEntry>;

    /// Write or update an entry, returning the stored (canonicalized) form.
    fn put(&self, entry: &DirEntry) -> DirResult<DirEntry>;

    /// Remove the entry for `name`; directories must be empty.
    fn delete(&self, name: &PathName) -> DirResult<DirEntry>;

    /// Shell-style matching over one user's tree; the user component of the
    /// pattern is literal. Link entries are returned, not followed.
    fn glob(&self, pattern: &str) -> Result<Vec<DirEntry>, Error>;

    /// The nearest Access file governing `name`, or `None` for owner-only.
    fn which_access(&self, name: &PathName) -> DirResult<Option<DirEntry>>;

    /// Stream mutations under `name`. `order` replays from that point in the
    /// server's log (−1 means only new events). The stream ends when `done`
    /// is set or the receiver is dropped.
    fn watch(
        &self,
        name: &PathName,
        order: i64,
        done: Arc<AtomicBool>,
    ) -> Result<mpsc::Receiver<Event>, Error>;
}

/// A dumb content-addressed blob store.
pub trait StoreServer: Service {
    /// Store bytes, returning their reference.
    fn put(&self, data: &[u8]) -> Result<Refdata, Error>;

    /// Fetch bytes, or a redirection list of other locations to try.
    fn get(&self, reference: &Reference) -> Result<(Blob, Refdata), Error>;

    /// Delete the reference. Servers may refuse with `Unsupported`.
    fn delete(&self, reference: &Reference) -> Result<(), Error>;
}

/// The user-name to key/endpoint directory.
pub trait KeyServer: Service {
    /// Fetch the record for `user`.
    fn lookup(&self, user: &UserName) -> Result<User, Error>;

    /// Create or update a user record; the caller must be authorized.
    fn put(&self, user: &User) -> Result<(), Error>;
}
