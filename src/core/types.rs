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

//! Core data model: names, endpoints, directory entries, and the canonical
//! encoding used to marshal them.

use bincode::Options;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::core::errors::{Error, Kind};

/// Canonical serialization error.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("serialization")]
    Serialize,
    #[error("deserialization")]
    Deserialize,
    #[error("size limit exceeded")]
    TooLarge,
}

/// Canonical bincode options (deterministic).
fn bincode_opts() -> impl Options {
    // Fixint encoding provides a stable integer representation.
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Encode with deterministic rules.
pub fn encode_canonical<T: Serialize>(v: &T) -> Result<Vec<u8>, CodecError> {
    bincode_opts()
        .serialize(v)
        .map_err(|_| CodecError::Serialize)
}

/// Decode with a hard size cap.
pub fn decode_canonical_limited<T: DeserializeOwned>(
    bytes: &[u8],
    max: usize,
) -> Result<T, CodecError> {
    if bytes.len() > max {
        return Err(CodecError::TooLarge);
    }
    // Cap inside the deserializer as well, against container-length bombs.
    bincode_opts()
        .with_limit(max as u64)
        .deserialize(bytes)
        .map_err(|_| CodecError::Deserialize)
}

macro_rules! string_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(String);

        impl $name {
            /// View as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True if empty.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<&$name> for $name {
            fn from(s: &$name) -> Self {
                s.clone()
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_newtype!(
    /// Full path name: `user@domain/elem1/elem2/…`, case as given.
    PathName
);
string_newtype!(
    /// Email-shaped user name with a lowercase domain.
    UserName
);
string_newtype!(
    /// Content-addressed identifier for an immutable blob, by convention the
    /// hex SHA-256 of its bytes.
    Reference
);
string_newtype!(
    /// Public key in text form: curve-name line, decimal X, decimal Y, each
    /// newline-terminated. The trailing newline is part of the signed bytes.
    PublicKey
);

/// SHA-256 of the exact public-key text bytes; the reader identity inside
/// wrapped-key lists.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyHash(pub [u8; 32]);

impl KeyHash {
    /// Hash the exact bytes of a public key's text form.
    pub fn of(key: &PublicKey) -> Self {
        let d = ring::digest::digest(&ring::digest::SHA256, key.as_str().as_bytes());
        let mut out = [0u8; 32];
        out.copy_from_slice(d.as_ref());
        KeyHash(out)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyHash({})", hex::encode(self.0))
    }
}

impl fmt::Display for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// How a service is reached.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Transport {
    /// No transport assigned; an endpoint placeholder.
    #[default]
    Unassigned,
    /// Service living inside this process.
    InProcess,
    /// Store service backed by an on-disk database; the address is a path.
    Disk,
    /// Network service (transport plumbing lives outside this crate).
    Remote,
}

/// Where a service instance lives.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Transport discriminant; dispatch at bind time is on this tag.
    pub transport: Transport,
    /// Transport-specific address (empty for in-process).
    pub addr: String,
}

impl Endpoint {
    /// In-process endpoint.
    pub fn inprocess() -> Self {
        Endpoint {
            transport: Transport::InProcess,
            addr: String::new(),
        }
    }

    /// On-disk store endpoint rooted at `path`.
    pub fn disk(path: impl Into<String>) -> Self {
        Endpoint {
            transport: Transport::Disk,
            addr: path.into(),
        }
    }

    /// Parse the text form `transport` or `transport,addr`.
    pub fn parse(s: &str) -> Result<Endpoint, Error> {
        let (t, addr) = match s.split_once(',') {
            Some((t, a)) => (t, a.to_string()),
            None => (s, String::new()),
        };
        let transport = match t {
            "unassigned" => Transport::Unassigned,
            "inprocess" => Transport::InProcess,
            "disk" => Transport::Disk,
            "remote" => Transport::Remote,
            _ => {
                return Err(Error::new("endpoint.parse", Kind::Syntax)
                    .detail(format!("unknown transport {t:?}")))
            }
        };
        Ok(Endpoint { transport, addr })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = match self.transport {
            Transport::Unassigned => "unassigned",
            Transport::InProcess => "inprocess",
            Transport::Disk => "disk",
            Transport::Remote => "remote",
        };
        if self.addr.is_empty() {
            f.write_str(t)
        } else {
            write!(f, "{t},{}", self.addr)
        }
    }
}

/// A hint where a blob may be fetched: endpoint plus reference.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// Store server endpoint.
    pub endpoint: Endpoint,
    /// Reference within that store.
    pub reference: Reference,
}

/// Identifier of the packing algorithm applied to a file's data.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Packing {
    /// Identity transform; no encryption, no integrity.
    #[default]
    Plain,
    /// Debugging packing; id reserved, never registered here.
    Debug,
    /// End-to-end AES-256-GCM encryption with per-reader wrapped keys.
    Ee,
    /// Cleartext blocks with an end-to-end signature; tamper-evident but
    /// world-readable. Used for Access and Group files.
    EeIntegrity,
}

impl Packing {
    /// Wire/code byte for this packing.
    pub fn byte(self) -> u8 {
        match self {
            Packing::Plain => 0,
            Packing::Debug => 1,
            Packing::Ee => 2,
            Packing::EeIntegrity => 3,
        }
    }

    /// Reverse of [`Packing::byte`].
    pub fn from_byte(b: u8) -> Option<Packing> {
        match b {
            0 => Some(Packing::Plain),
            1 => Some(Packing::Debug),
            2 => Some(Packing::Ee),
            3 => Some(Packing::EeIntegrity),
            _ => None,
        }
    }

    /// Parse the text name used in configuration files.
    pub fn parse(s: &str) -> Option<Packing> {
        match s {
            "plain" => Some(Packing::Plain),
            "debug" => Some(Packing::Debug),
            "ee" => Some(Packing::Ee),
            "eeintegrity" => Some(Packing::EeIntegrity),
            _ => None,
        }
    }
}

impl fmt::Display for Packing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Packing::Plain => "plain",
            Packing::Debug => "debug",
            Packing::Ee => "ee",
            Packing::EeIntegrity => "eeintegrity",
        };
        f.write_str(s)
    }
}

/// Kind of directory entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Attribute {
    /// Regular file.
    #[default]
    None,
    /// Directory; no blocks, size zero.
    Directory,
    /// Link to another name; `link` is set, no blocks.
    Link,
    /// Metadata-only view of an entry the caller may list but not read;
    /// blocks and packdata are withheld.
    Incomplete,
}

/// Seconds since the Unix epoch.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Time(pub u64);

impl Time {
    /// Current wall-clock time.
    pub fn now() -> Time {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Time(secs)
    }
}

/// Sequence number demanding the path not exist on `put`.
pub const SEQ_NOT_EXIST: i64 = -1;
/// Sequence number accepting whatever is stored.
pub const SEQ_IGNORE: i64 = 0;
/// First sequence number assigned to a new entry.
pub const SEQ_BASE: i64 = 1;

/// One contiguous segment of a file's packed data.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirBlock {
    /// Where the packed bytes live.
    pub location: Location,
    /// Byte offset of this block's cleartext within the file.
    pub offset: u64,
    /// Cleartext size in bytes.
    pub size: u64,
    /// Per-block packer data (for EE packings, the ciphertext SHA-256).
    pub packdata: Vec<u8>,
}

/// The authoritative metadata record for one name in the name space.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// The name this entry's signature covers.
    pub signed_name: PathName,
    /// The name the entry is stored under; differs from `signed_name` only
    /// when the entry was written through a link.
    pub name: PathName,
    /// User who wrote the entry.
    pub writer: UserName,
    /// Packing that produced `blocks` and `packdata`.
    pub packing: Packing,
    /// Modification time.
    pub time: Time,
    /// Monotonic per-path sequence number; see [`SEQ_BASE`] and friends.
    pub sequence: i64,
    /// What kind of entry this is.
    pub attr: Attribute,
    /// Ordered, contiguous data blocks; empty for directories and links.
    pub blocks: Vec<DirBlock>,
    /// Entry-level packer data (signatures, wrapped keys).
    pub packdata: Vec<u8>,
    /// Link target; non-empty exactly when `attr` is [`Attribute::Link`].
    pub link: PathName,
}

/// Cap on a marshaled directory entry, against decode bombs.
const MAX_DIR_ENTRY_BYTES: usize = 16 << 20;

impl DirEntry {
    /// True for directory entries.
    pub fn is_dir(&self) -> bool {
        self.attr == Attribute::Directory
    }

    /// True for link entries.
    pub fn is_link(&self) -> bool {
        self.attr == Attribute::Link
    }

    /// True for metadata-only entries.
    pub fn is_incomplete(&self) -> bool {
        self.attr == Attribute::Incomplete
    }

    /// Total cleartext size, verifying that block offsets form a contiguous
    /// partition of `[0, total)`.
    pub fn size(&self) -> Result<u64, Error> {
        let mut total: u64 = 0;
        for (i, b) in self.blocks.iter().enumerate() {
            if b.offset != total {
                return Err(Error::new("direntry.size", Kind::Invalid)
                    .path(self.name.clone())
                    .detail(format!("block {i} offset {} want {total}", b.offset)));
            }
            total = total
                .checked_add(b.size)
                .ok_or_else(|| Error::new("direntry.size", Kind::Invalid).path(self.name.clone()))?;
        }
        Ok(total)
    }

    /// Canonical binary form.
    pub fn marshal(&self) -> Result<Vec<u8>, Error> {
        encode_canonical(self).map_err(|e| Error::new("direntry.marshal", Kind::Internal).detail(e))
    }

    /// Reverse of [`DirEntry::marshal`].
    pub fn unmarshal(bytes: &[u8]) -> Result<DirEntry, Error> {
        decode_canonical_limited(bytes, MAX_DIR_ENTRY_BYTES)
            .map_err(|e| Error::new("direntry.unmarshal", Kind::Invalid).detail(e))
    }
}

/// Store metadata for a reference: caching lifetime and volatility.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refdata {
    /// The reference this data describes.
    pub reference: Reference,
    /// True if the reference's content may change over time.
    pub volatile: bool,
    /// How long the reference may be cached; zero means forever.
    pub duration: Duration,
}

/// A key server record: one user's public key and service endpoints.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// The user this record describes.
    pub name: UserName,
    /// Directory servers holding the user's tree, in order of preference.
    pub dirs: Vec<Endpoint>,
    /// Store servers the user writes to, in order of preference.
    pub stores: Vec<Endpoint>,
    /// The user's current public key.
    pub public_key: PublicKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(offset: u64, size: u64) -> DirBlock {
        DirBlock {
            offset,
            size,
            ..Default::default()
        }
    }

    #[test]
    fn size_requires_contiguity() {
        let mut e = DirEntry {
            blocks: vec![block(0, 10), block(10, 5), block(15, 0)],
            ..Default::default()
        };
        assert_eq!(e.size().unwrap(), 15);
        e.blocks[1].offset = 11;
        assert!(e.size().is_err());
    }

    #[test]
    fn direntry_marshal_roundtrip() {
        let e = DirEntry {
            signed_name: "ann@example.com/a/b".into(),
            name: "ann@example.com/a/b".into(),
            writer: "ann@example.com".into(),
            packing: Packing::Ee,
            time: Time(1_700_000_000),
            sequence: 7,
            attr: Attribute::None,
            blocks: vec![DirBlock {
                location: Location {
                    endpoint: Endpoint::inprocess(),
                    reference: "abcd".into(),
                },
                offset: 0,
                size: 4,
                packdata: vec![1, 2, 3],
            }],
            packdata: vec![9, 9],
            link: PathName::default(),
        };
        let bytes = e.marshal().unwrap();
        let back = DirEntry::unmarshal(&bytes).unwrap();
        assert_eq!(e, back);
    }

    #[test]
    fn endpoint_text_roundtrip() {
        for s in ["inprocess", "disk,/var/keeper/blobs", "remote,host:443"] {
            let ep = Endpoint::parse(s).unwrap();
            assert_eq!(ep.to_string(), s);
        }
        assert!(Endpoint::parse("carrier-pigeon,coop").is_err());
    }
}
