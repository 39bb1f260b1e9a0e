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

//! Structured errors carrying operation, path, user, and a kind taxonomy.
//!
//! Callers dispatch on [`Kind`], never on message text. Lower layers annotate
//! their own `op`, `path`, and `kind`, wrap the inner error, and return; the
//! string form suppresses empty fields and indents nested errors.

use crate::core::types::{PathName, UserName};
use std::fmt;

/// Classification of an error, the only part callers should match on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    /// Unclassified; when wrapping, the inner kind shows through.
    Other,
    /// Invalid operation for this type of item.
    Invalid,
    /// Permission denied.
    Permission,
    /// Ill-formed argument, such as an invalid path or user name.
    Syntax,
    /// External I/O failure, such as a file system problem.
    Io,
    /// Item already exists.
    Exist,
    /// Item does not exist.
    NotExist,
    /// Item is a directory.
    IsDir,
    /// Item is not a directory.
    NotDir,
    /// Link target cannot be resolved, or too many links followed.
    BrokenLink,
    /// Internal inconsistency; a bug.
    Internal,
    /// Temporary failure; safe to retry idempotent operations.
    Transient,
    /// Operation not supported by this server or packing.
    Unsupported,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::Other => "other error",
            Kind::Invalid => "invalid operation",
            Kind::Permission => "permission denied",
            Kind::Syntax => "syntax error",
            Kind::Io => "I/O error",
            Kind::Exist => "item already exists",
            Kind::NotExist => "item does not exist",
            Kind::IsDir => "item is a directory",
            Kind::NotDir => "item is not a directory",
            Kind::BrokenLink => "link error",
            Kind::Internal => "internal error",
            Kind::Transient => "transient error",
            Kind::Unsupported => "unsupported operation",
        };
        f.write_str(s)
    }
}

/// Structured error record.
///
/// Construction is fluent: `Error::new("client.get", Kind::NotExist).path(name)`.
#[derive(Debug)]
pub struct Error {
    /// Operation being performed, e.g. `"dir.lookup"`.
    pub op: &'static str,
    /// Path of the item being operated on, if any.
    pub path: Option<PathName>,
    /// User involved, if any.
    pub user: Option<UserName>,
    /// Classification.
    pub kind: Kind,
    /// Leaf cause rendered as text (for foreign errors such as I/O).
    pub detail: Option<String>,
    /// Nested structured error, if this one wraps another.
    pub source: Option<Box<Error>>,
}

impl Error {
    /// Create an error for `op` with the given kind.
    pub fn new(op: &'static str, kind: Kind) -> Self {
        Error {
            op,
            path: None,
            user: None,
            kind,
            detail: None,
            source: None,
        }
    }

    /// Attach the path being operated on.
    pub fn path(mut self, p: impl Into<PathName>) -> Self {
        self.path = Some(p.into());
        self
    }

    /// Attach the user involved.
    pub fn user(mut self, u: impl Into<UserName>) -> Self {
        self.user = Some(u.into());
        self
    }

    /// Attach a leaf cause rendered as text.
    pub fn detail(mut self, d: impl ToString) -> Self {
        self.detail = Some(d.to_string());
        self
    }

    /// Wrap an inner structured error.
    pub fn wrap(mut self, inner: Error) -> Self {
        self.source = Some(Box::new(inner));
        self
    }

    /// Effective kind: the first non-`Other` kind along the chain.
    pub fn kind(&self) -> Kind {
        let mut e = self;
        loop {
            if e.kind != Kind::Other {
                return e.kind;
            }
            match &e.source {
                Some(inner) => e = inner,
                None => return Kind::Other,
            }
        }
    }

    /// True if the effective kind of the chain is `kind`.
    pub fn is(&self, kind: Kind) -> bool {
        self.kind() == kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = false;
        let mut field = |f: &mut fmt::Formatter<'_>, s: &dyn fmt::Display| -> fmt::Result {
            if sep {
                f.write_str(": ")?;
            }
            sep = true;
            write!(f, "{s}")
        };
        if !self.op.is_empty() {
            field(f, &self.op)?;
        }
        if let Some(p) = &self.path {
            field(f, p)?;
        }
        if let Some(u) = &self.user {
            field(f, u)?;
        }
        if self.kind != Kind::Other {
            field(f, &self.kind)?;
        }
        if let Some(d) = &self.detail {
            field(f, d)?;
        }
        if let Some(inner) = &self.source {
            if sep {
                f.write_str(":")?;
            }
            // Indent nested errors one level per wrap.
            let nested = inner.to_string().replace('\n', "\n\t");
            write!(f, "\n\t{nested}")?;
        } else if !sep {
            f.write_str("no error")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_shows_through_other() {
        let inner = Error::new("store.get", Kind::NotExist);
        let outer = Error::new("client.get", Kind::Other).wrap(inner);
        assert_eq!(outer.kind(), Kind::NotExist);
        assert!(outer.is(Kind::NotExist));
    }

    #[test]
    fn display_suppresses_empty_fields() {
        let e = Error::new("dir.lookup", Kind::Permission).path("ann@example.com/private");
        let s = e.to_string();
        assert_eq!(s, "dir.lookup: ann@example.com/private: permission denied");
    }

    #[test]
    fn display_indents_nested() {
        let inner = Error::new("store.get", Kind::Io).detail("connection reset");
        let outer = Error::new("client.get", Kind::Other)
            .path("ann@example.com/f")
            .wrap(inner);
        let s = outer.to_string();
        assert!(s.starts_with("client.get: ann@example.com/f:"));
        assert!(s.contains("\n\tstore.get: I/O error: connection reset"));
    }
}
