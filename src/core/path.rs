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

//! Pure functions over path names.
//!
//! A path is `user@domain/elem1/elem2/…`. Parsing validates the user,
//! lowercases the domain, and cleans the file part: empty elements and `.`
//! are dropped, `..` pops one element and is an error if it would escape the
//! root. The canonical form has no trailing slash except on the root
//! `user@domain/`.

use crate::core::errors::{Error, Kind};
use crate::core::types::{PathName, UserName};

/// Longest accepted path, in bytes, after cleaning.
const MAX_PATH_BYTES: usize = 4096;

/// A parsed, canonicalized path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Parsed {
    user: UserName,
    elems: Vec<String>,
    path: PathName,
}

impl Parsed {
    /// The owner of the path.
    pub fn user(&self) -> &UserName {
        &self.user
    }

    /// Number of path elements below the root.
    pub fn nelem(&self) -> usize {
        self.elems.len()
    }

    /// The `i`th element; panics if out of range, like slice indexing.
    pub fn elem(&self, i: usize) -> &str {
        &self.elems[i]
    }

    /// The canonical path string.
    pub fn path(&self) -> &PathName {
        &self.path
    }

    /// True if this is the user root `user@domain/`.
    pub fn is_root(&self) -> bool {
        self.elems.is_empty()
    }

    /// Everything after the user name, without a leading slash; empty for
    /// the root.
    pub fn file_path(&self) -> String {
        self.elems.join("/")
    }

    /// The ancestor keeping only the first `n` elements.
    pub fn first(&self, n: usize) -> Parsed {
        let n = n.min(self.elems.len());
        let elems: Vec<String> = self.elems[..n].to_vec();
        let path = rebuild(&self.user, &elems);
        Parsed {
            user: self.user.clone(),
            elems,
            path,
        }
    }

    /// The parent with the trailing `n` elements removed; stops at the root.
    pub fn drop_n(&self, n: usize) -> Parsed {
        self.first(self.elems.len().saturating_sub(n))
    }

    /// The name of the final element, or the user name at the root.
    pub fn basename(&self) -> &str {
        match self.elems.last() {
            Some(e) => e,
            None => self.user.as_str(),
        }
    }
}

fn rebuild(user: &UserName, elems: &[String]) -> PathName {
    let mut s = String::with_capacity(user.as_str().len() + 1 + elems.iter().map(|e| e.len() + 1).sum::<usize>());
    s.push_str(user.as_str());
    s.push('/');
    for (i, e) in elems.iter().enumerate() {
        if i > 0 {
            s.push('/');
        }
        s.push_str(e);
    }
    PathName::from(s)
}

/// Split a user name into local part and domain, validating the shape:
/// exactly one `@` with a non-empty local part and a non-empty domain.
/// The domain is returned lowercased.
pub fn user_and_domain(user: impl AsRef<str>) -> Result<(String, String), Error> {
    let user = user.as_ref();
    let err = || Error::new("path.user", Kind::Syntax).user(user);
    let (local, domain) = user.split_once('@').ok_or_else(err)?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(err());
    }
    if local.contains('/') || local.contains(char::is_whitespace) {
        return Err(err());
    }
    if domain.contains('/') || domain.contains(char::is_whitespace) {
        return Err(err());
    }
    Ok((local.to_string(), domain.to_ascii_lowercase()))
}

/// Parse and canonicalize a user name.
pub fn parse_user(user: impl AsRef<str>) -> Result<UserName, Error> {
    let (local, domain) = user_and_domain(&user)?;
    Ok(UserName::from(format!("{local}@{domain}")))
}

/// Parse `name` into its canonical form.
///
/// Fails with `Syntax` for a malformed user and `Invalid` for paths that
/// cannot be cleaned without escaping the root or that exceed the length cap.
pub fn parse(name: impl AsRef<str>) -> Result<Parsed, Error> {
    let name = name.as_ref();
    let (first, rest) = match name.split_once('/') {
        Some((f, r)) => (f, r),
        None => (name, ""),
    };
    let user = parse_user(first).map_err(|e| e.path(name))?;

    let mut elems: Vec<String> = Vec::new();
    for elem in rest.split('/') {
        match elem {
            "" | "." => continue,
            ".." => {
                if elems.pop().is_none() {
                    return Err(Error::new("path.parse", Kind::Invalid)
                        .path(name)
                        .detail("path escapes the user root"));
                }
            }
            _ => elems.push(elem.to_string()),
        }
    }
    let path = rebuild(&user, &elems);
    if path.as_str().len() > MAX_PATH_BYTES {
        return Err(Error::new("path.parse", Kind::Invalid)
            .path(name)
            .detail("path too long"));
    }
    Ok(Parsed { user, elems, path })
}

/// Lexically clean `name` without validating the user part. `..` that would
/// escape the root is clamped there. For any name that [`parse`] accepts,
/// `parse(clean(name)) == parse(name)`.
pub fn clean(name: impl AsRef<str>) -> PathName {
    let name = name.as_ref();
    let (first, rest) = match name.split_once('/') {
        Some((f, r)) => (f, r),
        None => (name, ""),
    };
    let mut elems: Vec<&str> = Vec::new();
    for elem in rest.split('/') {
        match elem {
            "" | "." => continue,
            ".." => {
                elems.pop();
            }
            _ => elems.push(elem),
        }
    }
    let mut s = String::with_capacity(name.len() + 1);
    s.push_str(first);
    s.push('/');
    s.push_str(&elems.join("/"));
    PathName::from(s)
}

/// Join path elements onto `base` and clean the result.
pub fn join(base: impl AsRef<str>, elems: &[&str]) -> PathName {
    let mut s = base.as_ref().to_string();
    for e in elems {
        s.push('/');
        s.push_str(e);
    }
    clean(s)
}

/// Remove the trailing `n` elements from `name`, stopping at the root.
pub fn drop_path(name: impl AsRef<str>, n: usize) -> Result<PathName, Error> {
    let p = parse(name)?;
    Ok(p.drop_n(n).path().clone())
}

/// True if `name` parses and denotes a user root.
pub fn is_root(name: impl AsRef<str>) -> bool {
    matches!(parse(name), Ok(p) if p.is_root())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_canonicalizes() {
        let p = parse("ann@Example.COM//photos/./2016/../2017/beach.jpg").unwrap();
        assert_eq!(p.user().as_str(), "ann@example.com");
        assert_eq!(p.path().as_str(), "ann@example.com/photos/2017/beach.jpg");
        assert_eq!(p.nelem(), 3);
        assert_eq!(p.elem(0), "photos");
        assert_eq!(p.basename(), "beach.jpg");
        assert_eq!(p.file_path(), "photos/2017/beach.jpg");
    }

    #[test]
    fn root_has_trailing_slash() {
        let p = parse("ann@example.com").unwrap();
        assert!(p.is_root());
        assert_eq!(p.path().as_str(), "ann@example.com/");
        assert_eq!(p.file_path(), "");
        assert!(is_root("ann@example.com/"));
        assert!(!is_root("ann@example.com/a"));
    }

    #[test]
    fn dotdot_cannot_escape_root() {
        assert!(parse("ann@example.com/..").is_err());
        assert!(parse("ann@example.com/a/../..").is_err());
        // clean clamps instead of failing
        assert_eq!(clean("ann@example.com/a/../..").as_str(), "ann@example.com/");
    }

    #[test]
    fn bad_users_rejected() {
        for bad in [
            "annexample.com/x",
            "@example.com/x",
            "ann@/x",
            "ann@example@com/x",
            "a nn@example.com/x",
        ] {
            let e = parse(bad).unwrap_err();
            assert!(e.is(Kind::Syntax), "want syntax error for {bad:?}");
        }
        // Any non-empty domain is acceptable; shape beyond that is not
        // this layer's business.
        assert!(parse("ann@examplecom/x").is_ok());
    }

    #[test]
    fn first_and_drop() {
        let p = parse("ann@example.com/a/b/c").unwrap();
        assert_eq!(p.first(2).path().as_str(), "ann@example.com/a/b");
        assert_eq!(p.drop_n(1).path().as_str(), "ann@example.com/a/b");
        assert_eq!(p.drop_n(9).path().as_str(), "ann@example.com/");
        assert_eq!(
            drop_path("ann@example.com/a/b/c", 2).unwrap().as_str(),
            "ann@example.com/a"
        );
    }

    #[test]
    fn join_cleans() {
        assert_eq!(
            join("ann@example.com/a", &["b", "..", "c"]).as_str(),
            "ann@example.com/a/c"
        );
    }

    #[test]
    fn length_cap() {
        let long = format!("ann@example.com/{}", "x/".repeat(4000));
        assert!(parse(long).is_err());
    }
}
