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

//! Access and Group files: who holds which rights where.
//!
//! ## Grammar (line-oriented)
//!
//! ```text
//! # comment
//! read: user1, user2, *@example.com, Group/friends
//! write: user3
//! list,read: user4
//! all: partner@example.com
//! ```
//!
//! Rights may be abbreviated to their first letter; `all` or `*` names every
//! right. A user item is an email, a `*@domain` wildcard, or a group path.
//! A group path without a user part is relative to the Access file's owner.
//!
//! Group files are lists of the same user items, resolved lazily through a
//! process-wide cache; nesting is allowed with bounded depth.

use crate::core::errors::{Error, Kind};
use crate::core::path::{self, Parsed};
use crate::core::types::{PathName, UserName};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, OnceLock};

/// Maximum depth of group-within-group references.
const MAX_GROUP_DEPTH: usize = 20;

/// An individual permission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Right {
    /// Read file contents.
    Read,
    /// Overwrite existing files.
    Write,
    /// List directory contents and see metadata.
    List,
    /// Create new files and directories.
    Create,
    /// Delete files and directories.
    Delete,
}

/// Every right, in canonical order.
pub const ALL_RIGHTS: [Right; 5] = [
    Right::Read,
    Right::Write,
    Right::List,
    Right::Create,
    Right::Delete,
];

fn parse_right(s: &str) -> Option<Vec<Right>> {
    match s.to_ascii_lowercase().as_str() {
        "read" | "r" => Some(vec![Right::Read]),
        "write" | "w" => Some(vec![Right::Write]),
        "list" | "l" => Some(vec![Right::List]),
        "create" | "c" => Some(vec![Right::Create]),
        "delete" | "d" => Some(vec![Right::Delete]),
        "all" | "*" => Some(ALL_RIGHTS.to_vec()),
        _ => None,
    }
}

/// One user item on a rights line.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Item {
    User(UserName),
    /// `*@domain`: any user of the domain.
    Wildcard(String),
    /// Path of a Group file.
    Group(PathName),
}

fn parse_item(owner: &UserName, s: &str) -> Result<Item, Error> {
    let err = |what: &str| {
        Error::new("access.parse", Kind::Syntax).detail(format!("{what}: {s:?}"))
    };
    if s.contains('/') {
        // A group reference; owner-relative when it has no user part.
        let full = if s.contains('@') {
            PathName::from(s)
        } else {
            path::join(format!("{}/", owner), &[s])
        };
        let parsed = path::parse(&full).map_err(|_| err("bad group path"))?;
        if !is_group_file(&parsed) {
            return Err(err("group reference outside Group/"));
        }
        return Ok(Item::Group(parsed.path().clone()));
    }
    if let Some(domain) = s.strip_prefix("*@") {
        path::parse_user(format!("any@{domain}")).map_err(|_| err("bad wildcard"))?;
        return Ok(Item::Wildcard(domain.to_ascii_lowercase()));
    }
    Ok(Item::User(path::parse_user(s).map_err(|_| err("bad user"))?))
}

/// True if `p` names an Access file: final element exactly `Access`.
pub fn is_access_file(p: &Parsed) -> bool {
    p.nelem() > 0 && p.elem(p.nelem() - 1) == "Access"
}

/// True if `p` lies under the owner's `Group/` directory.
pub fn is_group_file(p: &Parsed) -> bool {
    p.nelem() >= 2 && p.elem(0) == "Group"
}

/// Parsed contents of one Access file.
#[derive(Clone, Debug)]
pub struct Access {
    owner: UserName,
    path: PathName,
    lists: HashMap<Right, Vec<Item>>,
}

/// Outcome of a [`Access::can`] check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CanResult {
    /// The requester holds the right.
    Granted,
    /// The requester does not hold the right.
    Denied,
    /// Unresolvable without these group files; fetch, cache, retry.
    NeedGroups(Vec<PathName>),
}

impl Access {
    /// Parse the contents of the Access file stored at `name`.
    pub fn parse(name: &PathName, data: &[u8]) -> Result<Access, Error> {
        const OP: &str = "access.parse";
        let parsed = path::parse(name)?;
        if !is_access_file(&parsed) {
            return Err(Error::new(OP, Kind::Invalid)
                .path(name.clone())
                .detail("not an Access file"));
        }
        let owner = parsed.user().clone();
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::new(OP, Kind::Syntax).path(name.clone()).detail("not UTF-8"))?;

        let mut lists: HashMap<Right, Vec<Item>> = HashMap::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = match raw.split_once('#') {
                Some((before, _)) => before,
                None => raw,
            }
            .trim();
            if line.is_empty() {
                continue;
            }
            let (rights_part, users_part) = line.split_once(':').ok_or_else(|| {
                Error::new(OP, Kind::Syntax)
                    .path(name.clone())
                    .detail(format!("line {}: missing ':'", lineno + 1))
            })?;
            let mut rights = Vec::new();
            for r in rights_part.split(',') {
                let r = r.trim();
                if r.is_empty() {
                    continue;
                }
                rights.extend(parse_right(r).ok_or_else(|| {
                    Error::new(OP, Kind::Syntax)
                        .path(name.clone())
                        .detail(format!("line {}: unknown right {r:?}", lineno + 1))
                })?);
            }
            for u in users_part.split(',') {
                let u = u.trim();
                if u.is_empty() {
                    continue;
                }
                let item = parse_item(&owner, u).map_err(|e| {
                    Error::new(OP, Kind::Syntax)
                        .path(name.clone())
                        .detail(format!("line {}", lineno + 1))
                        .wrap(e)
                })?;
                for &r in &rights {
                    lists.entry(r).or_default().push(item.clone());
                }
            }
        }
        Ok(Access {
            owner,
            path: parsed.path().clone(),
            lists,
        })
    }

    /// Owner of the tree this Access file governs.
    pub fn owner(&self) -> &UserName {
        &self.owner
    }

    /// Path of the Access file itself.
    pub fn path(&self) -> &PathName {
        &self.path
    }

    /// Does `requester` hold `right` over `name`? The owner of the tree
    /// always does. `NeedGroups` asks the caller to fetch and cache group
    /// files, then retry.
    pub fn can(&self, requester: &UserName, right: Right, name: &PathName) -> Result<CanResult, Error> {
        if let Ok(p) = path::parse(name) {
            if p.user() == requester {
                return Ok(CanResult::Granted);
            }
        }
        let Some(items) = self.lists.get(&right) else {
            return Ok(CanResult::Denied);
        };
        let domain = requester
            .as_str()
            .split_once('@')
            .map(|(_, d)| d.to_ascii_lowercase());
        let mut missing = Vec::new();
        for item in items {
            match item {
                Item::User(u) => {
                    if u == requester {
                        return Ok(CanResult::Granted);
                    }
                }
                Item::Wildcard(d) => {
                    if domain.as_deref() == Some(d.as_str()) {
                        return Ok(CanResult::Granted);
                    }
                }
                Item::Group(g) => {
                    let mut visited = HashSet::new();
                    if in_group(requester, g, 0, &mut missing, &mut visited)? {
                        return Ok(CanResult::Granted);
                    }
                }
            }
        }
        if missing.is_empty() {
            Ok(CanResult::Denied)
        } else {
            missing.sort();
            missing.dedup();
            Ok(CanResult::NeedGroups(missing))
        }
    }

    /// True if any `right` line names a `*@domain` wildcard; such readers
    /// cannot be enumerated for key wrapping.
    pub fn has_wildcard(&self, right: Right) -> bool {
        self.lists
            .get(&right)
            .map(|items| items.iter().any(|i| matches!(i, Item::Wildcard(_))))
            .unwrap_or(false)
    }

    /// Every concrete user holding `right`, with groups expanded through
    /// `load` (which fetches a group file's contents). The owner is always
    /// included. Wildcards are skipped; see [`Access::has_wildcard`].
    pub fn users_with_right(
        &self,
        right: Right,
        load: &mut dyn FnMut(&PathName) -> Result<Vec<u8>, Error>,
    ) -> Result<Vec<UserName>, Error> {
        let mut out: BTreeSet<UserName> = BTreeSet::new();
        out.insert(self.owner.clone());
        if let Some(items) = self.lists.get(&right) {
            let mut visited = HashSet::new();
            for item in items {
                expand_item(item, load, 0, &mut visited, &mut out)?;
            }
        }
        Ok(out.into_iter().collect())
    }
}

fn expand_item(
    item: &Item,
    load: &mut dyn FnMut(&PathName) -> Result<Vec<u8>, Error>,
    depth: usize,
    visited: &mut HashSet<PathName>,
    out: &mut BTreeSet<UserName>,
) -> Result<(), Error> {
    match item {
        Item::User(u) => {
            out.insert(u.clone());
        }
        Item::Wildcard(_) => {}
        Item::Group(g) => {
            if depth >= MAX_GROUP_DEPTH {
                return Err(Error::new("access.groups", Kind::Invalid)
                    .path(g.clone())
                    .detail("group nesting too deep"));
            }
            if !visited.insert(g.clone()) {
                return Ok(());
            }
            if groups().get(g).is_none() {
                let data = load(g)?;
                add_group(g, &data)?;
            }
            let items = groups().get(g).cloned().unwrap_or_default();
            for it in &items {
                expand_item(it, load, depth + 1, visited, out)?;
            }
        }
    }
    Ok(())
}

fn in_group(
    requester: &UserName,
    group: &PathName,
    depth: usize,
    missing: &mut Vec<PathName>,
    visited: &mut HashSet<PathName>,
) -> Result<bool, Error> {
    if depth >= MAX_GROUP_DEPTH {
        return Err(Error::new("access.groups", Kind::Invalid)
            .path(group.clone())
            .detail("group nesting too deep"));
    }
    if !visited.insert(group.clone()) {
        return Ok(false);
    }
    let items = match groups().get(group) {
        Some(items) => items.clone(),
        None => {
            missing.push(group.clone());
            return Ok(false);
        }
    };
    for item in &items {
        match item {
            Item::User(u) => {
                if u == requester {
                    return Ok(true);
                }
            }
            Item::Wildcard(d) => {
                if requester
                    .as_str()
                    .split_once('@')
                    .map(|(_, rd)| rd.eq_ignore_ascii_case(d))
                    .unwrap_or(false)
                {
                    return Ok(true);
                }
            }
            Item::Group(g) => {
                if in_group(requester, g, depth + 1, missing, visited)? {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

fn groups() -> std::sync::MutexGuard<'static, HashMap<PathName, Vec<Item>>> {
    static GROUPS: OnceLock<Mutex<HashMap<PathName, Vec<Item>>>> = OnceLock::new();
    let m = GROUPS.get_or_init(|| Mutex::new(HashMap::new()));
    // The cache holds no invariants a panicking writer could break.
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn parse_group_items(name: &PathName, data: &[u8]) -> Result<(PathName, Vec<Item>), Error> {
    const OP: &str = "access.parse_group";
    let parsed = path::parse(name)?;
    if !is_group_file(&parsed) {
        return Err(Error::new(OP, Kind::Invalid)
            .path(name.clone())
            .detail("not a Group file"));
    }
    let owner = parsed.user().clone();
    let text = std::str::from_utf8(data)
        .map_err(|_| Error::new(OP, Kind::Syntax).path(name.clone()).detail("not UTF-8"))?;
    let mut items = Vec::new();
    for raw in text.lines() {
        let line = match raw.split_once('#') {
            Some((before, _)) => before,
            None => raw,
        };
        for piece in line.split([',', ' ', '\t']) {
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            items.push(
                parse_item(&owner, piece)
                    .map_err(|e| Error::new(OP, Kind::Syntax).path(name.clone()).wrap(e))?,
            );
        }
    }
    Ok((parsed.path().clone(), items))
}

/// Parse and cache the contents of the Group file stored at `name`.
/// Items are separated by commas, whitespace, or newlines; `#` comments.
pub fn add_group(name: &PathName, data: &[u8]) -> Result<(), Error> {
    let (key, items) = parse_group_items(name, data)?;
    groups().insert(key, items);
    Ok(())
}

/// Check that `data` is a well-formed Group file for `name` without
/// touching the cache.
pub fn validate_group(name: &PathName, data: &[u8]) -> Result<(), Error> {
    parse_group_items(name, data).map(|_| ())
}

/// Drop a cached group. Returns `NotExist` if the group was never cached;
/// callers invalidating on writes ignore that outcome.
pub fn remove_group(name: &PathName) -> Result<(), Error> {
    let key = path::clean(name);
    match groups().remove(&key) {
        Some(_) => Ok(()),
        None => Err(Error::new("access.remove_group", Kind::NotExist).path(name.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pn(s: &str) -> PathName {
        PathName::from(s)
    }

    fn un(s: &str) -> UserName {
        UserName::from(s)
    }

    #[test]
    fn parse_and_check_simple_rights() {
        let a = Access::parse(
            &pn("ann@example.com/photos/Access"),
            b"# holiday shots\nread: bob@example.com, *@corp.example\nwrite,delete: carl@example.com\n",
        )
        .unwrap();
        assert_eq!(a.owner().as_str(), "ann@example.com");

        let target = pn("ann@example.com/photos/1.jpg");
        let can = |u: &str, r: Right| a.can(&un(u), r, &target).unwrap();
        assert_eq!(can("bob@example.com", Right::Read), CanResult::Granted);
        assert_eq!(can("bob@example.com", Right::Write), CanResult::Denied);
        assert_eq!(can("eve@corp.example", Right::Read), CanResult::Granted);
        assert_eq!(can("carl@example.com", Right::Delete), CanResult::Granted);
        // Owner of the tree holds everything.
        assert_eq!(can("ann@example.com", Right::Write), CanResult::Granted);
    }

    #[test]
    fn abbreviations_and_star() {
        let a = Access::parse(
            &pn("ann@example.com/Access"),
            b"l,r: bob@example.com\n*: root@example.com\n",
        )
        .unwrap();
        let t = pn("ann@example.com/f");
        assert_eq!(a.can(&un("bob@example.com"), Right::List, &t).unwrap(), CanResult::Granted);
        assert_eq!(a.can(&un("bob@example.com"), Right::Create, &t).unwrap(), CanResult::Denied);
        for r in ALL_RIGHTS {
            assert_eq!(a.can(&un("root@example.com"), r, &t).unwrap(), CanResult::Granted);
        }
    }

    #[test]
    fn groups_resolve_lazily() {
        let a = Access::parse(
            &pn("ann@example.com/Access"),
            b"read: Group/friends\n",
        )
        .unwrap();
        let t = pn("ann@example.com/f");
        let g = pn("ann@example.com/Group/friends");
        let _ = remove_group(&g);

        match a.can(&un("bob@example.com"), Right::Read, &t).unwrap() {
            CanResult::NeedGroups(need) => assert_eq!(need, vec![g.clone()]),
            other => panic!("want NeedGroups, got {other:?}"),
        }

        add_group(&g, b"bob@example.com # the one from work\n").unwrap();
        assert_eq!(
            a.can(&un("bob@example.com"), Right::Read, &t).unwrap(),
            CanResult::Granted
        );
        assert_eq!(
            a.can(&un("eve@example.com"), Right::Read, &t).unwrap(),
            CanResult::Denied
        );
        remove_group(&g).unwrap();
        assert!(remove_group(&g).unwrap_err().is(Kind::NotExist));
    }

    #[test]
    fn nested_groups_and_cycles_terminate() {
        let a = Access::parse(&pn("ann@example.com/Access"), b"read: Group/outer\n").unwrap();
        let outer = pn("ann@example.com/Group/outer");
        let inner = pn("ann@example.com/Group/inner");
        add_group(&outer, b"Group/inner\n").unwrap();
        add_group(&inner, b"Group/outer, bob@example.com\n").unwrap();
        let t = pn("ann@example.com/f");
        assert_eq!(
            a.can(&un("bob@example.com"), Right::Read, &t).unwrap(),
            CanResult::Granted
        );
        let _ = remove_group(&outer);
        let _ = remove_group(&inner);
    }

    #[test]
    fn users_with_right_expands_groups() {
        let a = Access::parse(
            &pn("ann@example.com/Access"),
            b"read: bob@example.com, Group/team\n",
        )
        .unwrap();
        let team = pn("ann@example.com/Group/team");
        let _ = remove_group(&team);
        let mut load = |g: &PathName| -> Result<Vec<u8>, Error> {
            assert_eq!(g, &team);
            Ok(b"carl@example.com dora@example.com".to_vec())
        };
        let users = a.users_with_right(Right::Read, &mut load).unwrap();
        let names: Vec<&str> = users.iter().map(|u| u.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "ann@example.com",
                "bob@example.com",
                "carl@example.com",
                "dora@example.com"
            ]
        );
        let _ = remove_group(&team);
    }

    #[test]
    fn rejects_bad_lines() {
        let p = pn("ann@example.com/Access");
        assert!(Access::parse(&p, b"read bob@example.com\n").is_err());
        assert!(Access::parse(&p, b"peek: bob@example.com\n").is_err());
        assert!(Access::parse(&p, b"read: not-an-email\n").is_err());
        assert!(Access::parse(&pn("ann@example.com/notaccess"), b"").is_err());
    }

    #[test]
    fn access_and_group_predicates() {
        assert!(is_access_file(&path::parse("a@b.com/x/Access").unwrap()));
        assert!(!is_access_file(&path::parse("a@b.com/x/access").unwrap()));
        assert!(!is_access_file(&path::parse("a@b.com").unwrap()));
        assert!(is_group_file(&path::parse("a@b.com/Group/g").unwrap()));
        assert!(!is_group_file(&path::parse("a@b.com/Group").unwrap()));
        assert!(!is_group_file(&path::parse("a@b.com/g/Group/x").unwrap()));
    }
}
