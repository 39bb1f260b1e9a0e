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

//! In-process directory server: one shared tree for every user in the
//! process, with access enforcement, sequence numbers, globbing, and a
//! watch log.
//!
//! A caller lacking even list rights is told `NotExist`, so the existence
//! of private paths does not leak.

use crate::core::access::{self, Access, CanResult, Right};
use crate::core::config::Config;
use crate::core::errors::{Error, Kind};
use crate::core::path::{self, Parsed};
use crate::core::types::{
    Attribute, DirEntry, Endpoint, Packing, PathName, UserName, SEQ_BASE, SEQ_IGNORE,
    SEQ_NOT_EXIST,
};
use crate::service::{bind, Blob, DirError, DirResult, DirServer, Event, Service, StoreServer};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, OnceLock};
use tracing::{debug, warn};

struct LogRecord {
    entry: DirEntry,
    delete: bool,
}

struct Watcher {
    root: PathName,
    sender: mpsc::Sender<Event>,
    done: Arc<AtomicBool>,
}

#[derive(Default)]
struct Tree {
    entries: HashMap<PathName, DirEntry>,
    children: HashMap<PathName, BTreeSet<String>>,
    log: Vec<LogRecord>,
    watchers: Vec<Watcher>,
}

fn tree() -> MutexGuard<'static, Tree> {
    static TREE: OnceLock<Mutex<Tree>> = OnceLock::new();
    let m = TREE.get_or_init(|| Mutex::new(Tree::default()));
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Handle onto the process-wide tree, bound to the dialing user.
pub struct InProcessDir {
    cfg: Config,
}

/// Dial the process-wide directory server as `cfg`'s user.
pub fn new(cfg: &Config) -> Arc<dyn DirServer> {
    Arc::new(InProcessDir { cfg: cfg.clone() })
}

fn not_exist(op: &'static str, name: &PathName) -> DirError {
    DirError::Other(Error::new(op, Kind::NotExist).path(name.clone()))
}

fn under(name: &PathName, root: &PathName) -> bool {
    let r = root.as_str();
    let n = name.as_str();
    if let Some(stripped) = r.strip_suffix('/') {
        return n.starts_with(r) || n == stripped;
    }
    n == r || (n.starts_with(r) && n.as_bytes().get(r.len()) == Some(&b'/'))
}

/// Strip what an unauthorized-but-listing caller may not see.
fn withhold(mut e: DirEntry) -> DirEntry {
    if !e.is_dir() {
        e.attr = Attribute::Incomplete;
    }
    e.blocks.clear();
    e.packdata.clear();
    e
}

impl InProcessDir {
    fn user(&self) -> &UserName {
        self.cfg.user_name()
    }

    /// Every proper ancestor must exist and be a plain directory; a link on
    /// the way produces the follow-link sentinel.
    fn walk_ancestors(&self, tree: &Tree, parsed: &Parsed, op: &'static str) -> DirResult<()> {
        for i in 0..parsed.nelem() {
            let prefix = parsed.first(i);
            let Some(e) = tree.entries.get(prefix.path()) else {
                return Err(not_exist(op, parsed.path()));
            };
            if e.is_link() {
                return Err(DirError::FollowLink(Box::new(e.clone())));
            }
            if !e.is_dir() {
                return Err(DirError::Other(
                    Error::new(op, Kind::NotDir).path(prefix.path().clone()),
                ));
            }
        }
        Ok(())
    }

    /// Read the cleartext contents of an Access or Group entry from its
    /// store. Only world-readable packings qualify.
    fn read_contents(&self, entry: &DirEntry) -> Result<Vec<u8>, Error> {
        const OP: &str = "dir.read_access";
        match entry.packing {
            Packing::Plain | Packing::EeIntegrity => {}
            _ => {
                return Err(Error::new(OP, Kind::Invalid)
                    .path(entry.name.clone())
                    .detail("access file is not in a readable packing"))
            }
        }
        let mut out = Vec::new();
        for b in &entry.blocks {
            let store = bind::store_server(&self.cfg, &b.location.endpoint)?;
            let got = store.get(&b.location.reference);
            bind::release_store_server(&b.location.endpoint);
            match got? {
                (Blob::Bytes(bytes), _) => out.extend_from_slice(&bytes),
                (Blob::Redirect(_), _) => {
                    return Err(Error::new(OP, Kind::Io)
                        .path(entry.name.clone())
                        .detail("access block redirected"))
                }
            }
        }
        Ok(out)
    }

    /// Path of the Access file governing `parsed`, if any.
    fn which_access_path(&self, tree: &Tree, parsed: &Parsed) -> Option<PathName> {
        let mut start = parsed.nelem();
        let is_dir = tree
            .entries
            .get(parsed.path())
            .map(|e| e.is_dir())
            .unwrap_or(false);
        // A file is governed by its directory; a directory by itself.
        if !is_dir && start > 0 {
            start -= 1;
        }
        for i in (0..=start).rev() {
            let candidate = path::join(parsed.first(i).path(), &["Access"]);
            if tree.entries.contains_key(&candidate) {
                return Some(candidate);
            }
        }
        None
    }

    fn governing_access(&self, tree: &Tree, parsed: &Parsed) -> Result<Option<Access>, Error> {
        let Some(access_path) = self.which_access_path(tree, parsed) else {
            return Ok(None);
        };
        let entry = tree
            .entries
            .get(&access_path)
            .cloned()
            .ok_or_else(|| Error::new("dir.access", Kind::Internal).path(access_path.clone()))?;
        let data = self.read_contents(&entry)?;
        Ok(Some(Access::parse(&access_path, &data)?))
    }

    /// Load a group file into the process cache, caching it empty when the
    /// file cannot be read so resolution stays terminating.
    fn load_group(&self, tree: &Tree, group: &PathName) {
        let loaded = tree
            .entries
            .get(group)
            .ok_or_else(|| Error::new("dir.group", Kind::NotExist).path(group.clone()))
            .and_then(|e| self.read_contents(e))
            .and_then(|data| access::add_group(group, &data));
        if let Err(e) = loaded {
            warn!(group = %group, error = %e, "group file unavailable; caching empty");
            let _ = access::add_group(group, b"");
        }
    }

    fn check_right(&self, tree: &Tree, parsed: &Parsed, right: Right) -> Result<bool, Error> {
        if parsed.user() == self.user() {
            return Ok(true);
        }
        let Some(governing) = self.governing_access(tree, parsed)? else {
            return Ok(false);
        };
        // Group resolution is lazy; bound the fetch-and-retry loop.
        for _ in 0..MAX_GROUP_FETCH_ROUNDS {
            match governing.can(self.user(), right, parsed.path())? {
                CanResult::Granted => return Ok(true),
                CanResult::Denied => return Ok(false),
                CanResult::NeedGroups(needed) => {
                    for g in &needed {
                        self.load_group(tree, g);
                    }
                }
            }
        }
        Ok(false)
    }

    fn any_right(&self, tree: &Tree, parsed: &Parsed) -> Result<bool, Error> {
        for r in access::ALL_RIGHTS {
            if self.check_right(tree, parsed, r)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn append_event(&self, tree: &mut Tree, entry: DirEntry, delete: bool) {
        let order = tree.log.len() as i64;
        tree.log.push(LogRecord {
            entry: entry.clone(),
            delete,
        });
        tree.watchers.retain(|w| {
            if w.done.load(Ordering::Relaxed) {
                return false;
            }
            if !under(&entry.name, &w.root) {
                return true;
            }
            w.sender
                .send(Event {
                    entry: Some(entry.clone()),
                    order,
                    delete,
                    error: None,
                })
                .is_ok()
        });
    }
}

const MAX_GROUP_FETCH_ROUNDS: usize = 10;

impl Service for InProcessDir {
    fn endpoint(&self) -> Endpoint {
        Endpoint::inprocess()
    }
}

impl DirServer for InProcessDir {
    fn lookup(&self, name: &PathName) -> DirResult<DirEntry> {
        const OP: &str = "dir.lookup";
        let parsed = path::parse(name)?;
        let tree = tree();
        self.walk_ancestors(&tree, &parsed, OP)?;
        let Some(entry) = tree.entries.get(parsed.path()).cloned() else {
            return Err(not_exist(OP, parsed.path()));
        };
        if self.check_right(&tree, &parsed, Right::Read)? {
            if entry.is_link() {
                return Err(DirError::FollowLink(Box::new(entry)));
            }
            return Ok(entry);
        }
        if self.check_right(&tree, &parsed, Right::List)? {
            if entry.is_link() {
                return Err(DirError::FollowLink(Box::new(entry)));
            }
            return Ok(withhold(entry));
        }
        Err(not_exist(OP, parsed.path()))
    }

    fn put(&self, entry: &DirEntry) -> DirResult<DirEntry> {
        const OP: &str = "dir.put";
        let parsed = path::parse(&entry.name)?;
        if &entry.writer != self.user() {
            return Err(DirError::Other(
                Error::new(OP, Kind::Invalid)
                    .path(parsed.path().clone())
                    .user(self.user().clone())
                    .detail("writer does not match dialing user"),
            ));
        }
        // Shape checks before touching the tree.
        match entry.attr {
            Attribute::Directory | Attribute::Link => {
                if !entry.blocks.is_empty() {
                    return Err(DirError::Other(
                        Error::new(OP, Kind::Invalid)
                            .path(parsed.path().clone())
                            .detail("directory or link entry with blocks"),
                    ));
                }
            }
            Attribute::None => {}
            Attribute::Incomplete => {
                return Err(DirError::Other(
                    Error::new(OP, Kind::Invalid)
                        .path(parsed.path().clone())
                        .detail("cannot store an incomplete entry"),
                ))
            }
        }
        if entry.is_link() != !entry.link.is_empty() {
            return Err(DirError::Other(
                Error::new(OP, Kind::Invalid)
                    .path(parsed.path().clone())
                    .detail("link attribute and link target disagree"),
            ));
        }
        if access::is_access_file(&parsed) || access::is_group_file(&parsed) {
            if !entry.is_dir() && !matches!(entry.packing, Packing::Plain | Packing::EeIntegrity) {
                return Err(DirError::Other(
                    Error::new(OP, Kind::Invalid)
                        .path(parsed.path().clone())
                        .detail("Access and Group files need a world-readable packing"),
                ));
            }
        }

        let mut tree = tree();
        if parsed.is_root() {
            if parsed.user() != self.user() {
                return Err(not_exist(OP, parsed.path()));
            }
            if !entry.is_dir() {
                return Err(DirError::Other(
                    Error::new(OP, Kind::NotDir)
                        .path(parsed.path().clone())
                        .detail("root must be a directory"),
                ));
            }
        } else {
            self.walk_ancestors(&tree, &parsed, OP)?;
        }

        let stored = tree.entries.get(parsed.path()).cloned();
        let needed = if stored.is_some() {
            Right::Write
        } else {
            Right::Create
        };
        if !self.check_right(&tree, &parsed, needed)? {
            // Conceal or deny, depending on whether the caller may list.
            if self.check_right(&tree, &parsed, Right::List)? {
                return Err(DirError::Other(
                    Error::new(OP, Kind::Permission)
                        .path(parsed.path().clone())
                        .user(self.user().clone()),
                ));
            }
            return Err(not_exist(OP, parsed.path()));
        }

        let sequence = match &stored {
            None => {
                if entry.sequence > SEQ_IGNORE {
                    return Err(DirError::Other(
                        Error::new(OP, Kind::Invalid)
                            .path(parsed.path().clone())
                            .detail("sequence number mismatch"),
                    ));
                }
                SEQ_BASE
            }
            Some(old) => {
                if entry.sequence == SEQ_NOT_EXIST {
                    return Err(DirError::Other(
                        Error::new(OP, Kind::Exist).path(parsed.path().clone()),
                    ));
                }
                if old.is_dir() && !entry.is_dir() {
                    return Err(DirError::Other(
                        Error::new(OP, Kind::IsDir).path(parsed.path().clone()),
                    ));
                }
                if !old.is_dir() && entry.is_dir() {
                    return Err(DirError::Other(
                        Error::new(OP, Kind::Exist)
                            .path(parsed.path().clone())
                            .detail("file exists where directory is wanted"),
                    ));
                }
                if entry.sequence > SEQ_IGNORE && entry.sequence != old.sequence {
                    return Err(DirError::Other(
                        Error::new(OP, Kind::Invalid)
                            .path(parsed.path().clone())
                            .detail("sequence number mismatch"),
                    ));
                }
                old.sequence + 1
            }
        };

        let mut canonical = entry.clone();
        canonical.name = parsed.path().clone();
        canonical.sequence = sequence;
        tree.entries
            .insert(parsed.path().clone(), canonical.clone());
        if canonical.is_dir() {
            tree.children.entry(parsed.path().clone()).or_default();
        }
        if !parsed.is_root() {
            tree.children
                .entry(parsed.drop_n(1).path().clone())
                .or_default()
                .insert(parsed.basename().to_string());
        }

        // A rewritten Group file invalidates its cache entry; absence from
        // the cache is fine.
        if access::is_group_file(&parsed) {
            let _ = access::remove_group(parsed.path());
        }

        debug!(name = %canonical.name, sequence, "dir entry stored");
        self.append_event(&mut tree, canonical.clone(), false);
        Ok(canonical)
    }

    fn delete(&self, name: &PathName) -> DirResult<DirEntry> {
        const OP: &str = "dir.delete";
        let parsed = path::parse(name)?;
        let mut tree = tree();
        self.walk_ancestors(&tree, &parsed, OP)?;
        let Some(entry) = tree.entries.get(parsed.path()).cloned() else {
            return Err(not_exist(OP, parsed.path()));
        };
        if !self.check_right(&tree, &parsed, Right::Delete)? {
            if self.check_right(&tree, &parsed, Right::List)? {
                return Err(DirError::Other(
                    Error::new(OP, Kind::Permission)
                        .path(parsed.path().clone())
                        .user(self.user().clone()),
                ));
            }
            return Err(not_exist(OP, parsed.path()));
        }
        if entry.is_dir() {
            let empty = tree
                .children
                .get(parsed.path())
                .map(|c| c.is_empty())
                .unwrap_or(true);
            if !empty {
                return Err(DirError::Other(
                    Error::new(OP, Kind::Invalid)
                        .path(parsed.path().clone())
                        .detail("directory not empty"),
                ));
            }
            tree.children.remove(parsed.path());
        }
        tree.entries.remove(parsed.path());
        if !parsed.is_root() {
            if let Some(siblings) = tree.children.get_mut(parsed.drop_n(1).path()) {
                siblings.remove(parsed.basename());
            }
        }
        if access::is_group_file(&parsed) {
            let _ = access::remove_group(parsed.path());
        }
        self.append_event(&mut tree, entry.clone(), true);
        Ok(entry)
    }

    fn glob(&self, pattern: &str) -> Result<Vec<DirEntry>, Error> {
        const OP: &str = "dir.glob";
        let parsed = path::parse(pattern)?;
        let tree = tree();

        let mut current: Vec<Parsed> = vec![parsed.first(0)];
        for i in 0..parsed.nelem() {
            let elem = parsed.elem(i).to_string();
            let meta = elem.contains(['*', '?', '[']);
            let matcher = if meta {
                Some(glob::Pattern::new(&elem).map_err(|e| {
                    Error::new(OP, Kind::Syntax)
                        .path(parsed.path().clone())
                        .detail(e)
                })?)
            } else {
                None
            };
            let mut next = Vec::new();
            for dir in &current {
                let Some(dir_entry) = tree.entries.get(dir.path()) else {
                    continue;
                };
                if !dir_entry.is_dir() {
                    continue;
                }
                match &matcher {
                    Some(pat) => {
                        if !self.check_right(&tree, dir, Right::List)? {
                            continue;
                        }
                        if let Some(kids) = tree.children.get(dir.path()) {
                            for child in kids {
                                if pat.matches(child) {
                                    let full = path::join(dir.path(), &[child.as_str()]);
                                    if let Ok(p) = path::parse(full) {
                                        next.push(p);
                                    }
                                }
                            }
                        }
                    }
                    None => {
                        if let Ok(p) = path::parse(path::join(dir.path(), &[elem.as_str()])) {
                            next.push(p);
                        }
                    }
                }
            }
            current = next;
        }

        let mut out = Vec::new();
        for p in current {
            let Some(entry) = tree.entries.get(p.path()).cloned() else {
                continue;
            };
            if self.check_right(&tree, &p, Right::Read)? {
                out.push(entry);
            } else if self.check_right(&tree, &p, Right::List)? {
                out.push(withhold(entry));
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn which_access(&self, name: &PathName) -> DirResult<Option<DirEntry>> {
        const OP: &str = "dir.which_access";
        let parsed = path::parse(name)?;
        let tree = tree();
        self.walk_ancestors(&tree, &parsed, OP)?;
        if parsed.user() != self.user() && !self.any_right(&tree, &parsed)? {
            return Err(not_exist(OP, parsed.path()));
        }
        Ok(self
            .which_access_path(&tree, &parsed)
            .and_then(|p| tree.entries.get(&p).cloned()))
    }

    fn watch(
        &self,
        name: &PathName,
        order: i64,
        done: Arc<AtomicBool>,
    ) -> Result<mpsc::Receiver<Event>, Error> {
        const OP: &str = "dir.watch";
        let parsed = path::parse(name)?;
        let mut tree = tree();
        if !self.check_right(&tree, &parsed, Right::Read)? {
            return Err(Error::new(OP, Kind::NotExist).path(parsed.path().clone()));
        }
        if order < -1 || order > tree.log.len() as i64 {
            return Err(Error::new(OP, Kind::Invalid)
                .path(parsed.path().clone())
                .detail(format!("bad watch order {order}")));
        }
        let (sender, receiver) = mpsc::channel();
        if order >= 0 {
            for (i, rec) in tree.log.iter().enumerate().skip(order as usize) {
                if !under(&rec.entry.name, parsed.path()) {
                    continue;
                }
                let _ = sender.send(Event {
                    entry: Some(rec.entry.clone()),
                    order: i as i64,
                    delete: rec.delete,
                    error: None,
                });
            }
        }
        tree.watchers.push(Watcher {
            root: parsed.path().clone(),
            sender,
            done,
        });
        Ok(receiver)
    }
}
