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

//! Helpers shared by the packers: block bookkeeping, hashing, and the
//! varint byte-string encoding used inside packdata.

use crate::core::errors::{Error, Kind};
use crate::core::types::{Attribute, DirBlock, DirEntry, Location};

/// SHA-256 convenience.
pub(crate) fn sha256(data: &[u8]) -> [u8; 32] {
    let d = ring::digest::digest(&ring::digest::SHA256, data);
    let mut out = [0u8; 32];
    out.copy_from_slice(d.as_ref());
    out
}

/// Append an unsigned LEB128 varint.
pub(crate) fn put_uvarint(out: &mut Vec<u8>, mut v: u64) {
    loop {
        let mut b = (v & 0x7f) as u8;
        v >>= 7;
        if v != 0 {
            b |= 0x80;
        }
        out.push(b);
        if v == 0 {
            return;
        }
    }
}

/// Consume an unsigned LEB128 varint from the front of `buf`.
pub(crate) fn get_uvarint(buf: &mut &[u8]) -> Result<u64, Error> {
    let mut v: u64 = 0;
    let mut shift = 0u32;
    let mut rest = *buf;
    loop {
        let (&b, tail) = rest
            .split_first()
            .ok_or_else(|| truncated("varint"))?;
        rest = tail;
        if shift >= 64 || (shift == 63 && b > 1) {
            return Err(Error::new("pack.varint", Kind::Invalid).detail("varint overflow"));
        }
        v |= u64::from(b & 0x7f) << shift;
        if b & 0x80 == 0 {
            *buf = rest;
            return Ok(v);
        }
        shift += 7;
    }
}

/// Append a varint-length-prefixed byte string.
pub(crate) fn put_bytes(out: &mut Vec<u8>, b: &[u8]) {
    put_uvarint(out, b.len() as u64);
    out.extend_from_slice(b);
}

/// Consume a varint-length-prefixed byte string.
pub(crate) fn get_bytes(buf: &mut &[u8]) -> Result<Vec<u8>, Error> {
    let n = get_uvarint(buf)? as usize;
    if buf.len() < n {
        return Err(truncated("byte string"));
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head.to_vec())
}

/// Consume exactly `n` raw bytes.
pub(crate) fn get_fixed(buf: &mut &[u8], n: usize) -> Result<Vec<u8>, Error> {
    if buf.len() < n {
        return Err(truncated("fixed field"));
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head.to_vec())
}

fn truncated(what: &str) -> Error {
    Error::new("pack.unmarshal", Kind::Invalid).detail(format!("truncated {what}"))
}

/// Block bookkeeping for packers: appends contiguous blocks to the entry and
/// enforces the pack / set-location alternation.
pub(crate) struct BlockWriter<'a> {
    entry: &'a mut DirEntry,
    offset: u64,
    need_location: bool,
}

impl<'a> BlockWriter<'a> {
    /// Begin packing into `entry`, clearing any previous blocks. The entry
    /// must describe a regular file.
    pub(crate) fn start(op: &'static str, entry: &'a mut DirEntry) -> Result<Self, Error> {
        if entry.attr != Attribute::None {
            return Err(Error::new(op, Kind::IsDir)
                .path(entry.name.clone())
                .detail("cannot pack a directory or link"));
        }
        if entry.signed_name.is_empty() {
            return Err(Error::new(op, Kind::Invalid)
                .path(entry.name.clone())
                .detail("entry has no signed name"));
        }
        entry.blocks.clear();
        Ok(BlockWriter {
            entry,
            offset: 0,
            need_location: false,
        })
    }

    /// Append one block of `size` cleartext bytes with per-block packdata.
    pub(crate) fn add_block(&mut self, size: u64, packdata: Vec<u8>) -> Result<(), Error> {
        if self.need_location {
            return Err(Error::new("pack.block", Kind::Invalid)
                .path(self.entry.name.clone())
                .detail("missing set_location call"));
        }
        self.entry.blocks.push(DirBlock {
            location: Location::default(),
            offset: self.offset,
            size,
            packdata,
        });
        self.offset += size;
        self.need_location = true;
        Ok(())
    }

    /// Record where the last block was stored.
    pub(crate) fn set_location(&mut self, loc: Location) {
        if let Some(b) = self.entry.blocks.last_mut() {
            b.location = loc;
        }
        self.need_location = false;
    }

    /// Check every block has a location; called from `close`.
    pub(crate) fn finish(&self) -> Result<(), Error> {
        if self.need_location {
            return Err(Error::new("pack.close", Kind::Invalid)
                .path(self.entry.name.clone())
                .detail("block stored without location"));
        }
        Ok(())
    }

    pub(crate) fn entry(&mut self) -> &mut DirEntry {
        self.entry
    }
}

/// Single-pass cursor over an entry's blocks for unpackers.
pub(crate) struct BlockReader<'a> {
    entry: &'a DirEntry,
    next: usize,
}

impl<'a> BlockReader<'a> {
    pub(crate) fn new(entry: &'a DirEntry) -> Self {
        BlockReader { entry, next: 0 }
    }

    /// Index and metadata of the current block, advancing the cursor.
    pub(crate) fn next_block(&mut self) -> Option<(usize, DirBlock)> {
        let i = self.next;
        let b = self.entry.blocks.get(i)?;
        self.next += 1;
        Some((i, b.clone()))
    }

    /// Index of the block most recently returned.
    pub(crate) fn current(&self) -> Option<usize> {
        self.next.checked_sub(1)
    }

    pub(crate) fn entry(&self) -> &DirEntry {
        self.entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_roundtrip() {
        let mut buf = Vec::new();
        let vals = [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX];
        for &v in &vals {
            put_uvarint(&mut buf, v);
        }
        let mut s = buf.as_slice();
        for &v in &vals {
            assert_eq!(get_uvarint(&mut s).unwrap(), v);
        }
        assert!(s.is_empty());
    }

    #[test]
    fn bytes_roundtrip() {
        let mut buf = Vec::new();
        put_bytes(&mut buf, b"hello");
        put_bytes(&mut buf, b"");
        let mut s = buf.as_slice();
        assert_eq!(get_bytes(&mut s).unwrap(), b"hello");
        assert_eq!(get_bytes(&mut s).unwrap(), b"");
        assert!(get_bytes(&mut s).is_err());
    }

    #[test]
    fn writer_enforces_location_alternation() {
        let mut e = DirEntry {
            signed_name: "ann@example.com/f".into(),
            name: "ann@example.com/f".into(),
            ..Default::default()
        };
        let mut w = BlockWriter::start("test", &mut e).unwrap();
        w.add_block(4, vec![]).unwrap();
        assert!(w.add_block(4, vec![]).is_err());
        assert!(w.finish().is_err());
        w.set_location(Location::default());
        w.add_block(2, vec![]).unwrap();
        w.set_location(Location::default());
        w.finish().unwrap();
        assert_eq!(e.blocks[1].offset, 4);
    }
}
