// Copyright (c) 2026 Keeper
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

//! End-to-end client behavior against the in-process services: put/get,
//! block layout, deduplication, links, glob, sequences, and watch.

mod common;

use common::{client_with_root, path, setup_user};
use keeper::client::{Client, BLOCK_SIZE};
use keeper::core::errors::Kind;
use keeper::core::types::{Attribute, Packing};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

const ANN: &str = "ann@flow.example.com";
const BOB: &str = "bob@flow.example.com";

#[test]
fn put_get_roundtrip_and_privacy() {
    let ann_cfg = setup_user(ANN, 10);
    let bob_cfg = setup_user(BOB, 11);
    let ann = client_with_root(&ann_cfg);

    let name = path(ANN, "hello");
    let entry = ann.put(&name, b"hi").unwrap();
    assert_eq!(entry.packing, Packing::Ee);
    assert_eq!(entry.sequence, 1);
    assert_eq!(ann.get(&name).unwrap(), b"hi");

    // An outsider can neither read nor learn whether the path exists.
    let bob = Client::new(&bob_cfg);
    let err = bob.get(&name).unwrap_err();
    assert!(
        err.is(Kind::NotExist) || err.is(Kind::Permission),
        "got {err}"
    );
}

#[test]
fn multi_block_layout() {
    let cfg = setup_user("blk@flow.example.com", 12);
    let client = client_with_root(&cfg);

    // 3.5 MiB splits into 1 MiB blocks: sizes [1Mi, 1Mi, 1Mi, 0.5Mi].
    let size = 3 * BLOCK_SIZE + BLOCK_SIZE / 2;
    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    let name = path("blk@flow.example.com", "big");
    let entry = client.put(&name, &data).unwrap();

    let sizes: Vec<u64> = entry.blocks.iter().map(|b| b.size).collect();
    let offsets: Vec<u64> = entry.blocks.iter().map(|b| b.offset).collect();
    let mib = BLOCK_SIZE as u64;
    assert_eq!(sizes, vec![mib, mib, mib, mib / 2]);
    assert_eq!(offsets, vec![0, mib, 2 * mib, 3 * mib]);
    assert_eq!(entry.size().unwrap(), size as u64);

    assert_eq!(client.get(&name).unwrap(), data);
}

#[test]
fn identical_content_converges_in_the_store() {
    let user = "dup@flow.example.com";
    let cfg = setup_user(user, 13).with_packing(Packing::Plain);
    let client = client_with_root(&cfg);

    let one = client.put(&path(user, "one"), b"same bytes").unwrap();
    let two = client.put(&path(user, "two"), b"same bytes").unwrap();
    // Content-addressed: the second put reuses the existing reference.
    assert_eq!(
        one.blocks[0].location.reference,
        two.blocks[0].location.reference
    );
    assert_eq!(client.get(&path(user, "two")).unwrap(), b"same bytes");
}

#[test]
fn links_resolve_and_delete_in_place() {
    let user = "lnk@flow.example.com";
    let cfg = setup_user(user, 14);
    let client = client_with_root(&cfg);

    client.make_directory(&path(user, "dir")).unwrap();
    client.put(&path(user, "dir/f"), b"through the link").unwrap();
    client
        .put_link(&path(user, "dir"), &path(user, "ln"))
        .unwrap();

    // Reads pass through the link.
    assert_eq!(client.get(&path(user, "ln/f")).unwrap(), b"through the link");

    // The link entry itself is visible when asked for.
    let link = client.lookup(&path(user, "ln"), false).unwrap();
    assert_eq!(link.attr, Attribute::Link);
    assert_eq!(link.link, path(user, "dir"));

    // Deleting the link leaves the target alone.
    client.delete(&path(user, "ln")).unwrap();
    assert_eq!(client.get(&path(user, "dir/f")).unwrap(), b"through the link");
    assert!(client.get(&path(user, "ln/f")).is_err());
}

#[test]
fn link_cycles_are_bounded() {
    let user = "cyc@flow.example.com";
    let cfg = setup_user(user, 15);
    let client = client_with_root(&cfg);

    client.put_link(&path(user, "b"), &path(user, "a")).unwrap();
    client.put_link(&path(user, "a"), &path(user, "b")).unwrap();

    let err = client.get(&path(user, "a/x")).unwrap_err();
    assert!(err.is(Kind::BrokenLink), "got {err}");
}

#[test]
fn glob_matches_shell_patterns() {
    let user = "glb@flow.example.com";
    let cfg = setup_user(user, 16);
    let client = client_with_root(&cfg);

    for f in ["a.txt", "b.txt", "c.jpg"] {
        client.put(&path(user, f), b"x").unwrap();
    }
    client.make_directory(&path(user, "sub")).unwrap();
    client.put(&path(user, "sub/d.txt"), b"x").unwrap();

    let names = |pattern: &str| -> Vec<String> {
        client
            .glob(pattern)
            .unwrap()
            .iter()
            .map(|e| e.name.as_str().to_string())
            .collect()
    };

    assert_eq!(
        names(&format!("{user}/*.txt")),
        vec![format!("{user}/a.txt"), format!("{user}/b.txt")]
    );
    assert_eq!(names(&format!("{user}/?.jpg")), vec![format!("{user}/c.jpg")]);
    assert_eq!(
        names(&format!("{user}/[ab].txt")),
        vec![format!("{user}/a.txt"), format!("{user}/b.txt")]
    );
    assert_eq!(
        names(&format!("{user}/*/*.txt")),
        vec![format!("{user}/sub/d.txt")]
    );
}

#[test]
fn sequences_are_monotonic_and_checked() {
    let user = "seq@flow.example.com";
    let cfg = setup_user(user, 17);
    let client = client_with_root(&cfg);

    let name = path(user, "f");
    let e1 = client.put(&name, b"v1").unwrap();
    let e2 = client.put(&name, b"v2").unwrap();
    assert!(e2.sequence > e1.sequence);
    assert_eq!(e1.sequence, 1);
    assert_eq!(e2.sequence, 2);

    // Optimistic concurrency: a stale sequence is rejected.
    let mut stale = e2.clone();
    stale.sequence = e2.sequence + 5;
    let err = client.put_entry(&stale).unwrap_err();
    assert!(err.is(Kind::Invalid), "got {err}");

    // A put demanding non-existence fails on an existing path.
    let err = client.make_directory(&name).unwrap_err();
    assert!(err.is(Kind::Exist) || err.is(Kind::IsDir), "got {err}");

    let mut fresh = e2.clone();
    fresh.sequence = e2.sequence;
    let e3 = client.put_entry(&fresh).unwrap();
    assert_eq!(e3.sequence, e2.sequence + 1);
}

#[test]
fn empty_directory_rules() {
    let user = "del@flow.example.com";
    let cfg = setup_user(user, 18);
    let client = client_with_root(&cfg);

    client.make_directory(&path(user, "d")).unwrap();
    client.put(&path(user, "d/f"), b"x").unwrap();
    let err = client.delete(&path(user, "d")).unwrap_err();
    assert!(err.is(Kind::Invalid), "got {err}");

    client.delete(&path(user, "d/f")).unwrap();
    client.delete(&path(user, "d")).unwrap();
    assert!(client.lookup(&path(user, "d"), true).is_err());
}

#[test]
fn watch_streams_mutations() {
    let user = "wch@flow.example.com";
    let cfg = setup_user(user, 19);
    let client = client_with_root(&cfg);

    let done = Arc::new(AtomicBool::new(false));
    let root = format!("{user}/");
    let rx = client.watch(&root.as_str().into(), -1, done).unwrap();

    client.put(&path(user, "seen"), b"x").unwrap();
    let ev = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    let entry = ev.entry.unwrap();
    assert_eq!(entry.name, path(user, "seen"));
    assert!(!ev.delete);
    let first_order = ev.order;

    client.delete(&path(user, "seen")).unwrap();
    let ev = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(ev.delete);
    assert!(ev.order > first_order);
}
