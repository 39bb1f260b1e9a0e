// Copyright (c) 2026 Keeper
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

//! Access files, group resolution, and wrapped-key reconciliation.

mod common;

use common::{client_with_root, path, setup_user};
use keeper::client::Client;
use keeper::core::errors::Kind;
use keeper::core::types::{KeyHash, Packing};
use keeper::pack::{self, Packer};
use keeper::share::Sharer;

const ANN: &str = "ann@shr.example.com";
const BOB: &str = "bob@shr.example.com";
const CAROL: &str = "carol@shr.example.com";

fn key_hash_of(cfg: &keeper::core::config::Config) -> KeyHash {
    cfg.factotum().unwrap().key_hash()
}

#[test]
fn access_change_rewraps_descendants() {
    let ann_cfg = setup_user(ANN, 30);
    let bob_cfg = setup_user(BOB, 31);
    let carol_cfg = setup_user(CAROL, 32);
    let ann = client_with_root(&ann_cfg);

    ann.make_directory(&path(ANN, "photos")).unwrap();
    ann.put(
        &path(ANN, "photos/Access"),
        format!("read,list: {BOB}\n").as_bytes(),
    )
    .unwrap();

    let jpeg = b"\xff\xd8\xff\xe0 not really a jpeg";
    let photo = path(ANN, "photos/1.jpg");
    let entry = ann.put(&photo, jpeg).unwrap();

    // The put wrapped the data key for both ann and bob.
    let packer = pack::lookup(Packing::Ee).unwrap();
    let hashes = packer.reader_hashes(&entry.packdata).unwrap();
    assert!(hashes.contains(&key_hash_of(&ann_cfg)));
    assert!(hashes.contains(&key_hash_of(&bob_cfg)));

    // Bob reads it end to end.
    let bob = Client::new(&bob_cfg);
    assert_eq!(bob.get(&photo).unwrap(), jpeg);

    // Readership moves from bob to carol; the client reconciles the
    // subtree on the spot.
    ann.put(
        &path(ANN, "photos/Access"),
        format!("read,list: {CAROL}\n").as_bytes(),
    )
    .unwrap();

    let err = bob.get(&photo).unwrap_err();
    assert!(
        err.is(Kind::NotExist) || err.is(Kind::Permission),
        "got {err}"
    );

    let entry = ann.lookup(&photo, true).unwrap();
    let hashes = packer.reader_hashes(&entry.packdata).unwrap();
    assert!(!hashes.contains(&key_hash_of(&bob_cfg)), "bob still wrapped");
    assert!(hashes.contains(&key_hash_of(&carol_cfg)));
    assert!(hashes.contains(&key_hash_of(&ann_cfg)));

    let carol = Client::new(&carol_cfg);
    assert_eq!(carol.get(&photo).unwrap(), jpeg);
}

#[test]
fn scan_reports_discrepancies_and_fix_heals() {
    let user = "own@shr2.example.com";
    let reader = "red@shr2.example.com";
    let owner_cfg = setup_user(user, 33);
    let reader_cfg = setup_user(reader, 34);
    let owner = client_with_root(&owner_cfg);

    owner.make_directory(&path(user, "docs")).unwrap();
    owner.put(&path(user, "docs/a"), b"alpha").unwrap();

    // Granting read after the fact reconciles the subtree, so the file
    // written before the Access file ends up readable and scan is clean.
    owner
        .put(
            &path(user, "docs/Access"),
            format!("read: {reader}\n").as_bytes(),
        )
        .unwrap();

    let sharer = Sharer::new(&owner_cfg);
    let report = sharer.scan(&path(user, "docs")).unwrap();
    assert!(report.is_empty(), "unexpected discrepancies: {report:?}");

    let r = Client::new(&reader_cfg);
    assert_eq!(r.get(&path(user, "docs/a")).unwrap(), b"alpha");
}

#[test]
fn groups_gate_reads_and_invalidate_on_rewrite() {
    let user = "grp@shr3.example.com";
    let member = "mem@shr3.example.com";
    let owner_cfg = setup_user(user, 35);
    let member_cfg = setup_user(member, 36);
    let owner = client_with_root(&owner_cfg);

    owner.make_directory(&path(user, "Group")).unwrap();
    owner
        .put(&path(user, "Group/crew"), format!("{member}\n").as_bytes())
        .unwrap();
    owner.make_directory(&path(user, "shared")).unwrap();
    owner
        .put(&path(user, "shared/Access"), b"read: Group/crew\n")
        .unwrap();
    owner.put(&path(user, "shared/f"), b"crew only").unwrap();

    let m = Client::new(&member_cfg);
    assert_eq!(m.get(&path(user, "shared/f")).unwrap(), b"crew only");

    // Rewriting the group drops the member; the cache invalidates on put.
    owner
        .put(&path(user, "Group/crew"), b"# nobody left\n")
        .unwrap();
    let err = m.get(&path(user, "shared/f")).unwrap_err();
    assert!(
        err.is(Kind::NotExist) || err.is(Kind::Permission),
        "got {err}"
    );
}

#[test]
fn list_without_read_withholds_content() {
    let user = "lst@shr4.example.com";
    let peeker = "pkr@shr4.example.com";
    let owner_cfg = setup_user(user, 37);
    let peeker_cfg = setup_user(peeker, 38);
    let owner = client_with_root(&owner_cfg);

    owner.make_directory(&path(user, "pub")).unwrap();
    owner
        .put(
            &path(user, "pub/Access"),
            format!("list: {peeker}\n").as_bytes(),
        )
        .unwrap();
    owner.put(&path(user, "pub/f"), b"secret").unwrap();

    let p = Client::new(&peeker_cfg);
    let entry = p.lookup(&path(user, "pub/f"), true).unwrap();
    assert!(entry.is_incomplete());
    assert!(entry.blocks.is_empty());
    assert!(entry.packdata.is_empty());

    let err = p.get(&path(user, "pub/f")).unwrap_err();
    assert!(err.is(Kind::Permission), "got {err}");
}

#[test]
fn which_access_returns_the_nearest_ancestor() {
    let user = "anc@shr6.example.com";
    let cfg = setup_user(user, 40);
    let client = client_with_root(&cfg);

    client.make_directory(&path(user, "a")).unwrap();
    client.make_directory(&path(user, "a/b")).unwrap();
    client.put(&path(user, "a/Access"), b"read: anc@shr6.example.com\n").unwrap();
    client.put(&path(user, "a/b/deep"), b"x").unwrap();

    // Nothing governs the root.
    assert!(client.which_access(&path(user, "top")).unwrap().is_none());

    // The nearest ancestor Access file governs, at any depth below it.
    for p in ["a/file", "a/b/deep", "a/b"] {
        let got = client.which_access(&path(user, p)).unwrap().unwrap();
        assert_eq!(got.name, path(user, "a/Access"));
    }
}

#[test]
fn malformed_permission_files_are_refused() {
    let user = "bad@shr5.example.com";
    let cfg = setup_user(user, 39);
    let client = client_with_root(&cfg);

    let err = client
        .put(&path(user, "Access"), b"peek: nobody@x.example\n")
        .unwrap_err();
    assert!(err.is(Kind::Syntax), "got {err}");

    client.make_directory(&path(user, "Group")).unwrap();
    let err = client
        .put(&path(user, "Group/team"), b"not-an-email\n")
        .unwrap_err();
    assert!(err.is(Kind::Syntax), "got {err}");
}
