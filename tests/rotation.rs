// Copyright (c) 2026 Keeper
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

//! Key rotation: generate a new pair, countersign existing entries so both
//! keys verify, publish the new key, then refresh wrapped keys.

mod common;

use common::{client_with_root, path, register};
use keeper::client::Client;
use keeper::core::config::Config;
use keeper::core::errors::Kind;
use keeper::security::curves::Curve;
use keeper::security::factotum::Factotum;
use keeper::security::keygen;
use keeper::share::Sharer;
use std::sync::Arc;

const ANN: &str = "ann@rot.example.com";

#[test]
fn countersign_then_rotate_then_refresh() {
    let keydir = tempfile::tempdir().unwrap();

    // First pair, on disk the way keygen writes it.
    let g1 = keygen::generate(Curve::P256, Some([50; 16])).unwrap();
    keygen::save(keydir.path(), &g1, false).unwrap();
    let f1 = Arc::new(Factotum::from_dir(keydir.path()).unwrap());
    let cfg1 = Config::new(ANN).with_factotum(f1.clone());
    register(&cfg1, &g1.public);

    let ann1 = client_with_root(&cfg1);
    let secret = path(ANN, "notes/secret");
    ann1.make_directory(&path(ANN, "notes")).unwrap();
    ann1.put(&secret, b"rotate me").unwrap();
    assert_eq!(ann1.get(&secret).unwrap(), b"rotate me");

    // Rotate on disk; the archive keeps the old pair, so the new factotum
    // holds both.
    let g2 = keygen::generate(Curve::P256, Some([51; 16])).unwrap();
    keygen::save(keydir.path(), &g2, true).unwrap();
    let f2 = Arc::new(Factotum::from_dir(keydir.path()).unwrap());
    assert_eq!(f2.public_key(), &g2.public);
    let cfg2 = Config::new(ANN).with_factotum(f2.clone());

    // Until the entries are countersigned, the new key cannot verify them.
    let ann2 = Client::new(&cfg2);
    assert!(ann2.get(&secret).is_err());

    let root = keeper::core::types::PathName::from(format!("{ANN}/"));
    let signed = Sharer::new(&cfg2).countersign(&root).unwrap();
    assert_eq!(signed, 1);

    // Now both key generations verify: the old factotum against the first
    // signature, the new one against the countersignature.
    assert_eq!(ann1.get(&secret).unwrap(), b"rotate me");
    assert_eq!(ann2.get(&secret).unwrap(), b"rotate me");

    // Publish the new key, then refresh the wraps.
    register(&cfg2, &g2.public);
    let fixed = Sharer::new(&cfg2).fix(&root).unwrap();
    assert_eq!(fixed, 1);

    // The new key decrypts; the superseded one no longer can.
    assert_eq!(ann2.get(&secret).unwrap(), b"rotate me");
    let err = ann1.get(&secret).unwrap_err();
    assert!(err.is(Kind::Permission), "got {err}");
}
