// Copyright (c) 2026 Keeper
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

//! Packing invariants: unpack inverts pack for every packer, block offsets
//! tile the file, and rewrapping is deterministic under a fixed RNG.

mod common;

use common::setup_user;
use keeper::core::types::{Attribute, DirEntry, Endpoint, Location, Packing, PathName, Time};
use keeper::pack::{self, ee::EePack, Packer};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

const USER: &str = "prop@pack.example.com";

fn template(name: &str, packing: Packing) -> DirEntry {
    let full = PathName::from(format!("{USER}/{name}"));
    DirEntry {
        signed_name: full.clone(),
        name: full,
        writer: USER.into(),
        packing,
        time: Time(1_700_000_000),
        sequence: 0,
        attr: Attribute::None,
        blocks: Vec::new(),
        packdata: Vec::new(),
        link: PathName::default(),
    }
}

/// Pack `data` in `chunk`-sized blocks, then unpack the produced blocks,
/// returning the recovered cleartext.
fn roundtrip(
    cfg: &keeper::core::config::Config,
    packing: Packing,
    data: &[u8],
    chunk: usize,
) -> Vec<u8> {
    let packer = pack::lookup(packing).unwrap();
    let mut entry = template("f", packing);
    let probe = template("probe", packing);

    let mut stored = Vec::new();
    {
        let mut bp = packer.pack(cfg, &mut entry).unwrap();
        for (i, block) in data.chunks(chunk.max(1)).enumerate() {
            let packed = bp.pack(block).unwrap();
            // Exact length predictions hold whenever they are claimed.
            let want = packer.pack_len(&probe, block.len());
            if want >= 0 {
                assert_eq!(want as usize, packed.len());
            }
            bp.set_location(Location {
                endpoint: Endpoint::inprocess(),
                reference: format!("ref{i}").into(),
            });
            stored.push(packed);
        }
        bp.close().unwrap();
    }

    // Offsets tile [0, len).
    let mut expect = 0u64;
    for b in &entry.blocks {
        assert_eq!(b.offset, expect);
        expect += b.size;
    }
    assert_eq!(expect, data.len() as u64);
    assert_eq!(entry.size().unwrap(), data.len() as u64);

    let mut out = Vec::new();
    let mut bu = packer.unpack(cfg, &entry).unwrap();
    let mut i = 0usize;
    while let Some(_block) = bu.next_block() {
        out.extend_from_slice(&bu.unpack(&stored[i]).unwrap());
        i += 1;
    }
    assert_eq!(i, stored.len());
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn unpack_inverts_pack(
        data in proptest::collection::vec(any::<u8>(), 0..4096),
        chunk in 1usize..1500,
    ) {
        let cfg = setup_user(USER, 60);
        for packing in [Packing::Plain, Packing::Ee, Packing::EeIntegrity] {
            let got = roundtrip(&cfg, packing, &data, chunk);
            prop_assert_eq!(&got, &data);
        }
    }
}

#[test]
fn tampered_ciphertext_is_rejected() {
    let cfg = setup_user(USER, 60);
    let packer = pack::lookup(Packing::Ee).unwrap();
    let mut entry = template("tamper", Packing::Ee);
    let mut bp = packer.pack(&cfg, &mut entry).unwrap();
    let mut packed = bp.pack(b"payload").unwrap();
    bp.set_location(Location {
        endpoint: Endpoint::inprocess(),
        reference: "r".into(),
    });
    bp.close().unwrap();

    packed[0] ^= 1;
    let mut bu = packer.unpack(&cfg, &entry).unwrap();
    bu.next_block().unwrap();
    assert!(bu.unpack(&packed).is_err());
}

#[test]
fn share_is_deterministic_under_a_fixed_rng() {
    let cfg = setup_user(USER, 60);
    let other = setup_user("peer@pack.example.com", 61);
    let packer = pack::lookup(Packing::Ee).unwrap();

    let mut entry = template("share", Packing::Ee);
    let mut bp = packer.pack(&cfg, &mut entry).unwrap();
    bp.pack(b"shared bytes").unwrap();
    bp.set_location(Location {
        endpoint: Endpoint::inprocess(),
        reference: "r".into(),
    });
    bp.close().unwrap();

    let readers = vec![
        cfg.factotum().unwrap().public_key().clone(),
        other.factotum().unwrap().public_key().clone(),
    ];

    let ee = EePack;
    let mut a = vec![entry.packdata.clone()];
    let mut b = vec![entry.packdata.clone()];
    ee.share_with_rng(&cfg, &readers, &mut a, &mut StdRng::seed_from_u64(7))
        .unwrap();
    ee.share_with_rng(&cfg, &readers, &mut b, &mut StdRng::seed_from_u64(7))
        .unwrap();
    assert_eq!(a, b, "same RNG seed must produce identical packdata");

    // Both readers appear, in order.
    let hashes = packer.reader_hashes(&a[0]).unwrap();
    assert_eq!(hashes.len(), 2);
    assert_eq!(
        hashes[0],
        keeper::core::types::KeyHash::of(&readers[0])
    );
    assert_eq!(
        hashes[1],
        keeper::core::types::KeyHash::of(&readers[1])
    );
}

#[test]
fn renaming_preserves_ee_signature_but_rewrites_plain_names() {
    let cfg = setup_user(USER, 60);
    let new_name = PathName::from(format!("{USER}/renamed"));

    // EE: the signature covers signed_name, which must not move.
    let packer = pack::lookup(Packing::Ee).unwrap();
    let mut entry = template("orig", Packing::Ee);
    let mut bp = packer.pack(&cfg, &mut entry).unwrap();
    let stored = bp.pack(b"contents").unwrap();
    bp.set_location(Location {
        endpoint: Endpoint::inprocess(),
        reference: "r".into(),
    });
    bp.close().unwrap();

    packer.name(&cfg, &mut entry, &new_name).unwrap();
    assert_eq!(entry.name, new_name);
    assert_eq!(entry.signed_name, PathName::from(format!("{USER}/orig")));

    // Unpacking still verifies after the rename.
    let mut bu = packer.unpack(&cfg, &entry).unwrap();
    bu.next_block().unwrap();
    assert_eq!(bu.unpack(&stored).unwrap(), b"contents");

    // Plain: nothing is signed, both names move together.
    let plain = pack::lookup(Packing::Plain).unwrap();
    let mut entry = template("orig", Packing::Plain);
    let mut bp = plain.pack(&cfg, &mut entry).unwrap();
    bp.pack(b"contents").unwrap();
    bp.set_location(Location {
        endpoint: Endpoint::inprocess(),
        reference: "r".into(),
    });
    bp.close().unwrap();
    plain.name(&cfg, &mut entry, &new_name).unwrap();
    assert_eq!(entry.name, new_name);
    assert_eq!(entry.signed_name, new_name);
}

#[test]
fn unpack_len_matches_ee_overhead() {
    let entry = template("len", Packing::Ee);
    let packer = pack::lookup(Packing::Ee).unwrap();
    assert_eq!(packer.pack_len(&entry, 100), 116);
    assert_eq!(packer.unpack_len(&entry, 116), 100);
    assert_eq!(packer.unpack_len(&entry, 3), pack::LEN_UNKNOWN);
}
