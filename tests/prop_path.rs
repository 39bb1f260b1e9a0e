// Copyright (c) 2026 Keeper
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

use proptest::prelude::*;

use keeper::core::path::{clean, drop_path, parse};

fn elem_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => "[a-zA-Z0-9_.-]{1,12}",
        1 => Just(String::new()),
        1 => Just(".".to_string()),
        1 => Just("..".to_string()),
    ]
}

proptest! {
    #[test]
    fn parse_after_clean_is_stable(
        user in "[a-z]{1,8}",
        domain in "[a-z]{1,8}\\.(com|org|example)",
        elems in proptest::collection::vec(elem_strategy(), 0..8),
    ) {
        let raw = format!("{user}@{domain}/{}", elems.join("/"));
        if let Ok(parsed) = parse(&raw) {
            // Cleaning first must not change the outcome.
            let via_clean = parse(clean(&raw)).expect("clean broke a parseable path");
            prop_assert_eq!(parsed.path(), via_clean.path());
            prop_assert_eq!(parsed.nelem(), via_clean.nelem());

            // The canonical form is itself a fixed point.
            let again = parse(parsed.path()).unwrap();
            prop_assert_eq!(parsed.path(), again.path());
        }
    }

    #[test]
    fn canonical_form_has_no_dots_or_empty_elements(
        user in "[a-z]{1,8}",
        elems in proptest::collection::vec(elem_strategy(), 0..8),
    ) {
        let raw = format!("{user}@ex.com/{}", elems.join("/"));
        if let Ok(parsed) = parse(&raw) {
            for i in 0..parsed.nelem() {
                let e = parsed.elem(i);
                prop_assert!(!e.is_empty());
                prop_assert_ne!(e, ".");
                prop_assert_ne!(e, "..");
            }
            // No trailing slash except on the root.
            let s = parsed.path().as_str();
            prop_assert_eq!(s.ends_with('/'), parsed.is_root());
        }
    }

    #[test]
    fn drop_and_first_agree(
        elems in proptest::collection::vec("[a-z0-9]{1,6}", 0..6),
        n in 0usize..8,
    ) {
        let raw = format!("u@ex.com/{}", elems.join("/"));
        let parsed = parse(&raw).unwrap();
        let dropped = drop_path(&raw, n).unwrap();
        let kept = parsed.nelem().saturating_sub(n);
        let first_kept = parsed.first(kept);
        prop_assert_eq!(&dropped, first_kept.path());
        // Dropping everything lands on the root.
        let all = drop_path(&raw, 99).unwrap();
        prop_assert_eq!(all.as_str(), "u@ex.com/");
    }
}
