// Copyright (c) 2026 Keeper
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]
#![allow(dead_code)]

//! Shared fixtures: deterministic users registered against the in-process
//! services. Each test file uses its own domain so the process-wide trees
//! never collide across tests.

use keeper::client::Client;
use keeper::core::config::Config;
use keeper::core::types::{Endpoint, PathName, User};
use keeper::security::curves::Curve;
use keeper::security::factotum::Factotum;
use keeper::security::keygen;
use keeper::service::{bind, KeyServer};
use std::sync::Arc;

/// Build a user with a deterministic key pair, register the public key with
/// the in-process key server, and return a ready configuration.
pub fn setup_user(name: &str, seed: u8) -> Config {
    let g = keygen::generate(Curve::P256, Some([seed; 16])).unwrap();
    let f = Factotum::from_keys(&g.public, &g.secret).unwrap();
    let cfg = Config::new(name).with_factotum(Arc::new(f));
    register(&cfg, &g.public);
    cfg
}

/// Publish (or republish) a user's public key record.
pub fn register(cfg: &Config, public: &keeper::core::types::PublicKey) {
    let ks = bind::key_server(cfg, cfg.key_endpoint()).unwrap();
    ks.put(&User {
        name: cfg.user_name().clone(),
        dirs: vec![Endpoint::inprocess()],
        stores: vec![Endpoint::inprocess()],
        public_key: public.clone(),
    })
    .unwrap();
    bind::release_key_server(cfg.key_endpoint());
}

/// Create the user's root directory and return a client.
pub fn client_with_root(cfg: &Config) -> Client {
    let client = Client::new(cfg);
    let root = PathName::from(format!("{}/", cfg.user_name()));
    client.make_directory(&root).unwrap();
    client
}

/// Path under a user.
pub fn path(user: &str, rest: &str) -> PathName {
    PathName::from(format!("{user}/{rest}"))
}
