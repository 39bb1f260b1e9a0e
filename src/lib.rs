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

//! Keeper - client engine for a federated, end-to-end-encrypted global
//! name space.
//!
//! A path such as `ann@example.com/photos/2016/beach.jpg` resolves through
//! three cooperating services: a key server mapping users to keys and
//! endpoints, a directory server owning each user's tree of signed entries,
//! and dumb content-addressed stores holding the (usually encrypted)
//! blocks. This crate provides:
//! - Path parsing and canonicalization, Access/Group permission files
//! - The block packing pipeline: end-to-end AES-256-GCM with per-reader
//!   wrapped keys, a signed-cleartext variant, and a plain passthrough
//! - The factotum, sole custodian of private keys
//! - A client composing it all into `get`/`put`/`glob` and friends, with a
//!   redirection-chasing block resolver
//! - The share engine reconciling wrapped keys with Access readership
//! - In-process and on-disk reference services for the three contracts

/// Client façade and block resolver.
pub mod client;
/// Core data model: types, errors, paths, access files, configuration.
pub mod core;
/// The packing pipeline and its registry.
pub mod pack;
/// Key custody: factotum, curves, key generation, proquint backups.
pub mod security;
/// Service contracts, the binder, and reference implementations.
pub mod service;
/// Wrapped-key reconciliation and countersigning.
pub mod share;
