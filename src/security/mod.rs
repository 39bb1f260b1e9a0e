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
#![deny(missing_docs)]

//! Key custody and the cryptography behind it.

/// NIST-curve operations behind one dispatch enum.
pub mod curves;
/// The factotum, sole custodian of private keys.
pub mod factotum;
/// Key generation and key-directory maintenance.
pub mod keygen;
/// Pronounceable 16-bit words for key-seed backups.
pub mod proquint;
