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

//! Core data model and pure logic shared by every layer.

/// Access and Group files.
pub mod access;
/// Per-user client configuration.
pub mod config;
/// Structured errors and the kind taxonomy.
pub mod errors;
/// Pure functions over path names.
pub mod path;
/// Names, entries, endpoints, and canonical encoding.
pub mod types;
