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

//! Reference implementations of the three services, living inside the
//! process. One shared state per service per process; handles dialed via
//! the binder are cheap views, bound to the dialing user where the service
//! is identity-sensitive.

pub mod dir;
pub mod key;
pub mod store;
