// Copyright 2025 trellis Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Per-key entry cell of the trellis data grid cache.
//!
//! The [`entry::MapEntry`] is the state machine that mediates every read,
//! write, transform, remove, invalidate, expiration, eviction, swap and
//! version-reconciliation event for one logical key. Everything else in this
//! crate is either the data it carries (versions, values, extras) or the
//! narrow collaborator interfaces it consumes (store, swap, events, index,
//! interceptor, replication, transactions).

pub mod conflict;
pub mod context;
pub mod dr;
pub mod entry;
pub mod error;
pub mod event;
pub mod extras;
pub mod hooks;
pub mod index;
pub mod interceptor;
pub mod metrics;
pub mod mvcc;
pub mod offheap;
pub mod op;
pub mod store;
pub mod swap;
pub mod ttl;
pub mod tx;
pub mod value;
pub mod variant;
pub mod version;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

mod prelude;
pub use prelude::*;
