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

//! Hooks back into the owning cache.

use crate::{value::CacheKey, version::EntryVersion};

/// Owning-map hooks: the entry asks the map to finish terminations it
/// initiated and to keep its public size honest under deferred delete.
pub trait OwnerMap: Send + Sync + 'static {
    /// The entry became obsolete during a read-side operation and should be
    /// unlinked from the map.
    fn remove_entry(&self, key: &CacheKey);

    /// The entry set a deferred-delete tombstone; the sweeper will obsolete
    /// it under `version` later.
    fn on_deferred_delete(&self, key: &CacheKey, version: &EntryVersion);

    fn increment_public_size(&self, _key: &CacheKey) {}

    fn decrement_public_size(&self, _key: &CacheKey) {}
}

#[derive(Debug, Default)]
pub struct NoopOwnerMap;

impl OwnerMap for NoopOwnerMap {
    fn remove_entry(&self, _key: &CacheKey) {}

    fn on_deferred_delete(&self, _key: &CacheKey, _version: &EntryVersion) {}
}

/// Topology/affinity service.
pub trait Affinity: Send + Sync + 'static {
    fn topology_version(&self) -> u32;

    /// Whether the local node is the primary owner of `key` at the given
    /// topology.
    fn is_primary(&self, _key: &CacheKey, _topology_version: u32) -> bool {
        true
    }
}

#[derive(Debug)]
pub struct StaticAffinity {
    topology_version: u32,
}

impl StaticAffinity {
    pub fn new(topology_version: u32) -> Self {
        Self { topology_version }
    }
}

impl Default for StaticAffinity {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Affinity for StaticAffinity {
    fn topology_version(&self) -> u32 {
        self.topology_version
    }
}

/// Eviction-policy accounting: completed operations report the entry as
/// recently used.
pub trait EvictionObserver: Send + Sync + 'static {
    fn touch(&self, key: &CacheKey, topology_version: u32);
}

#[derive(Debug, Default)]
pub struct NoopEvictionObserver;

impl EvictionObserver for NoopEvictionObserver {
    fn touch(&self, _key: &CacheKey, _topology_version: u32) {}
}

/// Data-size accountant for filesystem-block data caches: those caches track
/// the aggregate serialized size of their block values, so every replacement
/// reports the size delta before it takes effect.
pub trait FsDataTracker: Send + Sync + 'static {
    /// Whether `key` addresses a filesystem block.
    fn is_block_key(&self, key: &CacheKey) -> bool;

    fn on_data_size_changed(&self, delta: i64);
}
