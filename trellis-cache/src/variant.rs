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

use crate::{context::NodeId, value::CacheKey};

/// Per-deployment entry variant (local, partitioned primary/backup, near).
///
/// The entry core is one concrete type; everything a variant does differently
/// goes through this narrow hook object injected at construction. Defaults
/// describe the plain local entry.
pub trait EntryFamily: Send + Sync + 'static {
    fn is_dht(&self) -> bool {
        false
    }

    fn is_near(&self) -> bool {
        false
    }

    fn is_replicated(&self) -> bool {
        false
    }

    /// Detached entries are private snapshots that no map owns; they never
    /// touch swap and never carry tombstones.
    fn is_detached(&self) -> bool {
        false
    }

    fn partition(&self, _key: &CacheKey) -> u32 {
        0
    }

    /// Whether the entry is usable at the given topology.
    fn is_valid(&self, _topology_version: u32) -> bool {
        true
    }

    fn partition_valid(&self) -> bool {
        true
    }

    /// Near-reader bookkeeping; meaningful on partitioned primaries only.
    fn has_readers(&self, _key: &CacheKey) -> bool {
        false
    }

    fn clear_readers(&self, _key: &CacheKey) {}

    fn clear_reader(&self, _key: &CacheKey, _node: NodeId) {}

    /// Remember which node performed the last affinity-routed update.
    fn record_node_id(&self, _key: &CacheKey, _node: NodeId) {}

    fn on_invalidate(&self, _key: &CacheKey) {}

    /// Fired once after the entry transitioned to obsolete.
    fn on_marked_obsolete(&self, _key: &CacheKey) {}
}

/// The plain local-cache variant.
#[derive(Debug, Default)]
pub struct LocalFamily;

impl EntryFamily for LocalFamily {}
