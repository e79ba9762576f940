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

use std::{
    cmp::Ordering,
    sync::atomic::{AtomicU32, AtomicU64, Ordering as AtomicOrdering},
};

/// Composite monotonic version token assigned to every entry mutation.
///
/// Total order for transactional code compares topology version first, then
/// order, then node order. Atomic-mode conflict checks use [`EntryVersion::atomic_cmp`]
/// instead, which ignores the topology component.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct EntryVersion {
    topology_version: u32,
    order: u64,
    node_order: u32,
    data_center_id: u8,
    /// Version of the originating data center for replicated updates.
    conflict: Option<Box<EntryVersion>>,
}

impl EntryVersion {
    pub fn new(topology_version: u32, order: u64, node_order: u32, data_center_id: u8) -> Self {
        Self {
            topology_version,
            order,
            node_order,
            data_center_id,
            conflict: None,
        }
    }

    /// Attach a nested conflict version carried from another data center.
    pub fn with_conflict(mut self, conflict: EntryVersion) -> Self {
        self.conflict = Some(Box::new(conflict));
        self
    }

    pub fn topology_version(&self) -> u32 {
        self.topology_version
    }

    pub fn order(&self) -> u64 {
        self.order
    }

    pub fn node_order(&self) -> u32 {
        self.node_order
    }

    pub fn data_center_id(&self) -> u8 {
        self.data_center_id
    }

    /// The conflict version if one is attached, otherwise the version itself.
    pub fn conflict_version(&self) -> &EntryVersion {
        self.conflict.as_deref().unwrap_or(self)
    }

    pub fn has_conflict_version(&self) -> bool {
        self.conflict.is_some()
    }

    /// Order used by atomic caches to decide whether an incoming update is
    /// stale: order, then node order, then data center id. The topology
    /// component is deliberately ignored so that updates racing across a
    /// topology change still resolve the same way on every node.
    pub fn atomic_cmp(&self, other: &EntryVersion) -> Ordering {
        self.order
            .cmp(&other.order)
            .then_with(|| self.node_order.cmp(&other.node_order))
            .then_with(|| self.data_center_id.cmp(&other.data_center_id))
    }
}

impl PartialOrd for EntryVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EntryVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.topology_version
            .cmp(&other.topology_version)
            .then_with(|| self.order.cmp(&other.order))
            .then_with(|| self.node_order.cmp(&other.node_order))
    }
}

impl std::fmt::Debug for EntryVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "EntryVersion [topVer={}, order={}, nodeOrder={}, dc={}",
            self.topology_version, self.order, self.node_order, self.data_center_id
        )?;
        if let Some(conflict) = &self.conflict {
            write!(f, ", conflict={conflict:?}")?;
        }
        write!(f, "]")
    }
}

/// Version service: hands out monotonically increasing versions for one node.
///
/// `next` stamps the current topology version; `next_after` and
/// `next_for_load` preserve the topology component of the previous version,
/// which is what keeps read-through and reload commits invisible to
/// topology-sensitive comparisons.
#[derive(Debug)]
pub struct VersionSource {
    topology_version: AtomicU32,
    order: AtomicU64,
    node_order: u32,
    data_center_id: u8,
}

impl VersionSource {
    pub fn new(node_order: u32, data_center_id: u8) -> Self {
        Self {
            topology_version: AtomicU32::new(1),
            order: AtomicU64::new(0),
            node_order,
            data_center_id,
        }
    }

    /// Order of the local node; entries compare their version's node order
    /// against this to decide whether they were ever updated.
    pub fn node_order(&self) -> u32 {
        self.node_order
    }

    pub fn data_center_id(&self) -> u8 {
        self.data_center_id
    }

    pub fn topology_version(&self) -> u32 {
        self.topology_version.load(AtomicOrdering::Acquire)
    }

    pub fn on_topology_changed(&self, topology_version: u32) {
        self.topology_version
            .store(topology_version, AtomicOrdering::Release);
    }

    /// Next version under the current topology.
    pub fn next(&self) -> EntryVersion {
        EntryVersion::new(
            self.topology_version(),
            self.order.fetch_add(1, AtomicOrdering::AcqRel) + 1,
            self.node_order,
            self.data_center_id,
        )
    }

    /// Next version preserving the topology component of `prev`.
    pub fn next_after(&self, prev: &EntryVersion) -> EntryVersion {
        EntryVersion::new(
            prev.topology_version(),
            self.order.fetch_add(1, AtomicOrdering::AcqRel) + 1,
            self.node_order,
            self.data_center_id,
        )
    }

    /// Next version for a load operation (read-through, reload, preload).
    ///
    /// Load versions draw from the same order sequence as regular versions so
    /// the per-entry order stays monotonic, but never advance topology.
    pub fn next_for_load(&self, prev: &EntryVersion) -> EntryVersion {
        self.next_after(prev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_source_monotonic() {
        let source = VersionSource::new(1, 0);
        let a = source.next();
        let b = source.next();
        assert!(b > a);
        assert_eq!(b.atomic_cmp(&a), Ordering::Greater);
    }

    #[test]
    fn test_next_after_preserves_topology() {
        let source = VersionSource::new(1, 0);
        let a = source.next();
        source.on_topology_changed(7);
        let b = source.next_after(&a);
        assert_eq!(b.topology_version(), a.topology_version());
        assert!(b.order() > a.order());
        let c = source.next();
        assert_eq!(c.topology_version(), 7);
    }

    #[test]
    fn test_atomic_cmp_ignores_topology() {
        let a = EntryVersion::new(1, 10, 1, 0);
        let b = EntryVersion::new(9, 10, 1, 0);
        assert_eq!(a.atomic_cmp(&b), Ordering::Equal);
        assert!(a < b);

        let c = EntryVersion::new(1, 11, 1, 0);
        assert_eq!(c.atomic_cmp(&a), Ordering::Greater);

        // Same order resolves on node order, then data center id.
        let d = EntryVersion::new(1, 10, 2, 0);
        assert_eq!(d.atomic_cmp(&a), Ordering::Greater);
        let e = EntryVersion::new(1, 10, 1, 3);
        assert_eq!(e.atomic_cmp(&a), Ordering::Greater);
    }

    #[test]
    fn test_conflict_version() {
        let remote = EntryVersion::new(1, 5, 3, 2);
        let local = EntryVersion::new(2, 9, 1, 0).with_conflict(remote.clone());
        assert_eq!(local.conflict_version(), &remote);

        let plain = EntryVersion::new(2, 9, 1, 0);
        assert_eq!(plain.conflict_version(), &plain);
    }
}
