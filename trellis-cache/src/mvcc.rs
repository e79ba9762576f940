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

use crate::{context::NodeId, version::EntryVersion};

/// One lock candidate on an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MvccCandidate {
    pub version: EntryVersion,
    pub node: NodeId,
    pub thread_id: u64,
    pub local: bool,
    pub owner: bool,
}

/// Per-entry list of concurrent lock candidates.
///
/// This is not a multiversion history: it only tracks who currently holds or
/// awaits the entry lock. The entry consumes it through the narrow query
/// surface below; candidate ordering and promotion are the lock manager's
/// business.
#[derive(Debug, Default, Clone)]
pub struct Mvcc {
    candidates: Vec<MvccCandidate>,
}

impl Mvcc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_candidate(&mut self, candidate: MvccCandidate) {
        self.candidates.push(candidate);
    }

    pub fn remove_candidate(&mut self, version: &EntryVersion) -> bool {
        let before = self.candidates.len();
        self.candidates.retain(|c| &c.version != version);
        self.candidates.len() != before
    }

    /// Any current owner, local or remote.
    pub fn any_owner(&self) -> Option<&MvccCandidate> {
        self.candidates.iter().find(|c| c.owner)
    }

    /// Whether no candidates remain once the given versions are excluded.
    pub fn is_empty(&self, exclude: &[&EntryVersion]) -> bool {
        self.candidates
            .iter()
            .all(|c| exclude.contains(&&c.version))
    }

    pub fn has_candidate(&self, version: &EntryVersion) -> bool {
        self.candidate(version).is_some()
    }

    pub fn candidate(&self, version: &EntryVersion) -> Option<&MvccCandidate> {
        self.candidates.iter().find(|c| &c.version == version)
    }

    pub fn local_candidate(&self, thread_id: u64) -> Option<&MvccCandidate> {
        self.candidates
            .iter()
            .find(|c| c.local && c.thread_id == thread_id)
    }

    pub fn remote_candidate(&self, node: NodeId, thread_id: u64) -> Option<&MvccCandidate> {
        self.candidates
            .iter()
            .find(|c| !c.local && c.node == node && c.thread_id == thread_id)
    }

    pub fn local_owner(&self) -> Option<&MvccCandidate> {
        self.candidates.iter().find(|c| c.local && c.owner)
    }

    pub fn is_owned_by(&self, version: &EntryVersion) -> bool {
        self.candidate(version).is_some_and(|c| c.owner)
    }

    pub fn is_locally_owned(&self, version: &EntryVersion) -> bool {
        self.candidate(version).is_some_and(|c| c.local && c.owner)
    }

    pub fn is_locally_owned_by_thread(&self, thread_id: u64, exclude: &[&EntryVersion]) -> bool {
        self.local_owner()
            .is_some_and(|c| c.thread_id == thread_id && !exclude.contains(&&c.version))
    }

    pub fn is_locally_owned_by_id_or_thread(&self, version: &EntryVersion, thread_id: u64) -> bool {
        self.is_locally_owned(version) || self.is_locally_owned_by_thread(thread_id, &[])
    }

    pub fn local_candidates(&self, exclude: &[&EntryVersion]) -> Vec<&MvccCandidate> {
        self.candidates
            .iter()
            .filter(|c| c.local && !exclude.contains(&&c.version))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ver(order: u64) -> EntryVersion {
        EntryVersion::new(1, order, 1, 0)
    }

    fn candidate(order: u64, local: bool, owner: bool, thread_id: u64) -> MvccCandidate {
        MvccCandidate {
            version: ver(order),
            node: 1,
            thread_id,
            local,
            owner,
        }
    }

    #[test]
    fn test_empty_with_excludes() {
        let mut mvcc = Mvcc::new();
        assert!(mvcc.is_empty(&[]));

        mvcc.add_candidate(candidate(1, true, true, 7));
        assert!(!mvcc.is_empty(&[]));
        assert!(mvcc.is_empty(&[&ver(1)]));
        assert!(!mvcc.is_empty(&[&ver(2)]));
    }

    #[test]
    fn test_ownership_queries() {
        let mut mvcc = Mvcc::new();
        mvcc.add_candidate(candidate(1, true, true, 7));
        mvcc.add_candidate(candidate(2, false, false, 9));

        assert_eq!(mvcc.any_owner().unwrap().thread_id, 7);
        assert!(mvcc.is_owned_by(&ver(1)));
        assert!(!mvcc.is_owned_by(&ver(2)));
        assert!(mvcc.is_locally_owned(&ver(1)));
        assert!(mvcc.is_locally_owned_by_thread(7, &[]));
        assert!(!mvcc.is_locally_owned_by_thread(7, &[&ver(1)]));
        assert!(mvcc.is_locally_owned_by_id_or_thread(&ver(2), 7));
        assert!(mvcc.local_candidate(7).is_some());
        assert!(mvcc.remote_candidate(1, 9).is_some());
        assert_eq!(mvcc.local_candidates(&[]).len(), 1);
    }

    #[test]
    fn test_remove_candidate() {
        let mut mvcc = Mvcc::new();
        mvcc.add_candidate(candidate(1, true, false, 7));
        assert!(mvcc.remove_candidate(&ver(1)));
        assert!(!mvcc.remove_candidate(&ver(1)));
        assert!(mvcc.is_empty(&[]));
    }
}
