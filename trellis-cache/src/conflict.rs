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

use crate::{
    value::{CacheKey, CacheValue},
    version::EntryVersion,
};

/// Snapshot of one side of a conflict resolution: the entry as it is, or the
/// incoming update as it would be.
#[derive(Debug, Clone)]
pub struct VersionedEntryView {
    pub key: CacheKey,
    pub value: Option<CacheValue>,
    pub ttl: i64,
    pub expire_time: i64,
    pub version: EntryVersion,
    pub is_new: bool,
}

/// Resolver verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictDecision {
    /// Keep the current value; the update is discarded.
    UseOld,
    /// Apply the incoming value as-is.
    UseNew,
    /// Apply a locally merged value instead; merge discards the conflict
    /// version so later updates use regular versions again.
    Merge(Option<CacheValue>),
}

/// Resolution outcome: the verdict plus the TTL/expire pair the winning value
/// should carry.
#[derive(Debug, Clone)]
pub struct ConflictContext {
    pub decision: ConflictDecision,
    pub ttl: i64,
    pub expire_time: i64,
}

impl ConflictContext {
    pub fn is_use_old(&self) -> bool {
        self.decision == ConflictDecision::UseOld
    }

    pub fn is_use_new(&self) -> bool {
        self.decision == ConflictDecision::UseNew
    }

    pub fn is_merge(&self) -> bool {
        matches!(self.decision, ConflictDecision::Merge(_))
    }
}

/// Cross-data-center conflict resolver.
pub trait ConflictResolver: Send + Sync + 'static {
    fn resolve(
        &self,
        old: &VersionedEntryView,
        new: &VersionedEntryView,
        atomic_ver_check: bool,
    ) -> ConflictContext;
}
