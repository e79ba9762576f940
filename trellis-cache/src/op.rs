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

//! Operation requests and outcomes for the entry cell.
//!
//! The original result tuples are restated as named composites and every
//! optional argument is an explicit `Option`.

use std::sync::Arc;

use crate::{
    conflict::ConflictContext,
    context::{NodeId, SubjectId},
    dr::DrType,
    ttl::{ExpiryPolicy, EXPIRE_TIME_CALCULATE, TTL_NOT_CHANGED},
    value::{CacheKey, CacheValue},
    version::EntryVersion,
};

/// Value predicate applied to the entry's current value.
pub type EntryFilter = Arc<dyn Fn(Option<&CacheValue>) -> bool + Send + Sync>;

/// User closure applied by transform operations.
pub trait EntryProcessor: Send + Sync + 'static {
    /// Inspect and optionally mutate the invoke view of the entry, returning
    /// an arbitrary computed result.
    fn process(&self, entry: &mut InvokeEntry<'_>) -> anyhow::Result<Option<CacheValue>>;

    /// Reported in READ events for transform operations.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Mutable entry view handed to an [`EntryProcessor`].
pub struct InvokeEntry<'a> {
    key: &'a CacheKey,
    value: Option<CacheValue>,
    modified: bool,
}

impl<'a> InvokeEntry<'a> {
    pub(crate) fn new(key: &'a CacheKey, value: Option<CacheValue>) -> Self {
        Self {
            key,
            value,
            modified: false,
        }
    }

    pub fn key(&self) -> &CacheKey {
        self.key
    }

    pub fn exists(&self) -> bool {
        self.value.is_some()
    }

    pub fn value(&self) -> Option<&CacheValue> {
        self.value.as_ref()
    }

    pub fn set_value(&mut self, value: CacheValue) {
        self.value = Some(value);
        self.modified = true;
    }

    pub fn remove(&mut self) {
        self.value = None;
        self.modified = true;
    }

    pub(crate) fn modified(&self) -> bool {
        self.modified
    }

    pub(crate) fn into_value(self) -> Option<CacheValue> {
        self.value
    }
}

/// Captured transform result: either the processor's computed value or its
/// failure. Failures never abort the surrounding operation.
#[derive(Debug, Clone)]
pub enum InvokeOutcome {
    Computed(Option<CacheValue>),
    Failed(String),
}

/// Write-set command for atomic updates.
#[derive(Clone)]
pub enum WriteCommand {
    Put(CacheValue),
    Remove,
    Transform(Arc<dyn EntryProcessor>),
}

impl WriteCommand {
    pub fn is_transform(&self) -> bool {
        matches!(self, Self::Transform(_))
    }
}

impl std::fmt::Debug for WriteCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Put(value) => f.debug_tuple("Put").field(value).finish(),
            Self::Remove => write!(f, "Remove"),
            Self::Transform(processor) => f.debug_tuple("Transform").field(&processor.name()).finish(),
        }
    }
}

/// Arguments of a read.
#[derive(Clone, Default)]
pub struct GetRequest {
    pub read_swap: bool,
    pub read_through: bool,
    /// Rehydrate the heap slot from off-heap bytes if needed.
    pub unmarshal: bool,
    pub update_metrics: bool,
    pub event: bool,
    /// The caller only needs a transient view; skip promoting side effects.
    pub temporary: bool,
    pub subject: Option<SubjectId>,
    pub transform_closure: Option<Box<str>>,
    pub task: Option<Box<str>>,
    pub expiry: Option<Arc<dyn ExpiryPolicy>>,
}

impl GetRequest {
    pub fn new() -> Self {
        Self {
            read_swap: true,
            unmarshal: true,
            update_metrics: true,
            event: true,
            ..Default::default()
        }
    }

    pub fn read_through(mut self) -> Self {
        self.read_through = true;
        self
    }
}

/// Arguments of a transactional write.
#[derive(Clone)]
pub struct TxWriteRequest {
    pub value: CacheValue,
    pub write_through: bool,
    pub retval: bool,
    /// `TTL_NOT_CHANGED` keeps the entry's current TTL.
    pub ttl: i64,
    pub event: bool,
    pub metrics: bool,
    pub topology_version: u32,
    pub filter: Option<EntryFilter>,
    pub dr_type: DrType,
    /// Explicit expire time from the replication conflict protocol; wins over
    /// any TTL when ≥ 0.
    pub dr_expire_time: i64,
    pub explicit_version: Option<EntryVersion>,
    pub event_node: NodeId,
    pub affinity_node: NodeId,
    pub subject: Option<SubjectId>,
    pub task: Option<Box<str>>,
}

impl TxWriteRequest {
    pub fn new(value: CacheValue) -> Self {
        Self {
            value,
            write_through: false,
            retval: true,
            ttl: TTL_NOT_CHANGED,
            event: true,
            metrics: true,
            topology_version: 1,
            filter: None,
            dr_type: DrType::None,
            dr_expire_time: EXPIRE_TIME_CALCULATE,
            explicit_version: None,
            event_node: 0,
            affinity_node: 0,
            subject: None,
            task: None,
        }
    }
}

/// Arguments of a transactional remove.
#[derive(Clone)]
pub struct TxRemoveRequest {
    pub write_through: bool,
    pub retval: bool,
    pub event: bool,
    pub metrics: bool,
    pub topology_version: u32,
    pub filter: Option<EntryFilter>,
    pub dr_type: DrType,
    pub explicit_version: Option<EntryVersion>,
    pub event_node: NodeId,
    pub affinity_node: NodeId,
    pub subject: Option<SubjectId>,
    pub task: Option<Box<str>>,
}

impl TxRemoveRequest {
    pub fn new() -> Self {
        Self {
            write_through: false,
            retval: true,
            event: true,
            metrics: true,
            topology_version: 1,
            filter: None,
            dr_type: DrType::None,
            explicit_version: None,
            event_node: 0,
            affinity_node: 0,
            subject: None,
            task: None,
        }
    }
}

impl Default for TxRemoveRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a transactional write/remove.
#[derive(Debug, Clone)]
pub struct TxUpdateOutcome {
    pub updated: bool,
    pub value: Option<CacheValue>,
}

/// Arguments of an atomic update on a local cache.
#[derive(Clone)]
pub struct LocalUpdateRequest {
    pub version: EntryVersion,
    pub command: WriteCommand,
    pub write_through: bool,
    pub retval: bool,
    pub expiry: Option<Arc<dyn ExpiryPolicy>>,
    pub event: bool,
    pub metrics: bool,
    pub filter: Option<EntryFilter>,
    /// The filter is a put-if-absent guard; those must not skew read metrics
    /// or refresh TTL on failure.
    pub put_if_absent_filter: bool,
    pub intercept: bool,
    pub subject: Option<SubjectId>,
    pub task: Option<Box<str>>,
}

impl LocalUpdateRequest {
    pub fn new(version: EntryVersion, command: WriteCommand) -> Self {
        Self {
            version,
            command,
            write_through: false,
            retval: true,
            expiry: None,
            event: true,
            metrics: true,
            filter: None,
            put_if_absent_filter: false,
            intercept: true,
            subject: None,
            task: None,
        }
    }
}

/// Outcome of an atomic local update.
#[derive(Debug, Clone)]
pub struct LocalUpdateOutcome {
    pub changed: bool,
    pub value: Option<CacheValue>,
    pub invoke: Option<InvokeOutcome>,
}

/// Arguments of an atomic update on a replicated/partitioned cache.
#[derive(Clone)]
pub struct AtomicUpdateRequest {
    pub new_version: EntryVersion,
    pub command: WriteCommand,
    pub write_through: bool,
    pub retval: bool,
    pub expiry: Option<Arc<dyn ExpiryPolicy>>,
    pub event: bool,
    pub metrics: bool,
    /// Whether the local node is the primary owner of the key.
    pub primary: bool,
    /// Ignore updates whose version is not newer than the current one.
    pub version_check: bool,
    pub filter: Option<EntryFilter>,
    pub put_if_absent_filter: bool,
    pub dr_type: DrType,
    /// `TTL_NOT_CHANGED` when no explicit TTL travels with the update.
    pub explicit_ttl: i64,
    /// `EXPIRE_TIME_CALCULATE` when the expire time must be derived.
    pub explicit_expire_time: i64,
    pub conflict_version: Option<EntryVersion>,
    pub conflict_resolve: bool,
    pub intercept: bool,
    pub event_node: NodeId,
    pub affinity_node: NodeId,
    pub subject: Option<SubjectId>,
    pub task: Option<Box<str>>,
}

impl AtomicUpdateRequest {
    pub fn new(new_version: EntryVersion, command: WriteCommand) -> Self {
        Self {
            new_version,
            command,
            write_through: false,
            retval: true,
            expiry: None,
            event: true,
            metrics: true,
            primary: true,
            version_check: false,
            filter: None,
            put_if_absent_filter: false,
            dr_type: DrType::None,
            explicit_ttl: TTL_NOT_CHANGED,
            explicit_expire_time: EXPIRE_TIME_CALCULATE,
            conflict_version: None,
            conflict_resolve: false,
            intercept: true,
            event_node: 0,
            affinity_node: 0,
            subject: None,
            task: None,
        }
    }
}

/// Outcome of an atomic replicated/partitioned update.
#[derive(Debug, Clone)]
pub struct AtomicUpdateOutcome {
    pub success: bool,
    pub old_value: Option<CacheValue>,
    pub new_value: Option<CacheValue>,
    pub invoke: Option<InvokeOutcome>,
    /// TTL/expire the caller must forward to backups; sentinels mean "not
    /// changed"/"calculate".
    pub new_sys_ttl: i64,
    pub new_sys_expire_time: i64,
    /// Version to enqueue for the deferred-delete sweeper, set on deletes.
    pub enqueue_version: Option<EntryVersion>,
    pub conflict: Option<ConflictContext>,
    pub committed: bool,
}

impl AtomicUpdateOutcome {
    pub(crate) fn no_change(old_value: Option<CacheValue>, invoke: Option<InvokeOutcome>) -> Self {
        Self {
            success: false,
            old_value,
            new_value: None,
            invoke,
            new_sys_ttl: TTL_NOT_CHANGED,
            new_sys_expire_time: EXPIRE_TIME_CALCULATE,
            enqueue_version: None,
            conflict: None,
            committed: false,
        }
    }
}

/// Entry snapshot served to preloader/replication peers.
#[derive(Debug, Clone)]
pub struct EntryInfo {
    pub key: CacheKey,
    pub version: EntryVersion,
    pub ttl: i64,
    pub expire_time: i64,
    pub is_new: bool,
    pub deleted: bool,
    /// Absent when the entry is expired.
    pub value: Option<CacheValue>,
}

/// Peek modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeekMode {
    /// Current transaction's write set only.
    Tx,
    /// In-memory entry.
    Global,
    NearOnly,
    PartitionedOnly,
    /// TX when an active transaction exists, GLOBAL otherwise.
    Smart,
    /// Swap tier only.
    Swap,
    /// Underlying store only.
    Db,
}

/// Peek outcome: a definite value decision, a miss, or a fail-fast filter
/// rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Peeked {
    Miss,
    Value(Option<CacheValue>),
    FilterFailed,
}

impl Peeked {
    pub fn into_value(self) -> Option<CacheValue> {
        match self {
            Self::Value(value) => value,
            Self::Miss | Self::FilterFailed => None,
        }
    }
}
